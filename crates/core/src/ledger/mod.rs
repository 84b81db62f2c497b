//! Session ledger
//!
//! Durable, append-only record of everything a session created or cleaned
//! up. Entries within a session form a hash chain (prev hash + entry hash +
//! HMAC-SHA256 signature), so history tampering is detectable. Deletion is
//! itself a recorded action — a `Cleanup` entry — never an edit of history.
//!
//! This module seals and verifies entries; persistence lives behind the
//! repository traits in `provisio-db`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::plan::{CreationPlan, PlanStatus, SessionId};
use crate::domain::record::ExecutionRecord;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerEntryId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Provision,
    Cleanup,
}

impl LedgerEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Cleanup => "cleanup",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "provision" => Some(Self::Provision),
            "cleanup" => Some(Self::Cleanup),
            _ => None,
        }
    }
}

/// Unsealed entry content, produced by the provisioning service when a plan
/// finishes executing.
#[derive(Clone, Debug)]
pub struct LedgerDraft {
    pub session_id: SessionId,
    pub kind: LedgerEntryKind,
    pub plan: CreationPlan,
    pub plan_status: PlanStatus,
    pub rollback_failed: bool,
    pub records: Vec<ExecutionRecord>,
    pub next_steps: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: LedgerEntryId,
    pub session_id: SessionId,
    pub kind: LedgerEntryKind,
    /// Position in the session chain, starting at 1.
    pub version: u32,
    pub plan: CreationPlan,
    pub plan_status: PlanStatus,
    pub rollback_failed: bool,
    pub records: Vec<ExecutionRecord>,
    pub next_steps: Vec<String>,
    pub content_hash: String,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub signature: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub session_id: SessionId,
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

/// Seals ledger drafts into signed chain entries and verifies stored chains.
#[derive(Clone, Debug)]
pub struct LedgerService {
    signing_key: Vec<u8>,
}

impl LedgerService {
    pub fn new(signing_key: impl AsRef<[u8]>) -> Self {
        Self { signing_key: signing_key.as_ref().to_vec() }
    }

    /// Seal a draft as the next entry after `prev` (None for the first
    /// entry of a session).
    pub fn seal(&self, draft: LedgerDraft, prev: Option<&LedgerEntry>) -> LedgerEntry {
        let version = prev.map(|entry| entry.version.saturating_add(1)).unwrap_or(1);
        let prev_hash = prev.map(|entry| entry.entry_hash.clone());
        let recorded_at = Utc::now();
        let entry_id = LedgerEntryId(Uuid::new_v4().to_string());

        let content_hash = content_hash(&draft);
        let entry_hash = hash_entry_material(
            &draft.session_id,
            version,
            draft.kind,
            &content_hash,
            prev_hash.as_deref(),
            recorded_at,
        );
        let signature = hmac_hex(&self.signing_key, entry_hash.as_bytes());

        LedgerEntry {
            entry_id,
            session_id: draft.session_id,
            kind: draft.kind,
            version,
            plan: draft.plan,
            plan_status: draft.plan_status,
            rollback_failed: draft.rollback_failed,
            records: draft.records,
            next_steps: draft.next_steps,
            content_hash,
            prev_hash,
            entry_hash,
            signature,
            recorded_at,
        }
    }

    /// Walk a session's entries in order and re-derive every hash and
    /// signature. Any mismatch marks the chain invalid at that entry.
    pub fn verify_chain(&self, session_id: &SessionId, entries: &[LedgerEntry]) -> ChainVerification {
        if entries.is_empty() {
            return ChainVerification {
                session_id: session_id.clone(),
                valid: false,
                verified_entries: 0,
                latest_hash: None,
                failure_reason: Some("no ledger entries found for session".to_string()),
            };
        }

        let mut previous_hash: Option<String> = None;
        for (index, entry) in entries.iter().enumerate() {
            let expected_version = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
            if entry.version != expected_version {
                return self.failure(
                    session_id,
                    index,
                    previous_hash,
                    format!(
                        "version mismatch at entry {}: expected {}, found {}",
                        entry.entry_id.0, expected_version, entry.version
                    ),
                );
            }

            if entry.prev_hash != previous_hash {
                return self.failure(
                    session_id,
                    index,
                    previous_hash,
                    format!("previous hash mismatch at entry {}", entry.entry_id.0),
                );
            }

            let recomputed = hash_entry_material(
                &entry.session_id,
                entry.version,
                entry.kind,
                &entry.content_hash,
                entry.prev_hash.as_deref(),
                entry.recorded_at,
            );
            if recomputed != entry.entry_hash {
                return self.failure(
                    session_id,
                    index,
                    previous_hash,
                    format!("entry hash mismatch at entry {}", entry.entry_id.0),
                );
            }

            let expected_signature = hmac_hex(&self.signing_key, entry.entry_hash.as_bytes());
            if expected_signature != entry.signature {
                return self.failure(
                    session_id,
                    index,
                    previous_hash,
                    format!("signature mismatch at entry {}", entry.entry_id.0),
                );
            }

            previous_hash = Some(entry.entry_hash.clone());
        }

        ChainVerification {
            session_id: session_id.clone(),
            valid: true,
            verified_entries: entries.len(),
            latest_hash: previous_hash,
            failure_reason: None,
        }
    }

    fn failure(
        &self,
        session_id: &SessionId,
        verified_entries: usize,
        latest_hash: Option<String>,
        reason: String,
    ) -> ChainVerification {
        ChainVerification {
            session_id: session_id.clone(),
            valid: false,
            verified_entries,
            latest_hash,
            failure_reason: Some(reason),
        }
    }
}

fn content_hash(draft: &LedgerDraft) -> String {
    #[derive(Serialize)]
    struct ContentMaterial<'a> {
        plan: &'a CreationPlan,
        plan_status: PlanStatus,
        rollback_failed: bool,
        records: &'a [ExecutionRecord],
        next_steps: &'a [String],
    }

    let material = ContentMaterial {
        plan: &draft.plan,
        plan_status: draft.plan_status,
        rollback_failed: draft.rollback_failed,
        records: &draft.records,
        next_steps: &draft.next_steps,
    };

    let payload = match serde_json::to_vec(&material) {
        Ok(payload) => payload,
        Err(_) => draft.session_id.0.as_bytes().to_vec(),
    };
    sha256_hex(&payload)
}

fn hash_entry_material(
    session_id: &SessionId,
    version: u32,
    kind: LedgerEntryKind,
    content_hash: &str,
    prev_hash: Option<&str>,
    recorded_at: DateTime<Utc>,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}|{}",
        session_id.0,
        version,
        kind.as_str(),
        content_hash,
        prev_hash.unwrap_or(""),
        recorded_at.to_rfc3339(),
    );
    sha256_hex(material.as_bytes())
}

fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return sha256_hex(payload),
    };
    mac.update(payload);
    encode_hex(mac.finalize().into_bytes().as_slice())
}

fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    encode_hex(digest.as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::{LedgerDraft, LedgerEntryKind, LedgerService};
    use crate::catalog::Catalog;
    use crate::domain::plan::{PlanStatus, SessionId};
    use crate::domain::resource::{Purpose, ResourceSpec, ResourceType};
    use crate::resolver::PlanBuilder;

    fn draft(session: &str, kind: LedgerEntryKind) -> LedgerDraft {
        let catalog = Catalog::builtin().expect("catalog");
        let session_id = SessionId(session.to_string());
        let plan = PlanBuilder::new(&catalog)
            .build_plan(
                ResourceSpec::new(ResourceType::S3Bucket, Purpose::new("logs"), "default"),
                &session_id,
            )
            .expect("plan");

        LedgerDraft {
            session_id,
            kind,
            plan,
            plan_status: PlanStatus::Succeeded,
            rollback_failed: false,
            records: Vec::new(),
            next_steps: vec!["set lifecycle rules".to_string()],
        }
    }

    #[test]
    fn seal_links_entries_into_a_chain() {
        let service = LedgerService::new("signing-key");
        let session = SessionId("sess-ledger-1".to_string());

        let first = service.seal(draft("sess-ledger-1", LedgerEntryKind::Provision), None);
        let second =
            service.seal(draft("sess-ledger-1", LedgerEntryKind::Cleanup), Some(&first));

        assert_eq!(first.version, 1);
        assert_eq!(first.prev_hash, None);
        assert_eq!(second.version, 2);
        assert_eq!(second.prev_hash, Some(first.entry_hash.clone()));

        let verification = service.verify_chain(&session, &[first, second]);
        assert!(verification.valid);
        assert_eq!(verification.verified_entries, 2);
    }

    #[test]
    fn verify_chain_detects_signature_tampering() {
        let service = LedgerService::new("signing-key");
        let session = SessionId("sess-ledger-2".to_string());

        let first = service.seal(draft("sess-ledger-2", LedgerEntryKind::Provision), None);
        let mut second =
            service.seal(draft("sess-ledger-2", LedgerEntryKind::Provision), Some(&first));
        second.signature = "tampered".to_string();

        let verification = service.verify_chain(&session, &[first, second]);
        assert!(!verification.valid);
        assert_eq!(verification.verified_entries, 1);
        assert!(verification
            .failure_reason
            .unwrap_or_default()
            .contains("signature mismatch"));
    }

    #[test]
    fn verify_chain_detects_reordered_entries() {
        let service = LedgerService::new("signing-key");
        let session = SessionId("sess-ledger-3".to_string());

        let first = service.seal(draft("sess-ledger-3", LedgerEntryKind::Provision), None);
        let second =
            service.seal(draft("sess-ledger-3", LedgerEntryKind::Cleanup), Some(&first));

        let verification = service.verify_chain(&session, &[second, first]);
        assert!(!verification.valid);
    }

    #[test]
    fn empty_chain_is_reported_invalid_with_reason() {
        let service = LedgerService::new("signing-key");
        let verification =
            service.verify_chain(&SessionId("sess-ledger-4".to_string()), &[]);
        assert!(!verification.valid);
        assert!(verification.failure_reason.is_some());
    }

    #[test]
    fn different_signing_keys_produce_detectable_mismatch() {
        let sealer = LedgerService::new("key-a");
        let verifier = LedgerService::new("key-b");
        let session = SessionId("sess-ledger-5".to_string());

        let entry = sealer.seal(draft("sess-ledger-5", LedgerEntryKind::Provision), None);
        let verification = verifier.verify_chain(&session, &[entry]);
        assert!(!verification.valid);
    }
}
