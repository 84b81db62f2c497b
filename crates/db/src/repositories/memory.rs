//! In-memory ledger repository for tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use provisio_core::{ExecutionRecord, LedgerEntry, LedgerEntryId, Operation, SessionId};

use super::{LedgerRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryLedgerRepository {
    entries_by_session: Mutex<HashMap<String, Vec<LedgerEntry>>>,
}

impl InMemoryLedgerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<LedgerEntry>>> {
        match self.entries_by_session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<(), RepositoryError> {
        let mut entries = self.lock();
        let exists = entries
            .values()
            .flatten()
            .any(|existing| existing.entry_id == entry.entry_id);
        if exists {
            return Err(RepositoryError::DuplicateEntry(entry.entry_id.0.clone()));
        }

        entries.entry(entry.session_id.0.clone()).or_default().push(entry);
        Ok(())
    }

    async fn find_entry(
        &self,
        entry_id: &LedgerEntryId,
    ) -> Result<Option<LedgerEntry>, RepositoryError> {
        Ok(self
            .lock()
            .values()
            .flatten()
            .find(|entry| &entry.entry_id == entry_id)
            .cloned())
    }

    async fn list_entries(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let mut entries = self.lock().get(&session_id.0).cloned().unwrap_or_default();
        entries.sort_by_key(|entry| entry.version);
        Ok(entries)
    }

    async fn latest_entry(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<LedgerEntry>, RepositoryError> {
        Ok(self.list_entries(session_id).await?.into_iter().last())
    }

    async fn list_active(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let entries = self.list_entries(session_id).await?;

        let deleted_ids: Vec<String> = entries
            .iter()
            .flat_map(|entry| &entry.records)
            .filter(|record| record.operation == Operation::Delete && record.succeeded())
            .filter_map(|record| record.provider_id.clone())
            .collect();

        Ok(entries
            .iter()
            .flat_map(|entry| &entry.records)
            .filter(|record| record.operation == Operation::Create && record.succeeded())
            .filter(|record| {
                record
                    .provider_id
                    .as_ref()
                    .is_some_and(|provider_id| !deleted_ids.contains(provider_id))
            })
            .cloned()
            .collect())
    }
}
