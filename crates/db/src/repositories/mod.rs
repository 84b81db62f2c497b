use async_trait::async_trait;
use thiserror::Error;

use provisio_core::{ExecutionRecord, LedgerEntry, LedgerEntryId, SessionId};

pub mod ledger;
pub mod memory;

pub use ledger::SqlLedgerRepository;
pub use memory::InMemoryLedgerRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("ledger entry {0} already exists")]
    DuplicateEntry(String),
}

/// Persistence for the append-only session ledger.
///
/// Entries are only ever appended; the active-inventory query derives what
/// still exists from create/delete record pairs rather than mutating rows.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn append_entry(&self, entry: LedgerEntry) -> Result<(), RepositoryError>;

    async fn find_entry(
        &self,
        entry_id: &LedgerEntryId,
    ) -> Result<Option<LedgerEntry>, RepositoryError>;

    /// All entries for a session, in chain order (version ascending).
    async fn list_entries(&self, session_id: &SessionId)
        -> Result<Vec<LedgerEntry>, RepositoryError>;

    async fn latest_entry(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<LedgerEntry>, RepositoryError>;

    /// Successfully created resources with no later successful delete.
    async fn list_active(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ExecutionRecord>, RepositoryError>;
}
