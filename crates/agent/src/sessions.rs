//! Per-session serialization of plan execution.
//!
//! One plan executes to completion before the next one for the same session
//! begins; plans for different sessions run freely in parallel. This is what
//! prevents two near-simultaneous "create a web server" requests from racing
//! each other into duplicate companions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use provisio_core::SessionId;

#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the session. Dropping the guard releases
    /// it; lock values are kept so waiters on the same session queue up.
    pub async fn acquire(&self, session_id: &SessionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(session_id.0.clone()).or_default())
        };
        lock.lock_owned().await
    }
}
