//! Per-conversation rebuild serialization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

type Registry = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Hands out one async mutex per conversation id.
///
/// Rebuilds of the same conversation queue behind each other; rebuilds of
/// different conversations never contend. An entry lives only while some
/// task holds or waits for it, so the registry stays bounded by the number
/// of conversations in flight.
#[derive(Debug, Clone, Default)]
pub struct RebuildLocks {
    locks: Registry,
}

/// Exclusive rebuild rights on one conversation, released on drop.
#[derive(Debug)]
pub struct RebuildGuard {
    guard: Option<OwnedMutexGuard<()>>,
    conversation_id: String,
    locks: Registry,
}

impl RebuildLocks {
    /// Create an empty lock registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive rebuild rights on `conversation_id`.
    pub async fn acquire(&self, conversation_id: &str) -> RebuildGuard {
        // Cloned under the registry lock so a releasing guard sees this waiter
        let lock = lock_registry(&self.locks)
            .entry(conversation_id.to_string())
            .or_default()
            .clone();

        debug!(conversation_id = %conversation_id, "Waiting for rebuild lock");
        RebuildGuard {
            guard: Some(lock.lock_owned().await),
            conversation_id: conversation_id.to_string(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of conversations currently locked or awaited.
    pub fn len(&self) -> usize {
        lock_registry(&self.locks).len()
    }

    /// Whether no conversation is locked or awaited.
    pub fn is_empty(&self) -> bool {
        lock_registry(&self.locks).is_empty()
    }
}

impl Drop for RebuildGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = lock_registry(&self.locks);
        let idle = locks
            .get(&self.conversation_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.conversation_id);
        }
    }
}

fn lock_registry(
    locks: &Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}
