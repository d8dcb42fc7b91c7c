//! Conversations currently being processed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

/// Membership set keyed by conversation id.
///
/// At most one processing cycle may hold a conversation at a time. Cloning
/// shares the underlying set.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`. Returns `false` if it is already claimed.
    pub async fn try_claim(&self, id: &str) -> bool {
        let claimed = self.ids.lock().await.insert(id.to_string());
        if !claimed {
            debug!(conversation = %id, "Conversation already in flight");
        }
        claimed
    }

    /// Release `id`. Releasing an id that is not held does nothing.
    pub async fn release(&self, id: &str) {
        if self.ids.lock().await.remove(id) {
            debug!(conversation = %id, "Conversation released");
        }
    }

    /// Release `id` after `grace`, absorbing duplicate notifications that
    /// arrive just after processing ends.
    pub async fn release_after(&self, id: &str, grace: Duration) {
        tokio::time::sleep(grace).await;
        self.release(id).await;
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.ids.lock().await.contains(id)
    }

    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.lock().await.is_empty()
    }
}
