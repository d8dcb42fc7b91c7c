use tokio::time::Instant;
use tracing::info;

use super::{DispatchError, Dispatcher, Job};
use crate::collect::{Collect, Slot};

impl Dispatcher {
    /// Look up existing archives of every URL on every playback slot.
    ///
    /// Read-only: no bundles are produced and nothing is submitted. A slot
    /// without a copy records [`BackendError::NotFound`](crate::collect::BackendError::NotFound).
    ///
    /// # Errors
    ///
    /// Same conditions as [`Dispatcher::wayback`].
    pub async fn playback(&self, urls: &[String]) -> Result<Vec<Collect>, DispatchError> {
        if urls.is_empty() {
            return Err(DispatchError::EmptyInput);
        }

        let deadline = Instant::now() + self.timeout;
        info!(urls = urls.len(), slots = Slot::PLAYBACK.len(), "Dispatching playback batch");

        let jobs: Vec<_> = urls
            .iter()
            .flat_map(|src| Slot::PLAYBACK.map(|slot| (src.clone(), slot, Job::Lookup)))
            .collect();
        self.fan_out(jobs, deadline).await
    }
}
