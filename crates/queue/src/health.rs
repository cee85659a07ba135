//! Queue store health checks.

use tracing::{debug, error};

use crate::store::QueueStore;

/// Check that the backing store answers.
pub async fn check_connection(store: &dyn QueueStore) -> bool {
    match store.ping().await {
        Ok(()) => {
            debug!("Queue store connection healthy");
            true
        }
        Err(e) => {
            error!(code = e.code(), "Failed to reach queue store: {}", e);
            false
        }
    }
}
