//! Retention purge engine.
//!
//! Deletes conversations whose last access predates the retention window.
//! Failures are swallowed and signaled only through the error counter, so a
//! broken scope never takes down the caller.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::conversations::store::sqlite_store::ConversationStore;

/// Result of one purge invocation against one scope.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PurgeOutcome {
    /// Conversations deleted; exact count of rows matching the predicate.
    pub deleted: u64,
    /// Internal failures encountered.
    pub errors: u64,
}

/// Purge every conversation in the scope with
/// `last_accessed_at < now - retention_threshold_ms`.
///
/// Idempotent: an immediate second call deletes zero more rows. Safe to run
/// alongside normal reads and writes; the scope serializes them.
pub async fn purge_scope(
    store: &dyn ConversationStore,
    retention_threshold_ms: u64,
) -> PurgeOutcome {
    let now_ms = Utc::now().timestamp_millis();
    let Ok(threshold) = i64::try_from(retention_threshold_ms) else {
        warn!(retention_threshold_ms, "retention threshold exceeds i64");
        return PurgeOutcome {
            deleted: 0,
            errors: 1,
        };
    };
    let cutoff = now_ms.saturating_sub(threshold);

    match store.delete_older_than(cutoff).await {
        Ok(deleted) => {
            debug!(deleted, cutoff, "retention purge completed");
            PurgeOutcome { deleted, errors: 0 }
        }
        Err(err) => {
            warn!(error = %err, cutoff, "retention purge failed");
            PurgeOutcome {
                deleted: 0,
                errors: 1,
            }
        }
    }
}
