//! Background retention scheduler.
//!
//! Translates a periodic clock tick into one purge invocation per known
//! account scope. One scope's failure never prevents attempting the others.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::conversations::core::config::RetentionConfig;
use crate::conversations::retention::purge::purge_scope;
use crate::conversations::store::scope::ScopeManager;

/// Aggregated result of one purge cycle across all scopes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PurgeCycleSummary {
    /// Account scopes visited.
    pub accounts: usize,
    /// Total conversations deleted.
    pub deleted: u64,
    /// Total failures across scopes (including enumeration failures).
    pub errors: u64,
}

/// Run one purge cycle over every account the registry knows about.
///
/// A registry enumeration failure aborts the cycle with `errors = 1`; a
/// single scope's failure is counted and the cycle continues.
pub async fn run_purge_cycle(
    scopes: &ScopeManager,
    retention_threshold_ms: u64,
) -> PurgeCycleSummary {
    let accounts = match scopes.known_accounts().await {
        Ok(accounts) => accounts,
        Err(err) => {
            warn!(error = %err, "account enumeration failed; skipping purge cycle");
            return PurgeCycleSummary {
                accounts: 0,
                deleted: 0,
                errors: 1,
            };
        }
    };

    let mut summary = PurgeCycleSummary {
        accounts: accounts.len(),
        ..PurgeCycleSummary::default()
    };

    for account in accounts {
        let store = match scopes.scope(&account).await {
            Ok(store) => store,
            Err(err) => {
                warn!(account = %account, error = %err, "scope open failed during purge");
                summary.errors += 1;
                continue;
            }
        };

        let outcome = purge_scope(store.as_ref(), retention_threshold_ms).await;
        info!(
            account = %account,
            deleted = outcome.deleted,
            errors = outcome.errors,
            "scope purge finished"
        );
        summary.deleted += outcome.deleted;
        summary.errors += outcome.errors;
    }

    summary
}

/// Background worker that fires a purge cycle on a fixed cadence.
pub struct RetentionScheduler {
    scopes: Arc<ScopeManager>,
    config: RetentionConfig,
    shutdown: Arc<Notify>,
}

impl RetentionScheduler {
    /// Create a new retention scheduler.
    #[must_use]
    pub fn new(scopes: Arc<ScopeManager>, config: RetentionConfig) -> Self {
        Self {
            scopes,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a shutdown notifier to stop the scheduler.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the scheduler as a tokio task.
    ///
    /// Returns a `JoinHandle` that can be used to await completion.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the purge loop until shutdown is signaled.
    async fn run(&self) {
        if !self.config.enabled {
            info!("Retention scheduler is disabled");
            return;
        }

        let interval = Duration::from_secs(self.config.purge_interval_seconds);
        info!(?interval, "Starting retention scheduler");

        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    let summary =
                        run_purge_cycle(&self.scopes, self.config.threshold_ms).await;
                    if summary.deleted > 0 || summary.errors > 0 {
                        info!(
                            accounts = summary.accounts,
                            deleted = summary.deleted,
                            errors = summary.errors,
                            "Purge cycle completed"
                        );
                    } else {
                        debug!(accounts = summary.accounts, "Purge cycle found nothing to delete");
                    }
                }
                () = self.shutdown.notified() => {
                    info!("Retention scheduler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    use crate::conversations::core::config::StorageConfig;
    use crate::conversations::core::ids::{AccountId, SessionId};
    use crate::conversations::core::turn::TurnMessage;
    use crate::conversations::store::sqlite_store::ConversationStore;

    const DAY: i64 = 86_400_000;
    const THIRTY_DAYS_MS: u64 = 30 * 86_400_000;

    fn test_config(dir: &tempfile::TempDir) -> StorageConfig {
        StorageConfig {
            data_dir: dir.path().to_path_buf(),
            registry_file: "accounts.sqlite".to_string(),
        }
    }

    #[tokio::test]
    async fn test_cycle_covers_every_registered_scope() {
        let dir = tempfile::tempdir().unwrap();
        let scopes = ScopeManager::open(&test_config(&dir)).await.unwrap();
        let now = Utc::now().timestamp_millis();

        for name in ["a1", "a2"] {
            let account = AccountId::new(name).unwrap();
            let store = scopes.scope(&account).await.unwrap();
            store
                .append_turn(
                    SessionId::new("stale"),
                    account.clone(),
                    vec![TurnMessage::user("q")],
                )
                .await
                .unwrap();
            store.set_last_accessed("stale", now - 31 * DAY).await;
        }

        let summary = run_purge_cycle(&scopes, THIRTY_DAYS_MS).await;
        assert_eq!(summary.accounts, 2);
        assert_eq!(summary.deleted, 2);
        assert_eq!(summary.errors, 0);

        let second = run_purge_cycle(&scopes, THIRTY_DAYS_MS).await;
        assert_eq!(second.deleted, 0);
    }

    #[tokio::test]
    async fn test_cycle_on_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let scopes = ScopeManager::open(&test_config(&dir)).await.unwrap();

        let summary = run_purge_cycle(&scopes, THIRTY_DAYS_MS).await;
        assert_eq!(summary, PurgeCycleSummary::default());
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let scopes = Arc::new(ScopeManager::open(&test_config(&dir)).await.unwrap());
        let config = RetentionConfig {
            threshold_ms: THIRTY_DAYS_MS,
            purge_interval_seconds: 3_600,
            enabled: true,
        };

        let scheduler = RetentionScheduler::new(scopes, config);
        let shutdown = scheduler.shutdown_notifier();
        let handle = scheduler.spawn();

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not shut down")
            .unwrap();
    }

    #[tokio::test]
    async fn test_disabled_scheduler_exits_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let scopes = Arc::new(ScopeManager::open(&test_config(&dir)).await.unwrap());
        let config = RetentionConfig {
            enabled: false,
            ..RetentionConfig::default()
        };

        let handle = RetentionScheduler::new(scopes, config).spawn();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("disabled scheduler should return")
            .unwrap();
    }
}
