//! Retention enforcement: the purge engine and its background scheduler.

pub mod purge;
pub mod scheduler;

pub use purge::{PurgeOutcome, purge_scope};
pub use scheduler::{PurgeCycleSummary, RetentionScheduler, run_purge_cycle};
