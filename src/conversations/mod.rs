//! Conversation storage and retention subsystem.
//!
//! Organized into:
//! - `core`: Configuration, errors, identifiers, and record types
//! - `store`: `SQLite` conversation store, per-account scopes, account registry
//! - `retention`: Time-windowed purge engine and background scheduler

pub mod core;
pub mod retention;
pub mod store;

// Re-export commonly used types for convenience
pub use self::core::{
    AccountId, AccountIdError, ConversationRecord, ConversationWithMessages, GeneratorConfig,
    MessageRecord, MessageRole, RelayConfig, RetentionConfig, ServerConfig, SessionId,
    StorageConfig, StorageStats, StoreError, StoreResult, TurnMessage,
};
pub use retention::{
    PurgeCycleSummary, PurgeOutcome, RetentionScheduler, purge_scope, run_purge_cycle,
};
pub use store::{ConversationStore, ScopeManager, SqliteConversationStore, StoreFuture};
