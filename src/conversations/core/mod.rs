//! Core conversation types, configuration, and errors.

pub mod config;
pub mod errors;
pub mod ids;
pub mod turn;

pub use config::{
    DEFAULT_PURGE_INTERVAL_SECONDS, DEFAULT_RETENTION_MS, GeneratorConfig, RelayConfig,
    RetentionConfig, ServerConfig, StorageConfig,
};
pub use errors::{StoreError, StoreResult};
pub use ids::{AccountId, AccountIdError, SessionId};
pub use turn::{
    ConversationRecord, ConversationWithMessages, MessageRecord, MessageRole, StorageStats,
    TurnMessage,
};
