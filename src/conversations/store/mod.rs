//! Conversation storage: the `SQLite` store, per-account scope manager, and
//! durable account registry.

pub mod registry;
pub mod scope;
pub mod sqlite_store;

pub use registry::AccountRegistry;
pub use scope::ScopeManager;
pub use sqlite_store::{ConversationStore, SqliteConversationStore, StoreFuture};
