//! Per-account scope resolution.
//!
//! One exclusive store per account: the same account id always resolves to
//! the same scope, distinct accounts to distinct, non-interacting scopes.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::conversations::core::config::StorageConfig;
use crate::conversations::core::errors::StoreResult;
use crate::conversations::core::ids::AccountId;
use crate::conversations::store::registry::AccountRegistry;
use crate::conversations::store::sqlite_store::SqliteConversationStore;

/// Maps accounts to their exclusive storage scopes.
pub struct ScopeManager {
    data_dir: PathBuf,
    registry: AccountRegistry,
    scopes: DashMap<AccountId, Arc<SqliteConversationStore>>,
    open_lock: Mutex<()>,
}

impl ScopeManager {
    /// Create the data directory and open the account registry.
    ///
    /// # Errors
    /// Returns an error if the directory or registry cannot be created.
    pub async fn open(config: &StorageConfig) -> StoreResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let registry = AccountRegistry::open(config).await?;

        Ok(Self {
            data_dir: config.data_dir.clone(),
            registry,
            scopes: DashMap::new(),
            open_lock: Mutex::new(()),
        })
    }

    /// Resolve the storage scope for an account, opening it on first use.
    ///
    /// First use also appends the account to the durable registry so the
    /// retention scheduler will cover this scope.
    ///
    /// # Errors
    /// Returns an error if the scope database cannot be opened or the
    /// registry write fails.
    pub async fn scope(&self, account_id: &AccountId) -> StoreResult<Arc<SqliteConversationStore>> {
        if let Some(existing) = self.scopes.get(account_id) {
            return Ok(Arc::clone(existing.value()));
        }

        // Exactly one open per scope, even under concurrent first requests.
        let _guard = self.open_lock.lock().await;
        if let Some(existing) = self.scopes.get(account_id) {
            return Ok(Arc::clone(existing.value()));
        }

        let path = self.data_dir.join(format!("{account_id}.sqlite"));
        let store = Arc::new(SqliteConversationStore::open(&path).await?);
        self.registry.record(account_id).await?;
        self.scopes.insert(account_id.clone(), Arc::clone(&store));
        Ok(store)
    }

    /// Resolve the scope only if the account already has one.
    ///
    /// Read paths use this so that probing an unknown account never creates
    /// a database file or registers the account for retention.
    ///
    /// # Errors
    /// Returns an error if an existing scope database cannot be opened.
    pub async fn existing_scope(
        &self,
        account_id: &AccountId,
    ) -> StoreResult<Option<Arc<SqliteConversationStore>>> {
        if let Some(existing) = self.scopes.get(account_id) {
            return Ok(Some(Arc::clone(existing.value())));
        }

        let path = self.data_dir.join(format!("{account_id}.sqlite"));
        if !path.exists() {
            return Ok(None);
        }

        // Scope file left by a previous run; open and cache it as usual.
        self.scope(account_id).await.map(Some)
    }

    /// Enumerate every account that has ever opened a scope.
    ///
    /// # Errors
    /// Returns an error if the registry read fails.
    pub async fn known_accounts(&self) -> StoreResult<Vec<AccountId>> {
        self.registry.list().await
    }
}
