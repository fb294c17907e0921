//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::conversations::core::config::RelayConfig;
use crate::conversations::store::scope::ScopeManager;
use crate::router::generator::OllamaGenerator;
use crate::router::session_router::SessionRouter;

/// Shared application state.
pub struct AppState {
    /// Validated relay configuration.
    pub config: RelayConfig,
    /// Per-account scope manager.
    pub scopes: Arc<ScopeManager>,
    /// Query router.
    pub router: SessionRouter,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or storage cannot be
    /// opened.
    pub async fn new(
        config: RelayConfig,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        config.validate()?;

        let scopes = Arc::new(ScopeManager::open(&config.storage).await?);
        let generator = Arc::new(OllamaGenerator::new(&config.generator)?);
        let router = SessionRouter::new(Arc::clone(&scopes), generator);

        Ok(Arc::new(Self {
            config,
            scopes,
            router,
        }))
    }
}
