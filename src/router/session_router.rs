//! Session router: one user query in, one generated response out, with the
//! turn persisted as a side effect.
//!
//! Storage failures degrade observability, never availability: once
//! generation succeeds the caller always gets a response and a session id,
//! whatever the store did.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::conversations::core::ids::{AccountId, SessionId};
use crate::conversations::core::turn::TurnMessage;
use crate::conversations::store::scope::ScopeManager;
use crate::conversations::store::sqlite_store::ConversationStore;
use crate::router::generator::{GenerationError, Generator};

/// Result of one routed query.
#[derive(Clone, Debug, Serialize)]
pub struct QueryOutcome {
    /// Generated response text.
    pub response: String,
    /// Session the turn belongs to (generated when the caller gave none).
    pub session_id: SessionId,
}

/// Mediates queries between the generation collaborator and the store.
pub struct SessionRouter {
    scopes: Arc<ScopeManager>,
    generator: Arc<dyn Generator>,
}

impl SessionRouter {
    /// Create a new session router.
    #[must_use]
    pub fn new(scopes: Arc<ScopeManager>, generator: Arc<dyn Generator>) -> Self {
        Self { scopes, generator }
    }

    /// Handle one query for an account.
    ///
    /// Assigns a fresh session id when none is given, invokes the generation
    /// collaborator, then appends the user/assistant pair to the account's
    /// scope. The append happens strictly after generation returns; if
    /// generation fails nothing is stored and the error propagates. Storage
    /// faults are logged and never fail the query.
    ///
    /// # Errors
    /// Returns an error only when generation fails.
    pub async fn handle_query(
        &self,
        account_id: &AccountId,
        session_id: Option<SessionId>,
        prompt: &str,
    ) -> Result<QueryOutcome, GenerationError> {
        let session_id = session_id.unwrap_or_else(SessionId::generate);

        let scope = match self.scopes.scope(account_id).await {
            Ok(scope) => Some(scope),
            Err(err) => {
                warn!(
                    account_id = %account_id,
                    error = %err,
                    "scope resolution failed; turn will not be stored"
                );
                None
            }
        };

        let response = self
            .generator
            .generate(prompt, Some(session_id.as_str()))
            .await?;

        if let Some(scope) = scope {
            let turn = vec![
                TurnMessage::user(prompt),
                TurnMessage::assistant(response.clone()),
            ];
            if let Err(err) = scope
                .append_turn(session_id.clone(), account_id.clone(), turn)
                .await
            {
                warn!(
                    session_id = %session_id,
                    error = %err,
                    "failed to store turn; response still returned"
                );
            }
        }

        Ok(QueryOutcome {
            response,
            session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::conversations::core::config::StorageConfig;
    use crate::conversations::core::turn::MessageRole;
    use crate::router::generator::GenFuture;

    struct EchoGenerator;

    impl Generator for EchoGenerator {
        fn generate<'a>(
            &'a self,
            prompt: &'a str,
            _session_context: Option<&'a str>,
        ) -> GenFuture<'a, Result<String, GenerationError>> {
            let reply = format!("echo: {prompt}");
            Box::pin(async move { Ok(reply) })
        }
    }

    struct FailingGenerator;

    impl Generator for FailingGenerator {
        fn generate<'a>(
            &'a self,
            _prompt: &'a str,
            _session_context: Option<&'a str>,
        ) -> GenFuture<'a, Result<String, GenerationError>> {
            Box::pin(async { Err(GenerationError::BackendStatus { status: 503 }) })
        }
    }

    async fn scopes_in(dir: &tempfile::TempDir) -> Arc<ScopeManager> {
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            registry_file: "accounts.sqlite".to_string(),
        };
        Arc::new(ScopeManager::open(&config).await.unwrap())
    }

    #[tokio::test]
    async fn test_query_stores_user_assistant_pair() {
        let dir = tempfile::tempdir().unwrap();
        let scopes = scopes_in(&dir).await;
        let router = SessionRouter::new(Arc::clone(&scopes), Arc::new(EchoGenerator));
        let account = AccountId::new("a1").unwrap();

        let outcome = router
            .handle_query(&account, Some(SessionId::new("s1")), "Hello")
            .await
            .unwrap();
        assert_eq!(outcome.response, "echo: Hello");
        assert_eq!(outcome.session_id, SessionId::new("s1"));

        let scope = scopes.scope(&account).await.unwrap();
        let found = scope.get_conversation(SessionId::new("s1")).await.unwrap();
        assert_eq!(found.messages.len(), 2);
        assert_eq!(found.messages[0].role, MessageRole::User);
        assert_eq!(found.messages[0].content, serde_json::json!("Hello"));
        assert_eq!(found.messages[1].role, MessageRole::Assistant);
        assert_eq!(found.messages[1].content, serde_json::json!("echo: Hello"));
    }

    #[tokio::test]
    async fn test_missing_session_id_is_generated() {
        let dir = tempfile::tempdir().unwrap();
        let scopes = scopes_in(&dir).await;
        let router = SessionRouter::new(Arc::clone(&scopes), Arc::new(EchoGenerator));
        let account = AccountId::new("a1").unwrap();

        let first = router.handle_query(&account, None, "one").await.unwrap();
        let second = router.handle_query(&account, None, "two").await.unwrap();
        assert_ne!(first.session_id, second.session_id);

        let scope = scopes.scope(&account).await.unwrap();
        assert!(scope.get_conversation(first.session_id).await.is_some());
    }

    #[tokio::test]
    async fn test_reused_session_accumulates_turns() {
        let dir = tempfile::tempdir().unwrap();
        let scopes = scopes_in(&dir).await;
        let router = SessionRouter::new(Arc::clone(&scopes), Arc::new(EchoGenerator));
        let account = AccountId::new("a1").unwrap();
        let session = SessionId::new("s1");

        router
            .handle_query(&account, Some(session.clone()), "one")
            .await
            .unwrap();
        router
            .handle_query(&account, Some(session.clone()), "two")
            .await
            .unwrap();

        let scope = scopes.scope(&account).await.unwrap();
        let found = scope.get_conversation(session).await.unwrap();
        assert_eq!(found.messages.len(), 4);
        assert_eq!(found.conversation.metadata["message_count"], 4);
    }

    #[tokio::test]
    async fn test_scope_failure_does_not_fail_query() {
        let dir = tempfile::tempdir().unwrap();
        let scopes = scopes_in(&dir).await;
        // Occupy the scope's database path so opening it fails.
        std::fs::create_dir(dir.path().join("a1.sqlite")).unwrap();
        let router = SessionRouter::new(Arc::clone(&scopes), Arc::new(EchoGenerator));
        let account = AccountId::new("a1").unwrap();

        let outcome = router
            .handle_query(&account, Some(SessionId::new("s1")), "Hello")
            .await
            .unwrap();
        assert_eq!(outcome.response, "echo: Hello");
        assert_eq!(outcome.session_id, SessionId::new("s1"));
    }

    #[tokio::test]
    async fn test_append_failure_does_not_fail_query() {
        let dir = tempfile::tempdir().unwrap();
        let scopes = scopes_in(&dir).await;
        let router = SessionRouter::new(Arc::clone(&scopes), Arc::new(EchoGenerator));
        let account = AccountId::new("a1").unwrap();

        // Open the scope, then break its schema out from under it.
        let scope = scopes.scope(&account).await.unwrap();
        let raw = rusqlite::Connection::open(dir.path().join("a1.sqlite")).unwrap();
        raw.execute("DROP TABLE messages", []).unwrap();
        drop(raw);

        let outcome = router
            .handle_query(&account, Some(SessionId::new("s1")), "Hello")
            .await
            .unwrap();
        assert_eq!(outcome.response, "echo: Hello");
        assert_eq!(outcome.session_id, SessionId::new("s1"));
        assert!(scope.get_conversation(SessionId::new("s1")).await.is_none());
    }

    #[tokio::test]
    async fn test_generation_failure_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let scopes = scopes_in(&dir).await;
        let router = SessionRouter::new(Arc::clone(&scopes), Arc::new(FailingGenerator));
        let account = AccountId::new("a1").unwrap();

        let result = router
            .handle_query(&account, Some(SessionId::new("s1")), "Hello")
            .await;
        assert!(matches!(
            result,
            Err(GenerationError::BackendStatus { status: 503 })
        ));

        let scope = scopes.scope(&account).await.unwrap();
        assert!(scope.get_conversation(SessionId::new("s1")).await.is_none());
    }
}
