//! Durable registry of accounts that have ever opened a scope.
//!
//! Append-only and idempotent, so recording an account requires no
//! cross-scope locking; the retention scheduler enumerates it each tick.

use chrono::Utc;
use tokio_rusqlite::Connection;

use crate::conversations::core::config::StorageConfig;
use crate::conversations::core::errors::{StoreError, StoreResult};
use crate::conversations::core::ids::AccountId;

/// `SQLite`-backed account registry.
pub struct AccountRegistry {
    conn: Connection,
}

impl AccountRegistry {
    /// Open (or create) the registry database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(config: &StorageConfig) -> StoreResult<Self> {
        let path = config.data_dir.join(&config.registry_file);
        let conn = Connection::open(path).await?;

        conn.call(move |conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS accounts (
                    account_id TEXT PRIMARY KEY,
                    first_seen INTEGER NOT NULL
                )",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Record an account; recording an already-known account is a no-op.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn record(&self, account_id: &AccountId) -> StoreResult<()> {
        let account = account_id.to_string();
        let now_ms = Utc::now().timestamp_millis();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO accounts (account_id, first_seen) VALUES (?1, ?2)",
                    rusqlite::params![account, now_ms],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Enumerate every known account, oldest first.
    ///
    /// # Errors
    /// Returns an error if the read fails or a stored id is invalid.
    pub async fn list(&self) -> StoreResult<Vec<AccountId>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT account_id FROM accounts ORDER BY first_seen, account_id",
                )?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        let mut accounts = Vec::with_capacity(rows.len());
        for raw in rows {
            let account = AccountId::new(&raw)
                .map_err(|err| StoreError::InvalidRecord(format!("invalid account id: {err}")))?;
            accounts.push(account);
        }
        Ok(accounts)
    }
}
