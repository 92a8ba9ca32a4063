//! MySQL account store
//!
//! Queries the legacy `account` table:
//!
//! | column        | use                               |
//! |---------------|-----------------------------------|
//! | `username`    | login name                        |
//! | `password`    | 32-character hex password digest  |
//! | `active`      | 1 if the account may log in       |
//! | `locked`      | non-zero if the account is locked |
//! | `LastLoginIP` | IPv4 address as an integer        |

use std::time::Duration;

use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::auth::{AccountStore, LockState};
use crate::config::DatabaseConfig;
use crate::error::{GatewayError, Result, StoreError};

/// Account store backed by a sqlx MySQL pool
#[derive(Clone)]
pub struct MySqlAccountStore {
    pool: MySqlPool,
    runtime: Handle,
}

impl MySqlAccountStore {
    /// Connect using the database section of the config. Must be called from
    /// within the tokio runtime.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_millis(config.query_timeout_ms))
            .connect(&config.url())
            .await
            .map_err(|e| GatewayError::Store(StoreError::Unavailable(e.to_string())))?;

        info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            pool_size = config.pool_size,
            "Connected to account database"
        );

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self {
            pool,
            runtime: Handle::current(),
        }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        other => StoreError::Unavailable(other.to_string()),
    }
}

impl AccountStore for MySqlAccountStore {
    fn verify_credentials(
        &self,
        username: &str,
        password_hash: &str,
    ) -> std::result::Result<bool, StoreError> {
        let count: i64 = self
            .runtime
            .block_on(
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM account WHERE username = ? AND password = ?",
                )
                .bind(username)
                .bind(password_hash)
                .fetch_one(&self.pool),
            )
            .map_err(store_error)?;
        debug!(username = %username, matched = count, "Credential query");
        Ok(count > 0)
    }

    fn lock_state(&self, username: &str) -> std::result::Result<LockState, StoreError> {
        let row: Option<(i64, i64)> = self
            .runtime
            .block_on(
                sqlx::query_as(
                    "SELECT CAST(active AS SIGNED), CAST(locked AS SIGNED) \
                     FROM account WHERE username = ?",
                )
                .bind(username)
                .fetch_optional(&self.pool),
            )
            .map_err(store_error)?;

        match row {
            Some((active, locked)) => Ok(LockState {
                active: active != 0,
                locked: locked != 0,
            }),
            None => Err(StoreError::AccountNotFound(username.to_string())),
        }
    }

    fn update_last_login_address(
        &self,
        username: &str,
        address: u32,
    ) -> std::result::Result<(), StoreError> {
        self.runtime
            .block_on(
                sqlx::query("UPDATE account SET LastLoginIP = ? WHERE username = ?")
                    .bind(address)
                    .bind(username)
                    .execute(&self.pool),
            )
            .map_err(store_error)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mysql"
    }
}
