//! Account store module
//!
//! Credential and lock-state checks against an account backend. The gateway
//! talks to the store through [`AccountStore`]; production deployments use
//! [`mysql::MySqlAccountStore`], tests and local runs use
//! [`InMemoryAccountStore`]. Store calls are synchronous and always run on the
//! blocking pool under a timeout (see [`verify_login`]).

pub mod mysql;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result, ResultCode, StoreError};
use crate::protocol::LoginCredentials;

pub use mysql::MySqlAccountStore;

/// Account flags relevant to login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockState {
    pub active: bool,
    pub locked: bool,
}

impl LockState {
    pub fn allows_login(&self) -> bool {
        self.active && !self.locked
    }
}

/// Backend holding player accounts
pub trait AccountStore: Send + Sync {
    /// True if the username and password digest match. Lock state is not
    /// considered here.
    fn verify_credentials(
        &self,
        username: &str,
        password_hash: &str,
    ) -> std::result::Result<bool, StoreError>;

    fn lock_state(&self, username: &str) -> std::result::Result<LockState, StoreError>;

    /// Record the IPv4 address of the latest successful login
    fn update_last_login_address(
        &self,
        username: &str,
        address: u32,
    ) -> std::result::Result<(), StoreError>;

    /// Short backend name for logs and the stats endpoint
    fn name(&self) -> &'static str;
}

/// Account held by [`InMemoryAccountStore`]
#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    /// Argon2 hash of the client's password digest
    pub password_hash: String,
    pub active: bool,
    pub locked: bool,
    pub last_login_address: Option<u32>,
}

/// Account store kept in process memory
///
/// In dev mode every login is accepted and unknown accounts are treated as
/// active, which mirrors running the gateway without a database.
pub struct InMemoryAccountStore {
    dev_mode: bool,
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryAccountStore {
    pub fn new(dev_mode: bool) -> Self {
        Self {
            dev_mode,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Add or replace an account. `password_digest` is the 32-character hex
    /// digest the client sends.
    pub fn add_account(&self, username: &str, password_digest: &str) -> Result<()> {
        let username = normalize_username(username);
        let account = Account {
            username: username.clone(),
            password_hash: hash_password(&password_digest.to_uppercase())?,
            active: true,
            locked: false,
            last_login_address: None,
        };
        self.accounts.write().insert(username.clone(), account);
        info!(username = %username, "Account added");
        Ok(())
    }

    pub fn set_locked(&self, username: &str, locked: bool) -> bool {
        match self.accounts.write().get_mut(&normalize_username(username)) {
            Some(account) => {
                account.locked = locked;
                true
            }
            None => false,
        }
    }

    pub fn set_active(&self, username: &str, active: bool) -> bool {
        match self.accounts.write().get_mut(&normalize_username(username)) {
            Some(account) => {
                account.active = active;
                true
            }
            None => false,
        }
    }

    pub fn get_account(&self, username: &str) -> Option<Account> {
        self.accounts.read().get(&normalize_username(username)).cloned()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_dev_mode(&self) -> bool {
        self.dev_mode
    }
}

impl AccountStore for InMemoryAccountStore {
    fn verify_credentials(
        &self,
        username: &str,
        password_hash: &str,
    ) -> std::result::Result<bool, StoreError> {
        let username = normalize_username(username);
        let accounts = self.accounts.read();
        match accounts.get(&username) {
            Some(account) => Ok(verify_password(
                &password_hash.to_uppercase(),
                &account.password_hash,
            )),
            None if self.dev_mode => {
                debug!(username = %username, "Dev mode, accepting unknown account");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn lock_state(&self, username: &str) -> std::result::Result<LockState, StoreError> {
        let username = normalize_username(username);
        match self.accounts.read().get(&username) {
            Some(account) => Ok(LockState {
                active: account.active,
                locked: account.locked,
            }),
            None if self.dev_mode => Ok(LockState {
                active: true,
                locked: false,
            }),
            None => Err(StoreError::AccountNotFound(username)),
        }
    }

    fn update_last_login_address(
        &self,
        username: &str,
        address: u32,
    ) -> std::result::Result<(), StoreError> {
        if let Some(account) = self.accounts.write().get_mut(&normalize_username(username)) {
            account.last_login_address = Some(address);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Check decoded credentials against the store and map the outcome onto a
/// result code. Runs on the blocking pool; exceeding `timeout` yields
/// [`ResultCode::StoreError`].
pub async fn verify_login(
    store: Arc<dyn AccountStore>,
    credentials: &LoginCredentials,
    peer: IpAddr,
    timeout: Duration,
) -> ResultCode {
    let username = credentials.username.clone();
    let password = credentials.password.clone();

    let task = tokio::task::spawn_blocking(move || {
        check_account(store.as_ref(), &username, &password, peer)
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            warn!(username = %credentials.username, error = %e, "Account check task failed");
            ResultCode::StoreError
        }
        Err(_) => {
            let err = StoreError::Timeout;
            warn!(
                username = %credentials.username,
                timeout_ms = timeout.as_millis() as u64,
                error = %err,
                "Account check abandoned"
            );
            ResultCode::from(&err)
        }
    }
}

/// Lock state is only consulted once the password matches.
fn check_account(
    store: &dyn AccountStore,
    username: &str,
    password: &str,
    peer: IpAddr,
) -> ResultCode {
    let valid = match store.verify_credentials(username, password) {
        Ok(valid) => valid,
        Err(e) => {
            warn!(
                username = %username,
                store = store.name(),
                error = %e,
                "Credential check failed"
            );
            return ResultCode::from(&e);
        }
    };
    if !valid {
        info!(username = %username, "Invalid credentials");
        return ResultCode::InvalidCredentials;
    }

    let state = match store.lock_state(username) {
        Ok(state) => state,
        Err(e) => {
            warn!(
                username = %username,
                store = store.name(),
                error = %e,
                "Lock state check failed"
            );
            return ResultCode::from(&e);
        }
    };
    if !state.allows_login() {
        info!(
            username = %username,
            active = state.active,
            locked = state.locked,
            "Account locked"
        );
        return ResultCode::AccountSuspended;
    }

    match peer {
        IpAddr::V4(v4) => {
            if let Err(e) = store.update_last_login_address(username, u32::from(v4)) {
                warn!(username = %username, error = %e, "Failed to record last login address");
            }
        }
        IpAddr::V6(_) => debug!(username = %username, "Skipping last login update for IPv6 peer"),
    }

    ResultCode::Success
}

/// Normalize a username (lowercase, trim)
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| GatewayError::Internal(format!("Failed to hash password: {}", e)))?
        .to_string();

    Ok(password_hash)
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DIGEST: &str = "E10ADC3949BA59ABBE56E057F20F883E";

    fn credentials(username: &str, password: &str) -> LoginCredentials {
        LoginCredentials {
            username: username.to_string(),
            password: password.to_string(),
            session_data: Vec::new(),
        }
    }

    fn peer() -> IpAddr {
        "192.168.1.20".parse().unwrap()
    }

    fn store() -> Arc<InMemoryAccountStore> {
        let store = InMemoryAccountStore::new(false);
        store.add_account("Tester_3", DIGEST).unwrap();
        Arc::new(store)
    }

    #[test]
    fn test_normalize_username() {
        assert_eq!(normalize_username("Player"), "player");
        assert_eq!(normalize_username("  Tester_3 "), "tester_3");
    }

    #[test]
    fn test_password_hashing() {
        let hash = hash_password(DIGEST).unwrap();
        assert!(verify_password(DIGEST, &hash));
        assert!(!verify_password("00000000000000000000000000000000", &hash));
        assert!(!verify_password(DIGEST, "not a hash"));
    }

    #[tokio::test]
    async fn test_valid_login_records_address() {
        let store = store();
        let code = verify_login(
            store.clone(),
            &credentials("tester_3", DIGEST),
            peer(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(code, ResultCode::Success);

        let account = store.get_account("tester_3").unwrap();
        assert_eq!(account.last_login_address, Some(0xC0A8_0114));
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_account() {
        let store = store();
        let wrong = verify_login(
            store.clone(),
            &credentials("tester_3", "00000000000000000000000000000000"),
            peer(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(wrong, ResultCode::InvalidCredentials);

        let unknown = verify_login(
            store,
            &credentials("ghost", DIGEST),
            peer(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(unknown, ResultCode::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_locked_account() {
        let store = store();
        store.set_locked("tester_3", true);
        let code = verify_login(
            store.clone(),
            &credentials("tester_3", DIGEST),
            peer(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(code, ResultCode::AccountSuspended);
        assert_eq!(store.get_account("tester_3").unwrap().last_login_address, None);
    }

    #[tokio::test]
    async fn test_wrong_password_on_locked_account_is_invalid_credentials() {
        let store = store();
        store.set_locked("tester_3", true);
        let locked = verify_login(
            store.clone(),
            &credentials("tester_3", "00000000000000000000000000000000"),
            peer(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(locked, ResultCode::InvalidCredentials);

        store.set_locked("tester_3", false);
        store.set_active("tester_3", false);
        let inactive = verify_login(
            store,
            &credentials("tester_3", "00000000000000000000000000000000"),
            peer(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(inactive, ResultCode::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_inactive_account_with_valid_password() {
        let store = store();
        store.set_active("tester_3", false);
        let code = verify_login(
            store,
            &credentials("tester_3", DIGEST),
            peer(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(code, ResultCode::AccountSuspended);
    }

    #[tokio::test]
    async fn test_dev_mode_accepts_unknown_accounts() {
        let store = Arc::new(InMemoryAccountStore::new(true));
        let code = verify_login(
            store,
            &credentials("anyone", DIGEST),
            peer(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(code, ResultCode::Success);
    }

    struct SlowStore;

    impl AccountStore for SlowStore {
        fn verify_credentials(&self, _: &str, _: &str) -> std::result::Result<bool, StoreError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(true)
        }

        fn lock_state(&self, _: &str) -> std::result::Result<LockState, StoreError> {
            Ok(LockState {
                active: true,
                locked: false,
            })
        }

        fn update_last_login_address(
            &self,
            _: &str,
            _: u32,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    struct BrokenStore;

    impl AccountStore for BrokenStore {
        fn verify_credentials(&self, _: &str, _: &str) -> std::result::Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        fn lock_state(&self, _: &str) -> std::result::Result<LockState, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        fn update_last_login_address(
            &self,
            _: &str,
            _: u32,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_store_timeout_and_failure_map_to_store_error() {
        let slow = verify_login(
            Arc::new(SlowStore),
            &credentials("tester_3", DIGEST),
            peer(),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(slow, ResultCode::StoreError);

        let broken = verify_login(
            Arc::new(BrokenStore),
            &credentials("tester_3", DIGEST),
            peer(),
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(broken, ResultCode::StoreError);
    }
}
