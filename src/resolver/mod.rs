//! Key resolution engine
//!
//! The XOR key for a user login is never sent explicitly. It is recovered in
//! tiers, cheapest first:
//!
//! - **fast path** ([`KeyResolver::resolve_fast`]): a key embedded in the
//!   packet, the key cached for the peer, keys recently learned for other
//!   identities, then the configured static keys. Microseconds.
//! - **slow path** ([`KeyResolver::resolve_slow`]): a bounded search gated by
//!   the per-identity circuit breaker. Runs on the blocking pool through
//!   [`SlowResolverPool`].
//!
//! A candidate key is accepted only if the decrypted payload parses as a
//! login; there is no other integrity check in the protocol.

pub mod breaker;
pub mod cache;
pub mod identity;
pub mod pool;
pub mod search;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::crypto::{XorKey, KEY_LEN};
use crate::error::ResolveError;
use crate::protocol::login::{
    check_structured, parse_compact_login, parse_login, LoginCredentials, MIN_LOGIN_LEN,
};

pub use breaker::{AttemptTracker, BreakerSettings};
pub use cache::{KeyCache, KeyCacheEntry};
pub use identity::Identity;
pub use pool::SlowResolverPool;
pub use search::{SearchBudget, SearchOutcome, SearchTier};

/// Offset of the body in a payload that carries its own key
pub const EMBEDDED_BODY_OFFSET: usize = 2 * KEY_LEN;

/// Upper bound on learned keys tried for an identity without its own
const MAX_LEARNED_SCAN: usize = 256;

/// Where a resolved key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    /// Duplicated 16-byte block at the start of the payload
    Embedded,
    /// Cached key for the requesting identity
    Cache,
    /// Configured static key
    Static,
    /// Key learned for another identity
    Learned,
    /// Slow-path search
    Search(SearchTier),
}

impl ResolvedBy {
    pub fn name(&self) -> &'static str {
        match self {
            ResolvedBy::Embedded => "embedded",
            ResolvedBy::Cache => "cache",
            ResolvedBy::Static => "static",
            ResolvedBy::Learned => "learned",
            ResolvedBy::Search(tier) => tier.name(),
        }
    }

    pub fn is_fast(&self) -> bool {
        !matches!(self, ResolvedBy::Search(_))
    }
}

/// A decoded login and the key that decoded it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub credentials: LoginCredentials,
    pub key: XorKey,
    pub resolved_by: ResolvedBy,
}

/// Decrypt `payload` with `key` and parse it as a structured login
pub(crate) fn try_key(payload: &[u8], key: &XorKey) -> Option<LoginCredentials> {
    if payload.len() < MIN_LOGIN_LEN {
        return None;
    }
    let mut prefix = [0u8; MIN_LOGIN_LEN];
    prefix.copy_from_slice(&payload[..MIN_LOGIN_LEN]);
    key.apply(&mut prefix);
    check_structured(&prefix).ok()?;
    parse_login(&key.decrypt(payload)).ok()
}

/// Check for a payload that carries its own key: bytes 0..16 equal bytes
/// 16..32. The body after offset 32 is accepted either as sent or decrypted
/// with the embedded key, in compact or structured layout.
pub fn try_embedded(payload: &[u8]) -> Option<(XorKey, LoginCredentials)> {
    if payload.len() <= EMBEDDED_BODY_OFFSET
        || payload[..KEY_LEN] != payload[KEY_LEN..EMBEDDED_BODY_OFFSET]
    {
        return None;
    }
    let key = XorKey::from_slice(&payload[..KEY_LEN])?;
    let body = &payload[EMBEDDED_BODY_OFFSET..];

    if let Ok(credentials) = parse_compact_login(body).or_else(|_| parse_login(body)) {
        return Some((key, credentials));
    }

    let decrypted = key.decrypt(body);
    parse_compact_login(&decrypted)
        .or_else(|_| parse_login(&decrypted))
        .ok()
        .map(|credentials| (key, credentials))
}

/// Tiered key resolver over a shared cache and attempt tracker
pub struct KeyResolver {
    cache: Arc<KeyCache>,
    tracker: Arc<AttemptTracker>,
    static_keys: Vec<XorKey>,
    max_candidates: u64,
}

impl KeyResolver {
    pub fn new(
        cache: Arc<KeyCache>,
        tracker: Arc<AttemptTracker>,
        static_keys: Vec<XorKey>,
        max_candidates: u64,
    ) -> Self {
        Self {
            cache,
            tracker,
            static_keys,
            max_candidates,
        }
    }

    pub fn cache(&self) -> &Arc<KeyCache> {
        &self.cache
    }

    pub fn tracker(&self) -> &Arc<AttemptTracker> {
        &self.tracker
    }

    /// Try the cheap tiers. Never searches.
    pub fn resolve_fast(&self, payload: &[u8], identity: &Identity) -> Option<Resolution> {
        if let Some((key, credentials)) = try_embedded(payload) {
            debug!(identity = %identity, username = %credentials.username, "Embedded key");
            return Some(Resolution {
                credentials,
                key,
                resolved_by: ResolvedBy::Embedded,
            });
        }

        if let Some(key) = self.cache.lookup(identity) {
            if let Some(credentials) = try_key(payload, &key) {
                debug!(identity = %identity, username = %credentials.username, "Cached key");
                return Some(Resolution {
                    credentials,
                    key,
                    resolved_by: ResolvedBy::Cache,
                });
            }
            debug!(identity = %identity, "Cached key no longer decodes");
        }

        let learned = self
            .cache
            .find_recent(identity, MAX_LEARNED_SCAN, |entry| {
                try_key(payload, &entry.key)
                    .map(|credentials| (entry.identity.clone(), entry.key, credentials))
            });
        if let Some((learned_for, key, credentials)) = learned {
            debug!(
                identity = %identity,
                learned_for = %learned_for,
                username = %credentials.username,
                "Key learned for another identity"
            );
            return Some(Resolution {
                credentials,
                key,
                resolved_by: ResolvedBy::Learned,
            });
        }

        for key in &self.static_keys {
            if let Some(credentials) = try_key(payload, key) {
                debug!(identity = %identity, username = %credentials.username, "Static key");
                return Some(Resolution {
                    credentials,
                    key: *key,
                    resolved_by: ResolvedBy::Static,
                });
            }
        }

        None
    }

    /// Bounded search, gated by the breaker. Blocking; run it off the async
    /// executor.
    pub fn resolve_slow(
        &self,
        payload: &[u8],
        identity: &Identity,
        deadline: Instant,
    ) -> Result<Resolution, ResolveError> {
        // Another connection may have learned the key while this one waited
        if let Some(key) = self.cache.lookup(identity) {
            if let Some(credentials) = try_key(payload, &key) {
                return Ok(Resolution {
                    credentials,
                    key,
                    resolved_by: ResolvedBy::Cache,
                });
            }
        }

        self.tracker.begin_attempt(identity)?;

        let started = Instant::now();
        let budget = SearchBudget {
            deadline,
            max_candidates: self.max_candidates,
        };

        match search::search(payload, budget) {
            SearchOutcome::Found {
                key,
                credentials,
                candidates,
                tier,
            } => {
                info!(
                    identity = %identity,
                    username = %credentials.username,
                    tier = tier.name(),
                    candidates,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Key search succeeded"
                );
                self.cache.store(identity.clone(), key);
                self.cache
                    .store(Identity::username(&credentials.username), key);
                self.tracker.record_success(identity);
                Ok(Resolution {
                    credentials,
                    key,
                    resolved_by: ResolvedBy::Search(tier),
                })
            }
            SearchOutcome::Exhausted {
                candidates,
                timed_out,
            } => {
                info!(
                    identity = %identity,
                    candidates,
                    timed_out,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Key search exhausted"
                );
                self.tracker.record_failure(identity);
                Err(ResolveError::Exhausted { candidates })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::login::build_login_payload;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const PASSWORD: &str = "E10ADC3949BA59ABBE56E057F20F883E";
    const TESTER_KEY: [u8; 16] = [
        0xAD, 0x69, 0x2B, 0xA7, 0x9D, 0x67, 0x0C, 0x50, 0x0E, 0xA5, 0xAE, 0xC3, 0x17, 0xFB, 0xA5,
        0xAD,
    ];

    fn resolver(static_keys: Vec<XorKey>) -> KeyResolver {
        KeyResolver::new(
            Arc::new(KeyCache::new()),
            Arc::new(AttemptTracker::new(BreakerSettings {
                threshold: 1,
                cooldown: Duration::from_secs(30),
                global_limit: 0,
                global_window: Duration::from_secs(60),
            })),
            static_keys,
            2_000_000,
        )
    }

    fn peer(last: u8) -> Identity {
        Identity::Address(std::net::IpAddr::from([10, 0, 0, last]))
    }

    fn hybrid_payload() -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&TESTER_KEY);
        payload.extend_from_slice(&TESTER_KEY);
        payload.extend_from_slice(b"tester_3\0");
        payload.extend_from_slice(PASSWORD.as_bytes());
        payload.push(0);
        payload
    }

    #[test]
    fn test_embedded_plaintext_body() {
        let resolution = resolver(vec![])
            .resolve_fast(&hybrid_payload(), &peer(1))
            .expect("embedded key");
        assert_eq!(resolution.resolved_by, ResolvedBy::Embedded);
        assert_eq!(resolution.key, XorKey::new(TESTER_KEY));
        assert_eq!(resolution.credentials.username, "tester_3");
        assert_eq!(resolution.credentials.password, PASSWORD);
    }

    #[test]
    fn test_embedded_encrypted_body() {
        let key = XorKey::new(TESTER_KEY);
        let mut payload = Vec::new();
        payload.extend_from_slice(&TESTER_KEY);
        payload.extend_from_slice(&TESTER_KEY);
        payload.extend(key.encrypt(&build_login_payload("tester_3", PASSWORD, &[9; 20])));

        let (found, credentials) = try_embedded(&payload).expect("embedded key");
        assert_eq!(found, key);
        assert_eq!(credentials.username, "tester_3");
        assert_eq!(credentials.session_data, vec![9; 20]);
    }

    #[test]
    fn test_unequal_blocks_are_not_embedded() {
        let mut payload = hybrid_payload();
        payload[20] ^= 0xFF;
        assert!(try_embedded(&payload).is_none());
        assert!(try_embedded(&payload[..32]).is_none());
    }

    #[test]
    fn test_static_key_tier() {
        let key = XorKey::new(TESTER_KEY);
        let payload = key.encrypt(&build_login_payload("static_user", PASSWORD, &[]));
        let r = resolver(vec![XorKey::repeated(0x01), key]);
        let resolution = r.resolve_fast(&payload, &peer(2)).unwrap();
        assert_eq!(resolution.resolved_by, ResolvedBy::Static);
        assert_eq!(resolution.credentials.username, "static_user");
    }

    #[test]
    fn test_cache_takes_priority_over_static() {
        let key = XorKey::new(TESTER_KEY);
        let payload = key.encrypt(&build_login_payload("cached", PASSWORD, &[]));
        let r = resolver(vec![key]);
        r.cache().store(peer(3), key);
        let resolution = r.resolve_fast(&payload, &peer(3)).unwrap();
        assert_eq!(resolution.resolved_by, ResolvedBy::Cache);
    }

    #[test]
    fn test_learned_keys_are_tried_before_static() {
        let key = XorKey::new(TESTER_KEY);
        let payload = key.encrypt(&build_login_payload("roamer", PASSWORD, &[]));
        let r = resolver(vec![key]);
        r.cache().store(Identity::username("roamer"), key);

        let resolution = r.resolve_fast(&payload, &peer(8)).unwrap();
        assert_eq!(resolution.resolved_by, ResolvedBy::Learned);
        assert_eq!(resolution.credentials.username, "roamer");
    }

    #[test]
    fn test_recent_learned_key_found_among_many() {
        let key: XorKey = "0F1E2D3C4B5A69788796A5B4C3D2E1F0".parse().unwrap();
        let payload = key.encrypt(&build_login_payload("latecomer", PASSWORD, &[]));
        let r = resolver(vec![]);
        for i in 0..300u16 {
            let other = Identity::Address(std::net::IpAddr::from([10, 1, (i >> 8) as u8, i as u8]));
            r.cache().store(other, XorKey::repeated(0x80 | (i % 64) as u8));
        }
        // Sorts after every address identity
        r.cache().store(Identity::username("latecomer"), key);

        let resolution = r.resolve_fast(&payload, &peer(9)).unwrap();
        assert_eq!(resolution.resolved_by, ResolvedBy::Learned);
        assert_eq!(resolution.key, key);
    }

    #[test]
    fn test_unknown_key_misses_fast_path() {
        let key: XorKey = "0F1E2D3C4B5A69788796A5B4C3D2E1F0".parse().unwrap();
        let payload = key.encrypt(&build_login_payload("nobody", PASSWORD, &[0; 150]));
        assert!(resolver(vec![]).resolve_fast(&payload, &peer(4)).is_none());
    }

    #[test]
    fn test_slow_success_populates_cache_for_fast_reuse() {
        let key: XorKey = "0F1E2D3C4B5A69788796A5B4C3D2E1F0".parse().unwrap();
        let payload = key.encrypt(&build_login_payload("newcomer", PASSWORD, &[0x44; 150]));
        let r = resolver(vec![]);
        let ip = peer(5);

        let deadline = Instant::now() + Duration::from_secs(10);
        let slow = r.resolve_slow(&payload, &ip, deadline).unwrap();
        assert_eq!(slow.key, key);
        assert!(!slow.resolved_by.is_fast());
        assert_eq!(r.cache().peek(&Identity::username("newcomer")).unwrap().key, key);

        let fast = r.resolve_fast(&payload, &ip).unwrap();
        assert_eq!(fast.resolved_by, ResolvedBy::Cache);
        assert_eq!(fast.credentials, slow.credentials);

        // A different address using the same key is served from learned keys
        let other = r.resolve_fast(&payload, &peer(6)).unwrap();
        assert_eq!(other.resolved_by, ResolvedBy::Learned);
    }

    #[test]
    fn test_breaker_fails_second_attempt_fast() {
        let r = resolver(vec![]);
        let ip = peer(7);
        let garbage: Vec<u8> = (0..229u32).map(|i| (i * 37 % 251) as u8).collect();

        let first = r.resolve_slow(&garbage, &ip, Instant::now() + Duration::from_secs(5));
        assert!(matches!(first, Err(ResolveError::Exhausted { .. })));

        let started = Instant::now();
        let second = r.resolve_slow(&garbage, &ip, Instant::now() + Duration::from_secs(5));
        let elapsed = started.elapsed();
        assert!(matches!(second, Err(ResolveError::BreakerOpen { .. })));
        assert!(elapsed < Duration::from_millis(1), "took {:?}", elapsed);
    }
}
