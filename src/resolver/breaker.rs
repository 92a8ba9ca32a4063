//! Attempt tracker and circuit breaker
//!
//! Expensive key searches are gated per identity: once a search fails for
//! an identity, further searches for it fail fast until the cooldown passes.
//! A global per-minute budget caps searches across all identities.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ResolveError;
use crate::resolver::Identity;

/// Breaker tuning
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// Failures before the breaker opens
    pub threshold: u32,
    /// How long an open breaker stays open, and how long a failure is remembered
    pub cooldown: Duration,
    /// Searches allowed per `global_window` across all identities (0 = unlimited)
    pub global_limit: u32,
    pub global_window: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 1,
            cooldown: Duration::from_secs(30),
            global_limit: 5,
            global_window: Duration::from_secs(60),
        }
    }
}

/// Failure history for one identity
#[derive(Debug, Clone, Copy)]
pub struct AttemptRecord {
    pub consecutive_failures: u32,
    pub open_until: Option<Instant>,
    pub last_failure: Instant,
}

impl AttemptRecord {
    fn is_open(&self, now: Instant) -> bool {
        self.open_until.map_or(false, |until| until > now)
    }

    fn is_expired(&self, now: Instant, cooldown: Duration) -> bool {
        !self.is_open(now) && now.duration_since(self.last_failure) >= cooldown
    }
}

/// An identity whose breaker is currently open
#[derive(Debug, Clone, Serialize)]
pub struct OpenBreaker {
    pub identity: String,
    pub consecutive_failures: u32,
    pub remaining_ms: u64,
}

#[derive(Debug)]
struct GlobalWindow {
    started: Instant,
    used: u32,
}

/// Per-identity circuit breaker with a global rate limit
pub struct AttemptTracker {
    records: DashMap<Identity, AttemptRecord>,
    global: Mutex<GlobalWindow>,
    settings: BreakerSettings,
}

impl AttemptTracker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            records: DashMap::new(),
            global: Mutex::new(GlobalWindow {
                started: Instant::now(),
                used: 0,
            }),
            settings,
        }
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// False while the identity's breaker is open
    pub fn should_attempt(&self, identity: &Identity) -> bool {
        let now = Instant::now();
        let cooldown = self.settings.cooldown;
        self.records
            .remove_if(identity, |_, record| record.is_expired(now, cooldown));

        match self.records.get(identity) {
            Some(record) if record.is_open(now) => {
                debug!(identity = %identity, "Breaker open, skipping search");
                false
            }
            _ => true,
        }
    }

    /// Check both the identity breaker and the global budget, consuming one
    /// unit of global budget on success
    pub fn begin_attempt(&self, identity: &Identity) -> Result<(), ResolveError> {
        if !self.should_attempt(identity) {
            return Err(ResolveError::BreakerOpen {
                identity: identity.to_string(),
            });
        }

        if self.settings.global_limit == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let mut global = self.global.lock();
        if now.duration_since(global.started) >= self.settings.global_window {
            global.started = now;
            global.used = 0;
        }
        if global.used >= self.settings.global_limit {
            warn!(
                identity = %identity,
                limit = self.settings.global_limit,
                "Global search budget exhausted"
            );
            return Err(ResolveError::GlobalLimit);
        }
        global.used += 1;
        Ok(())
    }

    /// Record a failed search. Returns true if this failure opened the breaker.
    pub fn record_failure(&self, identity: &Identity) -> bool {
        let now = Instant::now();
        self.sweep_expired(now);
        let mut record = self
            .records
            .entry(identity.clone())
            .or_insert(AttemptRecord {
                consecutive_failures: 0,
                open_until: None,
                last_failure: now,
            });
        record.consecutive_failures += 1;
        record.last_failure = now;

        if record.consecutive_failures >= self.settings.threshold && !record.is_open(now) {
            record.open_until = Some(now + self.settings.cooldown);
            info!(
                identity = %identity,
                failures = record.consecutive_failures,
                cooldown_secs = self.settings.cooldown.as_secs(),
                "Circuit breaker opened"
            );
            return true;
        }
        false
    }

    /// Clear the identity's record after a successful search
    pub fn record_success(&self, identity: &Identity) {
        if self.reset(identity) {
            debug!(identity = %identity, "Circuit breaker cleared");
        }
    }

    /// Forget the identity's failure history. False if there was none.
    pub fn reset(&self, identity: &Identity) -> bool {
        self.records.remove(identity).is_some()
    }

    /// Number of identities with a remembered failure
    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    fn sweep_expired(&self, now: Instant) {
        let cooldown = self.settings.cooldown;
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now, cooldown));
        let dropped = before.saturating_sub(self.records.len());
        if dropped > 0 {
            debug!(dropped, "Dropped expired breaker records");
        }
    }

    pub fn record(&self, identity: &Identity) -> Option<AttemptRecord> {
        self.records.get(identity).map(|r| *r)
    }

    /// Identities whose breaker is open right now
    pub fn open_breakers(&self) -> Vec<OpenBreaker> {
        let now = Instant::now();
        self.sweep_expired(now);
        let mut open: Vec<_> = self
            .records
            .iter()
            .filter_map(|entry| {
                let until = entry.open_until.filter(|until| *until > now)?;
                Some(OpenBreaker {
                    identity: entry.key().to_string(),
                    consecutive_failures: entry.consecutive_failures,
                    remaining_ms: until.duration_since(now).as_millis() as u64,
                })
            })
            .collect();
        open.sort_by(|a, b| a.identity.cmp(&b.identity));
        open
    }
}

impl Default for AttemptTracker {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identity {
        Identity::Address(s.parse().unwrap())
    }

    fn settings(cooldown_ms: u64, global_limit: u32) -> BreakerSettings {
        BreakerSettings {
            threshold: 1,
            cooldown: Duration::from_millis(cooldown_ms),
            global_limit,
            global_window: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_single_failure_opens_breaker() {
        let tracker = AttemptTracker::new(settings(30_000, 0));
        let ip = id("10.0.0.1");

        assert!(tracker.should_attempt(&ip));
        assert!(tracker.record_failure(&ip));
        assert!(!tracker.should_attempt(&ip));
        assert!(matches!(
            tracker.begin_attempt(&ip),
            Err(ResolveError::BreakerOpen { .. })
        ));

        // Other identities are unaffected
        assert!(tracker.should_attempt(&id("10.0.0.2")));
        assert_eq!(tracker.open_breakers().len(), 1);
    }

    #[test]
    fn test_success_clears_record() {
        let tracker = AttemptTracker::new(settings(30_000, 0));
        let ip = id("10.0.0.3");
        tracker.record_failure(&ip);
        tracker.record_success(&ip);
        assert!(tracker.should_attempt(&ip));
        assert!(tracker.record(&ip).is_none());
    }

    #[test]
    fn test_breaker_closes_after_cooldown() {
        let tracker = AttemptTracker::new(settings(30, 0));
        let ip = id("10.0.0.4");
        tracker.record_failure(&ip);
        assert!(!tracker.should_attempt(&ip));

        std::thread::sleep(Duration::from_millis(80));
        assert!(tracker.should_attempt(&ip));
        assert!(tracker.record(&ip).is_none(), "expired record is dropped");
    }

    #[test]
    fn test_threshold_above_one() {
        let tracker = AttemptTracker::new(BreakerSettings {
            threshold: 3,
            ..settings(30_000, 0)
        });
        let ip = id("10.0.0.5");
        assert!(!tracker.record_failure(&ip));
        assert!(!tracker.record_failure(&ip));
        assert!(tracker.should_attempt(&ip));
        assert!(tracker.record_failure(&ip));
        assert!(!tracker.should_attempt(&ip));
    }

    #[test]
    fn test_expired_records_are_swept() {
        let tracker = AttemptTracker::new(settings(300, 0));
        for i in 0..100u8 {
            tracker.record_failure(&id(&format!("10.0.2.{}", i)));
        }
        assert_eq!(tracker.tracked(), 100);

        std::thread::sleep(Duration::from_millis(400));
        assert!(tracker.open_breakers().is_empty());
        assert_eq!(tracker.tracked(), 0);

        tracker.record_failure(&id("10.0.3.1"));
        assert_eq!(tracker.tracked(), 1);
    }

    #[test]
    fn test_reset_reports_whether_a_record_existed() {
        let tracker = AttemptTracker::new(settings(30_000, 0));
        let ip = id("10.0.0.6");
        assert!(!tracker.reset(&ip));
        tracker.record_failure(&ip);
        assert!(tracker.reset(&ip));
        assert!(tracker.should_attempt(&ip));
    }

    #[test]
    fn test_global_budget() {
        let tracker = AttemptTracker::new(settings(30_000, 2));
        assert!(tracker.begin_attempt(&id("10.0.1.1")).is_ok());
        assert!(tracker.begin_attempt(&id("10.0.1.2")).is_ok());
        assert_eq!(
            tracker.begin_attempt(&id("10.0.1.3")),
            Err(ResolveError::GlobalLimit)
        );
    }
}
