//! Bounded key search for the slow path
//!
//! Two tiers, cheapest first:
//!
//! 1. Short-cycle keys: a handful of patterns seen from real clients, then
//!    every single-byte key.
//! 2. Known-plaintext search. For each possible username length `L` the
//!    bytes from `9 + L` up to offset 45 are zero in the plaintext, so the
//!    ciphertext there *is* the key. Residues the padding does not cover are
//!    narrowed to bytes that turn every password position into uppercase hex
//!    and every username position into a printable character, then the
//!    remaining combinations are enumerated.
//!
//! Every candidate is confirmed with the login parser; nothing else is
//! trusted. The search stops at the deadline or the candidate cap,
//! whichever comes first.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use crate::crypto::{XorKey, KEY_LEN};
use crate::protocol::login::{
    is_password_byte, is_username_byte, LoginCredentials, LOGIN_HEADER, MAX_USERNAME_LEN,
    MIN_LOGIN_LEN, PASSWORD_OFFSET, USERNAME_OFFSET,
};
use crate::resolver::try_key;

/// Candidates tested between deadline checks
const DEADLINE_CHECK_INTERVAL: u64 = 256;

/// Patterns observed from deployed clients, tiled to 16 bytes
const COMMON_PATTERNS: &[&[u8]] = &[
    &[
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
        0x0F,
    ],
    &[
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
        0x10,
    ],
    &[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0],
    &[0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE],
];

/// Limits for one search
#[derive(Debug, Clone, Copy)]
pub struct SearchBudget {
    pub deadline: Instant,
    pub max_candidates: u64,
}

/// Result of a search
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Found {
        key: XorKey,
        credentials: LoginCredentials,
        candidates: u64,
        tier: SearchTier,
    },
    Exhausted {
        candidates: u64,
        timed_out: bool,
    },
}

/// Which tier produced a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchTier {
    ShortCycle,
    KnownPlaintext,
}

impl SearchTier {
    pub fn name(&self) -> &'static str {
        match self {
            SearchTier::ShortCycle => "short-cycle",
            SearchTier::KnownPlaintext => "known-plaintext",
        }
    }
}

/// Shared progress across parallel workers
struct Progress {
    budget: SearchBudget,
    tested: AtomicU64,
    stop: AtomicBool,
    timed_out: AtomicBool,
}

impl Progress {
    fn new(budget: SearchBudget) -> Self {
        Self {
            budget,
            tested: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
        }
    }

    /// Count one candidate; false once the budget is spent
    fn tick(&self) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            return false;
        }
        let n = self.tested.fetch_add(1, Ordering::Relaxed) + 1;
        if n > self.budget.max_candidates {
            self.stop.store(true, Ordering::Relaxed);
            return false;
        }
        if n % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= self.budget.deadline {
            self.timed_out.store(true, Ordering::Relaxed);
            self.stop.store(true, Ordering::Relaxed);
            return false;
        }
        true
    }

    fn tested(&self) -> u64 {
        self.tested
            .load(Ordering::Relaxed)
            .min(self.budget.max_candidates)
    }
}

/// Search for a key that decodes `payload` as a structured login
pub fn search(payload: &[u8], budget: SearchBudget) -> SearchOutcome {
    let progress = Progress::new(budget);

    if payload.len() < MIN_LOGIN_LEN {
        return SearchOutcome::Exhausted {
            candidates: 0,
            timed_out: false,
        };
    }

    if let Some((key, credentials)) = short_cycle(payload, &progress) {
        return found(key, credentials, &progress, SearchTier::ShortCycle);
    }

    for assume_header in [true, false] {
        let hit = (1..=MAX_USERNAME_LEN)
            .into_par_iter()
            .find_map_any(|name_len| known_plaintext(payload, name_len, assume_header, &progress));
        if let Some((key, credentials)) = hit {
            progress.stop.store(true, Ordering::Relaxed);
            return found(key, credentials, &progress, SearchTier::KnownPlaintext);
        }
        if progress.stop.load(Ordering::Relaxed) {
            break;
        }
    }

    SearchOutcome::Exhausted {
        candidates: progress.tested(),
        timed_out: progress.timed_out.load(Ordering::Relaxed),
    }
}

fn found(
    key: XorKey,
    credentials: LoginCredentials,
    progress: &Progress,
    tier: SearchTier,
) -> SearchOutcome {
    SearchOutcome::Found {
        key,
        credentials,
        candidates: progress.tested(),
        tier,
    }
}

fn short_cycle(payload: &[u8], progress: &Progress) -> Option<(XorKey, LoginCredentials)> {
    let patterns = COMMON_PATTERNS.iter().filter_map(|p| XorKey::tiled(p));
    let single = (0..=u8::MAX).map(XorKey::repeated);

    for key in patterns.chain(single) {
        if !progress.tick() {
            return None;
        }
        if let Some(credentials) = try_key(payload, &key) {
            return Some((key, credentials));
        }
    }
    None
}

/// What the plaintext at a position must look like
#[derive(Clone, Copy, PartialEq, Eq)]
enum Plain {
    Exact(u8),
    Username,
    Password,
    Any,
}

fn plaintext_class(pos: usize, name_len: usize, assume_header: bool) -> Plain {
    let name_end = USERNAME_OFFSET + name_len;
    match pos {
        p if p < USERNAME_OFFSET => {
            if assume_header {
                Plain::Exact(LOGIN_HEADER[p])
            } else {
                Plain::Any
            }
        }
        p if p < name_end => Plain::Username,
        p if p < PASSWORD_OFFSET => Plain::Exact(0),
        p if p < MIN_LOGIN_LEN => Plain::Password,
        _ => Plain::Any,
    }
}

fn known_plaintext(
    payload: &[u8],
    name_len: usize,
    assume_header: bool,
    progress: &Progress,
) -> Option<(XorKey, LoginCredentials)> {
    if progress.stop.load(Ordering::Relaxed) {
        return None;
    }

    // Per-residue candidate lists
    let mut choices: Vec<Vec<u8>> = Vec::with_capacity(KEY_LEN);
    for residue in 0..KEY_LEN {
        let mut allowed = [true; 256];
        for pos in (residue..MIN_LOGIN_LEN).step_by(KEY_LEN) {
            let cipher = payload[pos];
            match plaintext_class(pos, name_len, assume_header) {
                Plain::Exact(plain) => {
                    let only = cipher ^ plain;
                    for (k, ok) in allowed.iter_mut().enumerate() {
                        *ok &= k as u8 == only;
                    }
                }
                Plain::Username => {
                    for (k, ok) in allowed.iter_mut().enumerate() {
                        *ok &= is_username_byte(cipher ^ k as u8);
                    }
                }
                Plain::Password => {
                    for (k, ok) in allowed.iter_mut().enumerate() {
                        *ok &= is_password_byte(cipher ^ k as u8);
                    }
                }
                Plain::Any => {}
            }
        }
        let list: Vec<u8> = (0..=u8::MAX).filter(|&k| allowed[k as usize]).collect();
        if list.is_empty() {
            return None;
        }
        choices.push(list);
    }

    // Odometer over the cartesian product of the per-residue lists
    let mut index = [0usize; KEY_LEN];
    let mut key = [0u8; KEY_LEN];
    loop {
        for (r, k) in key.iter_mut().enumerate() {
            *k = choices[r][index[r]];
        }
        if !progress.tick() {
            return None;
        }
        let candidate = XorKey::new(key);
        if let Some(credentials) = try_key(payload, &candidate) {
            return Some((candidate, credentials));
        }

        let mut r = 0;
        loop {
            if r == KEY_LEN {
                return None;
            }
            index[r] += 1;
            if index[r] < choices[r].len() {
                break;
            }
            index[r] = 0;
            r += 1;
        }
    }
}
