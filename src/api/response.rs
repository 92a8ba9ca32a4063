//! API response types for consistent JSON responses

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::resolver::cache::KeyCacheStats;
use crate::resolver::KeyCacheEntry;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Whether the request was successful
    pub success: bool,
    /// Response message
    pub message: String,
    /// Response data (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a successful response with data
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create a successful response without data
    pub fn success_message(message: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}

/// Liveness report
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub store: &'static str,
}

/// Gateway counters
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub sessions: SessionStats,
    pub key_cache: KeyCacheStats,
    pub open_breakers: usize,
    pub tracked_identities: usize,
    pub pool: PoolStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub active: usize,
    pub total_created: u64,
    pub bishops: usize,
    pub by_phase: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub in_flight: usize,
    pub active: usize,
    pub max_concurrent: usize,
    pub closed: bool,
}

/// A learned key as shown over the API. Key bytes are never exposed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnedKeyInfo {
    pub identity: String,
    pub learned_at: DateTime<Utc>,
    pub hit_count: u64,
}

impl From<&KeyCacheEntry> for LearnedKeyInfo {
    fn from(entry: &KeyCacheEntry) -> Self {
        Self {
            identity: entry.identity.to_string(),
            learned_at: entry.learned_at,
            hit_count: entry.hit_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::XorKey;
    use crate::resolver::Identity;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("Test message", vec![1, 2, 3]);
        assert!(response.success);
        assert_eq!(response.message, "Test message");
        assert!(response.data.is_some());
    }

    #[test]
    fn test_learned_key_info_hides_key() {
        let entry = KeyCacheEntry {
            identity: Identity::username("tester_3"),
            key: XorKey::repeated(0x5A),
            learned_at: Utc::now(),
            hit_count: 4,
        };
        let json = serde_json::to_string(&LearnedKeyInfo::from(&entry)).unwrap();
        assert!(json.contains("\"identity\":\"user:tester_3\""));
        assert!(json.contains("\"hitCount\":4"));
        assert!(!json.contains("5A5A") && !json.contains("5a5a"));
    }
}
