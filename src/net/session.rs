//! Session management module
//!
//! Manages client sessions including:
//! - Session lifecycle (creation, tracking, cleanup)
//! - Session phase machine (handshake -> packet -> Bishop or user login)
//! - Per-session flags (interim ack, pending background resolutions)
//! - Thread-safe session registry

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};

use crate::error::{GatewayError, NetworkError, Result};

/// Unique session identifier
pub type SessionId = u64;

/// Phase of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionPhase {
    /// Accepted, handshake not yet written
    AwaitingHandshake,
    /// Waiting for the next packet
    AwaitingPacket,
    /// Answering a Bishop login or ping
    BishopSync,
    /// User login, fast path running
    UserFastResolving,
    /// Fast path missed its deadline and the interim ack went out
    UserAckSent,
    /// Slow path running in the background
    UserSlowResolving,
    /// Connection finished
    Closed,
}

impl SessionPhase {
    /// Check if the session is still open
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionPhase::Closed)
    }

    /// Get a human-readable name for the phase
    pub fn name(&self) -> &'static str {
        match self {
            SessionPhase::AwaitingHandshake => "AwaitingHandshake",
            SessionPhase::AwaitingPacket => "AwaitingPacket",
            SessionPhase::BishopSync => "BishopSync",
            SessionPhase::UserFastResolving => "UserFastResolving",
            SessionPhase::UserAckSent => "UserAckSent",
            SessionPhase::UserSlowResolving => "UserSlowResolving",
            SessionPhase::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A connected client session
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Current phase
    phase: RwLock<SessionPhase>,
    /// Set once a Bishop login succeeds; the connection is then kept open
    bishop: AtomicBool,
    /// Bishop identifier from the login packet, hex encoded
    bishop_id: RwLock<Option<String>>,
    /// Last username decoded on this session
    username: RwLock<Option<String>>,
    /// Interim ack written for the current user login
    ack_sent: AtomicBool,
    /// Slow-path jobs whose final response is still owed
    pending_resolutions: AtomicUsize,
    /// Final responses written
    responses_sent: AtomicU64,
    /// Time of session creation
    pub created_at: Instant,
    pub connected_at: DateTime<Utc>,
    /// Time of last activity
    last_activity: RwLock<Instant>,
    /// Signalled when a background resolution has answered
    completed: Notify,
    /// Outbound message channel (drained by the writer task)
    outbound_tx: RwLock<Option<mpsc::Sender<Vec<u8>>>>,
}

impl Session {
    /// Create a new session
    pub fn new(id: SessionId, address: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id,
            address,
            phase: RwLock::new(SessionPhase::AwaitingHandshake),
            bishop: AtomicBool::new(false),
            bishop_id: RwLock::new(None),
            username: RwLock::new(None),
            ack_sent: AtomicBool::new(false),
            pending_resolutions: AtomicUsize::new(0),
            responses_sent: AtomicU64::new(0),
            created_at: now,
            connected_at: Utc::now(),
            last_activity: RwLock::new(now),
            completed: Notify::new(),
            outbound_tx: RwLock::new(None),
        }
    }

    /// Create a new session with an outbound channel
    pub fn with_channel(
        id: SessionId,
        address: SocketAddr,
        outbound_tx: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        let session = Self::new(id, address);
        *session.outbound_tx.write() = Some(outbound_tx);
        session
    }

    /// Get the current phase
    pub fn phase(&self) -> SessionPhase {
        *self.phase.read()
    }

    /// Set the phase
    pub fn set_phase(&self, new_phase: SessionPhase) {
        let old_phase = {
            let mut phase = self.phase.write();
            let old = *phase;
            *phase = new_phase;
            old
        };
        if old_phase != new_phase {
            debug!(
                session_id = self.id,
                old_phase = %old_phase,
                new_phase = %new_phase,
                "Session phase changed"
            );
        }
    }

    /// Transition to a new phase if currently in the expected one
    pub fn transition_phase(&self, expected: SessionPhase, new_phase: SessionPhase) -> bool {
        let mut phase = self.phase.write();
        if *phase == expected {
            *phase = new_phase;
            true
        } else {
            false
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase().is_active()
    }

    pub fn is_bishop(&self) -> bool {
        self.bishop.load(Ordering::Acquire)
    }

    /// Mark the session as an authenticated Bishop link
    pub fn set_bishop(&self, bishop_id: String) {
        *self.bishop_id.write() = Some(bishop_id);
        self.bishop.store(true, Ordering::Release);
    }

    pub fn bishop_id(&self) -> Option<String> {
        self.bishop_id.read().clone()
    }

    pub fn set_username(&self, username: String) {
        *self.username.write() = Some(username);
    }

    pub fn username(&self) -> Option<String> {
        self.username.read().clone()
    }

    /// Start a new user login; clears the ack flag
    pub fn begin_user_login(&self) {
        self.ack_sent.store(false, Ordering::Release);
    }

    /// Claim the right to send the interim ack. True only on the first call
    /// per user login.
    pub fn claim_ack(&self) -> bool {
        !self.ack_sent.swap(true, Ordering::AcqRel)
    }

    pub fn ack_sent(&self) -> bool {
        self.ack_sent.load(Ordering::Acquire)
    }

    pub fn resolution_started(&self) {
        self.pending_resolutions.fetch_add(1, Ordering::AcqRel);
    }

    /// Called once a background resolution has answered (or given up)
    pub fn resolution_finished(&self) {
        self.pending_resolutions.fetch_sub(1, Ordering::AcqRel);
        self.completed.notify_one();
    }

    /// Wait for the next background resolution to finish
    pub async fn resolution_completed(&self) {
        self.completed.notified().await
    }

    pub fn pending_resolutions(&self) -> usize {
        self.pending_resolutions.load(Ordering::Acquire)
    }

    pub fn responses_sent(&self) -> u64 {
        self.responses_sent.load(Ordering::Acquire)
    }

    /// Update the last activity timestamp
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.read()
    }

    pub fn idle_duration(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// True once the outbound side is closed or the writer task has gone away
    pub fn is_closed(&self) -> bool {
        self.outbound_tx
            .read()
            .as_ref()
            .map_or(true, |tx| tx.is_closed())
    }

    /// Drop the session's sender so the writer finishes once the queue drains
    pub fn close_outbound(&self) {
        self.outbound_tx.write().take();
    }

    /// Queue data for the client
    pub async fn send(&self, data: Vec<u8>) -> Result<()> {
        let tx = self
            .outbound_tx
            .read()
            .clone()
            .ok_or(GatewayError::Network(NetworkError::ConnectionClosed))?;
        tx.send(data)
            .await
            .map_err(|_| GatewayError::Network(NetworkError::ConnectionClosed))
    }

    /// Queue a final response and count it
    pub async fn send_final(&self, data: Vec<u8>) -> Result<()> {
        self.send(data).await?;
        self.responses_sent.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Snapshot for the management API
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            address: self.address.to_string(),
            phase: self.phase(),
            bishop: self.is_bishop(),
            bishop_id: self.bishop_id(),
            username: self.username(),
            pending_resolutions: self.pending_resolutions(),
            responses_sent: self.responses_sent(),
            connected_at: self.connected_at,
            idle_ms: self.idle_duration().as_millis() as u64,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("phase", &self.phase())
            .field("bishop", &self.is_bishop())
            .field("username", &self.username())
            .field("idle_duration", &self.idle_duration())
            .finish()
    }
}

/// Serializable view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub address: String,
    pub phase: SessionPhase,
    pub bishop: bool,
    pub bishop_id: Option<String>,
    pub username: Option<String>,
    pub pending_resolutions: usize,
    pub responses_sent: u64,
    pub connected_at: DateTime<Utc>,
    pub idle_ms: u64,
}

/// Thread-safe session manager
pub struct SessionManager {
    /// Map of session ID to session
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Next session ID to assign
    next_id: AtomicU64,
    /// Sessions created since startup
    total_created: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            total_created: AtomicU64::new(0),
        }
    }

    fn register(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        self.sessions.insert(session.id, session.clone());
        self.total_created.fetch_add(1, Ordering::Relaxed);
        info!(session_id = session.id, address = %session.address, "Session created");
        session
    }

    /// Create a new session and register it
    pub fn create_session(&self, address: SocketAddr) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.register(Session::new(id, address))
    }

    /// Create a session with an outbound channel
    pub fn create_session_with_channel(
        &self,
        address: SocketAddr,
        outbound_tx: mpsc::Sender<Vec<u8>>,
    ) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.register(Session::with_channel(id, address, outbound_tx))
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|r| r.clone())
    }

    /// Remove a session
    pub fn remove(&self, id: SessionId) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            session.set_phase(SessionPhase::Closed);
            info!(
                session_id = id,
                username = ?session.username(),
                responses = session.responses_sent(),
                duration_ms = session.created_at.elapsed().as_millis() as u64,
                "Session removed"
            );
        }
    }

    /// Get the count of open sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn total_created(&self) -> u64 {
        self.total_created.load(Ordering::Relaxed)
    }

    /// Get the count of sessions per phase
    pub fn count_by_phase(&self) -> HashMap<SessionPhase, usize> {
        let mut counts = HashMap::new();
        for session in self.sessions.iter() {
            *counts.entry(session.phase()).or_insert(0) += 1;
        }
        counts
    }

    /// Count of authenticated Bishop links
    pub fn bishop_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_bishop()).count()
    }

    /// All sessions, ordered by id
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self.sessions.iter().map(|s| s.info()).collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_address() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    #[test]
    fn test_session_creation() {
        let session = Session::new(1, test_address());
        assert_eq!(session.id, 1);
        assert_eq!(session.phase(), SessionPhase::AwaitingHandshake);
        assert!(!session.is_bishop());
        assert!(session.is_active());
    }

    #[test]
    fn test_session_phase_transition() {
        let session = Session::new(1, test_address());

        assert!(session.transition_phase(
            SessionPhase::AwaitingHandshake,
            SessionPhase::AwaitingPacket
        ));
        assert_eq!(session.phase(), SessionPhase::AwaitingPacket);

        // Should fail - not awaiting the handshake anymore
        assert!(!session.transition_phase(
            SessionPhase::AwaitingHandshake,
            SessionPhase::BishopSync
        ));
        assert_eq!(session.phase(), SessionPhase::AwaitingPacket);

        session.set_phase(SessionPhase::Closed);
        assert!(!session.is_active());
    }

    #[test]
    fn test_ack_claimed_once_per_login() {
        let session = Session::new(1, test_address());
        session.begin_user_login();
        assert!(session.claim_ack());
        assert!(!session.claim_ack());
        assert!(session.ack_sent());

        session.begin_user_login();
        assert!(!session.ack_sent());
        assert!(session.claim_ack());
    }

    #[tokio::test]
    async fn test_send_after_writer_gone() {
        let (tx, rx) = mpsc::channel(4);
        let session = Session::with_channel(1, test_address(), tx);
        assert!(!session.is_closed());
        session.send_final(vec![1, 2, 3]).await.unwrap();
        assert_eq!(session.responses_sent(), 1);

        drop(rx);
        assert!(session.is_closed());
        assert!(session.send(vec![4]).await.is_err());
        assert!(matches!(
            session.send_final(vec![4]).await,
            Err(GatewayError::Network(NetworkError::ConnectionClosed))
        ));
        assert_eq!(session.responses_sent(), 1);
    }

    #[test]
    fn test_session_manager() {
        let manager = SessionManager::new();
        let s1 = manager.create_session("127.0.0.1:1".parse().unwrap());
        let s2 = manager.create_session("127.0.0.1:2".parse().unwrap());
        assert_eq!(manager.count(), 2);
        assert_eq!(manager.get(s1.id).unwrap().id, s1.id);

        s1.set_bishop("B25E".to_string());
        s2.set_phase(SessionPhase::UserSlowResolving);
        assert_eq!(manager.bishop_count(), 1);
        let counts = manager.count_by_phase();
        assert_eq!(counts.get(&SessionPhase::UserSlowResolving), Some(&1));

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].bishop_id.as_deref(), Some("B25E"));

        manager.remove(s1.id);
        assert!(manager.get(s1.id).is_none());
        assert_eq!(s1.phase(), SessionPhase::Closed);
        assert_eq!(manager.total_created(), 2);
    }
}
