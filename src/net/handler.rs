//! Connection handler module
//!
//! Drives one client connection through its phases:
//! - Handshake written unprompted on accept
//! - Packet classification (Bishop login, legacy Bishop login, ping, user login)
//! - User logins raced against the fast-path deadline; on expiry the interim
//!   ack goes out and the slow path finishes in the background
//! - Game, identity, confirmation and logout traffic relayed by Bishop
//! - Standalone user-login connections close after their final response;
//!   Bishop links stay open until idle, closed by the peer, or past their
//!   maximum duration

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::auth::verify_login;
use crate::error::{GatewayError, NetworkError, ProtocolError, ResolveError, Result, ResultCode};
use crate::net::session::{Session, SessionPhase};
use crate::net::transport::{spawn_writer, FrameReader, OUTBOUND_QUEUE};
use crate::protocol::packets::{
    classify, encode_bishop_response, encode_game_response, encode_session_confirm_response,
    encode_user_response, encode_verify_response, BishopLogin, PacketKind, RawPacket,
    HANDSHAKE_PACKET, INTERIM_ACK, LEGACY_BISHOP_RESPONSE, PLAYER_IDENTITY_RESPONSE,
};
use crate::resolver::pool::{SlowJob, SlowResult};
use crate::resolver::Identity;
use crate::AppState;

/// How long queued responses may take to flush once a connection ends
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection handler for processing client connections
pub struct ConnectionHandler {
    /// Shared application state
    state: Arc<AppState>,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Handle an accepted TCP connection until it closes
    pub async fn handle_tcp(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling TCP connection");
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let session = self
            .state
            .session_manager
            .create_session_with_channel(addr, outbound_tx);
        let mut writer = spawn_writer(write_half, outbound_rx, session.id);
        let mut reader = FrameReader::new(read_half);

        let result = self.process_connection(&mut reader, &session).await;

        debug!(session_id = session.id, "Connection handler ending");
        self.state.session_manager.remove(session.id);
        session.close_outbound();
        drop(reader);

        if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await.is_err() {
            trace!(session_id = session.id, "Writer did not finish, aborting");
            writer.abort();
        }

        result
    }

    /// Main connection loop
    async fn process_connection<R: AsyncRead + Unpin>(
        &self,
        reader: &mut FrameReader<R>,
        session: &Arc<Session>,
    ) -> Result<()> {
        session.send(HANDSHAKE_PACKET.to_vec()).await?;
        session.set_phase(SessionPhase::AwaitingPacket);
        trace!(session_id = session.id, "Handshake sent");

        let idle = self.state.config.ping_cycle();
        let bishop_max = self.state.config.bishop_session_max();

        loop {
            if !session.is_bishop()
                && session.responses_sent() > 0
                && session.pending_resolutions() == 0
            {
                debug!(session_id = session.id, "Final response sent, closing");
                return Ok(());
            }

            let wait = if session.is_bishop() {
                let remaining = bishop_max.saturating_sub(session.created_at.elapsed());
                if remaining.is_zero() {
                    info!(
                        session_id = session.id,
                        address = %session.address,
                        max_secs = bishop_max.as_secs(),
                        "Bishop session reached its maximum duration, closing"
                    );
                    return Ok(());
                }
                idle.min(remaining)
            } else {
                idle
            };

            let next = if session.pending_resolutions() > 0 {
                tokio::select! {
                    _ = session.resolution_completed() => continue,
                    next = reader.read_packet(Some(wait)) => next,
                }
            } else {
                reader.read_packet(Some(wait)).await
            };

            let packet = match next {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    debug!(session_id = session.id, "Peer closed connection");
                    return Ok(());
                }
                Err(GatewayError::Network(NetworkError::Timeout)) if wait < idle => continue,
                Err(GatewayError::Network(NetworkError::Timeout)) => {
                    info!(
                        session_id = session.id,
                        idle_secs = idle.as_secs(),
                        pending = session.pending_resolutions(),
                        "Idle timeout"
                    );
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            session.touch();
            self.handle_packet(session, packet).await?;
        }
    }

    /// Dispatch one packet. Errors close the connection without a reply.
    async fn handle_packet(&self, session: &Arc<Session>, packet: RawPacket) -> Result<()> {
        let kind = classify(&packet)?;
        let kind_name = kind.name();
        debug!(
            session_id = session.id,
            kind = kind_name,
            packet_type = packet.header.packet_type,
            size = packet.len(),
            "Packet received"
        );

        match kind {
            PacketKind::BishopLogin(login) => self.handle_bishop_login(session, login).await,
            PacketKind::LegacyBishopLogin => {
                session.set_phase(SessionPhase::BishopSync);
                info!(
                    session_id = session.id,
                    address = %session.address,
                    "Legacy Bishop login"
                );
                session.set_bishop("legacy".to_string());
                session.send(LEGACY_BISHOP_RESPONSE.to_vec()).await?;
                session.set_phase(SessionPhase::AwaitingPacket);
                Ok(())
            }
            PacketKind::Ping if session.is_bishop() => {
                trace!(session_id = session.id, "Ping");
                session.send(INTERIM_ACK.to_vec()).await
            }
            PacketKind::UserLogin(payload) => self.handle_user_login(session, payload).await,
            PacketKind::UserLogout if session.is_bishop() => {
                info!(session_id = session.id, "User logout relayed by Bishop");
                session.send(INTERIM_ACK.to_vec()).await
            }
            PacketKind::GameLogin { request_key } if session.is_bishop() => {
                info!(session_id = session.id, request_key, "Game server login check");
                session
                    .send(encode_game_response(request_key, ResultCode::Success))
                    .await
            }
            PacketKind::PlayerIdentity { request_key } if session.is_bishop() => {
                info!(session_id = session.id, request_key, "Player identity check");
                session.send(PLAYER_IDENTITY_RESPONSE.to_vec()).await
            }
            PacketKind::SessionConfirm if session.is_bishop() => {
                debug!(session_id = session.id, "Session confirmation");
                session.send(encode_session_confirm_response()).await
            }
            PacketKind::Ping
            | PacketKind::UserLogout
            | PacketKind::GameLogin { .. }
            | PacketKind::PlayerIdentity { .. }
            | PacketKind::SessionConfirm
            | PacketKind::Unknown { .. } => {
                warn!(
                    session_id = session.id,
                    address = %session.address,
                    packet_type = packet.header.packet_type,
                    size = packet.len(),
                    kind = kind_name,
                    "Unexpected packet, closing connection"
                );
                Err(ProtocolError::UnknownPacketType(packet.header.packet_type).into())
            }
        }
    }

    async fn handle_bishop_login(&self, session: &Arc<Session>, login: BishopLogin) -> Result<()> {
        session.set_phase(SessionPhase::BishopSync);
        let bishop_id = hex::encode_upper(login.bishop_id);
        info!(
            session_id = session.id,
            address = %session.address,
            bishop_id = %bishop_id,
            "Bishop login"
        );
        session.set_bishop(bishop_id);
        session
            .send(encode_bishop_response(ResultCode::Success))
            .await?;
        session.set_phase(SessionPhase::AwaitingPacket);
        Ok(())
    }

    async fn handle_user_login(&self, session: &Arc<Session>, payload: Bytes) -> Result<()> {
        session.begin_user_login();
        session.set_phase(SessionPhase::UserFastResolving);

        let identity = Identity::address(session.address.ip());
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.state.fast_deadline();

        let fast = {
            let resolver = self.state.resolver.clone();
            let payload = payload.clone();
            let identity = identity.clone();
            tokio::task::spawn_blocking(move || resolver.resolve_fast(&payload, &identity))
        };
        let fast = match tokio::time::timeout_at(deadline, fast).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!(session_id = session.id, error = %e, "Fast resolution task failed");
                None
            }
            Err(_) => {
                debug!(session_id = session.id, "Fast path missed its deadline");
                None
            }
        };

        if let Some(resolution) = fast {
            let response = final_response(&self.state, session, Ok(resolution), started).await;
            session.send_final(response).await?;
            session.set_phase(SessionPhase::AwaitingPacket);
            return Ok(());
        }

        if !self.state.tracker.should_attempt(&identity) {
            let result = Err(ResolveError::BreakerOpen {
                identity: identity.to_string(),
            });
            let response = final_response(&self.state, session, result, started).await;
            session.send_final(response).await?;
            session.set_phase(SessionPhase::AwaitingPacket);
            return Ok(());
        }

        // The slow job answers through `result_tx` while this handler is
        // still waiting, and writes the final response itself otherwise
        session.resolution_started();
        let (result_tx, mut result_rx) = oneshot::channel::<SlowResult>();
        let job = SlowJob {
            payload,
            identity,
            budget: self.state.slow_deadline(),
        };
        let state = self.state.clone();
        let background = session.clone();
        self.state.pool.submit_with(job, move |result| async move {
            if let Err(result) = result_tx.send(result) {
                finish_in_background(&state, &background, result, started).await;
            }
        });

        tokio::select! {
            biased;
            result = &mut result_rx => {
                let result = result.unwrap_or(Err(ResolveError::PoolUnavailable));
                self.answer_inline(session, result, started).await
            }
            _ = tokio::time::sleep_until(deadline) => {
                if session.claim_ack() {
                    session.set_phase(SessionPhase::UserAckSent);
                    session.send(INTERIM_ACK.to_vec()).await?;
                    info!(
                        session_id = session.id,
                        address = %session.address,
                        "Interim ack sent, resolving in background"
                    );
                }
                result_rx.close();
                match result_rx.try_recv() {
                    Ok(result) => self.answer_inline(session, result, started).await,
                    Err(_) => {
                        session.set_phase(SessionPhase::UserSlowResolving);
                        Ok(())
                    }
                }
            }
        }
    }

    async fn answer_inline(
        &self,
        session: &Arc<Session>,
        result: SlowResult,
        started: Instant,
    ) -> Result<()> {
        let response = final_response(&self.state, session, result, started).await;
        let sent = session.send_final(response).await;
        session.resolution_finished();
        sent?;
        session.set_phase(SessionPhase::AwaitingPacket);
        Ok(())
    }
}

async fn finish_in_background(
    state: &AppState,
    session: &Session,
    result: SlowResult,
    started: Instant,
) {
    let response = final_response(state, session, result, started).await;
    match session.send_final(response).await {
        Ok(()) => {
            session
                .transition_phase(SessionPhase::UserSlowResolving, SessionPhase::AwaitingPacket);
            debug!(session_id = session.id, "Background final response queued");
        }
        Err(_) => info!(
            session_id = session.id,
            address = %session.address,
            "Connection closed before final response, discarding it"
        ),
    }
    session.resolution_finished();
}

/// Build the final response for a user login
async fn final_response(
    state: &AppState,
    session: &Session,
    result: SlowResult,
    started: Instant,
) -> Vec<u8> {
    match result {
        Ok(resolution) => {
            session.set_username(resolution.credentials.username.clone());
            let code = verify_login(
                state.store.clone(),
                &resolution.credentials,
                session.address.ip(),
                state.store_timeout(),
            )
            .await;
            info!(
                session_id = session.id,
                address = %session.address,
                username = %resolution.credentials.username,
                resolved_by = resolution.resolved_by.name(),
                result_code = code.as_u8(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "User login answered"
            );
            debug!(session_id = session.id, key = %resolution.key, "Resolved key");
            encode_user_response(code, &resolution.key)
        }
        Err(e) => {
            let code = ResultCode::from(&e);
            info!(
                session_id = session.id,
                address = %session.address,
                error = %e,
                result_code = code.as_u8(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "User login could not be decoded"
            );
            encode_verify_response(code)
        }
    }
}
