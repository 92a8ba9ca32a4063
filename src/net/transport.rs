//! Transport module
//!
//! Splits a TCP stream into a framed packet reader and a writer task. The
//! reader owns the read half and a `BytesMut` buffer; the writer task drains
//! the session's outbound channel into the write half, so the connection task
//! and any background resolution can both write without sharing the socket.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{GatewayError, NetworkError, Result};
use crate::protocol::packets::{PacketHeader, RawPacket, HEADER_LEN};

/// Initial read buffer capacity
const READ_BUFFER_SIZE: usize = 4096;

/// Outbound queue depth per connection
pub const OUTBOUND_QUEUE: usize = 32;

/// Reads length-prefixed packets from a byte stream
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Bytes read but not yet framed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Read the next packet.
    ///
    /// Returns `Ok(None)` when the peer closes cleanly between packets. A
    /// close in the middle of a packet is [`NetworkError::ConnectionClosed`];
    /// an invalid header is a protocol error. With `idle` set, waiting longer
    /// than that for the packet yields [`NetworkError::Timeout`].
    pub async fn read_packet(&mut self, idle: Option<Duration>) -> Result<Option<RawPacket>> {
        match idle {
            Some(limit) => match tokio::time::timeout(limit, self.next_packet()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Network(NetworkError::Timeout)),
            },
            None => self.next_packet().await,
        }
    }

    async fn next_packet(&mut self) -> Result<Option<RawPacket>> {
        loop {
            if let Some(packet) = self.try_frame()? {
                trace!(
                    packet_type = packet.header.packet_type,
                    size = packet.len(),
                    "Framed packet"
                );
                return Ok(Some(packet));
            }

            let read = self
                .reader
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| GatewayError::Network(NetworkError::ReadError(e.to_string())))?;

            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                debug!(buffered = self.buffer.len(), "Peer closed mid-packet");
                return Err(GatewayError::Network(NetworkError::ConnectionClosed));
            }
        }
    }

    fn try_frame(&mut self) -> Result<Option<RawPacket>> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = PacketHeader::decode(&self.buffer)?;
        let size = header.size as usize;
        if self.buffer.len() < size {
            self.buffer.reserve(size - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(HEADER_LEN);
        let payload = self.buffer.split_to(size - HEADER_LEN).freeze();
        Ok(Some(RawPacket::from_parts(header, payload)?))
    }
}

/// Spawn the writer task for a connection. It exits when every sender is
/// dropped or a write fails, then shuts the write half down.
pub fn spawn_writer<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Vec<u8>>,
    session_id: u64,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &data).await {
                debug!(session_id, error = %e, "Write failed, stopping writer");
                break;
            }
            trace!(session_id, len = data.len(), "Wrote packet");
        }
        rx.close();
        let _ = writer.shutdown().await;
        trace!(session_id, "Writer finished");
    })
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<()> {
    writer
        .write_all(data)
        .await
        .map_err(|e| GatewayError::Network(NetworkError::WriteError(e.to_string())))?;
    writer
        .flush()
        .await
        .map_err(|e| GatewayError::Network(NetworkError::WriteError(e.to_string())))
}
