//! TCP send side: RTP-over-TCP interleave framing and serialized
//! full-packet writes on the RTSP control connection.
//!
//! A logical packet (an RTSP response or an interleaved RTP frame) must
//! reach the wire contiguously — responses and media share one TCP stream,
//! so a per-connection mutex serializes writers and each write runs to
//! completion before the lock is released.
//!
//! The control socket is non-blocking (the control loop reads it without
//! blocking), so writes can hit `WouldBlock` under receiver backpressure.
//! The sender retries with a bounded write-readiness wait; past the bound
//! the packet is dropped for this connection ([`RtspError::SendBusy`]).
//!
//! TLS note: to carry RTSP over TLS, substitute the stream handle here
//! (and the control loop's read half) with a TLS stream; framing and
//! serialization are unchanged.

use std::io::{ErrorKind, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, RtspError};

/// First byte of an RTP-over-TCP frame (RFC 2326 §10.12), ASCII `$`.
pub const INTERLEAVE_MAGIC: u8 = 0x24;

/// Upper bound on the write-readiness wait for one packet.
const SEND_RETRY_WINDOW: Duration = Duration::from_millis(100);

/// Interval between retries while waiting for the socket to drain.
const SEND_RETRY_STEP: Duration = Duration::from_millis(2);

/// Build the 4-byte interleave frame header: magic, channel, and the
/// big-endian length of the RTP packet that follows (the RTP packet only,
/// not the frame itself).
pub fn interleave_header(channel: u8, rtp_len: usize) -> [u8; 4] {
    debug_assert!(rtp_len <= u16::MAX as usize);
    let len = rtp_len as u16;
    [INTERLEAVE_MAGIC, channel, (len >> 8) as u8, len as u8]
}

/// Write half of an RTSP control connection.
///
/// Shared between the control loop (responses) and the fan-out pipeline
/// (interleaved RTP). Cloned from the control loop's read handle so both
/// sides address the same socket.
pub struct TcpSender {
    stream: Mutex<TcpStream>,
}

impl TcpSender {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }

    /// Write one logical packet in full.
    ///
    /// Holds the connection's send lock for the duration, looping over
    /// short writes. `WouldBlock` waits for write readiness up to
    /// [`SEND_RETRY_WINDOW`]; exceeding it abandons the packet with
    /// [`RtspError::SendBusy`]. Peer-closed errors surface as
    /// [`RtspError::PeerClosed`].
    pub fn send_packet(&self, packet: &[u8]) -> Result<()> {
        let mut stream = self.stream.lock();
        let mut sent = 0usize;
        let mut blocked_since: Option<Instant> = None;

        while sent < packet.len() {
            match stream.write(&packet[sent..]) {
                Ok(0) => return Err(RtspError::PeerClosed),
                Ok(n) => {
                    sent += n;
                    blocked_since = None;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let since = *blocked_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= SEND_RETRY_WINDOW {
                        tracing::warn!(sent, total = packet.len(), "TCP send stalled, dropping packet");
                        return Err(RtspError::SendBusy);
                    }
                    std::thread::sleep(SEND_RETRY_STEP);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_peer_closed(&e) => return Err(RtspError::PeerClosed),
                Err(e) => {
                    tracing::warn!(error = %e, "TCP send failed");
                    return Err(RtspError::Io(e));
                }
            }
        }
        Ok(())
    }

    /// Frame an RTP packet for this connection's channel and send it.
    pub fn send_interleaved(&self, channel: u8, rtp_packet: &[u8]) -> Result<()> {
        let mut framed = Vec::with_capacity(4 + rtp_packet.len());
        framed.extend_from_slice(&interleave_header(channel, rtp_packet.len()));
        framed.extend_from_slice(rtp_packet);
        self.send_packet(&framed)
    }
}

/// Errors that mean the peer went away; the session ends without logging.
pub(crate) fn is_peer_closed(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
    )
}
