//! The control loop: one task owning the RTSP listener and every accepted
//! control connection.
//!
//! The listener and all client sockets are non-blocking; the loop makes a
//! readiness pass over all of them and sleeps briefly only when nothing
//! made progress, so a single task serves accept and every session's
//! request traffic without ever blocking on a media send.
//!
//! A connection accepted while the registry is at its effective cap gets
//! the bare 503 line and is closed before any session state exists.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RTSP_BUFFER_SIZE;
use crate::protocol::request::{classify_binary, ControlBinary};
use crate::protocol::response::SERVICE_UNAVAILABLE_RAW;
use crate::protocol::{ClientHandler, Outcome};
use crate::server::Shared;
use crate::transport::tcp::{is_peer_closed, TcpSender};
use crate::RtspError;

/// Sleep between readiness passes when no socket had traffic.
const IDLE_POLL: Duration = Duration::from_millis(10);

pub(crate) fn control_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut clients: Vec<ClientConn> = Vec::new();

    while shared.running.load(Ordering::SeqCst) {
        let mut progressed = false;

        match listener.accept() {
            Ok((stream, peer)) => {
                progressed = true;
                if let Some(conn) = accept_client(stream, peer, &shared) {
                    clients.push(conn);
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => {
                if shared.running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "RTSP accept error");
                }
            }
        }

        let mut i = 0;
        while i < clients.len() {
            match clients[i].poll() {
                Poll::Idle => i += 1,
                Poll::Active => {
                    progressed = true;
                    i += 1;
                }
                Poll::Close => {
                    progressed = true;
                    let conn = clients.swap_remove(i);
                    conn.finish(&shared);
                }
            }
        }

        if !progressed {
            std::thread::sleep(IDLE_POLL);
        }
    }

    for conn in clients.drain(..) {
        conn.finish(&shared);
    }
    tracing::debug!("control loop exited");
}

fn accept_client(
    stream: TcpStream,
    peer: SocketAddr,
    shared: &Arc<Shared>,
) -> Option<ClientConn> {
    if shared.registry.at_capacity() {
        tracing::info!(%peer, "at client capacity, refusing connection");
        let mut stream = stream;
        if let Err(e) = stream.write_all(SERVICE_UNAVAILABLE_RAW) {
            tracing::debug!(error = %e, "503 write failed");
        }
        return None;
    }

    let local_ip = stream.local_addr().ok()?.ip();
    if let Err(e) = stream.set_nonblocking(true) {
        tracing::warn!(%peer, error = %e, "failed to set client socket non-blocking");
        return None;
    }
    let write_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "failed to clone client socket");
            return None;
        }
    };

    tracing::info!(%peer, "client connected");
    let sender = Arc::new(TcpSender::new(write_half));
    let handler = ClientHandler::new(shared.clone(), sender, peer, local_ip);
    Some(ClientConn {
        stream,
        peer,
        buf: Vec::with_capacity(1024),
        handler,
    })
}

enum Poll {
    /// No traffic this pass.
    Idle,
    /// Read or handled something.
    Active,
    /// Connection is done; run the close path.
    Close,
}

/// One accepted control connection: its read half, the accumulation
/// buffer, and the method handler carrying the session identity.
struct ClientConn {
    stream: TcpStream,
    peer: SocketAddr,
    buf: Vec<u8>,
    handler: ClientHandler,
}

impl ClientConn {
    /// Drain whatever the socket has, dispatching complete requests.
    fn poll(&mut self) -> Poll {
        let mut scratch = [0u8; 2048];
        let mut activity = false;

        loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => return Poll::Close,
                Ok(n) => {
                    activity = true;
                    if self.buf.len() + n > RTSP_BUFFER_SIZE {
                        tracing::warn!(peer = %self.peer, error = %RtspError::RequestTooLarge, "closing connection");
                        return Poll::Close;
                    }
                    self.buf.extend_from_slice(&scratch[..n]);
                    if self.drain_buffer() == Outcome::Close {
                        return Poll::Close;
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    if !is_peer_closed(&e) {
                        tracing::warn!(peer = %self.peer, error = %e, "control read error");
                    }
                    return Poll::Close;
                }
            }
        }

        if activity {
            Poll::Active
        } else {
            Poll::Idle
        }
    }

    /// Consume complete units from the front of the buffer: interleaved
    /// binary and RTCP are discarded, text requests are dispatched.
    fn drain_buffer(&mut self) -> Outcome {
        loop {
            if self.buf.is_empty() {
                return Outcome::Keep;
            }

            match classify_binary(&self.buf) {
                Some(ControlBinary::Interleaved {
                    frame_len: Some(len),
                }) => {
                    if self.buf.len() < len {
                        return Outcome::Keep; // wait for the rest of the frame
                    }
                    self.buf.drain(..len);
                    tracing::trace!(peer = %self.peer, len, "discarded interleaved frame from client");
                }
                Some(ControlBinary::Interleaved { frame_len: None }) => {
                    return Outcome::Keep; // frame header still incomplete
                }
                Some(ControlBinary::Rtcp) => {
                    // Bare RTCP has no framing on the control socket;
                    // drop the read burst wholesale.
                    tracing::trace!(peer = %self.peer, len = self.buf.len(), "discarded RTCP burst");
                    self.buf.clear();
                }
                None => {
                    let Some(end) = find_request_end(&self.buf) else {
                        return Outcome::Keep;
                    };
                    let request: Vec<u8> = self.buf.drain(..end).collect();
                    let text = String::from_utf8_lossy(&request);
                    if text.trim().is_empty() {
                        continue;
                    }
                    if self.handler.handle_request(&text) == Outcome::Close {
                        return Outcome::Close;
                    }
                }
            }
        }
    }

    /// TEARDOWN/disconnect close path: drop the session (if it ever
    /// registered) and, when it was the last one, the shared RTP sockets
    /// and the admission profile with it.
    fn finish(self, shared: &Shared) {
        if let Some(was_last) = shared.registry.remove(self.handler.session_id()) {
            if was_last {
                shared.udp.close_all();
                tracing::info!("last session departed, shared RTP sockets closed");
            }
        }
        tracing::info!(peer = %self.peer, "client disconnected");
    }
}

/// Index one past the `\r\n\r\n` terminator, if present.
fn find_request_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}
