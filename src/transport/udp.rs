//! UDP send side: lazily created, per-kind and per-scope RTP sockets.
//!
//! One socket per (media kind, scope) pair, created by the first SETUP
//! that needs it and shared by every session thereafter — unicast sessions
//! differ only in destination address. Multicast sockets carry the
//! configured TTL; unicast sockets bind an OS-assigned source port (the
//! advertised `server_port` in SETUP replies is nominal, the client
//! addresses us by the datagrams it receives).
//!
//! Sockets are non-blocking. A datagram either goes out whole or not at
//! all; `WouldBlock` drops the packet for that recipient and streaming
//! continues.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::media::MediaKind;

/// Which shared socket family a send goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpScope {
    Unicast,
    Multicast,
}

/// The six lazily-bound RTP send sockets (three kinds × two scopes).
pub struct UdpMux {
    unicast: [Mutex<Option<Arc<UdpSocket>>>; 3],
    multicast: [Mutex<Option<Arc<UdpSocket>>>; 3],
}

impl UdpMux {
    pub fn new() -> Self {
        Self {
            unicast: std::array::from_fn(|_| Mutex::new(None)),
            multicast: std::array::from_fn(|_| Mutex::new(None)),
        }
    }

    /// Bind the socket for `(kind, scope)` if this is the first SETUP to
    /// need it. `ttl` applies to multicast sockets only.
    pub fn ensure(&self, kind: MediaKind, scope: UdpScope, ttl: u8) -> Result<()> {
        let slot = self.slot(kind, scope);
        let mut guard = slot.lock();
        if guard.is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        if scope == UdpScope::Multicast {
            socket.set_multicast_ttl_v4(u32::from(ttl))?;
        }
        tracing::debug!(kind = kind.control_name(), ?scope, "RTP UDP socket bound");
        *guard = Some(Arc::new(socket));
        Ok(())
    }

    /// Send one RTP packet to `dest` through the `(kind, scope)` socket.
    ///
    /// `WouldBlock` maps to [`RtspError::SendBusy`]: the datagram is
    /// dropped for this recipient.
    pub fn send(
        &self,
        kind: MediaKind,
        scope: UdpScope,
        packet: &[u8],
        dest: SocketAddr,
    ) -> Result<()> {
        let socket = {
            let guard = self.slot(kind, scope).lock();
            match &*guard {
                Some(s) => s.clone(),
                None => {
                    tracing::warn!(kind = kind.control_name(), ?scope, "send on unconfigured RTP socket");
                    return Err(RtspError::NotStarted);
                }
            }
        };

        match socket.send_to(packet, dest) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(RtspError::SendBusy),
            Err(e) => Err(RtspError::Io(e)),
        }
    }

    /// Drop every bound socket. Called when the last session departs and
    /// on server shutdown; the next SETUP binds fresh sockets.
    pub fn close_all(&self) {
        for slot in self.unicast.iter().chain(self.multicast.iter()) {
            *slot.lock() = None;
        }
    }

    fn slot(&self, kind: MediaKind, scope: UdpScope) -> &Mutex<Option<Arc<UdpSocket>>> {
        match scope {
            UdpScope::Unicast => &self.unicast[kind.index()],
            UdpScope::Multicast => &self.multicast[kind.index()],
        }
    }
}

impl Default for UdpMux {
    fn default() -> Self {
        Self::new()
    }
}
