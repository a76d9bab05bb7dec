//! Transport multiplexer: TCP-interleaved and UDP (unicast/multicast)
//! packet delivery, plus the immutable per-session transport snapshot the
//! fan-out pipeline sends through.

pub mod tcp;
pub mod udp;

use std::net::IpAddr;
use std::sync::Arc;

use crate::media::MediaKind;
use self::tcp::TcpSender;

/// Immutable view of a session's negotiated transport, copied out of the
/// registry before any network I/O so no lock is held across a send.
#[derive(Clone)]
pub enum SessionTransport {
    /// RTP to the shared multicast group; emitted once per media unit no
    /// matter how many multicast sessions are subscribed.
    Multicast,
    /// RTP datagrams to the client's declared per-kind ports.
    Unicast {
        ip: IpAddr,
        video_port: u16,
        audio_port: u16,
        subtitles_port: u16,
    },
    /// RTP interleaved into the RTSP TCP connection.
    Interleaved { sender: Arc<TcpSender> },
}

impl SessionTransport {
    /// Destination port for `kind` on a unicast session.
    pub fn client_port(&self, kind: MediaKind) -> Option<u16> {
        match self {
            Self::Unicast {
                video_port,
                audio_port,
                subtitles_port,
                ..
            } => Some(match kind {
                MediaKind::Video => *video_port,
                MediaKind::Audio => *audio_port,
                MediaKind::Subtitles => *subtitles_port,
            }),
            _ => None,
        }
    }
}
