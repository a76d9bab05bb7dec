//! Per-connection RTSP method handling.
//!
//! One [`ClientHandler`] per accepted connection, driven by the control
//! loop. It owns the connection's session identity, dispatches the six
//! supported methods, and applies the first-client admission rule on
//! SETUP. Responses go through the connection's [`TcpSender`], the same
//! serialized writer interleaved RTP uses, so a response can never split
//! an in-flight media frame.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::error::BadRequestKind;
use crate::media::MediaKind;
use crate::protocol::request::{RtspRequest, TransportRequest};
use crate::protocol::response::{RtspResponse, BAD_REQUEST_RAW};
use crate::protocol::sdp;
use crate::server::Shared;
use crate::session::{Admission, Session, TransportProfile};
use crate::transport::tcp::TcpSender;
use crate::transport::udp::UdpScope;
use crate::RtspError;

/// Map a SETUP failure to its RTSP status line.
///
/// Every admission rejection of a parsed SETUP answers 461, whether the
/// transport mismatched the pinned profile or the ceiling is full; the
/// bare 503 line belongs to connections refused at accept time, before
/// any request exists. Resource failures (e.g. RTP socket allocation)
/// deny the operation with 503 and keep the session alive.
fn rejection_status(error: &RtspError) -> RtspResponse {
    match error {
        RtspError::BadRequest { .. } => RtspResponse::bad_request(),
        RtspError::UnsupportedTransport | RtspError::ServiceUnavailable => {
            RtspResponse::unsupported_transport()
        }
        _ => RtspResponse::service_unavailable(),
    }
}

/// What the control loop should do with the connection after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Keep,
    Close,
}

pub struct ClientHandler {
    shared: Arc<Shared>,
    sender: Arc<TcpSender>,
    peer: SocketAddr,
    /// Address the client reached us on; used for SDP and Content-Base.
    local_ip: IpAddr,
    session_id: u32,
}

impl ClientHandler {
    pub fn new(
        shared: Arc<Shared>,
        sender: Arc<TcpSender>,
        peer: SocketAddr,
        local_ip: IpAddr,
    ) -> Self {
        let session_id = shared.registry.generate_session_id();
        Self {
            shared,
            sender,
            peer,
            local_ip,
            session_id,
        }
    }

    /// Session identity of this connection, for the close path.
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Handle one complete request already read off the control socket.
    pub fn handle_request(&mut self, raw: &str) -> Outcome {
        let request = match RtspRequest::parse(raw) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "unparseable request");
                return self.send_raw(BAD_REQUEST_RAW);
            }
        };

        // A request naming a live session operates on that session, even
        // if this connection generated a different id at accept.
        if let Some(id) = request.session_id {
            if self.shared.registry.contains(id) {
                self.session_id = id;
            }
        }
        self.shared
            .registry
            .with_session_mut(self.session_id, |s| s.cseq = request.cseq);

        tracing::debug!(
            peer = %self.peer,
            method = %request.method,
            cseq = request.cseq,
            "request"
        );

        match request.method.as_str() {
            "OPTIONS" => self.handle_options(&request),
            "DESCRIBE" => self.handle_describe(&request),
            "SETUP" => self.handle_setup(&request),
            "PLAY" => self.handle_play(&request),
            "PAUSE" => self.handle_pause(&request),
            "TEARDOWN" => self.handle_teardown(&request),
            other => {
                tracing::warn!(method = %other, peer = %self.peer, "unknown RTSP method, ignoring");
                Outcome::Keep
            }
        }
    }

    fn handle_options(&mut self, request: &RtspRequest) -> Outcome {
        let response = RtspResponse::ok()
            .cseq(request.cseq)
            .header("Public", "DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN");
        self.send(response)
    }

    fn handle_describe(&mut self, request: &RtspRequest) -> Outcome {
        let body = sdp::describe_body(&self.shared.config, self.session_id, self.local_ip);
        let content_base = format!(
            "rtsp://{}:{}/",
            self.local_ip, self.shared.config.rtsp_port
        );
        let response = RtspResponse::ok()
            .cseq(request.cseq)
            .header("Content-Type", "application/sdp")
            .header("Content-Base", &content_base)
            .with_body(body);
        self.send(response)
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> Outcome {
        match self.try_setup(request) {
            Ok(response) => self.send(response),
            Err(e) => {
                tracing::warn!(peer = %self.peer, uri = %request.uri, error = %e, "SETUP rejected");
                self.send(rejection_status(&e).cseq(request.cseq))
            }
        }
    }

    fn try_setup(&mut self, request: &RtspRequest) -> crate::Result<RtspResponse> {
        let transport_header = request.transport.as_deref().ok_or(RtspError::BadRequest {
            kind: BadRequestKind::MissingTransport,
        })?;
        let transport = TransportRequest::parse(transport_header);

        let kind = request.media_kind().ok_or(RtspError::BadRequest {
            kind: BadRequestKind::UnknownTrack,
        })?;

        // Required transport parameters, checked before any state changes.
        let channel = transport.interleaved_channel.unwrap_or(0);
        if transport.is_tcp && transport.interleaved_channel.is_none() {
            return Err(RtspError::BadRequest {
                kind: BadRequestKind::IncompleteTransport,
            });
        }
        let client_port = transport.client_port.unwrap_or(0);
        if !transport.is_tcp && !transport.is_multicast && transport.client_port.is_none() {
            return Err(RtspError::BadRequest {
                kind: BadRequestKind::IncompleteTransport,
            });
        }

        let profile = TransportProfile {
            is_multicast: transport.is_multicast,
            is_tcp: transport.is_tcp,
        };
        let new_session = !self.shared.registry.contains(self.session_id);
        match self.shared.registry.admit(profile, new_session) {
            Admission::Accepted => {}
            Admission::Mismatch => return Err(RtspError::UnsupportedTransport),
            Admission::Full => return Err(RtspError::ServiceUnavailable),
        }

        if !transport.is_tcp {
            let scope = if transport.is_multicast {
                UdpScope::Multicast
            } else {
                UdpScope::Unicast
            };
            if let Err(e) = self
                .shared
                .udp
                .ensure(kind, scope, self.shared.config.multicast_ttl)
            {
                tracing::error!(error = %e, kind = kind.control_name(), "RTP socket setup failed");
                self.shared.registry.release_slot(new_session);
                return Err(e);
            }
        }

        if transport.is_tcp {
            self.shared.streams.set_channel(kind, channel);
        }
        if kind == MediaKind::Video && self.shared.config.video_worker {
            self.shared.video_slot.ensure_allocated();
        }

        if new_session {
            self.shared.registry.insert(Session {
                id: self.session_id,
                peer: self.peer,
                sender: self.sender.clone(),
                video_port: 0,
                audio_port: 0,
                subtitles_port: 0,
                is_multicast: transport.is_multicast,
                is_tcp: transport.is_tcp,
                is_playing: false,
                cseq: request.cseq,
            });
        }
        self.shared.registry.with_session_mut(self.session_id, |s| {
            match kind {
                MediaKind::Video => s.video_port = client_port,
                MediaKind::Audio => s.audio_port = client_port,
                MediaKind::Subtitles => s.subtitles_port = client_port,
            }
            s.is_multicast = transport.is_multicast;
            s.is_tcp = transport.is_tcp;
        });

        tracing::info!(
            session_id = self.session_id,
            peer = %self.peer,
            kind = kind.control_name(),
            multicast = transport.is_multicast,
            tcp = transport.is_tcp,
            "SETUP accepted"
        );

        let server_port = kind.rtp_port(&self.shared.config);
        let transport_line = if transport.is_tcp {
            format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{}",
                channel,
                u16::from(channel) + 1
            )
        } else if transport.is_multicast {
            format!(
                "RTP/AVP;multicast;destination={};port={}-{};ttl={}",
                self.shared.config.multicast_group,
                server_port,
                u32::from(server_port) + 1,
                self.shared.config.multicast_ttl
            )
        } else {
            format!(
                "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
                client_port,
                u32::from(client_port) + 1,
                server_port,
                u32::from(server_port) + 1
            )
        };

        Ok(RtspResponse::ok()
            .cseq(request.cseq)
            .header("Transport", &transport_line)
            .session(self.session_id))
    }

    fn handle_play(&mut self, request: &RtspRequest) -> Outcome {
        if !self.shared.registry.set_playing(self.session_id, true) {
            tracing::warn!(session_id = self.session_id, "PLAY for unknown session");
            return self.send(RtspResponse::session_not_found().cseq(request.cseq));
        }
        tracing::info!(session_id = self.session_id, "session playing");

        let rtp_info = format!(
            "url=rtsp://{}:{}/",
            self.local_ip, self.shared.config.rtsp_port
        );
        let response = RtspResponse::ok()
            .cseq(request.cseq)
            .session(self.session_id)
            .header("Range", "npt=0.000-")
            .header("RTP-Info", &rtp_info);
        self.send(response)
    }

    fn handle_pause(&mut self, request: &RtspRequest) -> Outcome {
        if !self.shared.registry.set_playing(self.session_id, false) {
            tracing::warn!(session_id = self.session_id, "PAUSE for unknown session");
            return self.send(RtspResponse::session_not_found().cseq(request.cseq));
        }
        tracing::info!(session_id = self.session_id, "session paused");

        let response = RtspResponse::ok().cseq(request.cseq).session(self.session_id);
        self.send(response)
    }

    fn handle_teardown(&mut self, request: &RtspRequest) -> Outcome {
        self.shared.registry.set_playing(self.session_id, false);
        tracing::info!(session_id = self.session_id, "session torn down");

        let response = RtspResponse::ok().cseq(request.cseq).session(self.session_id);
        // The 200 goes out first; the control loop then runs the close
        // path (session removal, shared-socket cleanup if last).
        self.send(response);
        Outcome::Close
    }

    fn send(&self, response: RtspResponse) -> Outcome {
        self.send_raw(response.serialize().as_bytes())
    }

    fn send_raw(&self, bytes: &[u8]) -> Outcome {
        match self.sender.send_packet(bytes) {
            Ok(()) => Outcome::Keep,
            Err(RtspError::PeerClosed) => Outcome::Close,
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "response write failed");
                Outcome::Close
            }
        }
    }
}
