//! SDP generation for DESCRIBE responses (RFC 4566).
//!
//! The body advertises only the media kinds the server was configured
//! with. Media ports are 0 — clients negotiate real transport per track
//! via SETUP — and each track carries an `a=control:` name the SETUP URI
//! refers back to:
//!
//! ```text
//! v=0
//! o=- <session_id> 1 IN IP4 <server_ip>
//! s=
//! c=IN IP4 0.0.0.0
//! t=0 0
//! a=control:*
//! m=video 0 RTP/AVP 26
//! a=control:video
//! m=audio 0 RTP/AVP 97
//! a=rtpmap:97 L16/48000/1
//! a=control:audio
//! a=sendrecv
//! m=text 0 RTP/AVP 98
//! a=rtpmap:98 t140/1000
//! a=control:subtitles
//! ```

use std::net::IpAddr;

use crate::config::ServerConfig;
use crate::media::MediaKind;

/// Generate the DESCRIBE body for this server.
///
/// `session_id` fills the SDP origin line; `server_ip` is the address the
/// client reached the server on.
pub fn describe_body(config: &ServerConfig, session_id: u32, server_ip: IpAddr) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!("o=- {} 1 IN IP4 {}", session_id, server_ip));
    sdp.push("s=".to_string());
    sdp.push("c=IN IP4 0.0.0.0".to_string());
    sdp.push("t=0 0".to_string());
    sdp.push("a=control:*".to_string());

    if config.transport.has_video() {
        sdp.push(format!(
            "m=video 0 RTP/AVP {}",
            MediaKind::Video.payload_type()
        ));
        sdp.push("a=control:video".to_string());
    }

    if config.transport.has_audio() {
        let pt = MediaKind::Audio.payload_type();
        sdp.push(format!("m=audio 0 RTP/AVP {}", pt));
        sdp.push(format!(
            "a=rtpmap:{} L16/{}/1",
            pt,
            config.sample_rate.unwrap_or(0)
        ));
        sdp.push("a=control:audio".to_string());
        sdp.push("a=sendrecv".to_string());
    }

    if config.transport.has_subtitles() {
        let pt = MediaKind::Subtitles.payload_type();
        sdp.push(format!("m=text 0 RTP/AVP {}", pt));
        sdp.push(format!("a=rtpmap:{} t140/1000", pt));
        sdp.push("a=control:subtitles".to_string());
    }

    tracing::debug!("SDP: {}", sdp.join(" | "));

    format!("{}\r\n", sdp.join("\r\n"))
}
