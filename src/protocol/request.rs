//! RTSP request scanning and control-channel classification.
//!
//! Requests follow RFC 2326 §6 text syntax. Parsing is a tolerant scan of
//! the raw buffer rather than a strict grammar: the first token is the
//! method, `CSeq:` is mandatory (400 without it), `Session:` and
//! `Transport:` are extracted where present. Clients also push binary
//! down the control socket — interleaved RTP/RTCP frames and bare RTCP
//! packets — which the server recognizes only to discard.

use crate::error::{BadRequestKind, Result, RtspError};
use crate::media::MediaKind;
use crate::transport::tcp::INTERLEAVE_MAGIC;

/// A scanned RTSP request.
#[derive(Debug)]
pub struct RtspRequest {
    /// RTSP method token (OPTIONS, DESCRIBE, SETUP, ...).
    pub method: String,
    /// Request-URI (second token of the request line; may be `*`).
    pub uri: String,
    /// Mandatory CSeq, echoed verbatim in the response.
    pub cseq: u32,
    /// Session id from the `Session:` header, when present and non-zero.
    pub session_id: Option<u32>,
    /// Raw `Transport:` header value, when present.
    pub transport: Option<String>,
}

impl RtspRequest {
    /// Scan a complete request (terminated by a blank line).
    ///
    /// Fails with [`RtspError::BadRequest`] when `CSeq:` is absent or
    /// unparseable; everything else degrades to defaults.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut first_line = raw.lines().next().unwrap_or("").split_whitespace();
        let method = first_line.next().unwrap_or("").to_string();
        let uri = first_line.next().unwrap_or("").to_string();

        let cseq = header_value(raw, "CSeq")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .ok_or(RtspError::BadRequest {
                kind: BadRequestKind::MissingCSeq,
            })?;

        let session_id = header_value(raw, "Session")
            .and_then(|v| v.split(';').next())
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|&id| id != 0);

        let transport = header_value(raw, "Transport").map(|v| v.trim().to_string());

        Ok(Self {
            method,
            uri,
            cseq,
            session_id,
            transport,
        })
    }

    /// Which media track a SETUP URI addresses, from the `a=control:`
    /// names advertised in the SDP.
    pub fn media_kind(&self) -> Option<MediaKind> {
        for kind in [MediaKind::Video, MediaKind::Audio, MediaKind::Subtitles] {
            if self.uri.contains(kind.control_name()) {
                return Some(kind);
            }
        }
        None
    }
}

/// Case-insensitive header lookup over the raw request text.
fn header_value<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    raw.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

/// Client transport parameters scanned from a SETUP `Transport:` header
/// (RFC 2326 §12.39).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportRequest {
    pub is_multicast: bool,
    pub is_tcp: bool,
    /// RTP port from `client_port=a-b` (UDP unicast).
    pub client_port: Option<u16>,
    /// RTP channel from `interleaved=a-b` (TCP).
    pub interleaved_channel: Option<u8>,
}

impl TransportRequest {
    pub fn parse(header: &str) -> Self {
        Self {
            is_multicast: header.contains("multicast"),
            is_tcp: header.contains("RTP/AVP/TCP"),
            client_port: range_start(header, "client_port="),
            interleaved_channel: range_start(header, "interleaved=").map(|c| c as u8),
        }
    }
}

/// Extract `a` from `key=a-b` anywhere in the header.
fn range_start(header: &str, key: &str) -> Option<u16> {
    let rest = &header[header.find(key)? + key.len()..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Non-request traffic on the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlBinary {
    /// An interleaved `$`-frame; `frame_len` is the total byte count
    /// (4-byte header plus payload) once enough bytes have arrived to
    /// know it.
    Interleaved { frame_len: Option<usize> },
    /// A bare RTCP packet (RTP version bits with payload type 200–204).
    Rtcp,
}

/// Classify leading bytes that are not RTSP text. Returns `None` for
/// anything that should go through the request parser.
pub fn classify_binary(buf: &[u8]) -> Option<ControlBinary> {
    match buf.first() {
        Some(&INTERLEAVE_MAGIC) => {
            let frame_len = (buf.len() >= 4)
                .then(|| 4 + usize::from(u16::from_be_bytes([buf[2], buf[3]])));
            Some(ControlBinary::Interleaved { frame_len })
        }
        Some(&first) if first >> 6 == 2 => {
            // RTCP packet types carry the full second byte (SR=200 .. APP=204).
            let pt = *buf.get(1)?;
            (200..=204).contains(&pt).then_some(ControlBinary::Rtcp)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://192.168.1.5:554/ RTSP/1.0\r\nCSeq: 2\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "rtsp://192.168.1.5:554/");
        assert_eq!(req.cseq, 2);
        assert!(req.session_id.is_none());
    }

    #[test]
    fn missing_cseq_is_bad_request() {
        let raw = "OPTIONS rtsp://host/ RTSP/1.0\r\n\r\n";
        assert!(matches!(
            RtspRequest::parse(raw),
            Err(RtspError::BadRequest {
                kind: BadRequestKind::MissingCSeq
            })
        ));
    }

    #[test]
    fn cseq_lookup_case_insensitive() {
        let raw = "PLAY rtsp://host/ RTSP/1.0\r\ncseq: 7\r\n\r\n";
        assert_eq!(RtspRequest::parse(raw).unwrap().cseq, 7);
    }

    #[test]
    fn session_header_trimmed_decimal() {
        let raw = "PAUSE rtsp://host/ RTSP/1.0\r\nCSeq: 3\r\nSession:  3405691582 \r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.session_id, Some(3405691582));
    }

    #[test]
    fn session_zero_ignored() {
        let raw = "PLAY rtsp://host/ RTSP/1.0\r\nCSeq: 3\r\nSession: 0\r\n\r\n";
        assert_eq!(RtspRequest::parse(raw).unwrap().session_id, None);
    }

    #[test]
    fn media_kind_from_uri() {
        let raw = "SETUP rtsp://host:554/audio RTSP/1.0\r\nCSeq: 4\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.media_kind(), Some(MediaKind::Audio));
    }

    #[test]
    fn media_kind_absent() {
        let raw = "SETUP rtsp://host:554/track9 RTSP/1.0\r\nCSeq: 4\r\n\r\n";
        assert_eq!(RtspRequest::parse(raw).unwrap().media_kind(), None);
    }

    #[test]
    fn transport_udp_unicast() {
        let t = TransportRequest::parse("RTP/AVP;unicast;client_port=6000-6001");
        assert!(!t.is_multicast);
        assert!(!t.is_tcp);
        assert_eq!(t.client_port, Some(6000));
        assert_eq!(t.interleaved_channel, None);
    }

    #[test]
    fn transport_multicast() {
        let t = TransportRequest::parse("RTP/AVP;multicast;ttl=16");
        assert!(t.is_multicast);
        assert!(!t.is_tcp);
    }

    #[test]
    fn transport_tcp_interleaved() {
        let t = TransportRequest::parse("RTP/AVP/TCP;unicast;interleaved=2-3");
        assert!(t.is_tcp);
        assert!(!t.is_multicast);
        assert_eq!(t.interleaved_channel, Some(2));
    }

    #[test]
    fn classify_interleaved_with_length() {
        let frame = [0x24, 0x00, 0x01, 0x04, 0xAA];
        assert_eq!(
            classify_binary(&frame),
            Some(ControlBinary::Interleaved {
                frame_len: Some(4 + 0x0104)
            })
        );
    }

    #[test]
    fn classify_interleaved_partial_header() {
        assert_eq!(
            classify_binary(&[0x24, 0x00]),
            Some(ControlBinary::Interleaved { frame_len: None })
        );
    }

    #[test]
    fn classify_rtcp_packet_types() {
        // V=2, packet type 200 (SR) through 204 (APP)
        assert_eq!(classify_binary(&[0x80, 200]), Some(ControlBinary::Rtcp));
        assert_eq!(classify_binary(&[0x81, 201]), Some(ControlBinary::Rtcp));
        assert_eq!(classify_binary(&[0x80, 204]), Some(ControlBinary::Rtcp));
    }

    #[test]
    fn classify_text_is_none() {
        assert_eq!(classify_binary(b"OPTIONS rtsp://"), None);
        // V=2 but a media payload type: not RTCP, falls through.
        assert_eq!(classify_binary(&[0x80, 26]), None);
    }
}
