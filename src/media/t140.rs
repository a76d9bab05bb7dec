//! T.140 subtitle packetization (RFC 4103).
//!
//! One RTP packet per text unit, no fragmentation. The 1 kHz clock
//! advances a fixed 1000 ticks per unit: the host pushes subtitles on a
//! one-second cadence, so a unit spans one second of the timeline.

use crate::media::rtp::{RtpStream, RTP_HEADER_SIZE};

/// Packetize one subtitle unit. Marker set; timestamp advances by 1000
/// ticks after the packet.
pub fn packetize_subtitle(stream: &mut RtpStream, text: &[u8]) -> Vec<u8> {
    let header = stream.write_header(true);
    let mut packet = Vec::with_capacity(RTP_HEADER_SIZE + text.len());
    packet.extend_from_slice(&header);
    packet.extend_from_slice(text);

    stream.advance_timestamp(1000);
    packet
}
