//! L16 audio packetization (RFC 3551 §4.5.11).
//!
//! Uncompressed 16-bit signed PCM, mono, network byte order. The producer
//! supplies host-order samples; packetization byte-swaps them into the
//! payload. The RTP timestamp counts samples, so it advances by the
//! fragment's sample count after each packet.
//!
//! The marker bit is set on every packet. Standard L16 streams set it only
//! on the first packet of a talkspurt; this stream's producer pushes a
//! continuous signal and receivers in the field expect the every-packet
//! marker, so the behavior is kept as-is.

use crate::media::rtp::{RtpStream, RTP_HEADER_SIZE};

/// Largest audio payload in one RTP packet, in bytes.
pub const MAX_FRAGMENT_SIZE: usize = 1024;

const SAMPLES_PER_FRAGMENT: usize = MAX_FRAGMENT_SIZE / 2;

/// Packetize a block of PCM samples into RTP packets.
///
/// Emits `ceil(samples.len() * 2 / 1024)` packets; after the block the
/// stream timestamp has advanced by exactly `samples.len()`.
pub fn packetize_audio(stream: &mut RtpStream, samples: &[i16]) -> Vec<Vec<u8>> {
    let mut packets = Vec::with_capacity(samples.len().div_ceil(SAMPLES_PER_FRAGMENT));

    for chunk in samples.chunks(SAMPLES_PER_FRAGMENT) {
        let header = stream.write_header(true);
        let mut packet = Vec::with_capacity(RTP_HEADER_SIZE + chunk.len() * 2);
        packet.extend_from_slice(&header);
        for sample in chunk {
            packet.extend_from_slice(&sample.to_be_bytes());
        }
        packets.push(packet);

        stream.advance_timestamp(chunk.len() as u32);
    }

    packets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_stream() -> RtpStream {
        RtpStream::new(97, 0x55667788)
    }

    #[test]
    fn samples_byte_swapped() {
        let mut s = make_stream();
        let packets = packetize_audio(&mut s, &[0x0102, -2]);
        assert_eq!(packets.len(), 1);
        let payload = &packets[0][RTP_HEADER_SIZE..];
        assert_eq!(payload, &[0x01, 0x02, 0xFF, 0xFE]);
    }

    #[test]
    fn marker_on_every_packet() {
        let mut s = make_stream();
        let packets = packetize_audio(&mut s, &vec![0i16; SAMPLES_PER_FRAGMENT * 3]);
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| p[1] & 0x80 == 0x80));
    }

    #[test]
    fn packet_count_and_timestamp() {
        let mut s = make_stream();
        // 2048 samples = 4096 bytes -> 4 packets of 512 samples
        let packets = packetize_audio(&mut s, &vec![0i16; 2048]);
        assert_eq!(packets.len(), 4);
        assert_eq!(s.timestamp(), 2048);

        let ts: Vec<u32> = packets
            .iter()
            .map(|p| u32::from_be_bytes([p[4], p[5], p[6], p[7]]))
            .collect();
        assert_eq!(ts, vec![0, 512, 1024, 1536]);
    }

    #[test]
    fn short_tail_fragment() {
        let mut s = make_stream();
        let packets = packetize_audio(&mut s, &vec![0i16; SAMPLES_PER_FRAGMENT + 10]);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].len(), RTP_HEADER_SIZE + 20);
        assert_eq!(s.timestamp(), SAMPLES_PER_FRAGMENT as u32 + 10);
    }

    #[test]
    fn sequence_contiguous() {
        let mut s = make_stream();
        let packets = packetize_audio(&mut s, &vec![0i16; 2048]);
        let seq: Vec<u16> = packets
            .iter()
            .map(|p| u16::from_be_bytes([p[2], p[3]]))
            .collect();
        assert_eq!(seq, vec![0, 1, 2, 3]);
    }

    #[test]
    fn payload_type_dynamic_97() {
        let mut s = make_stream();
        let packets = packetize_audio(&mut s, &[0i16; 4]);
        assert_eq!(packets[0][1] & 0x7F, 97);
    }
}
