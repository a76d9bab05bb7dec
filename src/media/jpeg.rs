//! JPEG/RTP video packetization (RFC 2435 subset).
//!
//! Each JPEG frame becomes one or more RTP packets. The RTP payload starts
//! with an 8-byte JPEG-specific header:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Type-specific |              Fragment Offset                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Type     |       Q       |     Width     |     Height    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Type is 0 (baseline), width and height are carried in units of 8
//! pixels. The producer supplies the quantization quality verbatim. No
//! restart markers or in-band quantization tables are emitted; the
//! producer's JPEG carries its own tables.

use std::time::Instant;

use crate::error::{Result, RtspError};
use crate::media::rtp::{RtpStream, RTP_HEADER_SIZE};

/// Size of the JPEG payload header preceding the fragment data.
pub const JPEG_HEADER_SIZE: usize = 8;

/// Largest JPEG fragment carried in one RTP packet.
pub const MAX_FRAGMENT_SIZE: usize = 1438;

/// Largest width/height expressible in the 8-pixel-unit header fields.
pub const MAX_DIMENSION: u16 = 2040;

/// Video RTP clock rate (RFC 2435 §3).
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Geometry and quality of one JPEG frame as supplied by the producer.
#[derive(Debug, Clone, Copy)]
pub struct FrameGeometry {
    pub quality: u8,
    pub width: u16,
    pub height: u16,
}

impl FrameGeometry {
    /// Width and height must fit the payload header: multiples of 8, at
    /// most [`MAX_DIMENSION`].
    pub fn validate(&self) -> Result<()> {
        let bad = |d: u16| d % 8 != 0 || d > MAX_DIMENSION;
        if bad(self.width) || bad(self.height) {
            return Err(RtspError::InvalidFrameGeometry {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// Video stream state: the RTP stream plus the wall-clock bookkeeping the
/// video timestamp and fps counter need.
#[derive(Debug)]
pub struct VideoStream {
    pub rtp: RtpStream,
    last_frame: Option<Instant>,
    frame_count: u32,
    fps_window: Option<Instant>,
    fps: u32,
}

impl VideoStream {
    pub fn new(rtp: RtpStream) -> Self {
        Self {
            rtp,
            last_frame: None,
            frame_count: 0,
            fps_window: None,
            fps: 0,
        }
    }

    /// Account for a new frame: returns the RTP timestamp increment in
    /// 90 kHz ticks derived from the wall-clock time since the previous
    /// frame, and updates the once-per-second fps figure.
    pub fn on_frame(&mut self) -> u32 {
        let now = Instant::now();
        let elapsed_ms = self
            .last_frame
            .map(|t| now.duration_since(t).as_millis() as u32)
            .unwrap_or(0);
        self.last_frame = Some(now);

        self.frame_count += 1;
        let window = *self.fps_window.get_or_insert(now);
        if now.duration_since(window).as_millis() >= 1000 {
            self.fps = self.frame_count;
            self.frame_count = 0;
            self.fps_window = Some(now);
        }

        elapsed_ms.wrapping_mul(VIDEO_CLOCK_RATE / 1000)
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }
}

/// Packetize one JPEG frame into RTP packets.
///
/// The timestamp is advanced once by `ts_increment` and shared by every
/// fragment of the frame; the sequence number advances per fragment. The
/// marker bit is set only on the final fragment. Fragment offsets start at
/// 0 and track the byte position within the original frame.
pub fn packetize_frame(
    stream: &mut RtpStream,
    data: &[u8],
    geometry: FrameGeometry,
    ts_increment: u32,
) -> Vec<Vec<u8>> {
    stream.advance_timestamp(ts_increment);

    let mut packets = Vec::with_capacity(data.len().div_ceil(MAX_FRAGMENT_SIZE));
    let mut offset = 0usize;

    while offset < data.len() {
        let fragment_len = MAX_FRAGMENT_SIZE.min(data.len() - offset);
        let is_last = offset + fragment_len == data.len();

        let header = stream.write_header(is_last);
        let mut packet = Vec::with_capacity(RTP_HEADER_SIZE + JPEG_HEADER_SIZE + fragment_len);
        packet.extend_from_slice(&header);
        packet.push(0x00); // type-specific
        packet.push((offset >> 16) as u8);
        packet.push((offset >> 8) as u8);
        packet.push(offset as u8);
        packet.push(0x00); // type 0: baseline
        packet.push(geometry.quality);
        packet.push((geometry.width / 8) as u8);
        packet.push((geometry.height / 8) as u8);
        packet.extend_from_slice(&data[offset..offset + fragment_len]);
        packets.push(packet);

        offset += fragment_len;
    }

    tracing::trace!(
        frame_bytes = data.len(),
        rtp_packets = packets.len(),
        seq = stream.sequence(),
        ts = stream.timestamp(),
        "frame packetized"
    );

    packets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_stream() -> RtpStream {
        RtpStream::new(26, 0x11223344)
    }

    const GEOMETRY: FrameGeometry = FrameGeometry {
        quality: 60,
        width: 640,
        height: 480,
    };

    #[test]
    fn geometry_accepts_multiples_of_8() {
        assert!(GEOMETRY.validate().is_ok());
    }

    #[test]
    fn geometry_rejects_odd_width() {
        let g = FrameGeometry {
            width: 641,
            ..GEOMETRY
        };
        assert!(matches!(
            g.validate(),
            Err(RtspError::InvalidFrameGeometry { width: 641, .. })
        ));
    }

    #[test]
    fn geometry_rejects_oversize() {
        let g = FrameGeometry {
            height: 2048,
            ..GEOMETRY
        };
        assert!(g.validate().is_err());
    }

    #[test]
    fn small_frame_single_packet() {
        let mut s = make_stream();
        let data = vec![0xAB; 100];
        let packets = packetize_frame(&mut s, &data, GEOMETRY, 3000);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), RTP_HEADER_SIZE + JPEG_HEADER_SIZE + 100);
        assert_eq!(packets[0][1] & 0x80, 0x80, "single fragment carries the marker");
    }

    #[test]
    fn jpeg_header_fields() {
        let mut s = make_stream();
        let packets = packetize_frame(&mut s, &[0u8; 10], GEOMETRY, 0);
        let jpeg = &packets[0][RTP_HEADER_SIZE..RTP_HEADER_SIZE + JPEG_HEADER_SIZE];
        assert_eq!(jpeg[0], 0, "type-specific");
        assert_eq!(&jpeg[1..4], &[0, 0, 0], "first fragment offset is zero");
        assert_eq!(jpeg[4], 0, "baseline type");
        assert_eq!(jpeg[5], 60, "quality");
        assert_eq!(jpeg[6], 80, "width / 8");
        assert_eq!(jpeg[7], 60, "height / 8");
    }

    #[test]
    fn fragmentation_offsets_and_marker() {
        let mut s = make_stream();
        let len = MAX_FRAGMENT_SIZE * 2 + 100;
        let packets = packetize_frame(&mut s, &vec![0u8; len], GEOMETRY, 0);
        assert_eq!(packets.len(), 3);

        let mut expected_offset = 0usize;
        for (i, p) in packets.iter().enumerate() {
            let off = ((p[13] as usize) << 16) | ((p[14] as usize) << 8) | p[15] as usize;
            assert_eq!(off, expected_offset);
            let is_last = i == packets.len() - 1;
            assert_eq!(p[1] & 0x80 == 0x80, is_last, "marker only on the last fragment");
            expected_offset += p.len() - RTP_HEADER_SIZE - JPEG_HEADER_SIZE;
        }
        assert_eq!(expected_offset, len, "offsets cover the whole frame");
    }

    #[test]
    fn fragments_share_timestamp_and_step_sequence() {
        let mut s = make_stream();
        let packets = packetize_frame(&mut s, &vec![0u8; MAX_FRAGMENT_SIZE * 3], GEOMETRY, 2970);

        let ts: Vec<u32> = packets
            .iter()
            .map(|p| u32::from_be_bytes([p[4], p[5], p[6], p[7]]))
            .collect();
        assert!(ts.iter().all(|&t| t == 2970));

        let seq: Vec<u16> = packets
            .iter()
            .map(|p| u16::from_be_bytes([p[2], p[3]]))
            .collect();
        assert_eq!(seq, vec![0, 1, 2]);
    }

    #[test]
    fn successive_frames_continue_sequence() {
        let mut s = make_stream();
        packetize_frame(&mut s, &[0u8; 10], GEOMETRY, 3000);
        let packets = packetize_frame(&mut s, &[0u8; 10], GEOMETRY, 3000);
        let seq = u16::from_be_bytes([packets[0][2], packets[0][3]]);
        assert_eq!(seq, 1);
        let ts = u32::from_be_bytes([packets[0][4], packets[0][5], packets[0][6], packets[0][7]]);
        assert_eq!(ts, 6000);
    }

    #[test]
    fn first_frame_increment_is_zero() {
        let mut vs = VideoStream::new(make_stream());
        assert_eq!(vs.on_frame(), 0);
    }

    #[test]
    fn empty_frame_no_packets() {
        let mut s = make_stream();
        assert!(packetize_frame(&mut s, &[], GEOMETRY, 0).is_empty());
    }
}
