use rand::Rng;

/// Size of the RTP fixed header written by [`RtpStream::write_header`].
pub const RTP_HEADER_SIZE: usize = 12;

/// Per-media-kind RTP stream state and fixed header builder (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The server keeps one `RtpStream` per media kind for its whole uptime;
/// there is a single producer, so sequence and timestamp are process-wide
/// per kind. The stream manages:
///
/// - **Sequence number**: 16-bit, wrapping — incremented on every packet.
/// - **Timestamp**: 32-bit, wrapping; the clock rate is the kind's
///   (90 kHz video, sample rate audio, 1 kHz subtitles).
/// - **SSRC**: fixed at startup from the device identifier seed.
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpStream {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl RtpStream {
    /// Create stream state with an explicit SSRC.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP stream state created"
        );
        Self {
            pt,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Create with a random SSRC.
    ///
    /// Per RFC 3550 §8.1, a random SSRC minimizes the probability of
    /// collisions between independent sources.
    pub fn with_random_ssrc(pt: u8) -> Self {
        let ssrc = rand::rng().random::<u32>();
        Self::new(pt, ssrc)
    }

    /// Sequence number the next [`write_header`](Self::write_header) call
    /// will emit.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Current RTP timestamp.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence number.
    ///
    /// The `marker` bit is payload-specific: last fragment of a video
    /// frame, every audio packet (see [`l16`](crate::media::l16)), every
    /// subtitle unit.
    pub fn write_header(&mut self, marker: bool) -> [u8; RTP_HEADER_SIZE] {
        let mut header = [0u8; RTP_HEADER_SIZE];
        header[0] = 2 << 6;
        header[1] = ((marker as u8) << 7) | self.pt;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Advance the RTP timestamp by `increment` clock ticks.
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment);
    }
}
