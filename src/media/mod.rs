//! Media kinds, packetizers, and server-level RTP stream state.
//!
//! The three media kinds share the RTP fixed header
//! ([`rtp::RtpStream`]) and differ only in payload type, clock,
//! fragmentation limit, and marker policy — a tagged [`MediaKind`] with
//! per-kind packetizer functions rather than a trait object.

pub mod jpeg;
pub mod l16;
pub mod rtp;
pub mod t140;

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::config::ServerConfig;
use self::jpeg::VideoStream;
use self::rtp::RtpStream;

/// The media kinds the server can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Subtitles,
}

impl MediaKind {
    /// RTP payload type: static 26 (JPEG) for video, dynamic 97 (L16) and
    /// 98 (t140) for audio and subtitles.
    pub fn payload_type(self) -> u8 {
        match self {
            Self::Video => 26,
            Self::Audio => 97,
            Self::Subtitles => 98,
        }
    }

    /// Track control name used in SDP `a=control:` lines and SETUP URIs.
    pub fn control_name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitles => "subtitles",
        }
    }

    /// Index into per-kind arrays (UDP socket slots).
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Video => 0,
            Self::Audio => 1,
            Self::Subtitles => 2,
        }
    }

    /// Server-side RTP port for this kind from the configuration.
    pub(crate) fn rtp_port(self, config: &ServerConfig) -> u16 {
        match self {
            Self::Video => config.video_rtp_port,
            Self::Audio => config.audio_rtp_port,
            Self::Subtitles => config.subtitles_rtp_port,
        }
    }
}

/// Server-level media state: one RTP stream per kind, the interleave
/// channel bytes negotiated by the most recent TCP SETUP, and the
/// per-kind "in flight" flags behind the drop-on-busy producer API.
///
/// The sent flags start `true` (nothing in flight). The producer path
/// clears a flag before fanning a unit out and restores it afterwards;
/// a push arriving while the flag is clear is dropped, not queued.
pub struct MediaStreams {
    pub video: Mutex<VideoStream>,
    pub audio: Mutex<RtpStream>,
    pub subtitles: Mutex<RtpStream>,
    video_ch: AtomicU8,
    audio_ch: AtomicU8,
    subtitles_ch: AtomicU8,
    video_sent: AtomicBool,
    audio_sent: AtomicBool,
    subtitles_sent: AtomicBool,
    rtp_fps: AtomicU32,
}

impl MediaStreams {
    /// Build stream state from the SSRC seed: video takes the low 32
    /// bits, audio the high 32, subtitles the top 16.
    pub fn new(seed: u64) -> Self {
        Self {
            video: Mutex::new(VideoStream::new(RtpStream::new(
                MediaKind::Video.payload_type(),
                seed as u32,
            ))),
            audio: Mutex::new(RtpStream::new(
                MediaKind::Audio.payload_type(),
                (seed >> 32) as u32,
            )),
            subtitles: Mutex::new(RtpStream::new(
                MediaKind::Subtitles.payload_type(),
                (seed >> 48) as u32,
            )),
            video_ch: AtomicU8::new(0),
            audio_ch: AtomicU8::new(0),
            subtitles_ch: AtomicU8::new(0),
            video_sent: AtomicBool::new(true),
            audio_sent: AtomicBool::new(true),
            subtitles_sent: AtomicBool::new(true),
            rtp_fps: AtomicU32::new(0),
        }
    }

    pub fn channel(&self, kind: MediaKind) -> u8 {
        match kind {
            MediaKind::Video => self.video_ch.load(Ordering::Relaxed),
            MediaKind::Audio => self.audio_ch.load(Ordering::Relaxed),
            MediaKind::Subtitles => self.subtitles_ch.load(Ordering::Relaxed),
        }
    }

    /// Record the interleave channel from a TCP SETUP.
    pub fn set_channel(&self, kind: MediaKind, channel: u8) {
        match kind {
            MediaKind::Video => self.video_ch.store(channel, Ordering::Relaxed),
            MediaKind::Audio => self.audio_ch.store(channel, Ordering::Relaxed),
            MediaKind::Subtitles => self.subtitles_ch.store(channel, Ordering::Relaxed),
        }
    }

    pub fn is_sent(&self, kind: MediaKind) -> bool {
        self.sent_flag(kind).load(Ordering::Acquire)
    }

    /// Clear the in-flight flag if currently set. Returns false when a
    /// prior send is still in flight (the caller drops the unit).
    pub fn begin_send(&self, kind: MediaKind) -> bool {
        self.sent_flag(kind)
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_send(&self, kind: MediaKind) {
        self.sent_flag(kind).store(true, Ordering::Release);
    }

    fn sent_flag(&self, kind: MediaKind) -> &AtomicBool {
        match kind {
            MediaKind::Video => &self.video_sent,
            MediaKind::Audio => &self.audio_sent,
            MediaKind::Subtitles => &self.subtitles_sent,
        }
    }

    /// Rolling frames-per-second figure, updated once per second by the
    /// video path.
    pub fn rtp_fps(&self) -> u32 {
        self.rtp_fps.load(Ordering::Relaxed)
    }

    pub(crate) fn store_rtp_fps(&self, fps: u32) {
        self.rtp_fps.store(fps, Ordering::Relaxed);
    }
}
