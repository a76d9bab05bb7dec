//! Server configuration.
//!
//! All knobs are fixed before [`Server::start`](crate::Server::start) and
//! immutable afterwards. Transport enablement is an enumerated combination
//! rather than three independent flags so that an empty media set is
//! unrepresentable.

use std::net::Ipv4Addr;

use crate::error::{ConfigError, Result, RtspError};

/// Hard ceiling on simultaneous clients, independent of
/// [`ServerConfig::max_clients`].
pub const MAX_CLIENTS: u8 = 10;

/// Per-connection RTSP read buffer. A request that fills this without a
/// terminating blank line closes the connection.
pub const RTSP_BUFFER_SIZE: usize = 8 * 1024;

/// Capacity of the single-slot video staging buffer used by the video
/// worker. Frames larger than this are dropped.
pub const VIDEO_SLOT_SIZE: usize = 512 * 1024;

/// Which media kinds the server streams.
///
/// Selects the SDP media blocks emitted by DESCRIBE and the packetizers the
/// push API drives. There is no "none" variant: a server with no media is a
/// configuration error by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    VideoOnly,
    AudioOnly,
    SubtitlesOnly,
    VideoAndAudio,
    VideoAndSubtitles,
    AudioAndSubtitles,
    VideoAudioSubtitles,
}

impl TransportType {
    pub fn has_video(self) -> bool {
        matches!(
            self,
            Self::VideoOnly
                | Self::VideoAndAudio
                | Self::VideoAndSubtitles
                | Self::VideoAudioSubtitles
        )
    }

    pub fn has_audio(self) -> bool {
        matches!(
            self,
            Self::AudioOnly
                | Self::VideoAndAudio
                | Self::AudioAndSubtitles
                | Self::VideoAudioSubtitles
        )
    }

    pub fn has_subtitles(self) -> bool {
        matches!(
            self,
            Self::SubtitlesOnly
                | Self::VideoAndSubtitles
                | Self::AudioAndSubtitles
                | Self::VideoAudioSubtitles
        )
    }
}

/// Server-level configuration.
///
/// ```
/// use rtsp_cam::{ServerConfig, TransportType};
///
/// let config = ServerConfig {
///     transport: TransportType::VideoAndAudio,
///     sample_rate: Some(48000),
///     ..ServerConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Enabled media kinds.
    pub transport: TransportType,
    /// RTSP listener TCP port.
    pub rtsp_port: u16,
    /// Audio RTP clock rate. Required whenever audio is enabled.
    pub sample_rate: Option<u32>,
    /// Server-side video RTP port: advertised in unicast SETUP replies and
    /// used as the multicast group port.
    pub video_rtp_port: u16,
    /// Server-side audio RTP port (as above).
    pub audio_rtp_port: u16,
    /// Server-side subtitles RTP port (as above).
    pub subtitles_rtp_port: u16,
    /// Multicast group address offered to multicast clients.
    pub multicast_group: Ipv4Addr,
    /// TTL applied to multicast RTP sockets.
    pub multicast_ttl: u8,
    /// Client ceiling for multicast mode; clamped to [`MAX_CLIENTS`].
    /// Unicast and TCP-interleaved modes always pin the effective cap to 1.
    pub max_clients: u8,
    /// Stable hardware identifier seeding the three media SSRCs. `None`
    /// falls back to a random seed (RFC 3550 §8.1).
    pub device_id: Option<u64>,
    /// Hand video fan-out to a dedicated worker thread via a single-slot
    /// staging buffer, decoupling the producer from network stalls.
    pub video_worker: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportType::VideoOnly,
            rtsp_port: 554,
            sample_rate: None,
            video_rtp_port: 5430,
            audio_rtp_port: 5432,
            subtitles_rtp_port: 5434,
            multicast_group: Ipv4Addr::new(239, 255, 0, 1),
            multicast_ttl: 64,
            max_clients: MAX_CLIENTS,
            device_id: None,
            video_worker: false,
        }
    }
}

impl ServerConfig {
    /// Check the configuration for contradictions. Called by
    /// [`Server::new`](crate::Server::new); exposed for host applications
    /// that validate before constructing.
    pub fn validate(&self) -> Result<()> {
        if self.transport.has_audio() && self.sample_rate.is_none() {
            return Err(RtspError::Config(ConfigError::SampleRateRequired));
        }
        if self.max_clients == 0 {
            return Err(RtspError::Config(ConfigError::NoClientsAllowed));
        }
        Ok(())
    }

    /// `max_clients` clamped to the compile-time ceiling.
    pub(crate) fn clamped_max_clients(&self) -> u8 {
        if self.max_clients > MAX_CLIENTS {
            tracing::warn!(
                requested = self.max_clients,
                limit = MAX_CLIENTS,
                "max_clients exceeds the hard ceiling, clamping"
            );
            MAX_CLIENTS
        } else {
            self.max_clients
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_requires_sample_rate() {
        let config = ServerConfig {
            transport: TransportType::AudioOnly,
            ..ServerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RtspError::Config(ConfigError::SampleRateRequired))
        ));
    }

    #[test]
    fn audio_with_sample_rate_ok() {
        let config = ServerConfig {
            transport: TransportType::VideoAudioSubtitles,
            sample_rate: Some(48000),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn video_only_needs_no_sample_rate() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_clients_rejected() {
        let config = ServerConfig {
            max_clients: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_clients_clamped() {
        let config = ServerConfig {
            max_clients: 200,
            ..ServerConfig::default()
        };
        assert_eq!(config.clamped_max_clients(), MAX_CLIENTS);
    }

    #[test]
    fn transport_flags() {
        assert!(TransportType::VideoAudioSubtitles.has_video());
        assert!(TransportType::VideoAudioSubtitles.has_audio());
        assert!(TransportType::VideoAudioSubtitles.has_subtitles());
        assert!(!TransportType::AudioOnly.has_video());
        assert!(!TransportType::VideoAndSubtitles.has_audio());
    }
}
