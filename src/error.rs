//! Error types for the RTSP server library.

use std::fmt;

/// Errors that can occur in the RTSP server library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`BadRequest`](Self::BadRequest),
///   [`RequestTooLarge`](Self::RequestTooLarge) — malformed or oversized
///   RTSP messages.
/// - **Admission**: [`UnsupportedTransport`](Self::UnsupportedTransport),
///   [`ServiceUnavailable`](Self::ServiceUnavailable) — SETUPs or
///   connections rejected by the first-client policy.
/// - **Transport**: [`Io`](Self::Io), [`PeerClosed`](Self::PeerClosed),
///   [`SendBusy`](Self::SendBusy) — socket failures. `SendBusy` is
///   transient: the packet is dropped for that recipient and streaming
///   continues.
/// - **Producer**: [`InvalidFrameGeometry`](Self::InvalidFrameGeometry) —
///   JPEG dimensions the payload header cannot express.
/// - **Server**: [`Config`](Self::Config), [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request could not be parsed (RFC 2326 §6).
    #[error("bad request: {kind}")]
    BadRequest { kind: BadRequestKind },

    /// SETUP transport does not match the first accepted client's profile.
    #[error("transport does not match the first client's profile")]
    UnsupportedTransport,

    /// The effective client cap has been reached.
    #[error("client limit reached")]
    ServiceUnavailable,

    /// The control buffer filled without a complete request.
    #[error("request exceeded the control read buffer")]
    RequestTooLarge,

    /// The peer closed the connection (read of 0, or a peer-closed
    /// indicator on write).
    #[error("peer closed the connection")]
    PeerClosed,

    /// A send would have blocked past the bounded wait; the packet was
    /// dropped for that recipient.
    #[error("send would block; packet dropped")]
    SendBusy,

    /// Invalid server configuration; the server does not start.
    #[error("configuration error: {0}")]
    Config(ConfigError),

    /// JPEG frame dimensions not expressible in the RTP payload header
    /// (RFC 2435 §3.1.5: width/height in units of 8 pixels, max 2040).
    #[error("frame geometry {width}x{height} not streamable (dimensions must be multiples of 8, at most 2040)")]
    InvalidFrameGeometry { width: u16, height: u16 },

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

/// Specific kind of malformed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadRequestKind {
    /// No `CSeq:` header in the request.
    MissingCSeq,
    /// SETUP without a parseable `Transport:` header.
    MissingTransport,
    /// TCP SETUP without `interleaved=`, or unicast SETUP without
    /// `client_port=`.
    IncompleteTransport,
    /// SETUP URI names no known track (video/audio/subtitles).
    UnknownTrack,
}

impl fmt::Display for BadRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCSeq => write!(f, "missing CSeq header"),
            Self::MissingTransport => write!(f, "missing Transport header"),
            Self::IncompleteTransport => write!(f, "incomplete Transport header"),
            Self::UnknownTrack => write!(f, "unknown track in SETUP URI"),
        }
    }
}

/// Configuration problems detected before the server starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Audio is enabled but no sample rate was given.
    SampleRateRequired,
    /// `max_clients` is zero.
    NoClientsAllowed,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SampleRateRequired => write!(f, "sample rate must be set to stream audio"),
            Self::NoClientsAllowed => write!(f, "max_clients must be at least 1"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
