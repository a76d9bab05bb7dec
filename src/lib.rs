//! # rtsp-cam — embedded RTSP server for live MJPEG/L16/T.140 streaming
//!
//! A library for network-attached devices (cameras, intercoms, sensor
//! hubs) that stream live Motion-JPEG video, uncompressed 16-bit PCM
//! audio, and T.140 text subtitles to RTSP viewers. The host application
//! owns capture and encoding; the server owns the RTSP control plane and
//! RTP data plane.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request handling, session lifecycle, transport negotiation, interleaved framing |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Packet header format, SSRC generation, sequence/timestamp semantics |
//! | [RFC 2435](https://tools.ietf.org/html/rfc2435) | JPEG RTP payload | Frame fragmentation and the 8-byte payload header |
//! | [RFC 3551](https://tools.ietf.org/html/rfc3551) | L16 audio | Big-endian PCM payload, dynamic payload type |
//! | [RFC 4103](https://tools.ietf.org/html/rfc4103) | T.140 text | One packet per subtitle unit on a 1 kHz clock |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Session description for DESCRIBE responses |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  Host application (capture / encode)          │
//! ├───────────────────────────────────────────────┤
//! │  Server      — push API, fan-out, lifecycle   │
//! │  Control     — accept + per-client requests   │
//! ├───────────────────────────────────────────────┤
//! │  Protocol    — RTSP parsing, SDP, responses   │
//! │  Session     — registry, admission profile    │
//! ├───────────────────────────────────────────────┤
//! │  Transport   — TCP interleaving, UDP sockets  │
//! │  Media       — RTP header, packetizers        │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use rtsp_cam::{Server, ServerConfig, TransportType};
//!
//! let mut server = Server::new(ServerConfig {
//!     transport: TransportType::VideoOnly,
//!     rtsp_port: 8554,
//!     ..ServerConfig::default()
//! }).unwrap();
//! server.start().unwrap();
//!
//! // In the capture loop:
//! // if server.ready_for_frame() {
//! //     server.push_frame(&jpeg_bytes, 60, 640, 480).unwrap();
//! // }
//! ```
//!
//! ## Admission model
//!
//! The first accepted SETUP pins the server to that client's transport
//! shape. A multicast first client opens the door to up to
//! [`ServerConfig::max_clients`] viewers sharing one RTP emission; a UDP
//! unicast or TCP-interleaved first client makes the server
//! single-viewer until that session ends. A SETUP that mismatches the
//! profile or exceeds the ceiling gets `461 Unsupported Transport`; a
//! new connection accepted while the cap is full gets a bare
//! `503 Service Unavailable` and is closed.
//!
//! ## Crate layout
//!
//! - [`server`] — [`Server`] orchestrator, push API, fan-out pipeline.
//! - [`config`] — [`ServerConfig`] and [`TransportType`].
//! - [`session`] — session registry and the first-client admission rule.
//! - [`protocol`] — RTSP request/response handling and SDP generation.
//! - [`transport`] — TCP interleaving and the lazy UDP socket mux.
//! - [`media`] — RTP header state and the three packetizers.
//! - [`error`] — [`RtspError`] and [`Result`] alias.

pub mod config;
mod control;
pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{ServerConfig, TransportType, MAX_CLIENTS};
pub use error::{Result, RtspError};
pub use server::Server;
