//! RTSP protocol layer: request scanning, method handling, response and
//! SDP generation.

pub mod handler;
pub mod request;
pub mod response;
pub mod sdp;

pub use self::handler::{ClientHandler, Outcome};
pub use self::request::{RtspRequest, TransportRequest};
pub use self::response::RtspResponse;
