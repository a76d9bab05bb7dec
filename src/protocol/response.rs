//! RTSP response construction (RFC 2326 §7).
//!
//! Builder pattern: chain [`header`](RtspResponse::header) and
//! [`with_body`](RtspResponse::with_body), then
//! [`serialize`](RtspResponse::serialize). Every response carries a
//! `Date:` header (RFC 2326 §12.18); `Content-Length` is appended
//! automatically when a body is present.

use chrono::Utc;

/// Bytes written to a connection accepted past the client cap, before
/// closing it. Sent bare — by the time we know we are full there is no
/// CSeq to echo.
pub const SERVICE_UNAVAILABLE_RAW: &[u8] = b"RTSP/1.0 503 Service Unavailable\r\n\r\n";

/// Bytes written when a request has no usable CSeq.
pub const BAD_REQUEST_RAW: &[u8] = b"RTSP/1.0 400 Bad Request\r\n\r\n";

#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Date".to_string(), date_header_value())],
            body: None,
        }
    }

    /// 200 OK (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 400 Bad Request — malformed or missing required header.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 454 Session Not Found — unknown or absent session id.
    pub fn session_not_found() -> Self {
        Self::new(454, "Session Not Found")
    }

    /// 461 Unsupported Transport — SETUP incompatible with the first
    /// client's profile.
    pub fn unsupported_transport() -> Self {
        Self::new(461, "Unsupported Transport")
    }

    /// 503 Service Unavailable — a resource the operation needs could
    /// not be allocated.
    pub fn service_unavailable() -> Self {
        Self::new(503, "Service Unavailable")
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn cseq(self, cseq: u32) -> Self {
        self.header("CSeq", &cseq.to_string())
    }

    pub fn session(self, session_id: u32) -> Self {
        self.header("Session", &session_id.to_string())
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize to the RTSP text wire format. `Content-Length` is
    /// appended automatically for bodies (RFC 2326 §12.14).
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }
}

/// RFC 1123 date, always GMT.
fn date_header_value() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
