//! In-memory response capture
//!
//! The discovery merger invokes the native core handler directly and needs
//! its response as data rather than on the wire. `ResponseBuffer` records
//! status, headers, and body; the first body write without an explicit
//! status pins 200, mirroring `http.ResponseWriter` semantics so native
//! handlers can stay oblivious to being captured.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;

/// A response writer that keeps everything in memory.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response status. Later calls overwrite earlier ones; a body
    /// write without a prior call pins 200.
    pub fn write_header(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Append body bytes, defaulting the status to 200.
    pub fn write(&mut self, data: &[u8]) {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.body.extend_from_slice(data);
    }

    /// Mutable access to the recorded headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The recorded status; 200 if only body writes happened, None if the
    /// handler never wrote anything.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// The recorded body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Convert the capture into a real response, relaying status, headers,
    /// and body unchanged.
    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(Bytes::from(self.body)));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}
