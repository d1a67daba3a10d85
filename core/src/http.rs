//! HTTP transport types for the Discourse request engine.
//!
//! # Design
//! Requests and responses are plain data. The engine builds an `HttpRequest`,
//! hands it to a `Transport`, and classifies the `HttpResponse` that comes
//! back. Only `UreqTransport` touches the network, so the retry and
//! validation logic stays deterministic and easy to test with a scripted
//! transport.
//!
//! All fields use owned types so requests can be recorded and responses
//! carried inside errors without lifetime concerns.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

/// Boxed error produced by a `Transport` when the round-trip itself fails.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named file attached to a multipart request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Form field name, e.g. `file`.
    pub field: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Request payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded` pairs. Repeated keys are kept.
    Form(Vec<(String, String)>),
    Json(Value),
    /// Text fields plus file parts, sent as `multipart/form-data`.
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<Attachment>,
    },
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }
}

/// An HTTP request described as plain data.
///
/// Built by `DiscourseClient::build_request`. `url` is the configured host
/// with the caller's path appended verbatim; query pairs are encoded by the
/// transport.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub follow_redirects: bool,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Canonical reason phrase for the status code, if it has one.
    pub fn reason(&self) -> Option<&'static str> {
        ureq::http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
    }

    /// Anything below 400 counts as a completed round-trip, redirects included.
    pub fn is_ok(&self) -> bool {
        self.status < 400
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
