//! Synchronous client core for the Discourse forum HTTP API.
//!
//! # Overview
//! Every endpoint call funnels through one request engine that builds the
//! HTTP request, retries on rate limiting, validates the response and maps
//! failures onto a small error taxonomy. A paginated reader loops the engine
//! over offset-based collections.
//!
//! # Design
//! - `DiscourseClient` is stateless apart from its immutable `ClientConfig`.
//! - Requests and responses are plain data (`HttpRequest`, `HttpResponse`);
//!   only the `Transport` performs I/O, so tests swap in a scripted one.
//! - Endpoint wrappers in `endpoints` only marshal paths and parameters.

pub mod client;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod http;
pub mod pagination;
pub mod request;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{DiscourseClient, FALLBACK_RATE_LIMIT_WAIT, JSON_CONTENT_TYPE};
pub use config::ClientConfig;
pub use endpoints::{NewPost, UploadType};
pub use error::ApiError;
pub use http::{Attachment, HttpMethod, HttpRequest, HttpResponse, RequestBody};
pub use request::ApiRequest;
pub use transport::{Transport, UreqTransport};
