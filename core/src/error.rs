//! Error types for the Discourse API client.
//!
//! # Design
//! One flat enum. The four response-driven kinds (`Client`, `Server`,
//! `RateLimited`, `Protocol`) carry the offending `HttpResponse` so callers
//! can inspect status, headers and body. The response is boxed to keep
//! `Result<_, ApiError>` small on the happy path.

use thiserror::Error;

use crate::http::{HttpResponse, TransportError};

/// Header Discourse uses to name the limit that triggered a 429.
pub const RATE_LIMIT_CODE_HEADER: &str = "Discourse-Rate-Limit-Error-Code";

/// Errors returned by `DiscourseClient`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A 4xx response other than a persistent 429. Caller-fixable.
    #[error("{message}")]
    Client {
        message: String,
        response: Box<HttpResponse>,
    },

    /// A 5xx or otherwise unexpected non-ok status.
    #[error("{message}")]
    Server {
        message: String,
        response: Box<HttpResponse>,
    },

    /// Every attempt of the logical call was answered with 429.
    #[error("{message}")]
    RateLimited {
        message: String,
        response: Box<HttpResponse>,
    },

    /// The response looked successful but could not be accepted: an
    /// unexpected redirect, a non-JSON body, undecodable JSON, or an
    /// application-level `errors` array.
    #[error("{message}")]
    Protocol {
        message: String,
        response: Box<HttpResponse>,
    },

    /// The HTTP round-trip itself failed.
    #[error("transport error: {0}")]
    Transport(#[source] TransportError),

    /// The server reported more items than it returned.
    #[error("more items expected, but none returned (total {total}, collected {collected})")]
    IncompletePage { total: u64, collected: u64 },

    /// A decoded response lacked a field the caller depends on, such as
    /// `meta.total` on a paginated read.
    #[error("response is missing field `{0}`")]
    MissingField(String),

    /// Required configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// The raw response behind a response-driven error.
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            ApiError::Client { response, .. }
            | ApiError::Server { response, .. }
            | ApiError::RateLimited { response, .. }
            | ApiError::Protocol { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response().map(|response| response.status)
    }

    /// Value of the `Discourse-Rate-Limit-Error-Code` header, if present.
    pub fn rate_limit_code(&self) -> Option<&str> {
        self.response()
            .and_then(|response| response.header(RATE_LIMIT_CODE_HEADER))
    }
}
