//! The request engine every Discourse endpoint funnels through.
//!
//! # Design
//! `DiscourseClient` holds an immutable `ClientConfig` and a `Transport`, and
//! carries no mutable state between calls. A logical call is split the way
//! the rest of the crate thinks about HTTP:
//!
//! 1. `build_request` turns an `ApiRequest` into a plain `HttpRequest`.
//! 2. `execute` issues physical attempts, retrying only on 429 with a
//!    decrementing budget, and fails fast on any other 4xx/5xx.
//! 3. The final response is validated in two layers: transport shape
//!    (redirect, content type, JSON) and then the application `errors` field.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ApiError, RATE_LIMIT_CODE_HEADER};
use crate::http::{HttpRequest, HttpResponse};
use crate::request::ApiRequest;
use crate::transport::{Transport, UreqTransport};

/// The only content type the API answers with on success.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Wait used when a 429 arrives without a JSON body naming `wait_seconds`.
pub const FALLBACK_RATE_LIMIT_WAIT: Duration = Duration::from_secs(10);

/// Synchronous client for the Discourse HTTP API.
///
/// Safe to share across threads when its transport is; each call keeps its
/// own retry bookkeeping on the stack.
#[derive(Debug, Clone)]
pub struct DiscourseClient<T = UreqTransport> {
    config: ClientConfig,
    transport: T,
}

impl DiscourseClient<UreqTransport> {
    pub fn new(config: ClientConfig) -> Self {
        let transport = UreqTransport::new(config.timeout);
        Self { config, transport }
    }
}

impl<T: Transport> DiscourseClient<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Attach the host, credentials and per-call overrides to `request`.
    pub fn build_request(&self, request: &ApiRequest) -> HttpRequest {
        HttpRequest {
            method: request.method,
            url: format!("{}{}", self.config.host, request.path),
            headers: vec![
                ("Accept".to_string(), JSON_CONTENT_TYPE.to_string()),
                ("Api-Key".to_string(), self.config.api_key.clone()),
                ("Api-Username".to_string(), self.config.api_username.clone()),
            ],
            query: request.query.clone(),
            body: request.body.clone(),
            follow_redirects: request.follow_redirects,
            timeout: self.config.timeout,
        }
    }

    /// Run one logical call and return the decoded body.
    ///
    /// `Ok(None)` means the server answered successfully with an empty,
    /// non-JSON body.
    pub fn execute(&self, request: &ApiRequest) -> Result<Option<Value>, ApiError> {
        let http_request = self.build_request(request);
        let response = self.send_with_retry(&http_request)?;
        validate_response(response)
    }

    fn send_with_retry(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        let mut retries_left = self.config.retry_count.max(1);

        loop {
            let response = self
                .transport
                .send(request)
                .map_err(ApiError::Transport)?;

            debug!(
                method = %request.method,
                url = %request.url,
                status = response.status,
                body = ?response.body,
                "response"
            );

            if response.is_ok() {
                return Ok(response);
            }

            match response.status {
                429 => {
                    let wait = self.config.retry_backoff + rate_limit_wait(&response);
                    let limit = response
                        .header(RATE_LIMIT_CODE_HEADER)
                        .unwrap_or("<unknown>");
                    retries_left -= 1;

                    if retries_left == 0 {
                        warn!(limit, url = %request.url, "rate limit retries exhausted");
                        return Err(ApiError::RateLimited {
                            message: "Number of rate limit retries exceeded. Increase retry_backoff or retry_count".to_string(),
                            response: Box::new(response),
                        });
                    }

                    info!(
                        limit,
                        wait_secs = wait.as_secs_f64(),
                        retries_left,
                        "rate limited, backing off"
                    );
                    self.transport.sleep(wait);
                }
                400..=499 => {
                    return Err(ApiError::Client {
                        message: failure_message(&response),
                        response: Box::new(response),
                    });
                }
                _ => {
                    return Err(ApiError::Server {
                        message: failure_message(&response),
                        response: Box::new(response),
                    });
                }
            }
        }
    }
}

/// Server-suggested wait from a 429 body, or the fixed fallback. A negative
/// `wait_seconds` means no extra wait.
fn rate_limit_wait(response: &HttpResponse) -> Duration {
    let is_json = response
        .content_type()
        .is_some_and(|content_type| content_type.contains("application/json"));
    if !is_json {
        return FALLBACK_RATE_LIMIT_WAIT;
    }

    serde_json::from_str::<Value>(&response.body)
        .ok()
        .and_then(|body| body.pointer("/extras/wait_seconds").and_then(Value::as_f64))
        .and_then(|secs| Duration::try_from_secs_f64(secs.max(0.0)).ok())
        .unwrap_or(FALLBACK_RATE_LIMIT_WAIT)
}

/// Message for a failed status: joined `errors`, reason phrase, or raw body.
fn failure_message(response: &HttpResponse) -> String {
    let joined = serde_json::from_str::<Value>(&response.body)
        .ok()
        .and_then(|body| joined_errors(&body))
        .filter(|message| !message.is_empty());
    if let Some(message) = joined {
        return message;
    }
    if let Some(reason) = response.reason() {
        return reason.to_string();
    }
    format!("{}: {}", response.status, response.body)
}

fn joined_errors(body: &Value) -> Option<String> {
    let errors = body.get("errors")?.as_array()?;
    let messages = errors
        .iter()
        .map(Value::as_str)
        .collect::<Option<Vec<_>>>()?;
    Some(messages.join(","))
}

fn protocol_error(message: impl Into<String>, response: HttpResponse) -> ApiError {
    ApiError::Protocol {
        message: message.into(),
        response: Box::new(response),
    }
}

/// Accept a completed (< 400) response or explain why it is unusable.
fn validate_response(response: HttpResponse) -> Result<Option<Value>, ApiError> {
    if response.status == 302 {
        return Err(protocol_error(
            "Unexpected Redirect, invalid api key or host?",
            response,
        ));
    }

    let content_type = response.content_type().unwrap_or_default();
    if content_type != JSON_CONTENT_TYPE {
        // Some endpoints answer with an empty HTML document.
        if response.body.trim().is_empty() {
            return Ok(None);
        }
        let message =
            format!("Invalid Response, expecting \"{JSON_CONTENT_TYPE}\" got \"{content_type}\"");
        return Err(protocol_error(message, response));
    }

    let decoded: Value = match serde_json::from_str(&response.body) {
        Ok(decoded) => decoded,
        Err(_) => return Err(protocol_error("failed to decode response", response)),
    };

    // Data explorer sends an empty `errors` array on success.
    if let Some(message) = application_error(&decoded) {
        return Err(protocol_error(message, response));
    }

    Ok(Some(decoded))
}

fn application_error(decoded: &Value) -> Option<String> {
    let errors = match decoded.get("errors")? {
        Value::Array(errors) if !errors.is_empty() => errors,
        _ => return None,
    };
    let message = decoded
        .get("message")
        .and_then(Value::as_str)
        .filter(|message| !message.is_empty());
    if let Some(message) = message {
        return Some(message.to_string());
    }
    let joined = errors
        .iter()
        .map(|error| match error {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",");
    Some(joined)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::http::{HttpMethod, RequestBody};
    use crate::testing::{client, json_response, rate_limited, text_response};

    #[test]
    fn build_request_attaches_host_and_credentials() {
        let c = client(Vec::new());
        let req = c.build_request(&ApiRequest::get("/users/sam.json").query("x", 1));
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://forum.test/users/sam.json");
        assert_eq!(req.header("accept"), Some(JSON_CONTENT_TYPE));
        assert_eq!(req.header("Api-Key"), Some("test-key"));
        assert_eq!(req.header("Api-Username"), Some("system"));
        assert_eq!(req.query, vec![("x".to_string(), "1".to_string())]);
        assert_eq!(req.body, RequestBody::Empty);
        assert!(!req.follow_redirects);
    }

    #[test]
    fn path_is_appended_verbatim() {
        let c = client(Vec::new());
        let req = c.build_request(&ApiRequest::get("/c/5.json?page=2"));
        assert_eq!(req.url, "http://forum.test/c/5.json?page=2");
    }

    #[test]
    fn build_request_carries_redirect_override() {
        let c = client(Vec::new());
        let req = c.build_request(&ApiRequest::get("/c/5.json").follow_redirects());
        assert!(req.follow_redirects);
    }

    #[test]
    fn success_returns_exact_json() {
        let body = json!({"user": {"id": 1, "username": "sam"}, "errors": []});
        let c = client(vec![json_response(200, body.clone())]);
        assert_eq!(c.execute(&ApiRequest::get("/u")).unwrap(), Some(body));
        assert!(c.transport().sleeps().is_empty());
        assert_eq!(c.transport().requests().len(), 1);
    }

    #[test]
    fn empty_non_json_body_is_none() {
        let c = client(vec![text_response(200, "text/html", "  \n")]);
        assert_eq!(c.execute(&ApiRequest::delete("/t/1")).unwrap(), None);
    }

    #[test]
    fn missing_content_type_with_empty_body_is_none() {
        let c = client(vec![HttpResponse {
            status: 204,
            headers: Vec::new(),
            body: String::new(),
        }]);
        assert_eq!(c.execute(&ApiRequest::delete("/t/1")).unwrap(), None);
    }

    #[test]
    fn non_json_body_is_protocol_error() {
        let c = client(vec![text_response(200, "text/html", "<html></html>")]);
        let err = c.execute(&ApiRequest::get("/")).unwrap_err();
        assert!(matches!(err, ApiError::Protocol { .. }));
        assert_eq!(
            err.to_string(),
            "Invalid Response, expecting \"application/json; charset=utf-8\" got \"text/html\""
        );
    }

    #[test]
    fn content_type_must_match_exactly() {
        let c = client(vec![text_response(200, "application/json", "{}")]);
        let err = c.execute(&ApiRequest::get("/")).unwrap_err();
        assert!(matches!(err, ApiError::Protocol { .. }));
    }

    #[test]
    fn undecodable_json_is_protocol_error() {
        let c = client(vec![text_response(200, JSON_CONTENT_TYPE, "{not json")]);
        let err = c.execute(&ApiRequest::get("/")).unwrap_err();
        assert!(matches!(err, ApiError::Protocol { .. }));
        assert_eq!(err.to_string(), "failed to decode response");
    }

    #[test]
    fn errors_in_ok_response_prefer_message() {
        let c = client(vec![json_response(
            200,
            json!({"errors": ["a", "b"], "message": "query failed"}),
        )]);
        let err = c.execute(&ApiRequest::post("/q")).unwrap_err();
        assert!(matches!(err, ApiError::Protocol { .. }));
        assert_eq!(err.to_string(), "query failed");
    }

    #[test]
    fn errors_in_ok_response_are_joined() {
        let c = client(vec![json_response(200, json!({"errors": ["a", "b"]}))]);
        let err = c.execute(&ApiRequest::post("/q")).unwrap_err();
        assert_eq!(err.to_string(), "a,b");
        assert_eq!(err.status(), Some(200));
    }

    #[test]
    fn redirect_is_protocol_error_regardless_of_body() {
        let c = client(vec![json_response(302, json!({"user": {"id": 1}}))]);
        let err = c.execute(&ApiRequest::get("/")).unwrap_err();
        assert!(matches!(err, ApiError::Protocol { .. }));
        assert_eq!(err.to_string(), "Unexpected Redirect, invalid api key or host?");
    }

    #[test]
    fn not_found_is_client_error_with_errors_message() {
        let c = client(vec![json_response(404, json!({"errors": ["not found"]}))]);
        let err = c.execute(&ApiRequest::get("/users/nobody.json")).unwrap_err();
        assert!(matches!(err, ApiError::Client { .. }));
        assert_eq!(err.to_string(), "not found");
        assert_eq!(err.status(), Some(404));
        assert_eq!(c.transport().requests().len(), 1);
    }

    #[test]
    fn client_error_falls_back_to_reason_phrase() {
        let c = client(vec![text_response(403, "text/html", "<h1>nope</h1>")]);
        let err = c.execute(&ApiRequest::get("/")).unwrap_err();
        assert!(matches!(err, ApiError::Client { .. }));
        assert_eq!(err.to_string(), "Forbidden");
    }

    #[test]
    fn server_error_uses_reason_phrase_for_unparsable_body() {
        let c = client(vec![text_response(500, "text/html", "<html>boom")]);
        let err = c.execute(&ApiRequest::get("/")).unwrap_err();
        assert!(matches!(err, ApiError::Server { .. }));
        assert_eq!(err.to_string(), "Internal Server Error");
        assert!(c.transport().sleeps().is_empty());
    }

    #[test]
    fn unknown_status_without_reason_uses_status_and_body() {
        let c = client(vec![text_response(599, "text/plain", "odd")]);
        let err = c.execute(&ApiRequest::get("/")).unwrap_err();
        assert!(matches!(err, ApiError::Server { .. }));
        assert_eq!(err.to_string(), "599: odd");
    }

    #[test]
    fn rate_limit_then_success_sleeps_once_per_429() {
        let ok = json!({"ok": true});
        let c = client(vec![
            rate_limited(Some(3.0)),
            rate_limited(Some(5.0)),
            json_response(200, ok.clone()),
        ]);
        assert_eq!(c.execute(&ApiRequest::get("/latest.json")).unwrap(), Some(ok));
        assert_eq!(
            c.transport().sleeps(),
            vec![Duration::from_secs(4), Duration::from_secs(6)]
        );
        assert_eq!(c.transport().requests().len(), 3);
    }

    #[test]
    fn rate_limit_without_json_uses_fallback_wait() {
        let c = client(vec![
            text_response(429, "text/plain", "slow down"),
            json_response(200, json!({})),
        ]);
        c.execute(&ApiRequest::get("/")).unwrap();
        assert_eq!(c.transport().sleeps(), vec![Duration::from_secs(11)]);
    }

    #[test]
    fn rate_limit_json_without_wait_seconds_uses_fallback_wait() {
        let c = client(vec![
            json_response(429, json!({"errors": ["slow down"]})),
            json_response(200, json!({})),
        ]);
        c.execute(&ApiRequest::get("/")).unwrap();
        assert_eq!(c.transport().sleeps(), vec![Duration::from_secs(11)]);
    }

    #[test]
    fn negative_wait_seconds_waits_only_the_backoff() {
        let c = client(vec![rate_limited(Some(-5.0)), json_response(200, json!({}))]);
        c.execute(&ApiRequest::get("/")).unwrap();
        assert_eq!(c.transport().sleeps(), vec![Duration::from_secs(1)]);
    }

    #[test]
    fn out_of_range_wait_seconds_uses_fallback_wait() {
        let c = client(vec![rate_limited(Some(1e300)), json_response(200, json!({}))]);
        c.execute(&ApiRequest::get("/")).unwrap();
        assert_eq!(c.transport().sleeps(), vec![Duration::from_secs(11)]);
    }

    #[test]
    fn persistent_rate_limit_exhausts_after_four_attempts_and_three_sleeps() {
        let c = client(vec![
            rate_limited(Some(1.0)),
            rate_limited(Some(1.0)),
            rate_limited(Some(1.0)),
            rate_limited(Some(1.0)),
            json_response(200, json!({})),
        ]);
        let err = c.execute(&ApiRequest::get("/latest.json")).unwrap_err();
        assert!(matches!(err, ApiError::RateLimited { .. }));
        assert_eq!(err.rate_limit_code(), Some("ip_10_secs_limit"));
        assert_eq!(c.transport().requests().len(), 4);
        assert_eq!(c.transport().sleeps(), vec![Duration::from_secs(2); 3]);
    }

    #[test]
    fn retry_budget_follows_config() {
        let c = crate::testing::client_with(
            vec![rate_limited(Some(0.0)), rate_limited(Some(0.0))],
            |config| config.with_retry_count(2).with_retry_backoff(Duration::ZERO),
        );
        let err = c.execute(&ApiRequest::get("/")).unwrap_err();
        assert!(matches!(err, ApiError::RateLimited { .. }));
        assert_eq!(c.transport().requests().len(), 2);
        assert_eq!(c.transport().sleeps(), vec![Duration::ZERO]);
    }

    #[test]
    fn client_error_after_rate_limit_is_not_retried() {
        let c = client(vec![
            rate_limited(Some(0.0)),
            json_response(422, json!({"errors": ["sam is already a member"]})),
            json_response(200, json!({})),
        ]);
        let err = c.execute(&ApiRequest::put("/groups/1/members.json")).unwrap_err();
        assert!(matches!(err, ApiError::Client { .. }));
        assert_eq!(err.to_string(), "sam is already a member");
        assert_eq!(c.transport().requests().len(), 2);
    }

    #[test]
    fn transport_failure_is_surfaced() {
        let c = client(Vec::new());
        let err = c.execute(&ApiRequest::get("/")).unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }

    #[test]
    fn client_is_shareable_across_threads() {
        fn assert_send_sync<S: Send + Sync>() {}
        assert_send_sync::<DiscourseClient>();
        assert_send_sync::<DiscourseClient<crate::testing::ScriptedTransport>>();
    }
}
