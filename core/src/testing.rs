//! Scripted transport shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};

use crate::client::{DiscourseClient, JSON_CONTENT_TYPE};
use crate::config::ClientConfig;
use crate::http::{HttpRequest, HttpResponse, TransportError};
use crate::transport::Transport;

/// Replays canned responses in order and records what it was asked to do.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ScriptedTransport {
    pub(crate) fn new(responses: Vec<HttpResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| "no scripted response left".into())
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

pub(crate) fn client(responses: Vec<HttpResponse>) -> DiscourseClient<ScriptedTransport> {
    client_with(responses, |config| config)
}

pub(crate) fn client_with<F>(responses: Vec<HttpResponse>, configure: F) -> DiscourseClient<ScriptedTransport>
where
    F: FnOnce(ClientConfig) -> ClientConfig,
{
    let config = configure(ClientConfig::new("http://forum.test", "system", "test-key"));
    DiscourseClient::with_transport(config, ScriptedTransport::new(responses))
}

pub(crate) fn json_response(status: u16, body: Value) -> HttpResponse {
    text_response(status, JSON_CONTENT_TYPE, &body.to_string())
}

pub(crate) fn text_response(status: u16, content_type: &str, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        headers: vec![("content-type".to_string(), content_type.to_string())],
        body: body.to_string(),
    }
}

/// A 429 as Discourse sends it; `None` omits the `extras` block.
pub(crate) fn rate_limited(wait_seconds: Option<f64>) -> HttpResponse {
    let mut body = json!({
        "errors": ["You've performed this action too many times. Please wait a few seconds before trying again."],
        "error_type": "rate_limit",
    });
    if let Some(wait) = wait_seconds {
        body["extras"] = json!({ "wait_seconds": wait, "time_left": format!("{wait} seconds") });
    }
    let mut response = json_response(429, body);
    response.headers.push((
        "Discourse-Rate-Limit-Error-Code".to_string(),
        "ip_10_secs_limit".to_string(),
    ));
    response
}

/// One page of a paginated collection.
pub(crate) fn page(field: &str, items: &[Value], total: u64) -> HttpResponse {
    let mut body = json!({ "meta": { "total": total } });
    body[field] = Value::Array(items.to_vec());
    json_response(200, body)
}
