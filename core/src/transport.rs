//! The I/O seam between the request engine and the network.
//!
//! # Design
//! `Transport` is the only place the engine performs side effects: sending a
//! request and sleeping between rate-limited attempts. `UreqTransport` is the
//! production implementation; tests substitute a scripted transport that
//! records requests and sleeps instead of performing them.

use std::time::Duration;

use ureq::http::Response;
use ureq::typestate::{WithBody, WithoutBody};
use ureq::unversioned::multipart::{Form, Part};
use ureq::{Agent, Body, RequestBuilder};

use crate::http::{HttpMethod, HttpRequest, HttpResponse, RequestBody, TransportError};

/// Redirect limit applied when a call opts into following redirects.
const MAX_FOLLOWED_REDIRECTS: u32 = 10;

/// Executes physical HTTP attempts on behalf of `DiscourseClient`.
pub trait Transport {
    /// Perform one round-trip. Non-2xx statuses are responses, not errors.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Block the calling thread between rate-limited attempts.
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Blocking transport backed by a shared `ureq::Agent`.
///
/// The agent keeps its own keep-alive pool; nothing else is shared between
/// calls, so one transport can serve many threads.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    /// `timeout` bounds each attempt, including connect and body read.
    pub fn new(timeout: Option<Duration>) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .timeout_global(timeout)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.as_str();
        let response = match request.method {
            HttpMethod::Get => send_without_body(prepare(self.agent.get(url), request), &request.body)?,
            HttpMethod::Delete => {
                send_without_body(prepare(self.agent.delete(url), request), &request.body)?
            }
            HttpMethod::Post => send_with_body(prepare(self.agent.post(url), request), &request.body)?,
            HttpMethod::Put => send_with_body(prepare(self.agent.put(url), request), &request.body)?,
        };
        into_response(response)
    }
}

fn prepare<B>(mut builder: RequestBuilder<B>, request: &HttpRequest) -> RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.query.is_empty() {
        builder = builder.query_pairs(
            request
                .query
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        );
    }
    if request.follow_redirects {
        builder = builder
            .config()
            .max_redirects(MAX_FOLLOWED_REDIRECTS)
            .build();
    }
    builder
}

fn send_without_body(
    builder: RequestBuilder<WithoutBody>,
    body: &RequestBody,
) -> Result<Response<Body>, TransportError> {
    if body.is_empty() {
        return Ok(builder.call()?);
    }
    // DELETE /groups/{id}/members.json carries a JSON body.
    send_with_body(builder.force_send_body(), body)
}

fn send_with_body(
    builder: RequestBuilder<WithBody>,
    body: &RequestBody,
) -> Result<Response<Body>, TransportError> {
    let response = match body {
        RequestBody::Empty => builder.send_empty()?,
        RequestBody::Form(pairs) => builder.send_form(
            pairs
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        )?,
        RequestBody::Json(value) => {
            let bytes = serde_json::to_vec(value)?;
            builder
                .content_type("application/json")
                .send(bytes.as_slice())?
        }
        RequestBody::Multipart { fields, files } => {
            let field_names: Vec<String> = fields.iter().map(|(name, _)| form_data_name(name)).collect();
            let file_names: Vec<(String, String)> = files
                .iter()
                .map(|file| (form_data_name(&file.field), form_data_name(&file.filename)))
                .collect();

            let mut form = Form::new();
            for (name, (_, value)) in field_names.iter().zip(fields) {
                form = form.text(name.as_str(), value.as_str());
            }
            for ((field, filename), file) in file_names.iter().zip(files) {
                let part = Part::bytes(&file.bytes)
                    .file_name(filename.as_str())
                    .mime_str(&file.content_type)?;
                form = form.part(field.as_str(), part);
            }
            builder.send(form)?
        }
    };
    Ok(response)
}

/// Percent-encode CR, LF and `"` in a part name or file name, as HTML forms
/// do, so a caller-supplied name cannot end the `Content-Disposition` line.
fn form_data_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '\r' => out.push_str("%0D"),
            '\n' => out.push_str("%0A"),
            '"' => out.push_str("%22"),
            c => out.push(c),
        }
    }
    out
}

fn into_response(mut response: Response<Body>) -> Result<HttpResponse, TransportError> {
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    // Data-explorer results routinely exceed ureq's default 10 MiB cap.
    let body = response
        .body_mut()
        .with_config()
        .limit(u64::MAX)
        .read_to_string()?;
    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}
