//! Per-call request description handed to the engine by endpoint wrappers.

use serde_json::Value;

use crate::http::{Attachment, HttpMethod, RequestBody};

/// One logical call: verb, path, parameters and transport overrides.
///
/// Built fresh for every call and never retained by the client. The path is
/// appended to the configured host verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub follow_redirects: bool,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            follow_redirects: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Append a query parameter. Repeated keys are sent repeatedly.
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn query_pairs<'a, I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        self.query.extend(pairs.into_iter().cloned());
        self
    }

    /// Append a form field. Switches an empty or JSON body to a form body;
    /// on a multipart body the field becomes a text part.
    pub fn form(mut self, key: &str, value: impl ToString) -> Self {
        let pair = (key.to_string(), value.to_string());
        match &mut self.body {
            RequestBody::Form(pairs) => pairs.push(pair),
            RequestBody::Multipart { fields, .. } => fields.push(pair),
            body => *body = RequestBody::Form(vec![pair]),
        }
        self
    }

    /// Append a form field only when a value is present.
    pub fn form_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.form(key, value),
            None => self,
        }
    }

    /// Replace the body with a JSON document.
    pub fn json(mut self, value: Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    /// Attach a file, turning the body into `multipart/form-data`. Existing
    /// form fields are kept as text parts.
    pub fn file(mut self, attachment: Attachment) -> Self {
        self.body = match std::mem::take(&mut self.body) {
            RequestBody::Multipart { fields, mut files } => {
                files.push(attachment);
                RequestBody::Multipart { fields, files }
            }
            RequestBody::Form(fields) => RequestBody::Multipart {
                fields,
                files: vec![attachment],
            },
            _ => RequestBody::Multipart {
                fields: Vec::new(),
                files: vec![attachment],
            },
        };
        self
    }

    /// Let the transport follow redirects for this call only.
    pub fn follow_redirects(mut self) -> Self {
        self.follow_redirects = true;
        self
    }
}
