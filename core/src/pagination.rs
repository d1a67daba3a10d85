//! Reading offset-paginated collections through the request engine.
//!
//! # Design
//! Each page is an ordinary GET through `DiscourseClient::execute`, so rate
//! limiting and error classification apply per page. The loop ends when the
//! running offset reaches the server's `meta.total`. An empty page before
//! that point means client and server disagree on the total; it fails
//! immediately because asking again would return the same answer.

use serde_json::Value;
use tracing::debug;

use crate::client::DiscourseClient;
use crate::error::ApiError;
use crate::request::ApiRequest;
use crate::transport::Transport;

impl<T: Transport> DiscourseClient<T> {
    /// Fetch every item of the array `field` at `path`, starting at
    /// `start_offset`. `params` are sent with every page; any `offset` among
    /// them is replaced by the running offset.
    pub fn read_all(
        &self,
        path: &str,
        field: &str,
        start_offset: u64,
        params: &[(String, String)],
    ) -> Result<Vec<Value>, ApiError> {
        let params: Vec<(String, String)> = params
            .iter()
            .filter(|(key, _)| key != "offset")
            .cloned()
            .collect();
        let mut offset = start_offset;
        let mut items = Vec::new();

        loop {
            let request = ApiRequest::get(path)
                .query_pairs(&params)
                .query("offset", offset);
            let mut body = self
                .execute(&request)?
                .ok_or_else(|| ApiError::MissingField(field.to_string()))?;

            let total = body
                .pointer("/meta/total")
                .and_then(Value::as_u64)
                .ok_or_else(|| ApiError::MissingField("meta.total".to_string()))?;
            let page = match body.get_mut(field).map(Value::take) {
                Some(Value::Array(page)) => page,
                _ => return Err(ApiError::MissingField(field.to_string())),
            };

            let returned = page.len() as u64;
            items.extend(page);
            offset += returned;
            debug!(path, offset, returned, total, "page");

            if offset >= total {
                return Ok(items);
            }
            if returned == 0 {
                return Err(ApiError::IncompletePage {
                    total,
                    collected: items.len() as u64,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{client, json_response, page, rate_limited};

    fn offsets(c: &DiscourseClient<crate::testing::ScriptedTransport>) -> Vec<String> {
        c.transport()
            .requests()
            .iter()
            .map(|req| {
                req.query
                    .iter()
                    .find(|(key, _)| key == "offset")
                    .map(|(_, value)| value.clone())
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn collects_pages_until_total_is_reached() {
        let c = client(vec![
            page("members", &[json!(1), json!(2)], 5),
            page("members", &[json!(3), json!(4)], 5),
            page("members", &[json!(5)], 5),
        ]);
        let items = c.read_all("/groups/staff/members.json", "members", 0, &[]).unwrap();
        assert_eq!(items, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
        assert_eq!(offsets(&c), vec!["0", "2", "4"]);
    }

    #[test]
    fn empty_page_before_total_is_fatal() {
        let c = client(vec![
            page("members", &[json!(1), json!(2)], 5),
            page("members", &[], 5),
            page("members", &[json!(3)], 5),
        ]);
        let err = c.read_all("/groups/staff/members.json", "members", 0, &[]).unwrap_err();
        assert!(matches!(
            err,
            ApiError::IncompletePage {
                total: 5,
                collected: 2
            }
        ));
        assert_eq!(c.transport().requests().len(), 2);
    }

    #[test]
    fn empty_collection_returns_after_one_call() {
        let c = client(vec![page("members", &[], 0)]);
        let items = c.read_all("/groups/empty/members.json", "members", 0, &[]).unwrap();
        assert!(items.is_empty());
        assert_eq!(c.transport().requests().len(), 1);
    }

    #[test]
    fn start_offset_and_params_are_sent_with_every_page() {
        let c = client(vec![
            page("members", &[json!("c")], 4),
            page("members", &[json!("d")], 4),
        ]);
        let params = vec![
            ("limit".to_string(), "1".to_string()),
            ("offset".to_string(), "99".to_string()),
        ];
        let items = c.read_all("/groups/g/members.json", "members", 2, &params).unwrap();
        assert_eq!(items, vec![json!("c"), json!("d")]);
        assert_eq!(offsets(&c), vec!["2", "3"]);
        for req in c.transport().requests() {
            assert_eq!(
                req.query,
                vec![
                    ("limit".to_string(), "1".to_string()),
                    ("offset".to_string(), req.query[1].1.clone()),
                ]
            );
        }
    }

    #[test]
    fn page_overshooting_total_stops_without_another_request() {
        let c = client(vec![
            page("members", &[json!(1), json!(2)], 3),
            page("members", &[json!(3), json!(4)], 3),
            page("members", &[], 3),
        ]);
        let items = c.read_all("/groups/g/members.json", "members", 0, &[]).unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(offsets(&c), vec!["0", "2"]);
    }

    #[test]
    fn rate_limited_page_is_retried_by_the_engine() {
        let c = client(vec![
            page("members", &[json!(1)], 2),
            rate_limited(Some(0.0)),
            page("members", &[json!(2)], 2),
        ]);
        let items = c.read_all("/groups/g/members.json", "members", 0, &[]).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(c.transport().sleeps().len(), 1);
    }

    #[test]
    fn missing_total_is_reported() {
        let c = client(vec![json_response(200, json!({"members": []}))]);
        let err = c.read_all("/groups/g/members.json", "members", 0, &[]).unwrap_err();
        assert!(matches!(err, ApiError::MissingField(ref f) if f == "meta.total"));
    }

    #[test]
    fn missing_field_is_reported() {
        let c = client(vec![json_response(200, json!({"meta": {"total": 3}}))]);
        let err = c.read_all("/groups/g/members.json", "members", 0, &[]).unwrap_err();
        assert!(matches!(err, ApiError::MissingField(ref f) if f == "members"));
    }
}
