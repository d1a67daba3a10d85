//! Endpoint wrappers: path and parameter marshaling on top of `execute`.
//!
//! Each wrapper builds an `ApiRequest` and hands it to the engine. Wrappers
//! that return a sub-document of the response fail with
//! `ApiError::MissingField` when the server omits it.

use serde_json::{json, Value};

use crate::client::DiscourseClient;
use crate::error::ApiError;
use crate::http::Attachment;
use crate::request::ApiRequest;
use crate::transport::Transport;

/// Fields for `create_post`. A new topic needs `title`; a reply needs
/// `topic_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPost {
    pub content: String,
    pub title: Option<String>,
    pub topic_id: Option<u64>,
    pub category_id: Option<u64>,
    pub tags: Vec<String>,
}

/// Where an uploaded image is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadType {
    Avatar,
    ProfileBackground,
    CardBackground,
    CustomEmoji,
    Composer,
}

impl UploadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadType::Avatar => "avatar",
            UploadType::ProfileBackground => "profile_background",
            UploadType::CardBackground => "card_background",
            UploadType::CustomEmoji => "custom_emoji",
            UploadType::Composer => "composer",
        }
    }
}

/// Follow a JSON pointer into a decoded body.
fn required(body: Option<Value>, pointer: &str) -> Result<Value, ApiError> {
    body.and_then(|mut body| body.pointer_mut(pointer).map(Value::take))
        .ok_or_else(|| ApiError::MissingField(pointer.trim_start_matches('/').replace('/', ".")))
}

impl<T: Transport> DiscourseClient<T> {
    pub fn user(&self, username: &str) -> Result<Value, ApiError> {
        let body = self.execute(&ApiRequest::get(format!("/users/{username}.json")))?;
        required(body, "/user")
    }

    /// Full admin view of a user.
    pub fn user_all(&self, user_id: u64) -> Result<Option<Value>, ApiError> {
        self.execute(&ApiRequest::get(format!("/admin/users/{user_id}.json")))
    }

    /// `user_type` is one of `active`, `new`, `staff`, `suspended`, ...
    pub fn list_users(
        &self,
        user_type: &str,
        params: &[(String, String)],
    ) -> Result<Option<Value>, ApiError> {
        let request = ApiRequest::get(format!("/admin/users/list/{user_type}.json")).query_pairs(params);
        self.execute(&request)
    }

    pub fn user_actions(&self, username: &str, filter: &str, offset: u64) -> Result<Value, ApiError> {
        let request = ApiRequest::get("/user_actions.json")
            .query("username", username)
            .query("filter", filter)
            .query("offset", offset);
        required(self.execute(&request)?, "/user_actions")
    }

    pub fn latest_topics(&self, params: &[(String, String)]) -> Result<Option<Value>, ApiError> {
        self.execute(&ApiRequest::get("/latest.json").query_pairs(params))
    }

    pub fn topic_posts(&self, topic_id: u64) -> Result<Option<Value>, ApiError> {
        self.execute(&ApiRequest::get(format!("/t/{topic_id}/posts.json")))
    }

    /// Topics in a category. The server redirects id-only URLs to the
    /// slugged form, so this call follows redirects.
    pub fn category_topics(&self, category_id: u64) -> Result<Option<Value>, ApiError> {
        self.execute(&ApiRequest::get(format!("/c/{category_id}.json")).follow_redirects())
    }

    pub fn categories(&self) -> Result<Value, ApiError> {
        let body = self.execute(&ApiRequest::get("/categories.json"))?;
        required(body, "/category_list/categories")
    }

    pub fn search(&self, term: &str, params: &[(String, String)]) -> Result<Option<Value>, ApiError> {
        let request = ApiRequest::get("/search.json")
            .query_pairs(params)
            .query("term", term);
        self.execute(&request)
    }

    pub fn create_post(&self, post: &NewPost) -> Result<Option<Value>, ApiError> {
        let mut request = ApiRequest::post("/posts")
            .form_opt("category", post.category_id)
            .form_opt("title", post.title.as_deref())
            .form("raw", &post.content)
            .form_opt("topic_id", post.topic_id);
        for tag in &post.tags {
            request = request.form("tags[]", tag);
        }
        self.execute(&request)
    }

    /// Discourse answers topic deletion with an empty body.
    pub fn delete_topic(&self, topic_id: u64) -> Result<Option<Value>, ApiError> {
        self.execute(&ApiRequest::delete(format!("/t/{topic_id}")))
    }

    /// Every member of a group, read page by page from `offset`.
    pub fn group_members(&self, group_name: &str, offset: u64) -> Result<Vec<Value>, ApiError> {
        self.read_all(&format!("/groups/{group_name}/members.json"), "members", offset, &[])
    }

    pub fn group_owners(&self, group_name: &str) -> Result<Value, ApiError> {
        let body = self.execute(&ApiRequest::get(format!("/groups/{group_name}/members.json")))?;
        required(body, "/owners")
    }

    /// Fails with a client error when the user already belongs to the group.
    pub fn add_group_member(&self, group_id: u64, username: &str) -> Result<Option<Value>, ApiError> {
        let request = ApiRequest::put(format!("/groups/{group_id}/members.json")).form("usernames", username);
        self.execute(&request)
    }

    pub fn add_group_members(&self, group_id: u64, usernames: &[&str]) -> Result<Option<Value>, ApiError> {
        let request = ApiRequest::put(format!("/groups/{group_id}/members.json"))
            .json(json!({ "usernames": usernames.join(",") }));
        self.execute(&request)
    }

    pub fn add_user_to_group(&self, group_id: u64, user_id: u64) -> Result<Option<Value>, ApiError> {
        let request = ApiRequest::post(format!("/admin/users/{user_id}/groups")).form("group_id", group_id);
        self.execute(&request)
    }

    /// Removes the membership only; the user account stays.
    pub fn delete_group_member(&self, group_id: u64, username: &str) -> Result<Option<Value>, ApiError> {
        let request = ApiRequest::delete(format!("/groups/{group_id}/members.json"))
            .json(json!({ "usernames": username }));
        self.execute(&request)
    }

    pub fn upload_image(
        &self,
        image: Attachment,
        upload_type: UploadType,
        synchronous: bool,
    ) -> Result<Option<Value>, ApiError> {
        let request = ApiRequest::post("/uploads.json")
            .form("type", upload_type.as_str())
            .form("synchronous", synchronous)
            .file(image);
        self.execute(&request)
    }

    /// Run a saved query of the data-explorer plugin.
    pub fn data_explorer_query(
        &self,
        query_id: u64,
        params: &[(String, String)],
    ) -> Result<Option<Value>, ApiError> {
        let mut request = ApiRequest::post(format!("/admin/plugins/explorer/queries/{query_id}/run"));
        for (key, value) in params {
            request = request.form(key, value);
        }
        self.execute(&request)
    }
}
