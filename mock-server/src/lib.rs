//! In-memory imitation of the Discourse endpoints the client core talks to.
//!
//! Answers with `application/json; charset=utf-8` like the real forum, checks
//! the `Api-Key` header, and exposes knobs for the awkward cases: scripted
//! rate limiting, a group whose reported total overstates its members, a
//! redirecting category URL, an empty HTML body and a 500 page.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const API_KEY: &str = "test-key";
pub const API_USERNAME: &str = "system";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const RATE_LIMIT_CODE: &str = "ip_10_secs_limit";

/// Members returned per page when the caller gives no `limit`.
pub const DEFAULT_PAGE_SIZE: usize = 2;

#[derive(Clone, Debug)]
pub struct User {
    pub id: u64,
    pub username: String,
}

#[derive(Clone, Debug)]
pub struct Group {
    pub id: u64,
    pub name: String,
    pub members: Vec<String>,
    pub owners: Vec<String>,
    /// Added to `meta.total`; non-zero simulates an inconsistent count.
    pub phantom_members: u64,
}

#[derive(Debug, Default)]
pub struct ForumData {
    pub users: Vec<User>,
    pub groups: Vec<Group>,
    pub next_post_id: u64,
}

/// Shared server state. Cloning shares the underlying data.
#[derive(Clone, Debug)]
pub struct Forum {
    data: Arc<RwLock<ForumData>>,
    rate_limited: Arc<AtomicUsize>,
    wait_seconds: u64,
}

impl Forum {
    /// Five users, a `staff` group holding all of them, a one-member
    /// `moderators` group and a `phantom` group that claims five members but
    /// only has two.
    pub fn seeded() -> Self {
        let usernames = ["sam", "alice", "bob", "carol", "dave"];
        let users = usernames
            .iter()
            .zip(1..)
            .map(|(name, id)| User {
                id,
                username: name.to_string(),
            })
            .collect();
        let group = |id: u64, name: &str, members: &[&str], phantom_members: u64| Group {
            id,
            name: name.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
            owners: members.iter().take(1).map(|m| m.to_string()).collect(),
            phantom_members,
        };
        let groups = vec![
            group(41, "staff", &usernames[..], 0),
            group(42, "moderators", &["alice"][..], 0),
            group(43, "phantom", &["bob", "carol"][..], 3),
        ];
        Self {
            data: Arc::new(RwLock::new(ForumData {
                users,
                groups,
                next_post_id: 100,
            })),
            rate_limited: Arc::new(AtomicUsize::new(0)),
            wait_seconds: 0,
        }
    }

    /// Answer the next `count` requests to `/latest.json` with 429.
    pub fn rate_limit_next(&self, count: usize) {
        self.rate_limited.store(count, Ordering::SeqCst);
    }

    /// `extras.wait_seconds` reported in 429 bodies.
    pub fn with_wait_seconds(mut self, wait_seconds: u64) -> Self {
        self.wait_seconds = wait_seconds;
        self
    }

    pub async fn group_members(&self, name: &str) -> Option<Vec<String>> {
        let data = self.data.read().await;
        data.groups
            .iter()
            .find(|g| g.name == name)
            .map(|g| g.members.clone())
    }

    fn take_rate_limit(&self) -> bool {
        self.rate_limited
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

pub fn app() -> Router {
    app_with(Forum::seeded())
}

pub fn app_with(forum: Forum) -> Router {
    Router::new()
        .route("/users/{file}", get(get_user))
        .route("/admin/users/{user}", get(get_admin_user))
        .route("/admin/users/{user}/groups", post(add_user_to_group))
        .route(
            "/groups/{group}/members.json",
            get(list_members).put(add_members).delete(remove_members),
        )
        .route("/posts", post(create_post))
        .route("/t/{id}", delete(delete_topic))
        .route("/uploads.json", post(upload))
        .route("/categories.json", get(list_categories))
        .route("/c/{slug}", get(redirect_category))
        .route("/c/{slug}/{file}", get(category_topics))
        .route("/latest.json", get(latest_topics))
        .route("/admin/plugins/explorer/queries/{id}/run", post(run_query))
        .route("/admin/dashboard.json", get(broken_dashboard))
        .layer(middleware::from_fn(require_api_key))
        .with_state(forum)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with(listener: TcpListener, forum: Forum) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(forum)).await
}

/// JSON reply with the exact content type Discourse sends.
pub fn json_reply(status: StatusCode, body: Value) -> Response {
    (status, [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], body.to_string()).into_response()
}

fn errors_reply(status: StatusCode, message: &str) -> Response {
    json_reply(status, json!({ "errors": [message] }))
}

fn not_found() -> Response {
    json_reply(
        StatusCode::NOT_FOUND,
        json!({
            "errors": ["The requested URL or resource could not be found."],
            "error_type": "not_found",
        }),
    )
}

async fn require_api_key(request: Request, next: Next) -> Response {
    let key = request
        .headers()
        .get("api-key")
        .and_then(|value| value.to_str().ok());
    if key != Some(API_KEY) {
        return json_reply(
            StatusCode::FORBIDDEN,
            json!({
                "errors": ["You are not permitted to view the requested resource. The API username or key is invalid."],
                "error_type": "invalid_access",
            }),
        );
    }
    next.run(request).await
}

fn user_json(user: &User) -> Value {
    json!({ "id": user.id, "username": user.username })
}

async fn get_user(State(forum): State<Forum>, Path(file): Path<String>) -> Response {
    let Some(username) = file.strip_suffix(".json") else {
        return not_found();
    };
    let data = forum.data.read().await;
    match data.users.iter().find(|u| u.username == username) {
        Some(user) => json_reply(StatusCode::OK, json!({ "user": user_json(user) })),
        None => not_found(),
    }
}

async fn get_admin_user(State(forum): State<Forum>, Path(file): Path<String>) -> Response {
    let id = file.strip_suffix(".json").and_then(|id| id.parse::<u64>().ok());
    let data = forum.data.read().await;
    match data.users.iter().find(|u| Some(u.id) == id) {
        Some(user) => {
            let mut body = user_json(user);
            body["admin"] = json!(user.id == 1);
            json_reply(StatusCode::OK, body)
        }
        None => not_found(),
    }
}

#[derive(Deserialize)]
pub struct PageParams {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

async fn list_members(
    State(forum): State<Forum>,
    Path(group): Path<String>,
    Query(params): Query<PageParams>,
) -> Response {
    let data = forum.data.read().await;
    let Some(group) = data.groups.iter().find(|g| g.name == group) else {
        return not_found();
    };
    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let member = |name: &String| {
        data.users
            .iter()
            .find(|u| &u.username == name)
            .map(user_json)
            .unwrap_or_else(|| json!({ "username": name }))
    };
    let members: Vec<Value> = group.members.iter().skip(offset).take(limit).map(&member).collect();
    let owners: Vec<Value> = group.owners.iter().map(&member).collect();
    json_reply(
        StatusCode::OK,
        json!({
            "members": members,
            "owners": owners,
            "meta": {
                "total": group.members.len() as u64 + group.phantom_members,
                "limit": limit,
                "offset": offset,
            },
        }),
    )
}

#[derive(Deserialize)]
pub struct Usernames {
    pub usernames: String,
}

fn split_usernames(usernames: &str) -> Vec<String> {
    usernames
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

async fn add_members(
    State(forum): State<Forum>,
    Path(group): Path<String>,
    Json(input): Json<Usernames>,
) -> Response {
    let mut data = forum.data.write().await;
    let Some(group) = data.groups.iter_mut().find(|g| g.id.to_string() == group) else {
        return not_found();
    };
    let usernames = split_usernames(&input.usernames);
    if let Some(existing) = usernames.iter().find(|name| group.members.contains(*name)) {
        return errors_reply(
            StatusCode::UNPROCESSABLE_ENTITY,
            &format!("{existing} is already a member of this group"),
        );
    }
    group.members.extend(usernames.iter().cloned());
    json_reply(StatusCode::OK, json!({ "success": "OK", "usernames": usernames }))
}

async fn remove_members(
    State(forum): State<Forum>,
    Path(group): Path<String>,
    Json(input): Json<Usernames>,
) -> Response {
    let mut data = forum.data.write().await;
    let Some(group) = data.groups.iter_mut().find(|g| g.id.to_string() == group) else {
        return not_found();
    };
    let usernames = split_usernames(&input.usernames);
    group.members.retain(|name| !usernames.contains(name));
    json_reply(StatusCode::OK, json!({ "success": "OK", "usernames": usernames }))
}

#[derive(Deserialize)]
pub struct GroupId {
    pub group_id: u64,
}

async fn add_user_to_group(
    State(forum): State<Forum>,
    Path(user_id): Path<u64>,
    Form(input): Form<GroupId>,
) -> Response {
    let mut data = forum.data.write().await;
    let Some(username) = data
        .users
        .iter()
        .find(|u| u.id == user_id)
        .map(|u| u.username.clone())
    else {
        return not_found();
    };
    let Some(group) = data.groups.iter_mut().find(|g| g.id == input.group_id) else {
        return not_found();
    };
    if group.members.contains(&username) {
        return errors_reply(
            StatusCode::UNPROCESSABLE_ENTITY,
            &format!("{username} is already a member of this group"),
        );
    }
    group.members.push(username);
    json_reply(StatusCode::OK, json!({ "success": "OK" }))
}

#[derive(Deserialize)]
pub struct NewPost {
    #[serde(default)]
    pub raw: String,
    pub title: Option<String>,
    pub topic_id: Option<u64>,
    pub category: Option<u64>,
}

async fn create_post(State(forum): State<Forum>, Form(input): Form<NewPost>) -> Response {
    if input.raw.trim().len() < 5 {
        return errors_reply(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Body is too short (minimum is 5 characters)",
        );
    }
    let mut data = forum.data.write().await;
    let id = data.next_post_id;
    data.next_post_id += 1;
    json_reply(
        StatusCode::OK,
        json!({
            "id": id,
            "topic_id": input.topic_id.unwrap_or(id),
            "topic_title": input.title,
            "category_id": input.category,
            "raw": input.raw,
        }),
    )
}

async fn delete_topic(Path(_id): Path<u64>) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/html")], "").into_response()
}

async fn upload(mut multipart: Multipart) -> Response {
    let mut upload_type = None;
    let mut file = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                match field.bytes().await {
                    Ok(bytes) => file = Some((filename, bytes.len())),
                    Err(_) => return errors_reply(StatusCode::BAD_REQUEST, "unreadable file"),
                }
            }
            "type" => upload_type = field.text().await.ok(),
            _ => {}
        }
    }
    let Some((filename, filesize)) = file else {
        return errors_reply(StatusCode::UNPROCESSABLE_ENTITY, "No file was uploaded");
    };
    let extension = filename.rsplit('.').next().unwrap_or("bin").to_string();
    json_reply(
        StatusCode::OK,
        json!({
            "url": format!("/uploads/default/original/1X/{}.{extension}", Uuid::new_v4().simple()),
            "original_filename": filename,
            "filesize": filesize,
            "type": upload_type,
        }),
    )
}

async fn list_categories() -> Response {
    json_reply(
        StatusCode::OK,
        json!({
            "category_list": {
                "categories": [
                    { "id": 1, "name": "General", "slug": "general" },
                    { "id": 2, "name": "Staff", "slug": "staff" },
                ],
            },
        }),
    )
}

/// Id-only category URLs redirect to the slugged form, as Discourse does.
async fn redirect_category(Path(file): Path<String>) -> Response {
    match file.strip_suffix(".json").and_then(|id| id.parse::<u64>().ok()) {
        Some(id) => (StatusCode::FOUND, [(header::LOCATION, format!("/c/general/{id}.json"))]).into_response(),
        None => not_found(),
    }
}

async fn category_topics(Path((slug, file)): Path<(String, String)>) -> Response {
    let Some(id) = file.strip_suffix(".json").and_then(|id| id.parse::<u64>().ok()) else {
        return not_found();
    };
    json_reply(
        StatusCode::OK,
        json!({
            "topic_list": {
                "topics": [{ "id": 7, "title": "Welcome", "category_id": id, "slug": slug }],
            },
        }),
    )
}

async fn latest_topics(State(forum): State<Forum>) -> Response {
    if forum.take_rate_limit() {
        tracing::debug!(wait_seconds = forum.wait_seconds, "rate limiting /latest.json");
        let body = json!({
            "errors": ["You've performed this action too many times. Please wait a few seconds before trying again."],
            "error_type": "rate_limit",
            "extras": {
                "wait_seconds": forum.wait_seconds,
                "time_left": format!("{} seconds", forum.wait_seconds),
            },
        });
        let mut response = json_reply(StatusCode::TOO_MANY_REQUESTS, body);
        response
            .headers_mut()
            .insert("discourse-rate-limit-error-code", header::HeaderValue::from_static(RATE_LIMIT_CODE));
        return response;
    }
    json_reply(
        StatusCode::OK,
        json!({ "topic_list": { "topics": [{ "id": 7, "title": "Welcome" }] } }),
    )
}

/// Size of the single cell returned by query 2.
pub const LARGE_RESULT_BYTES: usize = 11 * 1024 * 1024;

/// Query 1 succeeds with an empty `errors` array, query 2 returns a result
/// larger than common client body limits, and any other id reports an
/// application error inside a 200.
async fn run_query(Path(id): Path<u64>) -> Response {
    match id {
        1 => {
            return json_reply(
                StatusCode::OK,
                json!({ "success": true, "errors": [], "columns": ["n"], "rows": [[1]] }),
            )
        }
        2 => {
            return json_reply(
                StatusCode::OK,
                json!({ "success": true, "errors": [], "columns": ["blob"], "rows": [["x".repeat(LARGE_RESULT_BYTES)]] }),
            )
        }
        _ => {}
    }
    json_reply(
        StatusCode::OK,
        json!({ "success": false, "errors": [format!("query {id} not found")] }),
    )
}

async fn broken_dashboard() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/html")],
        "<html><body>We're sorry, but something went wrong.</body></html>",
    )
        .into_response()
}
