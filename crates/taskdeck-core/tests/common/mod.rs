#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use taskdeck_core::error::ApiError;
use taskdeck_core::navigation::BrowserHistory;
use taskdeck_core::preferences::MemoryPreferenceStore;
use taskdeck_core::session::SessionManager;
use taskdeck_core::tasks::TaskController;
use taskdeck_core::transport::{
    ApiClient, ApiRequest, HttpBackend, HttpResponse, Method, UnauthorizedPolicy,
};

#[derive(Debug, Clone)]
struct Account {
    id: String,
    username: String,
    email: String,
    password: String,
}

impl Account {
    fn public(&self) -> Value {
        json!({ "_id": self.id, "username": self.username, "email": self.email })
    }
}

#[derive(Debug, Clone)]
struct StoredTask {
    owner: String,
    doc: Value,
}

#[derive(Debug, Clone)]
struct Injected {
    method: Method,
    path: String,
    status: u16,
    message: Option<String>,
}

#[derive(Debug)]
struct Delayed {
    method: Method,
    path: String,
    delay: Duration,
}

#[derive(Debug, Default)]
struct ServerState {
    accounts: Vec<Account>,
    session: Option<String>,
    tasks: Vec<StoredTask>,
    reset_tokens: HashMap<String, String>,
    requests: Vec<String>,
    injected: Vec<Injected>,
    delayed: Vec<Delayed>,
    offline: bool,
    next_id: u64,
}

impl ServerState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }
}

/// In-memory stand-in for the task tracker API. The "cookie" is a single
/// logged-in account id, shared by every client of this server.
#[derive(Debug, Default)]
pub struct FakeServer {
    state: Mutex<ServerState>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_user(&self, username: &str, email: &str, password: &str) -> String {
        let mut state = self.state.lock();
        let id = state.next_id("u");
        state.accounts.push(Account {
            id: id.clone(),
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        });
        id
    }

    /// Pretends a valid session cookie is already in the jar.
    pub fn sign_in(&self, user_id: &str) {
        self.state.lock().session = Some(user_id.to_string());
    }

    pub fn session_user(&self) -> Option<String> {
        self.state.lock().session.clone()
    }

    pub fn seed_task(&self, owner: &str, fields: Value) -> String {
        let mut state = self.state.lock();
        let id = state.next_id("t");
        let mut doc = json!({
            "_id": id,
            "title": "",
            "description": "",
            "dueDate": null,
            "priority": "medium",
            "completed": false,
            "completedAt": null,
        });
        merge(&mut doc, &fields);
        state.tasks.push(StoredTask {
            owner: owner.to_string(),
            doc,
        });
        id
    }

    pub fn tasks_of(&self, owner: &str) -> Vec<Value> {
        self.state
            .lock()
            .tasks
            .iter()
            .filter(|task| task.owner == owner)
            .map(|task| task.doc.clone())
            .collect()
    }

    pub fn issue_reset_token(&self, email: &str) -> Option<String> {
        let mut state = self.state.lock();
        let user_id = state
            .accounts
            .iter()
            .find(|account| account.email == email)?
            .id
            .clone();
        let token = state.next_id("reset-");
        state.reset_tokens.insert(token.clone(), user_id);
        Some(token)
    }

    /// The next request matching `method` and exact `path` gets `status`.
    pub fn fail_next(&self, method: Method, path: &str, status: u16, message: Option<&str>) {
        self.state.lock().injected.push(Injected {
            method,
            path: path.to_string(),
            status,
            message: message.map(str::to_string),
        });
    }

    /// Holds the next matching response back for `delay`. The response is
    /// computed when the request arrives, so it reflects the state of that
    /// moment.
    pub fn delay_next(&self, method: Method, path: &str, delay: Duration) {
        self.state.lock().delayed.push(Delayed {
            method,
            path: path.to_string(),
            delay,
        });
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// `"METHOD /path"` for every request seen, in order.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    fn route(state: &mut ServerState, request: &ApiRequest) -> (u16, Value) {
        let body = request.body.clone().unwrap_or(Value::Null);
        let segments: Vec<String> = request
            .path
            .trim_start_matches('/')
            .split('/')
            .map(|part| {
                urlencoding::decode(part)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| part.to_string())
            })
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        match (request.method, segments.as_slice()) {
            (Method::Get, ["auth", "me"]) => match current_account(state) {
                Some(account) => (200, json!({ "data": { "user": account.public() } })),
                None => unauthorized(),
            },
            (Method::Post, ["auth", "login"]) => {
                let email = str_field(&body, "email");
                let password = str_field(&body, "password");
                let found = state
                    .accounts
                    .iter()
                    .find(|a| a.email == email && a.password == password)
                    .cloned();
                match found {
                    Some(account) => {
                        state.session = Some(account.id.clone());
                        (
                            200,
                            json!({
                                "message": "Login successful",
                                "data": { "user": account.public() }
                            }),
                        )
                    }
                    None => (401, json!({ "message": "Invalid credentials" })),
                }
            }
            (Method::Post, ["auth", "register"]) => {
                let email = str_field(&body, "email");
                if state.accounts.iter().any(|a| a.email == email) {
                    return (400, json!({ "message": "User already exists" }));
                }
                let account = Account {
                    id: state.next_id("u"),
                    username: str_field(&body, "username"),
                    email,
                    password: str_field(&body, "password"),
                };
                state.session = Some(account.id.clone());
                let user = account.public();
                state.accounts.push(account);
                (
                    201,
                    json!({ "message": "User registered successfully", "data": { "user": user } }),
                )
            }
            (Method::Post, ["auth", "logout"]) => {
                state.session = None;
                (200, json!({ "message": "Logged out successfully" }))
            }
            (Method::Get, ["auth", "clear-cache"]) => (200, json!({ "message": "Cache cleared" })),
            (Method::Post, ["auth", "forgot-password"]) => {
                let email = str_field(&body, "email");
                let Some(user_id) = state
                    .accounts
                    .iter()
                    .find(|a| a.email == email)
                    .map(|a| a.id.clone())
                else {
                    return (404, json!({ "message": "There is no user with that email" }));
                };
                let token = state.next_id("reset-");
                state.reset_tokens.insert(token, user_id);
                (200, json!({ "message": "Password reset link sent to your email" }))
            }
            (Method::Get, ["auth", "check-token", token]) => {
                if state.reset_tokens.contains_key(*token) {
                    (200, json!({ "message": "Token is valid" }))
                } else {
                    (400, json!({ "message": "Token is invalid or has expired" }))
                }
            }
            (Method::Patch, ["auth", "reset-password", token]) => {
                let Some(user_id) = state.reset_tokens.remove(*token) else {
                    return (400, json!({ "message": "Token is invalid or has expired" }));
                };
                let password = str_field(&body, "password");
                if let Some(account) = state.accounts.iter_mut().find(|a| a.id == user_id) {
                    account.password = password;
                }
                (200, json!({ "message": "Password has been reset" }))
            }
            (_, ["tasks", ..]) => {
                let Some(owner) = state.session.clone() else {
                    return (401, json!({ "message": "Not authorized, no token" }));
                };
                route_tasks(state, &owner, request, &segments[1..], &body)
            }
            _ => (404, json!({ "message": format!("Cannot {} {}", request.method, request.path) })),
        }
    }
}

#[async_trait]
impl HttpBackend for FakeServer {
    async fn execute(&self, request: &ApiRequest) -> Result<HttpResponse, ApiError> {
        let (response, delay) = {
            let mut state = self.state.lock();
            let delay = state
                .delayed
                .iter()
                .position(|d| d.method == request.method && d.path == request.path)
                .map(|pos| state.delayed.remove(pos).delay);
            (FakeServer::answer(&mut state, request), delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        response
    }
}

impl FakeServer {
    fn answer(state: &mut ServerState, request: &ApiRequest) -> Result<HttpResponse, ApiError> {
        state
            .requests
            .push(format!("{} {}", request.method, request.path));

        if state.offline {
            return Err(ApiError::Network("connection refused".to_string()));
        }

        if let Some(pos) = state
            .injected
            .iter()
            .position(|i| i.method == request.method && i.path == request.path)
        {
            let injected = state.injected.remove(pos);
            let body = match injected.message {
                Some(message) => json!({ "message": message }),
                None => json!({}),
            };
            return Ok(respond(injected.status, &body));
        }

        let (status, body) = FakeServer::route(state, request);
        Ok(respond(status, &body))
    }
}

fn route_tasks(
    state: &mut ServerState,
    owner: &str,
    request: &ApiRequest,
    rest: &[&str],
    body: &Value,
) -> (u16, Value) {
    match (request.method, rest) {
        (Method::Get, []) => {
            let query: HashMap<&str, &str> = request
                .query
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            let data: Vec<Value> = state
                .tasks
                .iter()
                .filter(|task| task.owner == owner)
                .map(|task| task.doc.clone())
                .filter(|doc| {
                    query
                        .get("completed")
                        .is_none_or(|want| doc["completed"].as_bool() == Some(*want == "true"))
                })
                .filter(|doc| {
                    query
                        .get("priority")
                        .is_none_or(|want| doc["priority"].as_str() == Some(*want))
                })
                .filter(|doc| {
                    query.get("search").is_none_or(|want| {
                        doc["title"]
                            .as_str()
                            .is_some_and(|title| title.to_lowercase().contains(&want.to_lowercase()))
                    })
                })
                .collect();
            (200, json!({ "data": data }))
        }
        (Method::Post, []) => {
            let title = str_field(body, "title");
            if title.trim().is_empty() {
                return (400, json!({ "message": "Title is required" }));
            }
            let id = state.next_id("t");
            let mut doc = json!({
                "_id": id,
                "title": title,
                "description": body.get("description").cloned().unwrap_or(json!("")),
                "dueDate": body.get("dueDate").cloned().unwrap_or(Value::Null),
                "priority": body.get("priority").cloned().unwrap_or(json!("medium")),
                "completed": false,
                "completedAt": null,
                "createdAt": Utc::now().to_rfc3339(),
            });
            if let Some(fields) = doc.as_object_mut() {
                fields.insert("user".to_string(), json!(owner));
            }
            state.tasks.push(StoredTask {
                owner: owner.to_string(),
                doc: doc.clone(),
            });
            (201, json!({ "message": "Task created", "data": doc }))
        }
        (Method::Put, [id]) => {
            let Some(task) = find_task(state, owner, id) else {
                return not_found();
            };
            let mut patch = body.clone();
            if let Some(fields) = patch.as_object_mut() {
                fields.remove("_id");
                fields.remove("completedAt");
            }
            merge(&mut task.doc, &patch);
            if body.get("completed").is_some() {
                sync_completed_at(&mut task.doc);
            }
            (200, json!({ "message": "Task updated", "data": task.doc.clone() }))
        }
        (Method::Put, [id, "toggle-complete"]) => {
            let Some(task) = find_task(state, owner, id) else {
                return not_found();
            };
            let completed = task.doc["completed"].as_bool().unwrap_or(false);
            task.doc["completed"] = json!(!completed);
            sync_completed_at(&mut task.doc);
            (200, json!({ "data": task.doc.clone() }))
        }
        (Method::Delete, [id]) => {
            let before = state.tasks.len();
            state
                .tasks
                .retain(|task| !(task.owner == owner && task.doc["_id"] == json!(id)));
            if state.tasks.len() == before {
                return not_found();
            }
            (200, json!({ "message": "Task deleted" }))
        }
        _ => (404, json!({ "message": "Not found" })),
    }
}

fn find_task<'a>(state: &'a mut ServerState, owner: &str, id: &str) -> Option<&'a mut StoredTask> {
    state
        .tasks
        .iter_mut()
        .find(|task| task.owner == owner && task.doc["_id"] == json!(id))
}

fn sync_completed_at(doc: &mut Value) {
    let completed = doc["completed"].as_bool().unwrap_or(false);
    doc["completedAt"] = if completed {
        json!(Utc::now().to_rfc3339())
    } else {
        Value::Null
    };
}

fn current_account(state: &ServerState) -> Option<Account> {
    let id = state.session.as_ref()?;
    state.accounts.iter().find(|a| &a.id == id).cloned()
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn str_field(body: &Value, key: &str) -> String {
    body.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn unauthorized() -> (u16, Value) {
    (401, json!({ "message": "Not authenticated" }))
}

fn not_found() -> (u16, Value) {
    (404, json!({ "message": "Task not found" }))
}

fn respond(status: u16, body: &Value) -> HttpResponse {
    HttpResponse {
        status,
        body: serde_json::to_vec(body).unwrap_or_default(),
    }
}

/// Everything a screen needs, wired against one fake server.
pub struct Harness {
    pub server: Arc<FakeServer>,
    pub history: Arc<BrowserHistory>,
    pub preferences: Arc<MemoryPreferenceStore>,
    pub client: Arc<ApiClient>,
    pub session: Arc<SessionManager>,
    pub tasks: Arc<TaskController>,
}

pub fn harness(server: &Arc<FakeServer>, start: &str) -> Harness {
    let history = Arc::new(BrowserHistory::new(start));
    let preferences = Arc::new(MemoryPreferenceStore::new());
    let client = Arc::new(ApiClient::new(
        server.clone(),
        UnauthorizedPolicy::new(history.clone()),
    ));
    let session = Arc::new(SessionManager::new(
        client.clone(),
        history.clone(),
        preferences.clone(),
    ));
    let tasks = Arc::new(TaskController::new(client.clone()));

    Harness {
        server: server.clone(),
        history,
        preferences,
        client,
        session,
        tasks,
    }
}

/// Task fields with a due date, as the create form would send them.
pub fn fields(title: &str, priority: &str) -> Value {
    json!({ "title": title, "priority": priority, "dueDate": "2030-01-01T00:00:00Z" })
}
