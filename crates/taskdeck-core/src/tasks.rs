use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Value, json};
use taskdeck_shared::{Envelope, Priority, Task, TaskDraft, TaskPatch};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::error::ApiError;
use crate::transport::{ApiClient, ApiRequest, segment};

const FETCH_FALLBACK: &str = "Failed to fetch tasks";
const CREATE_FALLBACK: &str = "Failed to create task";
const UPDATE_FALLBACK: &str = "Failed to update task";
const TOGGLE_FALLBACK: &str = "Failed to toggle task completion";
const DELETE_FALLBACK: &str = "Failed to delete task";

/// A failed task operation: the message to show plus the underlying cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SyncError {
    pub message: String,
    #[source]
    pub source: ApiError,
}

impl SyncError {
    fn new(source: ApiError, fallback: &str) -> Self {
        Self {
            message: source.user_message(fallback),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Pending,
    Completed,
}

impl StatusFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusFilter::All => "all",
            StatusFilter::Pending => "pending",
            StatusFilter::Completed => "completed",
        }
    }

    fn matches(self, task: &Task) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Pending => !task.completed,
            StatusFilter::Completed => task.completed,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(StatusFilter::All),
            "pending" => Ok(StatusFilter::Pending),
            "completed" | "done" => Ok(StatusFilter::Completed),
            other => Err(format!("unknown status filter: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriorityFilter {
    #[default]
    All,
    Only(Priority),
}

impl PriorityFilter {
    fn matches(self, task: &Task) -> bool {
        match self {
            PriorityFilter::All => true,
            PriorityFilter::Only(priority) => task.priority == priority,
        }
    }
}

impl fmt::Display for PriorityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityFilter::All => f.write_str("all"),
            PriorityFilter::Only(priority) => f.write_str(priority.as_str()),
        }
    }
}

impl FromStr for PriorityFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(PriorityFilter::All);
        }
        s.parse::<Priority>().map(PriorityFilter::Only)
    }
}

/// Local-only view parameters. Never sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskFilter {
    pub search_term: String,
    pub status: StatusFilter,
    pub priority: PriorityFilter,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        matches_search(task, &self.search_term)
            && self.status.matches(task)
            && self.priority.matches(task)
    }

    pub fn is_default(&self) -> bool {
        self == &TaskFilter::default()
    }
}

fn matches_search(task: &Task, term: &str) -> bool {
    let needle = term.to_lowercase();
    if needle.is_empty() {
        return true;
    }

    task.title.to_lowercase().contains(&needle)
        || task
            .description
            .as_deref()
            .is_some_and(|description| description.to_lowercase().contains(&needle))
}

/// Server-side filter parameters accepted by `GET /tasks`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerTaskQuery {
    pub completed: Option<bool>,
    pub priority: Option<Priority>,
    pub search: Option<String>,
}

impl ServerTaskQuery {
    fn apply(&self, mut request: ApiRequest) -> ApiRequest {
        if let Some(completed) = self.completed {
            request = request.with_query("completed", completed.to_string());
        }
        if let Some(priority) = self.priority {
            request = request.with_query("priority", priority.as_str());
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            request = request.with_query("search", search);
        }
        request
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueLabel {
    NoDueDate,
    Today,
    Overdue,
    On(NaiveDate),
}

impl DueLabel {
    pub fn for_task(task: &Task, now: DateTime<Utc>, tz: Tz) -> Self {
        let Some(due) = task.due_date else {
            return DueLabel::NoDueDate;
        };

        let today = now.with_timezone(&tz).date_naive();
        let due_day = due.with_timezone(&tz).date_naive();

        if due_day == today {
            DueLabel::Today
        } else if due_day < today {
            DueLabel::Overdue
        } else {
            DueLabel::On(due_day)
        }
    }
}

impl fmt::Display for DueLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DueLabel::NoDueDate => f.write_str("No due date"),
            DueLabel::Today => f.write_str("Today"),
            DueLabel::Overdue => f.write_str("Overdue"),
            DueLabel::On(day) => write!(f, "{}", day.format("%b %-d, %Y")),
        }
    }
}

/// Whether the due date should be highlighted as overdue. Completed tasks
/// never are.
pub fn is_overdue_styled(task: &Task, now: DateTime<Utc>) -> bool {
    !task.completed && task.due_date.is_some_and(|due| due < now)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewTask<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    due_date: DateTime<Utc>,
    priority: Priority,
}

fn validate_draft(draft: &TaskDraft) -> Result<NewTask<'_>, ApiError> {
    let title = draft.title.trim();
    if title.is_empty() {
        return Err(ApiError::InvalidInput {
            message: "Title is required".to_string(),
        });
    }

    let due_date = draft.due_date.ok_or_else(|| ApiError::InvalidInput {
        message: "Due date is required".to_string(),
    })?;

    Ok(NewTask {
        title,
        description: draft.description.as_deref().filter(|d| !d.trim().is_empty()),
        due_date,
        priority: draft.priority.unwrap_or_default(),
    })
}

/// Owns the local task cache. Every mutation goes to the server first and
/// the cache only ever holds what the server returned.
pub struct TaskController {
    client: Arc<ApiClient>,
    cache: RwLock<Vec<Task>>,
    last_error: Mutex<Option<String>>,
}

impl TaskController {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            cache: RwLock::new(vec![]),
            last_error: Mutex::new(None),
        }
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.cache.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.cache.read().iter().find(|task| task.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        *self.last_error.lock() = Some(message.into());
    }

    pub fn clear_error(&self) {
        *self.last_error.lock() = None;
    }

    /// Drops everything held for the previous user.
    pub fn reset(&self) {
        self.cache.write().clear();
        self.clear_error();
    }

    /// Derived view in cache order. Recomputed on every call.
    pub fn view(&self, filter: &TaskFilter) -> Vec<Task> {
        self.cache
            .read()
            .iter()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect()
    }

    fn fail(&self, source: ApiError, fallback: &str) -> SyncError {
        let err = SyncError::new(source, fallback);
        warn!(error = %err.source, message = %err.message, "task operation failed");
        self.set_error(err.message.clone());
        err
    }

    pub async fn list(&self) -> Result<Vec<Task>, SyncError> {
        self.list_with(&ServerTaskQuery::default()).await
    }

    /// Replaces the cache wholesale. Concurrent refreshes are not
    /// deduplicated; whichever settles last is what the cache holds.
    #[instrument(skip(self))]
    pub async fn list_with(&self, query: &ServerTaskQuery) -> Result<Vec<Task>, SyncError> {
        let request = query.apply(ApiRequest::get("/tasks"));
        let envelope = self
            .client
            .send(request)
            .await
            .map_err(|err| self.fail(err, FETCH_FALLBACK))?;

        let tasks = decode_tasks(envelope).map_err(|err| self.fail(err, FETCH_FALLBACK))?;

        *self.cache.write() = tasks.clone();
        self.clear_error();
        debug!(count = tasks.len(), "task cache replaced");
        Ok(tasks)
    }

    /// Creates on the server, then refreshes the whole list. A failed
    /// refresh is recorded in the error slot but does not undo the create.
    #[instrument(skip(self, draft), fields(title_len = draft.title.len()))]
    pub async fn create(&self, draft: &TaskDraft) -> Result<Task, SyncError> {
        let body = validate_draft(draft).map_err(|err| self.fail(err, CREATE_FALLBACK))?;
        let payload = serde_json::to_value(&body)
            .map_err(|err| self.fail(ApiError::Malformed(err.to_string()), CREATE_FALLBACK))?;

        let envelope = self
            .client
            .send(ApiRequest::post("/tasks").with_body(payload))
            .await
            .map_err(|err| self.fail(err, CREATE_FALLBACK))?;
        let created = decode_task(envelope).map_err(|err| self.fail(err, CREATE_FALLBACK))?;
        info!(task_id = %created.id, "task created");

        if let Err(err) = self.list().await {
            warn!(error = %err, "refresh after create failed");
        }
        Ok(created)
    }

    /// Partial update. The returned task replaces the cached entry in place
    /// without a full refresh.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: &str, patch: &TaskPatch) -> Result<Task, SyncError> {
        if self.get(id).is_none() {
            return Err(self.fail(
                ApiError::NotFound {
                    message: Some("Task not found".to_string()),
                },
                UPDATE_FALLBACK,
            ));
        }

        let payload = serde_json::to_value(patch)
            .map_err(|err| self.fail(ApiError::Malformed(err.to_string()), UPDATE_FALLBACK))?;
        let request = ApiRequest::put(format!("/tasks/{}", segment(id))).with_body(payload);

        let envelope = self
            .client
            .send(request)
            .await
            .map_err(|err| self.fail(err, UPDATE_FALLBACK))?;
        let updated = decode_task(envelope).map_err(|err| self.fail(err, UPDATE_FALLBACK))?;

        self.replace(updated.clone());
        Ok(updated)
    }

    /// Sets the completion flag only; the server derives `completedAt`.
    pub async fn set_completed(&self, id: &str, completed: bool) -> Result<Task, SyncError> {
        let patch = TaskPatch {
            completed: Some(completed),
            ..TaskPatch::default()
        };
        self.update(id, &patch).await
    }

    #[instrument(skip(self))]
    pub async fn toggle_complete(&self, id: &str) -> Result<Task, SyncError> {
        let request =
            ApiRequest::put(format!("/tasks/{}/toggle-complete", segment(id))).with_body(json!({}));

        let envelope = self
            .client
            .send(request)
            .await
            .map_err(|err| self.fail(err, TOGGLE_FALLBACK))?;
        let toggled = decode_task(envelope).map_err(|err| self.fail(err, TOGGLE_FALLBACK))?;

        self.replace(toggled.clone());
        Ok(toggled)
    }

    /// Removes the entry only after the server confirms the delete.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.client
            .send(ApiRequest::delete(format!("/tasks/{}", segment(id))))
            .await
            .map_err(|err| self.fail(err, DELETE_FALLBACK))?;

        let removed = {
            let mut cache = self.cache.write();
            let before = cache.len();
            cache.retain(|task| task.id != id);
            before - cache.len()
        };
        info!(task_id = %id, removed, "task deleted");
        Ok(())
    }

    fn replace(&self, task: Task) {
        if !task.completion_consistent() {
            warn!(task_id = %task.id, "server returned task with inconsistent completion fields");
        }

        let mut cache = self.cache.write();
        match cache.iter_mut().find(|cached| cached.id == task.id) {
            Some(slot) => *slot = task,
            None => debug!(task_id = %task.id, "updated task no longer cached; ignoring"),
        }
    }
}

fn decode_task(envelope: Envelope) -> Result<Task, ApiError> {
    let data = envelope
        .data
        .ok_or_else(|| ApiError::Malformed("response carries no task".to_string()))?;
    serde_json::from_value(data).map_err(|err| ApiError::Malformed(err.to_string()))
}

fn decode_tasks(envelope: Envelope) -> Result<Vec<Task>, ApiError> {
    match envelope.data {
        None | Some(Value::Null) => Ok(vec![]),
        Some(data) => {
            serde_json::from_value(data).map_err(|err| ApiError::Malformed(err.to_string()))
        }
    }
}
