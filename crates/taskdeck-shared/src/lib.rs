use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{
  DateTime,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};
use serde_json::Value;

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
  Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  Low,
  #[default]
  Medium,
  High
}

impl Priority {
  pub fn as_str(self) -> &'static str {
    match self {
      | Priority::Low => "low",
      | Priority::Medium => "medium",
      | Priority::High => "high"
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      | Priority::Low => "Low",
      | Priority::Medium => "Medium",
      | Priority::High => "High"
    }
  }
}

impl fmt::Display for Priority {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for Priority {
  type Err = String;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "low" | "l" => Ok(Priority::Low),
      | "medium" | "med" | "m" => {
        Ok(Priority::Medium)
      }
      | "high" | "h" => Ok(Priority::High),
      | other => Err(format!(
        "unknown priority: {other}"
      ))
    }
  }
}

/// Identity record returned by the auth endpoints.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
#[serde(try_from = "UserWire")]
pub struct User {
  pub id:       String,
  #[serde(default)]
  pub username: String,
  #[serde(default)]
  pub email:    String,
  #[serde(flatten)]
  pub extra:    BTreeMap<String, Value>
}

/// Fields merged into the current user by a local profile update.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
)]
pub struct UserPatch {
  pub username: Option<String>,
  pub email:    Option<String>,
  #[serde(default)]
  pub extra:    BTreeMap<String, Value>
}

impl User {
  pub fn merge(
    &mut self,
    patch: UserPatch
  ) {
    if let Some(username) =
      patch.username
    {
      self.username = username;
    }
    if let Some(email) = patch.email {
      self.email = email;
    }
    self.extra.extend(patch.extra);
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
#[serde(
  rename_all = "camelCase",
  try_from = "TaskWire"
)]
pub struct Task {
  pub id:           String,
  pub title:        String,
  #[serde(default)]
  pub description:  Option<String>,
  #[serde(default)]
  pub due_date:     Option<DateTime<Utc>>,
  #[serde(default)]
  pub priority:     Priority,
  #[serde(default)]
  pub completed:    bool,
  #[serde(default)]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub extra:        BTreeMap<String, Value>
}

impl Task {
  /// `completed_at` is set exactly when the task is completed.
  pub fn completion_consistent(
    &self
  ) -> bool {
    self.completed
      == self.completed_at.is_some()
  }

  pub fn status_label(
    &self
  ) -> &'static str {
    if self.completed {
      "Completed"
    } else {
      "Pending"
    }
  }
}

/// Input for creating a task. Validated client side before it is sent.
#[derive(
  Debug, Clone, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
  pub title:       String,
  pub description: Option<String>,
  pub due_date:    Option<DateTime<Utc>>,
  pub priority:    Option<Priority>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
  PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub title:       Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub description:
    Option<Option<String>>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub due_date:    Option<DateTime<Utc>>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub priority:    Option<Priority>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub completed:   Option<bool>
}

impl TaskPatch {
  pub fn is_empty(&self) -> bool {
    self == &TaskPatch::default()
  }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
  pub email:    String,
  pub password: String
}

impl fmt::Debug for Credentials {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("email", &self.email)
      .field("password", &"<redacted>")
      .finish()
  }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Registration {
  pub username: String,
  pub email:    String,
  pub password: String
}

impl fmt::Debug for Registration {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.debug_struct("Registration")
      .field("username", &self.username)
      .field("email", &self.email)
      .field("password", &"<redacted>")
      .finish()
  }
}

/// Response body shape shared by every endpoint: `{data, message}` on
/// success, `{message}` on failure.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  Default,
  PartialEq,
)]
pub struct Envelope {
  #[serde(default)]
  pub data:    Option<Value>,
  #[serde(default)]
  pub message: Option<String>
}

/// Servers send `_id`, sometimes with
/// an `id` virtual next to it. `_id`
/// wins; a bare `id` is used only when
/// `_id` is absent.
fn resolve_id(
  primary: Option<String>,
  virtual_id: Option<String>
) -> Result<String, String> {
  primary
    .or(virtual_id)
    .ok_or_else(|| {
      "missing field `_id`".to_string()
    })
}

#[derive(Deserialize)]
struct UserWire {
  #[serde(rename = "_id", default)]
  primary_id: Option<String>,
  #[serde(default)]
  id:         Option<String>,
  #[serde(default)]
  username:   String,
  #[serde(default)]
  email:      String,
  #[serde(flatten)]
  extra:      BTreeMap<String, Value>
}

impl TryFrom<UserWire> for User {
  type Error = String;

  fn try_from(
    wire: UserWire
  ) -> Result<Self, Self::Error> {
    Ok(Self {
      id:       resolve_id(
        wire.primary_id,
        wire.id
      )?,
      username: wire.username,
      email:    wire.email,
      extra:    wire.extra
    })
  }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskWire {
  #[serde(rename = "_id", default)]
  primary_id:   Option<String>,
  #[serde(default)]
  id:           Option<String>,
  title:        String,
  #[serde(default)]
  description:  Option<String>,
  #[serde(default)]
  due_date:     Option<DateTime<Utc>>,
  #[serde(default)]
  priority:     Priority,
  #[serde(default)]
  completed:    bool,
  #[serde(default)]
  completed_at: Option<DateTime<Utc>>,
  #[serde(flatten)]
  extra:        BTreeMap<String, Value>
}

impl TryFrom<TaskWire> for Task {
  type Error = String;

  fn try_from(
    wire: TaskWire
  ) -> Result<Self, Self::Error> {
    Ok(Self {
      id:           resolve_id(
        wire.primary_id,
        wire.id
      )?,
      title:        wire.title,
      description:  wire.description,
      due_date:     wire.due_date,
      priority:     wire.priority,
      completed:    wire.completed,
      completed_at: wire.completed_at,
      extra:        wire.extra
    })
  }
}
