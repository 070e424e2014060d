use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[allow(dead_code)]
pub struct AuditLogResponse {
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[allow(dead_code)]
pub struct Pagination {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

// Only id, action, actor and target are interpreted; the rest is carried for logging.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[allow(dead_code)]
pub struct Event {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub crud: Option<String>,
    #[serde(default)]
    pub is_failure: Option<bool>,
    #[serde(default, rename = "received")]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub actor: Actor,
    #[serde(default)]
    pub is_anonymous: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub target: Target,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[allow(dead_code)]
pub struct Actor {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[allow(dead_code)]
pub struct Target {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + serde::Deserialize<'de>,
{
    let value: Option<T> = serde::Deserialize::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

impl Event {
    pub fn kind(&self) -> Action {
        Action::from(self.action.as_str())
    }
}

/// The audit actions this service knows how to describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ImpersonationStart,
    ImpersonationEnd,
    UserCreate,
    UserDelete,
    UserUpdate,
    Unknown(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::ImpersonationStart => "user.impersonation.start",
            Action::ImpersonationEnd => "user.impersonation.end",
            Action::UserCreate => "user.create",
            Action::UserDelete => "user.delete",
            Action::UserUpdate => "user.update",
            Action::Unknown(raw) => raw,
        }
    }
}

impl From<&str> for Action {
    fn from(raw: &str) -> Self {
        match raw {
            "user.impersonation.start" => Action::ImpersonationStart,
            "user.impersonation.end" => Action::ImpersonationEnd,
            "user.create" => Action::UserCreate,
            "user.delete" => Action::UserDelete,
            "user.update" => Action::UserUpdate,
            other => Action::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
