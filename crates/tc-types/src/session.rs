use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persistent metadata for one chat-driven agent session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    /// The agent's own session id, captured from its `init` event.
    pub correlation_id: Option<String>,
    /// Chat user that owns the session.
    pub owner: i64,
    pub project_path: String,
    pub project_name: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub total_cost_usd: f64,
    pub status: SessionStatus,
}

impl SessionRecord {
    pub fn new(owner: i64, project_path: impl Into<String>, project_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            correlation_id: None,
            owner,
            project_path: project_path.into(),
            project_name: project_name.into(),
            created_at: now,
            last_active: now,
            total_cost_usd: 0.0,
            status: SessionStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn mark_active(&mut self) {
        self.status = SessionStatus::Active;
        self.last_active = Utc::now();
    }

    pub fn mark_idle(&mut self) {
        self.status = SessionStatus::Idle;
        self.last_active = Utc::now();
    }

    pub fn add_cost(&mut self, cost: f64) {
        self.total_cost_usd += cost;
        self.last_active = Utc::now();
    }

    /// First eight characters of the id, for display.
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }
}

/// 16 hex characters, random.
pub fn generate_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Idle,
    /// The agent's output closed without a completion.
    Interrupted,
    Archived,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Idle => write!(f, "idle"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "idle" => Ok(Self::Idle),
            "interrupted" => Ok(Self::Interrupted),
            "archived" => Ok(Self::Archived),
            _ => Err(anyhow::anyhow!("unknown session status: {}", s)),
        }
    }
}
