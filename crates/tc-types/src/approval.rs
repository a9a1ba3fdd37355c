use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a pending approval, safe to hand to presentation code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalRequestInfo {
    pub id: String,
    pub session_key: String,
    pub tool_name: String,
    pub reason: String,
    pub command: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a gated tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Denied,
}

impl Decision {
    pub fn from_approved(approved: bool) -> Self {
        if approved {
            Self::Approved
        } else {
            Self::Denied
        }
    }

    /// Token written to the agent's terminal, matching its own y/n prompt.
    pub fn input_token(self) -> &'static str {
        match self {
            Self::Approved => "y",
            Self::Denied => "n",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::Denied => write!(f, "denied"),
        }
    }
}
