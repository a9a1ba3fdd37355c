use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcConfig {
    pub agent: AgentConfig,
    pub approval: ApprovalConfig,
    pub streaming: StreamingConfig,
    pub telegram: TelegramConfig,
    pub gateway: GatewayConfig,
    /// Project name → absolute path on this machine.
    #[serde(default)]
    pub projects: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent executable, resolved through `PATH`.
    pub executable: String,
    pub max_turns: u32,
    pub permission_mode: String,
    /// Seconds to wait after an interrupt before killing the process group.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Tool names that always need a human decision.
    #[serde(default)]
    pub require_for: Vec<String>,
    /// Substrings that gate a shell command (matched case-insensitively).
    /// An explicit empty list turns pattern gating off.
    #[serde(default = "default_dangerous_patterns")]
    pub dangerous_patterns: Vec<String>,
    #[serde(default = "default_approval_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub edit_throttle_ms: u64,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    /// Bot token; `TELEGRAM_BOT_TOKEN` takes priority at runtime.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Telegram user IDs allowed to talk to the bot. Empty allows nobody.
    #[serde(default)]
    pub allowed_users: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub log_level: String,
}

fn default_stop_grace() -> u64 {
    10
}

fn default_approval_timeout() -> u64 {
    300
}

fn default_dangerous_patterns() -> Vec<String> {
    DEFAULT_DANGEROUS_PATTERNS.iter().map(|p| p.to_string()).collect()
}

impl Default for TcConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig {
                executable: "claude".to_string(),
                max_turns: 50,
                permission_mode: "acceptEdits".to_string(),
                stop_grace_secs: default_stop_grace(),
            },
            approval: ApprovalConfig {
                require_for: vec![],
                dangerous_patterns: default_dangerous_patterns(),
                timeout_secs: default_approval_timeout(),
            },
            streaming: StreamingConfig {
                edit_throttle_ms: 1000,
                chunk_size: 3800,
            },
            telegram: TelegramConfig::default(),
            gateway: GatewayConfig {
                log_level: "info".to_string(),
            },
            projects: BTreeMap::new(),
        }
    }
}

impl TelegramConfig {
    pub fn is_user_allowed(&self, user_id: i64) -> bool {
        self.allowed_users.contains(&user_id)
    }
}

/// Shell-command substrings gated out of the box.
///
/// Covers deletion, forced pushes, privilege escalation, recursive
/// permission/ownership changes, raw device writes, filesystem formatting,
/// fork bombs and pipe-to-shell downloads.
pub const DEFAULT_DANGEROUS_PATTERNS: &[&str] = &[
    "rm ",
    "rm\t",
    "rmdir",
    "unlink ",
    "shred ",
    "git push --force",
    "git push -f",
    "git push --force-with-lease",
    "git reset --hard",
    "git clean -f",
    "sudo ",
    "| sudo",
    "su -",
    "doas ",
    "chmod -r",
    "chmod 777",
    "chown -r",
    "dd if=",
    "of=/dev/",
    "> /dev/sd",
    "> /dev/nvme",
    "mkfs",
    "fdisk",
    "parted ",
    ":(){",
    "| sh",
    "| bash",
    "|sh",
    "|bash",
];
