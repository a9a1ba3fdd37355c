use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

use tc_types::config::TcConfig;

/// Environment variable that relocates the home directory.
pub const HOME_ENV: &str = "TELECLAUDE_HOME";

/// Environment variable that overrides `telegram.bot_token`.
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Returns the teleclaude home directory ($TELECLAUDE_HOME or ~/.teleclaude/)
pub fn tc_home() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(".teleclaude"))
        .ok_or_else(|| anyhow!("Could not determine home directory"))
}

/// Returns the path to the config file (~/.teleclaude/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(tc_home()?.join("config.toml"))
}

/// Returns the database path (~/.teleclaude/sessions.db)
pub fn db_path() -> Result<PathBuf> {
    Ok(tc_home()?.join("sessions.db"))
}

/// Load config from disk, creating default if it doesn't exist.
pub fn load_config() -> Result<TcConfig> {
    let path = config_path()?;

    let mut config = if !path.exists() {
        let home = tc_home()?;
        std::fs::create_dir_all(&home)
            .with_context(|| format!("Failed to create {}", home.display()))?;

        let default = TcConfig::default();
        let toml_str = toml::to_string_pretty(&default)
            .context("Failed to serialize default config")?;
        std::fs::write(&path, &toml_str)
            .with_context(|| format!("Failed to write default config to {}", path.display()))?;
        tracing::info!("Wrote default config to {}", path.display());
        default
    } else {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?
    };

    apply_env(&mut config, std::env::var(BOT_TOKEN_ENV).ok());
    Ok(config)
}

fn apply_env(config: &mut TcConfig, bot_token: Option<String>) {
    if let Some(token) = bot_token.filter(|t| !t.trim().is_empty()) {
        config.telegram.bot_token = Some(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrips() {
        let config = TcConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: TcConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.agent.max_turns, 50);
        assert_eq!(parsed.agent.permission_mode, "acceptEdits");
        assert_eq!(parsed.streaming.chunk_size, 3800);
        assert_eq!(parsed.approval.dangerous_patterns, config.approval.dangerous_patterns);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let parsed: TcConfig = toml::from_str(
            r#"
            [agent]
            executable = "claude"
            max_turns = 10
            permission_mode = "default"

            [approval]
            require_for = ["Write"]

            [streaming]
            edit_throttle_ms = 500
            chunk_size = 1000

            [telegram]
            allowed_users = [42]

            [gateway]
            log_level = "debug"

            [projects]
            web = "/srv/web"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.agent.stop_grace_secs, 10);
        assert_eq!(parsed.approval.timeout_secs, 300);
        assert!(!parsed.approval.dangerous_patterns.is_empty());
        assert!(parsed.telegram.is_user_allowed(42));
        assert!(!parsed.telegram.is_user_allowed(7));
        assert_eq!(parsed.projects.get("web").map(String::as_str), Some("/srv/web"));
    }

    #[test]
    fn env_token_overrides_file() {
        let mut config = TcConfig::default();
        config.telegram.bot_token = Some("from-file".into());
        apply_env(&mut config, Some("from-env".into()));
        assert_eq!(config.telegram.bot_token.as_deref(), Some("from-env"));

        apply_env(&mut config, Some("  ".into()));
        assert_eq!(config.telegram.bot_token.as_deref(), Some("from-env"));
        apply_env(&mut config, None);
        assert_eq!(config.telegram.bot_token.as_deref(), Some("from-env"));
    }
}
