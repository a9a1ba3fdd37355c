use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::{info, warn};

use tc_gateway::channels::telegram::TelegramClient;
use tc_gateway::config::{self, BOT_TOKEN_ENV};
use tc_gateway::{ChatBridge, Database, MemoryStore, SessionCoordinator, SessionManager, SessionStore, SessionUpdate};

#[derive(Parser)]
#[command(name = "teleclaude", version, about = "teleclaude — drive Claude Code from Telegram")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Telegram bot (default)
    Serve,
    /// Run one prompt in a project from this terminal
    Run {
        /// Project directory the agent works in
        #[arg(long, default_value = ".")]
        project: PathBuf,
        /// Keep the session in memory only
        #[arg(long)]
        ephemeral: bool,
        prompt: String,
    },
    /// List stored sessions
    Sessions {
        /// Only show sessions owned by this chat user
        #[arg(long)]
        user: Option<i64>,
    },
    /// Show current status
    Status,
}

/// Owner id used for sessions started from the terminal.
const LOCAL_OWNER: i64 = 0;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.gateway.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(cfg).await,
        Commands::Run {
            project,
            ephemeral,
            prompt,
        } => run(cfg, project, ephemeral, &prompt).await,
        Commands::Sessions { user } => {
            let db = Database::open(&config::db_path()?)?;
            let sessions = match user {
                Some(owner) => db.list_by_owner(owner)?,
                None => db.list_all()?,
            };
            if sessions.is_empty() {
                println!("No sessions.");
            }
            for s in sessions {
                println!(
                    "{}  {:<11} ${:<8.4} {:<20} {}",
                    s.short_id(),
                    s.status.to_string(),
                    s.total_cost_usd,
                    s.project_name,
                    s.last_active.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
        Commands::Status => {
            println!("teleclaude v{}", env!("CARGO_PKG_VERSION"));
            println!("Agent: {}", cfg.agent.executable);
            println!("Max turns: {}", cfg.agent.max_turns);
            println!("Permission mode: {}", cfg.agent.permission_mode);
            println!(
                "Bot token: {}",
                if cfg.telegram.bot_token.is_some() { "configured" } else { "not set" }
            );
            println!("Allowed users: {}", cfg.telegram.allowed_users.len());
            println!("Projects: {}", cfg.projects.len());
            println!("Config: {}", config::config_path()?.display());
            println!("Database: {}", config::db_path()?.display());
            Ok(())
        }
    }
}

async fn serve(cfg: tc_types::config::TcConfig) -> Result<()> {
    let token = cfg
        .telegram
        .bot_token
        .clone()
        .ok_or_else(|| anyhow!("No bot token: set {BOT_TOKEN_ENV} or telegram.bot_token"))?;
    if cfg.telegram.allowed_users.is_empty() {
        warn!("telegram.allowed_users is empty; every message will be ignored");
    }

    let store: Arc<dyn SessionStore> = Arc::new(Database::open(&config::db_path()?)?);
    let sessions = Arc::new(SessionManager::new(store));
    let coordinator = SessionCoordinator::from_config(sessions.clone(), &cfg);

    let telegram = TelegramClient::new(token);
    let inbound = telegram.start_polling(cfg.telegram.clone());
    let bridge = ChatBridge::new(coordinator.clone(), Arc::new(telegram), &cfg);

    info!("teleclaude serving {} project(s)", cfg.projects.len());
    tokio::select! {
        _ = bridge.run(inbound) => {}
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for ctrl-c")?;
            info!("Shutting down");
        }
    }

    coordinator.shutdown_all().await;
    let idled = sessions.mark_all_idle()?;
    info!("Marked {idled} session(s) idle");
    Ok(())
}

async fn run(
    cfg: tc_types::config::TcConfig,
    project: PathBuf,
    ephemeral: bool,
    prompt: &str,
) -> Result<()> {
    let project = project
        .canonicalize()
        .with_context(|| format!("Project not found: {}", project.display()))?;
    let store: Arc<dyn SessionStore> = if ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(Database::open(&config::db_path()?)?)
    };
    let sessions = Arc::new(SessionManager::new(store));
    let coordinator = SessionCoordinator::from_config(sessions.clone(), &cfg);

    let path = project.to_string_lossy().into_owned();
    let session = match sessions.active_session(LOCAL_OWNER)? {
        Some(s) if s.project_path == path => s,
        _ => {
            let name = project
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            sessions.create_session(LOCAL_OWNER, &path, &name)?
        }
    };

    let mut updates = coordinator.start(&session.id, prompt).await?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let update = tokio::select! {
            update = updates.recv() => match update {
                Some(update) => update,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupting...");
                coordinator.cancel(&session.id).await;
                continue;
            }
        };
        match update {
            SessionUpdate::Chunk(text) => println!("{text}"),
            SessionUpdate::ApprovalRequested { request, prompt } => {
                println!("\n{prompt}\nApprove? [y/N] ");
                let interrupt = async {
                    let _ = tokio::signal::ctrl_c().await;
                };
                match ask(&mut stdin, interrupt).await? {
                    Some(true) => {
                        coordinator.approve(&request.id);
                    }
                    Some(false) => {
                        coordinator.deny(&request.id);
                    }
                    None => {
                        eprintln!("Interrupting...");
                        coordinator.cancel(&session.id).await;
                    }
                }
            }
            SessionUpdate::ApprovalResolved { timed_out: true, .. } => {
                println!("⏰ Approval timed out. Operation denied.");
            }
            SessionUpdate::ApprovalResolved { .. } => {}
            SessionUpdate::Finished {
                cost_usd,
                interrupted,
            } => {
                if interrupted {
                    println!("\n⚠️ Interrupted (session {})", session.short_id());
                } else {
                    println!("\n✅ Done · ${cost_usd:.4} (session {})", session.short_id());
                }
                break;
            }
        }
    }
    Ok(())
}

/// Read a y/N answer. `None` when `interrupt` fires before a line arrives.
async fn ask<R>(lines: &mut Lines<R>, interrupt: impl Future<Output = ()>) -> Result<Option<bool>>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        line = lines.next_line() => {
            let answer = line.context("Failed to read answer")?.unwrap_or_default();
            Ok(Some(answer.trim().eq_ignore_ascii_case("y")))
        }
        _ = interrupt => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;

    #[tokio::test]
    async fn answer_is_read_from_the_terminal() {
        let mut lines = BufReader::new(&b"y\n"[..]).lines();
        assert_eq!(ask(&mut lines, pending()).await.unwrap(), Some(true));

        let mut lines = BufReader::new(&b"nope\n"[..]).lines();
        assert_eq!(ask(&mut lines, pending()).await.unwrap(), Some(false));

        // End of input denies.
        let mut lines = BufReader::new(&b""[..]).lines();
        assert_eq!(ask(&mut lines, pending()).await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn interrupt_ends_a_pending_question() {
        let (_keep_open, reader) = tokio::io::duplex(64);
        let mut lines = BufReader::new(reader).lines();
        assert_eq!(ask(&mut lines, async {}).await.unwrap(), None);
    }
}
