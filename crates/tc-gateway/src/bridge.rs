//! Chat bridge — maps chat commands, messages and button presses onto the
//! session coordinator, and streams each run's updates back to the chat.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tc_types::config::{StreamingConfig, TcConfig};
use tc_types::session::{SessionRecord, SessionStatus};

use crate::channels::telegram::MAX_MESSAGE_LEN;
use crate::channels::{Button, ChatSink, Inbound, Keyboard};
use crate::coordinator::{CoordinatorError, SessionCoordinator, SessionUpdate};
use crate::presentation::split_message;

const HELP: &str = "Welcome to TeleClaude!

I'm your mobile interface to Claude Code.

Commands:
/new <project> - Start a new session
/continue - Resume last session
/sessions - List your sessions
/switch <id> - Switch to a session
/cancel - Stop the running operation
/cost - Show session costs
/help - Show this help

Just send me a message to chat with Claude in your active session.";

pub struct ChatBridge {
    coordinator: Arc<SessionCoordinator>,
    sink: Arc<dyn ChatSink>,
    /// Registered project name → path.
    projects: BTreeMap<String, String>,
    streaming: StreamingConfig,
}

impl ChatBridge {
    pub fn new(
        coordinator: Arc<SessionCoordinator>,
        sink: Arc<dyn ChatSink>,
        config: &TcConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            sink,
            projects: config.projects.clone(),
            streaming: config.streaming.clone(),
        })
    }

    /// Handle inbound events until the channel closes.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
        info!("Chat bridge running");
        while let Some(event) = inbound.recv().await {
            // A slow launch in one chat must not hold up the others.
            let bridge = self.clone();
            tokio::spawn(async move {
                if let Err(e) = bridge.handle(event).await {
                    warn!("Failed to handle chat event: {e:#}");
                }
            });
        }
        info!("Chat bridge stopped: inbound channel closed");
    }

    pub async fn handle(self: &Arc<Self>, event: Inbound) -> Result<()> {
        match event {
            Inbound::Message {
                chat_id,
                user_id,
                text,
                ..
            } => self.handle_message(chat_id, user_id, text.trim()).await,
            Inbound::Callback {
                callback_id,
                chat_id,
                user_id,
                message_id,
                data,
            } => {
                self.handle_callback(&callback_id, chat_id, user_id, message_id, &data)
                    .await
            }
        }
    }

    async fn say(&self, chat_id: i64, text: &str) -> Result<()> {
        self.sink.send(chat_id, text, None).await?;
        Ok(())
    }

    // ─── Commands ─────────────────────────────────────────────────────────

    async fn handle_message(self: &Arc<Self>, chat_id: i64, user_id: i64, text: &str) -> Result<()> {
        let Some(command) = text.strip_prefix('/') else {
            return self.prompt(chat_id, user_id, text).await;
        };
        let (name, args) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
        // Commands may be addressed as /cmd@botname in groups.
        let name = name.split('@').next().unwrap_or(name);
        let args = args.trim();
        debug!("Command /{name} from {user_id}");

        match name {
            "start" | "help" => self.say(chat_id, HELP).await,
            "new" => self.cmd_new(chat_id, user_id, args).await,
            "continue" => self.cmd_continue(chat_id, user_id).await,
            "sessions" => self.cmd_sessions(chat_id, user_id).await,
            "switch" if args.is_empty() => self.cmd_sessions(chat_id, user_id).await,
            "switch" => self.cmd_switch(chat_id, user_id, args).await,
            "cancel" => self.cmd_cancel(chat_id, user_id).await,
            "cost" => self.cmd_cost(chat_id, user_id).await,
            _ => self.say(chat_id, "Unknown command. Try /help.").await,
        }
    }

    async fn cmd_new(&self, chat_id: i64, user_id: i64, args: &str) -> Result<()> {
        if !args.is_empty() {
            return match self.projects.get(args) {
                Some(path) => self.start_session(chat_id, user_id, path, args).await,
                None => self.start_session(chat_id, user_id, args, "").await,
            };
        }
        if self.projects.is_empty() {
            return self.say(chat_id, "Usage: /new <project name or path>").await;
        }
        self.sink
            .send(chat_id, "Select a project:", Some(project_keyboard(&self.projects)))
            .await?;
        Ok(())
    }

    async fn start_session(&self, chat_id: i64, user_id: i64, path: &str, name: &str) -> Result<()> {
        if !Path::new(path).is_dir() {
            return self
                .say(chat_id, &format!("Project path not found: {path}"))
                .await;
        }
        let name = if name.is_empty() {
            Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string())
        } else {
            name.to_string()
        };

        let session = self
            .coordinator
            .sessions()
            .create_session(user_id, path, &name)?;
        info!("User {user_id} started session {} in {path}", session.short_id());
        self.say(
            chat_id,
            &format!(
                "Started session: {}\nProject: {name}\nPath: {path}",
                session.short_id()
            ),
        )
        .await
    }

    async fn cmd_continue(&self, chat_id: i64, user_id: i64) -> Result<()> {
        let sessions = self.coordinator.sessions();
        let Some(latest) = sessions.list_for_owner(user_id)?.into_iter().next() else {
            return self.say(chat_id, "No sessions found. Use /new to start one.").await;
        };
        let session = sessions.switch_session(user_id, &latest.id)?;
        self.say(
            chat_id,
            &format!(
                "Resumed session: {}\nProject: {}",
                session.short_id(),
                session.project_name
            ),
        )
        .await
    }

    async fn cmd_sessions(&self, chat_id: i64, user_id: i64) -> Result<()> {
        let sessions = self.coordinator.sessions().list_for_owner(user_id)?;
        if sessions.is_empty() {
            return self.say(chat_id, "No sessions found. Use /new to start one.").await;
        }
        self.sink
            .send(chat_id, "Your sessions:", Some(session_keyboard(&sessions)))
            .await?;
        Ok(())
    }

    async fn cmd_switch(&self, chat_id: i64, user_id: i64, prefix: &str) -> Result<()> {
        let sessions = self.coordinator.sessions();
        let matches: Vec<SessionRecord> = sessions
            .list_for_owner(user_id)?
            .into_iter()
            .filter(|s| s.id.starts_with(prefix))
            .collect();
        let [only] = matches.as_slice() else {
            let msg = if matches.is_empty() {
                "Session not found."
            } else {
                "That prefix matches several sessions; use more characters."
            };
            return self.say(chat_id, msg).await;
        };
        let session = sessions.switch_session(user_id, &only.id)?;
        self.say(
            chat_id,
            &format!("Switched to: {} ({})", session.project_name, session.short_id()),
        )
        .await
    }

    async fn cmd_cancel(&self, chat_id: i64, user_id: i64) -> Result<()> {
        let Some(session) = self.coordinator.sessions().active_session(user_id)? else {
            return self.say(chat_id, "No active session.").await;
        };
        if self.coordinator.cancel(&session.id).await {
            self.say(chat_id, "🛑 Stopping operation...").await
        } else {
            self.say(chat_id, "No operation running.").await
        }
    }

    async fn cmd_cost(&self, chat_id: i64, user_id: i64) -> Result<()> {
        let sessions = self.coordinator.sessions();
        let Some(session) = sessions.active_session(user_id)? else {
            return self.say(chat_id, "No active session.").await;
        };
        let total = sessions.total_cost_for_owner(user_id)?;
        self.say(
            chat_id,
            &format!(
                "Session: ${:.4}\nTotal: ${total:.4}",
                session.total_cost_usd
            ),
        )
        .await
    }

    async fn prompt(self: &Arc<Self>, chat_id: i64, user_id: i64, text: &str) -> Result<()> {
        let Some(session) = self.coordinator.sessions().active_session(user_id)? else {
            return self
                .say(
                    chat_id,
                    "No active session. Use /new to start one or /continue to resume.",
                )
                .await;
        };

        let updates = match self.coordinator.start(&session.id, text).await {
            Ok(rx) => rx,
            Err(CoordinatorError::AlreadyRunning(_)) => {
                return self
                    .say(chat_id, "⏳ Claude is still working. Wait for completion or /cancel.")
                    .await;
            }
            Err(e) => {
                return self
                    .say(chat_id, &format!("Failed to start Claude: {e}"))
                    .await;
            }
        };

        let status_id = self
            .sink
            .send(chat_id, "⏳ Working...", Some(cancel_keyboard(&session.id)))
            .await
            .map_err(|e| warn!("Could not send status message: {e:#}"))
            .ok();

        let sink = self.sink.clone();
        let streaming = self.streaming.clone();
        tokio::spawn(async move {
            forward_updates(sink, chat_id, status_id, updates, streaming).await;
        });
        Ok(())
    }

    // ─── Buttons ──────────────────────────────────────────────────────────

    async fn handle_callback(
        &self,
        callback_id: &str,
        chat_id: i64,
        user_id: i64,
        message_id: i64,
        data: &str,
    ) -> Result<()> {
        let (action, arg) = data.split_once(':').unwrap_or((data, ""));
        match action {
            "approve" | "deny" => {
                self.decide(callback_id, chat_id, user_id, message_id, arg, action == "approve")
                    .await
            }
            "cancel" => {
                if !self.owns_session(user_id, arg)? {
                    return self.answer(callback_id, Some("Session not found")).await;
                }
                if self.coordinator.cancel(arg).await {
                    self.answer(callback_id, Some("Stopping...")).await?;
                    self.sink
                        .edit(chat_id, message_id, "🛑 Stopping...", Some(kill_keyboard(arg)))
                        .await
                } else {
                    self.answer(callback_id, Some("No operation running")).await
                }
            }
            "kill" => {
                if !self.owns_session(user_id, arg)? {
                    return self.answer(callback_id, Some("Session not found")).await;
                }
                if self.coordinator.force_cancel(arg).await {
                    self.answer(callback_id, Some("Force stopped")).await
                } else {
                    self.answer(callback_id, Some("No operation running")).await
                }
            }
            "project" => {
                let project = arg
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| self.projects.iter().nth(i));
                match project {
                    Some((name, path)) => {
                        self.answer(callback_id, None).await?;
                        self.start_session(chat_id, user_id, path, name).await
                    }
                    None => self.answer(callback_id, Some("Project not found")).await,
                }
            }
            "switch" => match self.coordinator.sessions().switch_session(user_id, arg) {
                Ok(session) => {
                    self.answer(callback_id, Some("Switched!")).await?;
                    self.say(chat_id, &format!("Switched to: {}", session.project_name))
                        .await
                }
                Err(_) => self.answer(callback_id, Some("Session not found")).await,
            },
            _ => self.answer(callback_id, None).await,
        }
    }

    async fn decide(
        &self,
        callback_id: &str,
        chat_id: i64,
        user_id: i64,
        message_id: i64,
        request_id: &str,
        approve: bool,
    ) -> Result<()> {
        let Some(request) = self.coordinator.approval_request(request_id) else {
            self.answer(callback_id, Some("This request has expired")).await?;
            return self
                .sink
                .edit(chat_id, message_id, "⌛ This request has expired.", None)
                .await;
        };
        if !self.owns_session(user_id, &request.session_key)? {
            return self.answer(callback_id, Some("Not your session")).await;
        }

        let delivered = if approve {
            self.coordinator.approve(request_id)
        } else {
            self.coordinator.deny(request_id)
        };
        let toast = match (delivered, approve) {
            (false, _) => "Already decided",
            (true, true) => "Approved!",
            (true, false) => "Denied",
        };
        self.answer(callback_id, Some(toast)).await
    }

    async fn answer(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.sink.answer_callback(callback_id, text).await
    }

    fn owns_session(&self, user_id: i64, session_id: &str) -> Result<bool> {
        Ok(self
            .coordinator
            .sessions()
            .get_session(session_id)?
            .is_some_and(|s| s.owner == user_id))
    }
}

// ─── Streaming ────────────────────────────────────────────────────────────

/// Relay one run's updates to the chat: display chunks are batched and sent
/// at most once per throttle interval, approval prompts get buttons, and the
/// status message is finalised when the run ends.
pub async fn forward_updates(
    sink: Arc<dyn ChatSink>,
    chat_id: i64,
    status_id: Option<i64>,
    mut updates: mpsc::Receiver<SessionUpdate>,
    streaming: StreamingConfig,
) {
    let throttle = Duration::from_millis(streaming.edit_throttle_ms.max(1));
    let chunk_size = streaming.chunk_size.clamp(1, MAX_MESSAGE_LEN);
    let mut pending = String::new();
    let mut last_flush = Instant::now();
    // Approval request id → (prompt message id, prompt text).
    let mut prompts: HashMap<String, (i64, String)> = HashMap::new();

    loop {
        let update = match tokio::time::timeout(throttle, updates.recv()).await {
            Err(_) => {
                flush(&*sink, chat_id, &mut pending, chunk_size).await;
                last_flush = Instant::now();
                continue;
            }
            Ok(None) => {
                flush(&*sink, chat_id, &mut pending, chunk_size).await;
                break;
            }
            Ok(Some(update)) => update,
        };

        match update {
            SessionUpdate::Chunk(text) => {
                if !pending.is_empty() {
                    pending.push('\n');
                }
                pending.push_str(&text);
                if last_flush.elapsed() >= throttle || pending.len() >= chunk_size {
                    flush(&*sink, chat_id, &mut pending, chunk_size).await;
                    last_flush = Instant::now();
                }
            }
            SessionUpdate::ApprovalRequested { request, prompt } => {
                flush(&*sink, chat_id, &mut pending, chunk_size).await;
                last_flush = Instant::now();
                match sink
                    .send(chat_id, &prompt, Some(approval_keyboard(&request.id)))
                    .await
                {
                    Ok(message_id) => {
                        prompts.insert(request.id, (message_id, prompt));
                    }
                    Err(e) => warn!("Could not send approval prompt: {e:#}"),
                }
            }
            SessionUpdate::ApprovalResolved {
                request_id,
                approved,
                timed_out,
            } => {
                let outcome = if timed_out {
                    "⏰ Approval timed out. Operation denied."
                } else if approved {
                    "✅ Approved"
                } else {
                    "❌ Denied"
                };
                if let Some((message_id, prompt)) = prompts.remove(&request_id) {
                    let text = format!("{prompt}\n\n{outcome}");
                    if let Err(e) = sink.edit(chat_id, message_id, &text, None).await {
                        warn!("Could not update approval prompt: {e:#}");
                    }
                }
            }
            SessionUpdate::Finished {
                cost_usd,
                interrupted,
            } => {
                flush(&*sink, chat_id, &mut pending, chunk_size).await;
                let text = if interrupted {
                    "⚠️ Interrupted. Send a message to resume the session.".to_string()
                } else {
                    format!("✅ Done · ${cost_usd:.4}")
                };
                let result = match status_id {
                    Some(id) => sink.edit(chat_id, id, &text, None).await,
                    None => sink.send(chat_id, &text, None).await.map(|_| ()),
                };
                if let Err(e) = result {
                    warn!("Could not send completion status: {e:#}");
                }
                break;
            }
        }
    }
}

async fn flush(sink: &dyn ChatSink, chat_id: i64, pending: &mut String, chunk_size: usize) {
    if pending.trim().is_empty() {
        pending.clear();
        return;
    }
    for chunk in split_message(pending, chunk_size) {
        if let Err(e) = sink.send(chat_id, chunk, None).await {
            warn!("Failed to send chunk to chat {chat_id}: {e:#}");
        }
    }
    pending.clear();
}

// ─── Keyboards ────────────────────────────────────────────────────────────

fn approval_keyboard(request_id: &str) -> Keyboard {
    vec![vec![
        Button::new("✅ Approve", format!("approve:{request_id}")),
        Button::new("❌ Deny", format!("deny:{request_id}")),
    ]]
}

fn cancel_keyboard(session_id: &str) -> Keyboard {
    vec![vec![Button::new("🛑 Cancel", format!("cancel:{session_id}"))]]
}

fn kill_keyboard(session_id: &str) -> Keyboard {
    vec![vec![Button::new("💀 Force stop", format!("kill:{session_id}"))]]
}

/// Buttons carry the project's position, not its name: callback data is
/// capped at 64 bytes.
fn project_keyboard(projects: &BTreeMap<String, String>) -> Keyboard {
    let buttons: Vec<Button> = projects
        .keys()
        .enumerate()
        .map(|(i, name)| Button::new(format!("📁 {name}"), format!("project:{i}")))
        .collect();
    buttons.chunks(3).map(<[Button]>::to_vec).collect()
}

fn session_keyboard(sessions: &[SessionRecord]) -> Keyboard {
    sessions
        .iter()
        .map(|s| {
            let status = if s.status == SessionStatus::Active {
                "🟢"
            } else {
                "💤"
            };
            let label = format!(
                "{status} {} · ${:.2} · {}",
                s.project_name,
                s.total_cost_usd,
                format_age(Utc::now() - s.last_active)
            );
            vec![Button::new(label, format!("switch:{}", s.id))]
        })
        .collect()
}

fn format_age(age: chrono::Duration) -> String {
    if age < chrono::Duration::minutes(1) {
        "now".to_string()
    } else if age < chrono::Duration::hours(1) {
        format!("{}m ago", age.num_minutes())
    } else if age < chrono::Duration::days(1) {
        format!("{}h ago", age.num_hours())
    } else {
        format!("{}d ago", age.num_days())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tc_types::approval::ApprovalRequestInfo;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Send {
            text: String,
            keyboard: Option<Keyboard>,
        },
        Edit {
            message_id: i64,
            text: String,
        },
        Answer {
            text: Option<String>,
        },
    }

    #[derive(Default)]
    struct FakeSink {
        calls: Mutex<Vec<Call>>,
    }

    impl FakeSink {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn sent_texts(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Send { text, .. } => Some(text),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ChatSink for FakeSink {
        async fn send(&self, _chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> Result<i64> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call::Send {
                text: text.to_string(),
                keyboard,
            });
            Ok(calls.len() as i64)
        }

        async fn edit(
            &self,
            _chat_id: i64,
            message_id: i64,
            text: &str,
            _keyboard: Option<Keyboard>,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Edit {
                message_id,
                text: text.to_string(),
            });
            Ok(())
        }

        async fn answer_callback(&self, _callback_id: &str, text: Option<&str>) -> Result<()> {
            self.calls.lock().unwrap().push(Call::Answer {
                text: text.map(str::to_string),
            });
            Ok(())
        }
    }

    fn bridge_with(config: TcConfig) -> (Arc<ChatBridge>, Arc<FakeSink>) {
        let sessions = Arc::new(SessionManager::new(Arc::new(MemoryStore::new())));
        let coordinator = SessionCoordinator::from_config(sessions, &config);
        let sink = Arc::new(FakeSink::default());
        (ChatBridge::new(coordinator, sink.clone(), &config), sink)
    }

    fn bridge() -> (Arc<ChatBridge>, Arc<FakeSink>) {
        let mut config = TcConfig::default();
        config
            .projects
            .insert("tmp".into(), std::env::temp_dir().to_string_lossy().into_owned());
        bridge_with(config)
    }

    fn msg(text: &str) -> Inbound {
        Inbound::Message {
            chat_id: 1,
            user_id: 42,
            message_id: 1,
            text: text.into(),
        }
    }

    fn callback(data: &str) -> Inbound {
        Inbound::Callback {
            callback_id: "cb".into(),
            chat_id: 1,
            user_id: 42,
            message_id: 9,
            data: data.into(),
        }
    }

    #[tokio::test]
    async fn help_lists_commands() {
        let (bridge, sink) = bridge();
        bridge.handle(msg("/start")).await.unwrap();
        assert!(sink.sent_texts()[0].contains("/new <project>"));
    }

    #[tokio::test]
    async fn new_session_by_project_name() {
        let (bridge, sink) = bridge();
        bridge.handle(msg("/new tmp")).await.unwrap();
        assert!(sink.sent_texts()[0].starts_with("Started session: "));

        let active = bridge
            .coordinator
            .sessions()
            .active_session(42)
            .unwrap()
            .unwrap();
        assert_eq!(active.project_name, "tmp");
    }

    #[tokio::test]
    async fn new_without_args_offers_projects() {
        let (bridge, sink) = bridge();
        bridge.handle(msg("/new")).await.unwrap();
        match &sink.calls()[0] {
            Call::Send {
                keyboard: Some(kb), ..
            } => assert_eq!(kb[0][0].data, "project:0"),
            other => panic!("expected keyboard, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn project_buttons_fit_callback_limit() {
        let mut config = TcConfig::default();
        let tmp = std::env::temp_dir().to_string_lossy().into_owned();
        let long_name = "a-project-with-a-very-long-descriptive-name-that-keeps-going-on";
        config.projects.insert("alpha".into(), tmp.clone());
        config.projects.insert(long_name.into(), tmp);
        let (bridge, sink) = bridge_with(config);

        bridge.handle(msg("/new")).await.unwrap();
        let keyboard = match &sink.calls()[0] {
            Call::Send {
                keyboard: Some(kb), ..
            } => kb.clone(),
            other => panic!("expected keyboard, got {other:?}"),
        };
        let buttons: Vec<&Button> = keyboard.iter().flatten().collect();
        assert_eq!(buttons.len(), 2);
        assert!(buttons.iter().all(|b| b.data.len() <= 64));

        let long = buttons
            .iter()
            .find(|b| b.label.contains(long_name))
            .expect("button for long project");
        bridge.handle(callback(&long.data)).await.unwrap();
        let active = bridge.coordinator.sessions().active_session(42).unwrap().unwrap();
        assert_eq!(active.project_name, long_name);

        bridge.handle(callback("project:7")).await.unwrap();
        assert_eq!(
            sink.calls().last(),
            Some(&Call::Answer {
                text: Some("Project not found".into())
            })
        );
    }

    #[tokio::test]
    async fn missing_path_is_reported() {
        let (bridge, sink) = bridge();
        bridge.handle(msg("/new /definitely/not/a/dir")).await.unwrap();
        assert!(sink.sent_texts()[0].starts_with("Project path not found"));
    }

    #[tokio::test]
    async fn prompt_without_session_is_refused() {
        let (bridge, sink) = bridge();
        bridge.handle(msg("list files")).await.unwrap();
        assert!(sink.sent_texts()[0].starts_with("No active session"));
    }

    #[tokio::test]
    async fn cost_and_cancel_need_a_session() {
        let (bridge, sink) = bridge();
        bridge.handle(msg("/cost")).await.unwrap();
        bridge.handle(msg("/new tmp")).await.unwrap();
        bridge.handle(msg("/cost")).await.unwrap();
        bridge.handle(msg("/cancel")).await.unwrap();
        let texts = sink.sent_texts();
        assert_eq!(texts[0], "No active session.");
        assert_eq!(texts[2], "Session: $0.0000\nTotal: $0.0000");
        assert_eq!(texts[3], "No operation running.");
    }

    #[tokio::test]
    async fn switch_by_prefix() {
        let (bridge, sink) = bridge();
        bridge.handle(msg("/new tmp")).await.unwrap();
        let first = bridge.coordinator.sessions().active_session(42).unwrap().unwrap();
        bridge.handle(msg("/new tmp")).await.unwrap();

        bridge
            .handle(msg(&format!("/switch {}", &first.id[..6])))
            .await
            .unwrap();
        assert!(sink.sent_texts()[2].starts_with("Switched to: tmp"));
        let active = bridge.coordinator.sessions().active_session(42).unwrap().unwrap();
        assert_eq!(active.id, first.id);
    }

    #[tokio::test]
    async fn late_approval_is_reported_as_expired() {
        let (bridge, sink) = bridge();
        bridge.handle(callback("approve:0123456789abcdef")).await.unwrap();
        assert_eq!(
            sink.calls(),
            vec![
                Call::Answer {
                    text: Some("This request has expired".into())
                },
                Call::Edit {
                    message_id: 9,
                    text: "⌛ This request has expired.".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn cancel_button_for_foreign_session_is_refused() {
        let (bridge, sink) = bridge();
        bridge.handle(callback("cancel:someone-elses")).await.unwrap();
        assert_eq!(
            sink.calls(),
            vec![Call::Answer {
                text: Some("Session not found".into())
            }]
        );
    }

    #[tokio::test]
    async fn updates_are_batched_and_finalised() {
        let sink = Arc::new(FakeSink::default());
        let (tx, rx) = mpsc::channel(16);
        let request = ApprovalRequestInfo {
            id: "req1".into(),
            session_key: "s".into(),
            tool_name: "Bash".into(),
            reason: "Delete files/directories".into(),
            command: "rm -rf x".into(),
            created_at: Utc::now(),
        };
        for update in [
            SessionUpdate::Chunk("one".into()),
            SessionUpdate::Chunk("two".into()),
            SessionUpdate::ApprovalRequested {
                request,
                prompt: "🔒 Approval needed".into(),
            },
            SessionUpdate::ApprovalResolved {
                request_id: "req1".into(),
                approved: false,
                timed_out: true,
            },
            SessionUpdate::Finished {
                cost_usd: 0.01,
                interrupted: false,
            },
        ] {
            tx.send(update).await.unwrap();
        }

        let streaming = StreamingConfig {
            edit_throttle_ms: 60_000,
            chunk_size: 3800,
        };
        forward_updates(sink.clone(), 1, Some(100), rx, streaming).await;

        assert_eq!(
            sink.calls(),
            vec![
                Call::Send {
                    text: "one\ntwo".into(),
                    keyboard: None
                },
                Call::Send {
                    text: "🔒 Approval needed".into(),
                    keyboard: Some(approval_keyboard("req1"))
                },
                Call::Edit {
                    message_id: 2,
                    text: "🔒 Approval needed\n\n⏰ Approval timed out. Operation denied.".into()
                },
                Call::Edit {
                    message_id: 100,
                    text: "✅ Done · $0.0100".into()
                },
            ]
        );
    }

    #[test]
    fn ages() {
        assert_eq!(format_age(chrono::Duration::seconds(5)), "now");
        assert_eq!(format_age(chrono::Duration::minutes(5)), "5m ago");
        assert_eq!(format_age(chrono::Duration::hours(3)), "3h ago");
        assert_eq!(format_age(chrono::Duration::days(2)), "2d ago");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prompt_streams_agent_output() {
        use crate::testutil::{self, fake_agent};

        let mut config = TcConfig::default();
        config.agent.executable = fake_agent(testutil::HAPPY_PATH).to_string_lossy().into_owned();
        config.streaming.edit_throttle_ms = 20;
        config
            .projects
            .insert("tmp".into(), std::env::temp_dir().to_string_lossy().into_owned());
        let (bridge, sink) = bridge_with(config);

        bridge.handle(msg("/new tmp")).await.unwrap();
        let mut started = false;
        for _ in 0..10 {
            bridge.handle(msg("list files")).await.unwrap();
            if sink.sent_texts().iter().any(|t| t == "⏳ Working...") {
                started = true;
                break;
            }
            // A just-written script can be briefly busy; try again.
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(started, "agent never started: {:?}", sink.calls());

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let done = sink.calls().iter().any(|c| {
                matches!(c, Call::Edit { text, .. } if text.starts_with("✅ Done"))
            });
            if done {
                break;
            }
            assert!(Instant::now() < deadline, "run never finished: {:?}", sink.calls());
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let texts = sink.sent_texts().join("\n");
        assert!(texts.contains("Files: a.txt, b.txt"));
    }
}
