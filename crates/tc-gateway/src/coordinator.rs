//! Session coordinator — one agent run per session, approvals in the loop.
//!
//! `start` launches the agent for a session and spawns a consumption task
//! that walks its events in order. A gated tool invocation suspends that task
//! (and only that task) until the human decides or the request times out; the
//! decision is then typed into the agent's terminal as `y`/`n`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use tc_types::approval::{ApprovalRequestInfo, Decision};
use tc_types::config::TcConfig;
use tc_types::event::AgentEvent;
use tc_types::session::SessionStatus;

use crate::approval::{ApprovalPolicy, ApprovalWorkflow};
use crate::controller::{AgentController, ControllerError, LaunchSpec};
use crate::presentation::{PlainPresenter, Presenter};
use crate::session::SessionManager;
use crate::terminator::{ProcessGroupTerminator, SignalTerminator};

/// Capacity of the per-run update channel.
const UPDATE_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("session {0} already has a running agent")]
    AlreadyRunning(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("session storage failed: {0:#}")]
    Storage(anyhow::Error),
}

/// What a run reports back to whoever started it.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Display text for one event.
    Chunk(String),
    /// A tool invocation is waiting for a human decision.
    ApprovalRequested {
        request: ApprovalRequestInfo,
        prompt: String,
    },
    ApprovalResolved {
        request_id: String,
        approved: bool,
        /// No decision arrived in time; the invocation was denied.
        timed_out: bool,
    },
    /// The agent's output closed. Always the last update of a run.
    Finished { cost_usd: f64, interrupted: bool },
}

/// Launch parameters shared by every run.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub executable: String,
    pub max_turns: u32,
    pub permission_mode: String,
    /// Time between the interrupt and the kill when cancelling.
    pub stop_grace: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &TcConfig) -> Self {
        Self {
            executable: config.agent.executable.clone(),
            max_turns: config.agent.max_turns,
            permission_mode: config.agent.permission_mode.clone(),
            stop_grace: Duration::from_secs(config.agent.stop_grace_secs),
        }
    }
}

pub struct SessionCoordinator {
    sessions: Arc<SessionManager>,
    settings: CoordinatorSettings,
    policy: ApprovalPolicy,
    workflow: ApprovalWorkflow,
    presenter: Arc<dyn Presenter>,
    terminator: Arc<dyn ProcessGroupTerminator>,
    /// Session id → controller of its live run; `None` while launching.
    running: Mutex<HashMap<String, Option<AgentController>>>,
}

impl SessionCoordinator {
    pub fn new(
        sessions: Arc<SessionManager>,
        settings: CoordinatorSettings,
        policy: ApprovalPolicy,
        workflow: ApprovalWorkflow,
        presenter: Arc<dyn Presenter>,
        terminator: Arc<dyn ProcessGroupTerminator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions,
            settings,
            policy,
            workflow,
            presenter,
            terminator,
            running: Mutex::new(HashMap::new()),
        })
    }

    /// Coordinator with plain-text rendering and POSIX signal termination.
    pub fn from_config(sessions: Arc<SessionManager>, config: &TcConfig) -> Arc<Self> {
        Self::new(
            sessions,
            CoordinatorSettings::from_config(config),
            ApprovalPolicy::from_config(&config.approval),
            ApprovalWorkflow::new(Duration::from_secs(config.approval.timeout_secs)),
            Arc::new(PlainPresenter),
            Arc::new(SignalTerminator),
        )
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Run `prompt` in the session `session_key`, resuming the agent's own
    /// session when one was recorded. Fails fast while a run is in flight.
    pub async fn start(
        self: &Arc<Self>,
        session_key: &str,
        prompt: &str,
    ) -> Result<mpsc::Receiver<SessionUpdate>, CoordinatorError> {
        // Reserve the key, then launch without holding the registry.
        {
            let mut running = self.running.lock().await;
            if running.contains_key(session_key) {
                return Err(CoordinatorError::AlreadyRunning(session_key.to_string()));
            }
            running.insert(session_key.to_string(), None);
        }

        let (controller, events) = match self.launch(session_key, prompt).await {
            Ok(launched) => launched,
            Err(e) => {
                self.running.lock().await.remove(session_key);
                return Err(e);
            }
        };
        self.running
            .lock()
            .await
            .insert(session_key.to_string(), Some(controller.clone()));

        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        let this = self.clone();
        let key = session_key.to_string();
        tokio::spawn(async move {
            this.consume(key, controller, events, tx).await;
        });
        Ok(rx)
    }

    async fn launch(
        &self,
        session_key: &str,
        prompt: &str,
    ) -> Result<(AgentController, mpsc::Receiver<AgentEvent>), CoordinatorError> {
        let sessions = self.sessions.clone();
        let key = session_key.to_string();
        let record = tokio::task::spawn_blocking(move || sessions.get_session(&key))
            .await
            .map_err(|e| CoordinatorError::Storage(e.into()))?
            .map_err(CoordinatorError::Storage)?
            .ok_or_else(|| CoordinatorError::SessionNotFound(session_key.to_string()))?;

        let controller = AgentController::new(&self.settings.executable, self.terminator.clone());
        controller.set_correlation_id(record.correlation_id.clone());
        let events = controller
            .start(LaunchSpec {
                work_dir: PathBuf::from(&record.project_path),
                max_turns: self.settings.max_turns,
                permission_mode: self.settings.permission_mode.clone(),
                resume: record.correlation_id.clone(),
                prompt: prompt.to_string(),
            })
            .await?;

        info!(
            "Session {} started in {} ({} chars of prompt)",
            record.short_id(),
            record.project_path,
            prompt.len()
        );
        Ok((controller, events))
    }

    // ─── Consumption loop ─────────────────────────────────────────────────

    async fn consume(
        self: Arc<Self>,
        key: String,
        controller: AgentController,
        mut events: mpsc::Receiver<AgentEvent>,
        updates: mpsc::Sender<SessionUpdate>,
    ) {
        let mut completed_cost: Option<f64> = None;

        while let Some(event) = events.recv().await {
            match &event {
                AgentEvent::Init { correlation_id } if !correlation_id.is_empty() => {
                    if let Err(e) = self.sessions.update_correlation_id(&key, correlation_id) {
                        warn!("Failed to record agent session id for {key}: {e:#}");
                    }
                }
                AgentEvent::ToolInvocation { .. } if self.policy.requires_approval(&event) => {
                    if let Some(line) = self.presenter.render(&event) {
                        emit(&updates, SessionUpdate::Chunk(line)).await;
                    }
                    self.gate(&key, &controller, &event, &updates).await;
                    continue;
                }
                AgentEvent::Completion { cost_usd, .. } => {
                    if let Err(e) = self.sessions.add_cost(&key, *cost_usd) {
                        warn!("Failed to record cost for {key}: {e:#}");
                    }
                    *completed_cost.get_or_insert(0.0) += cost_usd;
                }
                AgentEvent::Error { message } => {
                    warn!("Agent reported an error in {key}: {message}");
                }
                _ => {}
            }

            if let Some(text) = self.presenter.render(&event) {
                emit(&updates, SessionUpdate::Chunk(text)).await;
            }
        }

        // Output closed: the run is over, normally or not.
        self.running.lock().await.remove(&key);
        let denied = self.workflow.deny_all_for_session(&key);
        if denied > 0 {
            debug!("Denied {denied} leftover approval(s) for {key}");
        }

        let interrupted = completed_cost.is_none();
        if let Err(e) = self.record_outcome(&key, interrupted) {
            warn!("Failed to update status of {key}: {e:#}");
        }
        info!(
            "Session {key} finished: interrupted={interrupted}, cost=${:.4}",
            completed_cost.unwrap_or(0.0)
        );
        emit(
            &updates,
            SessionUpdate::Finished {
                cost_usd: completed_cost.unwrap_or(0.0),
                interrupted,
            },
        )
        .await;
    }

    /// Hold the session until a decision on `event` arrives, then pass it on.
    async fn gate(
        &self,
        key: &str,
        controller: &AgentController,
        event: &AgentEvent,
        updates: &mpsc::Sender<SessionUpdate>,
    ) {
        let tool = event.tool_name().unwrap_or_default();
        let reason = self.policy.extract_reason(event);
        let command = self.policy.extract_command(event);

        let request_id = self.workflow.create_request(key, tool, &reason, &command);
        if let Some(request) = self.workflow.get_request(&request_id) {
            let prompt = self.presenter.approval_prompt(tool, &reason, &command);
            emit(updates, SessionUpdate::ApprovalRequested { request, prompt }).await;
        }

        let (approved, timed_out) = match self.workflow.wait_for_decision(&request_id).await {
            Ok(approved) => (approved, false),
            Err(e) => {
                warn!("No decision for {request_id} ({e}), denying");
                (false, true)
            }
        };

        let decision = Decision::from_approved(approved);
        if let Err(e) = controller.send_input(decision.input_token()).await {
            warn!("Could not deliver {decision} for {request_id}: {e}");
        }
        emit(
            updates,
            SessionUpdate::ApprovalResolved {
                request_id,
                approved,
                timed_out,
            },
        )
        .await;
    }

    fn record_outcome(&self, key: &str, interrupted: bool) -> anyhow::Result<()> {
        if interrupted {
            self.sessions.set_status(key, SessionStatus::Interrupted)?;
        } else if let Some(rec) = self.sessions.get_session(key)? {
            if rec.status == SessionStatus::Interrupted {
                self.sessions.set_status(key, SessionStatus::Active)?;
            }
        }
        Ok(())
    }

    // ─── Control ──────────────────────────────────────────────────────────

    /// Interrupt the session's agent, killing it if it is still alive after
    /// the grace period. Returns false when nothing was running.
    pub async fn cancel(&self, session_key: &str) -> bool {
        let Some(controller) = self.controller(session_key).await else {
            return false;
        };
        self.workflow.deny_all_for_session(session_key);
        if let Err(e) = controller.stop() {
            warn!("Interrupt failed for {session_key}: {e}");
        }

        let grace = self.settings.stop_grace;
        let key = session_key.to_string();
        tokio::spawn(async move {
            if !controller.wait_for_exit(grace).await {
                warn!("Session {key} ignored interrupt for {grace:?}, killing");
                if let Err(e) = controller.force_stop() {
                    warn!("Kill failed for {key}: {e}");
                }
            }
        });
        true
    }

    /// Kill the session's agent immediately.
    pub async fn force_cancel(&self, session_key: &str) -> bool {
        let Some(controller) = self.controller(session_key).await else {
            return false;
        };
        self.workflow.deny_all_for_session(session_key);
        if let Err(e) = controller.force_stop() {
            warn!("Kill failed for {session_key}: {e}");
        }
        true
    }

    pub fn approve(&self, request_id: &str) -> bool {
        self.workflow.approve(request_id)
    }

    pub fn deny(&self, request_id: &str) -> bool {
        self.workflow.deny(request_id)
    }

    pub fn approval_request(&self, request_id: &str) -> Option<ApprovalRequestInfo> {
        self.workflow.get_request(request_id)
    }

    pub fn pending_approvals(&self, session_key: &str) -> Vec<ApprovalRequestInfo> {
        self.workflow.get_pending_for_session(session_key)
    }

    pub async fn is_running(&self, session_key: &str) -> bool {
        self.running.lock().await.contains_key(session_key)
    }

    pub async fn active_sessions(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.running.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Stop every running agent, waiting up to the grace period for each.
    pub async fn shutdown_all(&self) {
        let controllers: Vec<(String, AgentController)> = self
            .running
            .lock()
            .await
            .iter()
            .filter_map(|(k, c)| c.clone().map(|c| (k.clone(), c)))
            .collect();
        if controllers.is_empty() {
            return;
        }
        info!("Shutting down {} running session(s)", controllers.len());

        let mut set = JoinSet::new();
        for (key, controller) in controllers {
            self.workflow.deny_all_for_session(&key);
            let grace = self.settings.stop_grace;
            set.spawn(async move {
                if let Err(e) = controller.shutdown(grace).await {
                    warn!("Shutdown of {key} failed: {e}");
                }
            });
        }
        while set.join_next().await.is_some() {}
    }

    async fn controller(&self, session_key: &str) -> Option<AgentController> {
        self.running.lock().await.get(session_key).cloned().flatten()
    }
}

/// Send an update, ignoring a consumer that went away; the run continues.
async fn emit(updates: &mpsc::Sender<SessionUpdate>, update: SessionUpdate) {
    if updates.send(update).await.is_err() {
        debug!("Update receiver dropped");
    }
}
