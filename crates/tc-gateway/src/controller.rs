//! Agent process controller — runs the coding agent on a pseudo-terminal and
//! republishes its output as a stream of [`AgentEvent`]s.
//!
//! One controller drives at most one process at a time. Each `start` hands
//! back a fresh receiver; the sending half belongs to the output-reader task,
//! so the stream closes exactly once, when that task ends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, info, warn};

use tc_types::event::AgentEvent;

use crate::parser::parse_stream;
use crate::pty::{self, PtyChild};
use crate::terminator::{ProcessGroupTerminator, SignalTerminator, TerminateError};

/// Capacity of the per-run output channel.
const OUTPUT_BUFFER: usize = 256;

/// How long to keep reading after the process exits, so trailing lines that
/// are still in the terminal buffer get delivered.
const DRAIN_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("failed to start agent process: {0}")]
    ProcessStart(#[source] std::io::Error),

    #[error("agent process is already running")]
    AlreadyRunning,

    #[error("agent process is not running")]
    NotRunning,

    #[error("terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Signal(#[from] TerminateError),
}

/// Everything needed to launch one agent run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub work_dir: PathBuf,
    pub max_turns: u32,
    /// Passed through as `--permission-mode` when non-empty.
    pub permission_mode: String,
    /// Agent-side session id to continue, if any.
    pub resume: Option<String>,
    pub prompt: String,
}

impl LaunchSpec {
    /// Command-line arguments for the agent, in a fixed order.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            // Required by the agent CLI for stream-json in print mode.
            "--verbose".to_string(),
            "--max-turns".to_string(),
            self.max_turns.to_string(),
        ];
        if !self.permission_mode.is_empty() {
            args.push("--permission-mode".to_string());
            args.push(self.permission_mode.clone());
        }
        if let Some(id) = self.resume.as_deref().filter(|id| !id.is_empty()) {
            args.push("--resume".to_string());
            args.push(id.to_string());
        }
        args
    }
}

struct Inner {
    executable: String,
    terminator: Arc<dyn ProcessGroupTerminator>,
    /// Liveness flag; flipped to true by `start`, back to false by the exit waiter.
    running: watch::Sender<bool>,
    /// Process group of the live child.
    pgid: std::sync::Mutex<Option<u32>>,
    /// Master end of the terminal, for input.
    writer: Mutex<Option<tokio::fs::File>>,
    correlation_id: std::sync::Mutex<Option<String>>,
}

/// Handle to one agent process slot. Cheap to clone; clones share the slot.
#[derive(Clone)]
pub struct AgentController {
    inner: Arc<Inner>,
}

impl AgentController {
    pub fn new(executable: impl Into<String>, terminator: Arc<dyn ProcessGroupTerminator>) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                executable: executable.into(),
                terminator,
                running,
                pgid: std::sync::Mutex::new(None),
                writer: Mutex::new(None),
                correlation_id: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Controller that signals process groups with POSIX signals.
    pub fn with_signals(executable: impl Into<String>) -> Self {
        Self::new(executable, Arc::new(SignalTerminator))
    }

    /// Launch the agent and return its event stream.
    ///
    /// Fails with [`ControllerError::AlreadyRunning`] while a previous run is
    /// alive; that run is left untouched.
    pub async fn start(
        &self,
        launch: LaunchSpec,
    ) -> Result<mpsc::Receiver<AgentEvent>, ControllerError> {
        let claimed = self.inner.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        if !claimed {
            return Err(ControllerError::AlreadyRunning);
        }

        let args = launch.build_args();
        let executable = self.inner.executable.clone();
        let work_dir = launch.work_dir.clone();
        // openpty and fork/exec block; keep them off the runtime's workers.
        let spawned = tokio::task::spawn_blocking(move || pty::spawn(&executable, &args, &work_dir))
            .await
            .unwrap_or_else(|e| Err(std::io::Error::other(e)));
        let PtyChild {
            mut child,
            pgid,
            reader,
            writer,
        } = match spawned {
            Ok(p) => p,
            Err(e) => {
                self.inner.running.send_replace(false);
                warn!(
                    "Failed to start {} in {}: {e}",
                    self.inner.executable,
                    launch.work_dir.display()
                );
                return Err(ControllerError::ProcessStart(e));
            }
        };

        *self.inner.writer.lock().await = Some(writer);
        *lock(&self.inner.pgid) = Some(pgid);
        if launch.resume.is_some() {
            *lock(&self.inner.correlation_id) = launch.resume.clone();
        }

        info!(
            "Agent started: pgid={pgid}, dir={}, resume={}",
            launch.work_dir.display(),
            launch.resume.as_deref().unwrap_or("-")
        );

        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        let (exited_tx, exited_rx) = oneshot::channel::<()>();
        let (read_done_tx, read_done_rx) = oneshot::channel::<()>();

        // Output reader: terminal → parser → queue → caller.
        //
        // Only the terminal read is cut off by the drain window. Everything
        // decoded before that point is queued without limit and delivered,
        // however slowly the caller consumes it.
        {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let (parsed_tx, mut parsed_rx) = mpsc::channel(OUTPUT_BUFFER);
                let (queue_tx, mut queue_rx) = mpsc::unbounded_channel();

                let read = async move {
                    let parse = async move {
                        let stats = parse_stream(reader, &parsed_tx).await;
                        if stats.malformed > 0 {
                            warn!(
                                "Agent output had {} malformed line(s) out of {}",
                                stats.malformed, stats.lines
                            );
                        }
                    };
                    tokio::pin!(parse);
                    let finished = tokio::select! {
                        _ = &mut parse => true,
                        _ = exited_rx => false,
                    };
                    if !finished && tokio::time::timeout(DRAIN_WINDOW, &mut parse).await.is_err() {
                        debug!("Terminal still open after exit, stopping read");
                    }
                    // `parse` (and with it `parsed_tx`) drops here.
                    let _ = read_done_tx.send(());
                };

                let relay = async move {
                    let mut saw_init = false;
                    while let Some(event) = parsed_rx.recv().await {
                        if let AgentEvent::Init { correlation_id } = &event {
                            if !saw_init && !correlation_id.is_empty() {
                                saw_init = true;
                                debug!("Agent session id: {correlation_id}");
                                *lock(&inner.correlation_id) = Some(correlation_id.clone());
                            }
                        }
                        if queue_tx.send(event).is_err() {
                            break;
                        }
                    }
                };

                let forward = async move {
                    while let Some(event) = queue_rx.recv().await {
                        if tx.send(event).await.is_err() {
                            debug!("Output consumer dropped");
                            break;
                        }
                    }
                    // `tx` drops here: the caller's stream ends.
                };

                tokio::join!(read, relay, forward);
            });
        }

        // Exit waiter: the only place that clears the slot.
        {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) => info!("Agent exited: pgid={pgid}, status={status}"),
                    Err(e) => warn!("Failed to wait for agent pgid={pgid}: {e}"),
                }
                inner.writer.lock().await.take();
                let _ = exited_tx.send(());

                // Group members that outlived the leader can still hold the
                // terminal open; keep the pgid reachable until reading ends.
                let _ = read_done_rx.await;
                if let Some(pgid) = lock(&inner.pgid).take() {
                    if let Err(e) = inner.terminator.request_immediate(pgid) {
                        debug!("Final sweep of process group {pgid} failed: {e}");
                    }
                }
                inner.running.send_replace(false);
            });
        }

        Ok(rx)
    }

    /// Write `text` plus a newline to the agent's terminal.
    pub async fn send_input(&self, text: &str) -> Result<(), ControllerError> {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(ControllerError::NotRunning)?;
        writer.write_all(format!("{text}\n").as_bytes()).await?;
        writer.flush().await?;
        debug!("Sent input to agent: {text:?}");
        Ok(())
    }

    /// Interrupt the whole process group. No-op when nothing is running.
    pub fn stop(&self) -> Result<(), ControllerError> {
        match self.pgid() {
            Some(pgid) => {
                info!("Interrupting agent: pgid={pgid}");
                self.inner.terminator.request_graceful(pgid)?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Kill the whole process group. No-op when nothing is running.
    pub fn force_stop(&self) -> Result<(), ControllerError> {
        match self.pgid() {
            Some(pgid) => {
                warn!("Killing agent: pgid={pgid}");
                self.inner.terminator.request_immediate(pgid)?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Interrupt, give the agent `grace` to exit, then kill it.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), ControllerError> {
        if !self.is_running() {
            return Ok(());
        }
        self.stop()?;
        if self.wait_for_exit(grace).await {
            return Ok(());
        }
        self.force_stop()?;
        self.wait_for_exit(Duration::from_secs(2)).await;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Wait until no process is running. Returns false on timeout.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.running.subscribe();
        let exited = tokio::time::timeout(timeout, rx.wait_for(|running| !*running)).await;
        matches!(exited, Ok(Ok(_)))
    }

    /// Agent-side session id, once the agent has announced one.
    pub fn correlation_id(&self) -> Option<String> {
        lock(&self.inner.correlation_id).clone()
    }

    pub fn set_correlation_id(&self, id: Option<String>) {
        *lock(&self.inner.correlation_id) = id;
    }

    fn pgid(&self) -> Option<u32> {
        *lock(&self.inner.pgid)
    }
}

/// Lock a std mutex, recovering the data if a holder panicked.
fn lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
