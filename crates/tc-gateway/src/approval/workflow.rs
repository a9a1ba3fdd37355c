use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

use tc_types::approval::ApprovalRequestInfo;
use tc_types::session::generate_id;

/// Extra time an unwaited request survives past its timeout.
const SWEEP_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval request timed out")]
    TimedOut,

    #[error("no pending approval request with id {0}")]
    NotFound(String),
}

struct PendingApproval {
    info: ApprovalRequestInfo,
    /// Taken by the first approve/deny; later decisions find it gone.
    decision_tx: Option<oneshot::Sender<bool>>,
    /// Taken by the (single) waiter.
    decision_rx: Option<oneshot::Receiver<bool>>,
}

type Registry = Arc<Mutex<HashMap<String, PendingApproval>>>;

/// Pending approval requests and their one-shot decisions.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    timeout: Duration,
    requests: Registry,
}

impl ApprovalWorkflow {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a request and return its id. An unwaited request is swept
    /// shortly after the timeout. Must be called inside a tokio runtime.
    pub fn create_request(
        &self,
        session_key: &str,
        tool_name: &str,
        reason: &str,
        command: &str,
    ) -> String {
        let id = generate_id();
        let (tx, rx) = oneshot::channel();
        let pending = PendingApproval {
            info: ApprovalRequestInfo {
                id: id.clone(),
                session_key: session_key.to_string(),
                tool_name: tool_name.to_string(),
                reason: reason.to_string(),
                command: command.to_string(),
                created_at: Utc::now(),
            },
            decision_tx: Some(tx),
            decision_rx: Some(rx),
        };
        lock(&self.requests).insert(id.clone(), pending);
        info!("Approval requested: id={id}, session={session_key}, tool={tool_name}");

        let requests = self.requests.clone();
        let sweep_after = self.timeout + SWEEP_GRACE;
        let sweep_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(sweep_after).await;
            if lock(&requests).remove(&sweep_id).is_some() {
                debug!("Swept expired approval request {sweep_id}");
            }
        });

        id
    }

    pub fn get_request(&self, id: &str) -> Option<ApprovalRequestInfo> {
        lock(&self.requests).get(id).map(|p| p.info.clone())
    }

    /// Deliver an approval. Returns false when the id is unknown or already
    /// decided; that is not an error.
    pub fn approve(&self, id: &str) -> bool {
        self.decide(id, true)
    }

    /// Deliver a denial. Same semantics as [`approve`](Self::approve).
    pub fn deny(&self, id: &str) -> bool {
        self.decide(id, false)
    }

    fn decide(&self, id: &str, approved: bool) -> bool {
        let tx = lock(&self.requests)
            .get_mut(id)
            .and_then(|p| p.decision_tx.take());
        match tx {
            Some(tx) => {
                let delivered = tx.send(approved).is_ok();
                if delivered {
                    info!(
                        "Approval {id} {}",
                        if approved { "approved" } else { "denied" }
                    );
                }
                delivered
            }
            None => {
                debug!("Ignoring decision for unknown or decided approval {id}");
                false
            }
        }
    }

    /// Wait for the decision on `id`, up to the workflow timeout. The request
    /// is removed afterwards whatever the outcome.
    pub async fn wait_for_decision(&self, id: &str) -> Result<bool, ApprovalError> {
        let rx = lock(&self.requests)
            .get_mut(id)
            .and_then(|p| p.decision_rx.take())
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;

        let outcome = tokio::time::timeout(self.timeout, rx).await;
        lock(&self.requests).remove(id);

        match outcome {
            Ok(Ok(approved)) => Ok(approved),
            // Sender gone without a value: the request was swept.
            Ok(Err(_)) | Err(_) => {
                info!("Approval {id} timed out");
                Err(ApprovalError::TimedOut)
            }
        }
    }

    /// Pending requests for one session, oldest first.
    pub fn get_pending_for_session(&self, session_key: &str) -> Vec<ApprovalRequestInfo> {
        let mut pending: Vec<_> = lock(&self.requests)
            .values()
            .filter(|p| p.info.session_key == session_key)
            .map(|p| p.info.clone())
            .collect();
        pending.sort_by_key(|info| info.created_at);
        pending
    }

    /// Deny every undecided request of a session. Returns how many were denied.
    pub fn deny_all_for_session(&self, session_key: &str) -> usize {
        let senders: Vec<_> = lock(&self.requests)
            .values_mut()
            .filter(|p| p.info.session_key == session_key)
            .filter_map(|p| p.decision_tx.take())
            .collect();
        let denied = senders
            .into_iter()
            .map(|tx| tx.send(false))
            .filter(Result::is_ok)
            .count();
        if denied > 0 {
            info!("Denied {denied} pending approval(s) for session {session_key}");
        }
        denied
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
