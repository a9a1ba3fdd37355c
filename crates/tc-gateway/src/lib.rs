pub mod approval;
pub mod bridge;
pub mod channels;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod db;
pub mod parser;
pub mod presentation;
pub mod pty;
pub mod session;
pub mod store;
pub mod terminator;

#[cfg(all(test, unix))]
mod testutil;

pub use approval::{ApprovalPolicy, ApprovalWorkflow};
pub use bridge::ChatBridge;
pub use controller::{AgentController, ControllerError, LaunchSpec};
pub use coordinator::{CoordinatorError, SessionCoordinator, SessionUpdate};
pub use db::Database;
pub use session::SessionManager;
pub use store::{MemoryStore, SessionStore};
