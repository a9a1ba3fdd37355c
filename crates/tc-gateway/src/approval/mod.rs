//! Human-in-the-loop gate for risky tool invocations.
//!
//! [`ApprovalPolicy`] decides *whether* an invocation needs a decision;
//! [`ApprovalWorkflow`] tracks the pending requests and delivers the
//! decision back to the waiting session.

pub mod policy;
pub mod workflow;

pub use policy::ApprovalPolicy;
pub use workflow::{ApprovalError, ApprovalWorkflow};
