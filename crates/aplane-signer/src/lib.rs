pub mod approval;
pub mod audit;
pub mod dispatch;
pub mod hub;
pub mod planner;
pub mod policy;
pub mod session;

pub use approval::{ApprovalConfig, ApprovalOutcome, ApprovalSink, SinkError, APPROVAL_TIMEOUT};
pub use audit::AuditLog;
pub use dispatch::dispatch;
pub use hub::{HubEvent, SignerHub, SignerState};
pub use planner::{plan, Plan, PlannerContext, RawRequestEntry};
pub use policy::{lint_plan, PolicyConfig};
pub use session::KeySession;
