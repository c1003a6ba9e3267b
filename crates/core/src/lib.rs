pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod history;
pub mod machine;
pub mod views;

pub use audit::{
    AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use domain::flow::{ApprovalFlowDefinition, DivisionId, EmployeeId, FlowConfigError, FlowStep};
pub use domain::request::{
    ApprovalStep, CategoryId, PayloadLimits, RequestId, RequestPayload, RequestStatus,
    RequesterSnapshot, ServiceRequest, StepStatus, COMMENT_MAX_CHARS,
};
pub use errors::{TransitionError, ValidationError};
pub use history::{ActionKind, ActorSnapshot, HistoryEntry, HistoryLedger, LedgerVerification};
pub use machine::CreateError;
pub use views::RequestView;
