use crate::domain::flow::EmployeeId;
use crate::domain::request::{RequestStatus, ServiceRequest, StepStatus};

/// Per-user projections over request aggregates. These are plain filter
/// predicates; listing never locks and repositories translate them to SQL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestView {
    /// Every non-deleted request.
    All,
    /// Requests submitted by the given employee.
    Mine(EmployeeId),
    /// Requests whose current, still-pending level names the given employee
    /// as approver.
    PendingApprovalBy(EmployeeId),
}

impl RequestView {
    pub fn matches(&self, request: &ServiceRequest) -> bool {
        if request.deleted {
            return false;
        }
        match self {
            Self::All => true,
            Self::Mine(employee_id) => request.requester.employee_id == *employee_id,
            Self::PendingApprovalBy(employee_id) => {
                request.status == RequestStatus::Pending
                    && request.current_step().is_some_and(|step| {
                        step.status == StepStatus::Pending && step.approver_id == *employee_id
                    })
            }
        }
    }
}
