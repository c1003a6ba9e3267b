use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::flow::{DivisionId, EmployeeId, FlowStep};
use crate::errors::ValidationError;
use crate::history::HistoryLedger;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryId(pub String);

/// Requester identity captured at submission time. Kept denormalized so the
/// request still reads correctly after the employee record changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterSnapshot {
    pub employee_id: EmployeeId,
    pub name: String,
    pub position: String,
    pub division: DivisionId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub category: CategoryId,
    pub situation: String,
    pub information: String,
    pub solution: String,
}

/// Word-count ceilings for the free-text payload fields. Call sites take
/// these from the `limits` config section; the defaults match it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadLimits {
    pub situation_max_words: usize,
    pub information_max_words: usize,
    pub solution_max_words: usize,
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Self { situation_max_words: 200, information_max_words: 1000, solution_max_words: 500 }
    }
}

pub const COMMENT_MAX_CHARS: usize = 250;

impl RequestPayload {
    pub fn validate(&self, limits: &PayloadLimits) -> Result<(), ValidationError> {
        if self.category.0.trim().is_empty() {
            return Err(ValidationError::EmptyField { field: "category" });
        }
        check_text("situation", &self.situation, limits.situation_max_words)?;
        check_text("information", &self.information, limits.information_max_words)?;
        check_text("solution", &self.solution, limits.solution_max_words)?;
        Ok(())
    }
}

fn check_text(field: &'static str, value: &str, max_words: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    let words = value.split_whitespace().count();
    if words > max_words {
        return Err(ValidationError::WordLimitExceeded { field, words, max_words });
    }
    Ok(())
}

pub(crate) fn validate_comment(comment: &str) -> Result<(), ValidationError> {
    let chars = comment.chars().count();
    if chars > COMMENT_MAX_CHARS {
        return Err(ValidationError::CommentTooLong { chars, max_chars: COMMENT_MAX_CHARS });
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
}

impl StepStatus {
    pub fn as_key(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse_key(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    /// Everything but `Pending` is terminal: no transition leaves a terminal
    /// status, and `current_level` stops moving.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_key(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse_key(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// One level of a request's frozen approver chain. Identity fields are copied
/// from the flow definition at creation and never change; only `status`,
/// `approved_at` and `comments` move, each at most once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub level: u32,
    pub name: String,
    pub approver_id: EmployeeId,
    pub approver_name: String,
    pub approver_position: String,
    pub status: StepStatus,
    pub approved_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
}

impl ApprovalStep {
    pub fn from_flow(step: &FlowStep) -> Self {
        Self {
            level: step.order,
            name: format!("{} Approval", step.approver_position),
            approver_id: step.approver_id.clone(),
            approver_name: step.approver_name.clone(),
            approver_position: step.approver_position.clone(),
            status: StepStatus::Pending,
            approved_at: None,
            comments: None,
        }
    }
}

/// The change/service request aggregate: the unit of consistency and of
/// write serialization. `version` is the optimistic-concurrency token the
/// storage layer compares on every write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: RequestId,
    pub version: u32,
    pub requester: RequesterSnapshot,
    pub payload: RequestPayload,
    pub approval_chain: Vec<ApprovalStep>,
    pub current_level: u32,
    pub status: RequestStatus,
    pub history: HistoryLedger,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRequest {
    pub fn chain_len(&self) -> u32 {
        self.approval_chain.len() as u32
    }

    /// The step awaiting action, `None` once the chain has been walked past
    /// its last level.
    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.approval_chain.get(self.current_level as usize - 1)
    }

    pub(crate) fn current_step_mut(&mut self) -> Option<&mut ApprovalStep> {
        self.approval_chain.get_mut(self.current_level as usize - 1)
    }
}
