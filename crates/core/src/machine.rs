use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::flow::{ApprovalFlowDefinition, FlowConfigError};
use crate::domain::request::{
    validate_comment, ApprovalStep, PayloadLimits, RequestId, RequestPayload, RequestStatus,
    RequesterSnapshot, ServiceRequest, StepStatus,
};
use crate::errors::{TransitionError, ValidationError};
use crate::history::{ActionKind, ActorSnapshot, HistoryEntry, HistoryLedger};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CreateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    FlowConfig(#[from] FlowConfigError),
}

impl ServiceRequest {
    /// Build a new request: validate the payload, snapshot the division's
    /// approver chain step by step, open the trail with a `Created` entry.
    /// The chain copy is what insulates the request from later flow edits.
    pub fn create(
        id: RequestId,
        requester: RequesterSnapshot,
        payload: RequestPayload,
        limits: &PayloadLimits,
        flow: &ApprovalFlowDefinition,
        now: DateTime<Utc>,
    ) -> Result<Self, CreateError> {
        payload.validate(limits)?;
        flow.validate()?;

        let approval_chain: Vec<ApprovalStep> =
            flow.steps_in_order().into_iter().map(ApprovalStep::from_flow).collect();

        let mut history = HistoryLedger::new();
        history.append(
            id.clone(),
            ActionKind::Created,
            requester_actor(&requester),
            None,
            None,
            RequestStatus::Pending,
            now,
        );

        Ok(Self {
            id,
            version: 1,
            requester,
            payload,
            approval_chain,
            current_level: 1,
            status: RequestStatus::Pending,
            history,
            deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Resolve the current level in the actor's favor. Preconditions run in a
    /// fixed order so a caller holding a stale view gets the most specific
    /// failure: finalized request, wrong level, already-resolved level, then
    /// wrong actor.
    pub fn approve(
        &mut self,
        actor: &ActorSnapshot,
        level: u32,
        comments: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<HistoryEntry, TransitionError> {
        if let Some(comment) = comments {
            validate_comment(comment)?;
        }
        self.check_level_action(actor, level)?;

        let last_level = self.chain_len();
        let comments = comments.map(str::to_string);
        if let Some(step) = self.current_step_mut() {
            step.status = StepStatus::Approved;
            step.approved_at = Some(now);
            step.comments = comments.clone();
        }

        let new_status = if level == last_level {
            RequestStatus::Approved
        } else {
            self.current_level += 1;
            RequestStatus::Pending
        };
        self.status = new_status;
        self.updated_at = now;
        let entry = self.history.append(
            self.id.clone(),
            ActionKind::Approved { level },
            actor.clone(),
            comments,
            Some(RequestStatus::Pending),
            new_status,
            now,
        )
        .clone();
        Ok(entry)
    }

    /// Reject at the current level. The whole request short-circuits to
    /// `Rejected`; steps after the rejected level stay `Pending` forever,
    /// because they were never evaluated and the trail must keep saying so.
    pub fn reject(
        &mut self,
        actor: &ActorSnapshot,
        level: u32,
        comments: &str,
        now: DateTime<Utc>,
    ) -> Result<HistoryEntry, TransitionError> {
        if comments.trim().is_empty() {
            return Err(ValidationError::CommentRequired.into());
        }
        validate_comment(comments)?;
        self.check_level_action(actor, level)?;

        if let Some(step) = self.current_step_mut() {
            step.status = StepStatus::Rejected;
            step.comments = Some(comments.to_string());
        }
        self.status = RequestStatus::Rejected;
        self.updated_at = now;
        let entry = self.history.append(
            self.id.clone(),
            ActionKind::Rejected { level },
            actor.clone(),
            Some(comments.to_string()),
            Some(RequestStatus::Pending),
            RequestStatus::Rejected,
            now,
        )
        .clone();
        Ok(entry)
    }

    /// Requester withdraws a still-pending request. No step is touched.
    pub fn cancel(
        &mut self,
        actor: &ActorSnapshot,
        comments: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<HistoryEntry, TransitionError> {
        if let Some(comment) = comments {
            validate_comment(comment)?;
        }
        if self.status.is_terminal() {
            return Err(TransitionError::InvalidState { status: self.status });
        }
        if actor.actor_id != self.requester.employee_id {
            return Err(TransitionError::Forbidden { actor_id: actor.actor_id.0.clone() });
        }

        self.status = RequestStatus::Cancelled;
        self.updated_at = now;
        let entry = self.history.append(
            self.id.clone(),
            ActionKind::Cancelled,
            actor.clone(),
            comments.map(str::to_string),
            Some(RequestStatus::Pending),
            RequestStatus::Cancelled,
            now,
        )
        .clone();
        Ok(entry)
    }

    /// Replace the payload in place while the request is still pending. The
    /// chain and `current_level` are untouched: progress already made stands,
    /// and approvers acting after the edit see the edited text.
    pub fn edit(
        &mut self,
        actor: &ActorSnapshot,
        payload: RequestPayload,
        limits: &PayloadLimits,
        now: DateTime<Utc>,
    ) -> Result<HistoryEntry, TransitionError> {
        payload.validate(limits)?;
        if self.status.is_terminal() {
            return Err(TransitionError::InvalidState { status: self.status });
        }
        if actor.actor_id != self.requester.employee_id {
            return Err(TransitionError::Forbidden { actor_id: actor.actor_id.0.clone() });
        }

        self.payload = payload;
        self.updated_at = now;
        let entry = self.history.append(
            self.id.clone(),
            ActionKind::Edited,
            actor.clone(),
            None,
            Some(RequestStatus::Pending),
            RequestStatus::Pending,
            now,
        )
        .clone();
        Ok(entry)
    }

    /// Hide the request from default queries while retaining it for audit. A
    /// fully approved request is a closed, binding record and refuses this.
    pub fn soft_delete(
        &mut self,
        actor: &ActorSnapshot,
        now: DateTime<Utc>,
    ) -> Result<HistoryEntry, TransitionError> {
        if self.status == RequestStatus::Approved {
            return Err(TransitionError::InvalidState { status: self.status });
        }

        let previous_status = self.status;
        self.deleted = true;
        self.deleted_at = Some(now);
        self.updated_at = now;
        let entry = self.history.append(
            self.id.clone(),
            ActionKind::Deleted,
            actor.clone(),
            None,
            Some(previous_status),
            previous_status,
            now,
        )
        .clone();
        Ok(entry)
    }

    /// Shared preconditions for approve/reject, checked in a fixed order.
    fn check_level_action(
        &self,
        actor: &ActorSnapshot,
        level: u32,
    ) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::InvalidState { status: self.status });
        }
        if level != self.current_level {
            return Err(TransitionError::InvalidLevel {
                expected: self.current_level,
                given: level,
            });
        }
        let Some(step) = self.current_step() else {
            return Err(TransitionError::InvalidLevel {
                expected: self.current_level,
                given: level,
            });
        };
        if step.status != StepStatus::Pending {
            return Err(TransitionError::LevelAlreadyResolved {
                level,
                status: step.status,
            });
        }
        if step.approver_id != actor.actor_id {
            return Err(TransitionError::Forbidden { actor_id: actor.actor_id.0.clone() });
        }
        Ok(())
    }
}

fn requester_actor(requester: &RequesterSnapshot) -> ActorSnapshot {
    ActorSnapshot {
        actor_id: requester.employee_id.clone(),
        name: requester.name.clone(),
        role: requester.position.clone(),
    }
}
