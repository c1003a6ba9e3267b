use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use cswflow_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use cswflow_core::domain::flow::{ApprovalFlowDefinition, DivisionId, FlowConfigError};
use cswflow_core::domain::request::{
    PayloadLimits, RequestId, RequestPayload, RequesterSnapshot, ServiceRequest,
};
use cswflow_core::errors::{TransitionError, ValidationError};
use cswflow_core::history::{ActorSnapshot, HistoryEntry};
use cswflow_core::machine::CreateError;
use cswflow_core::views::RequestView;

use crate::repositories::{FlowRepository, RepositoryError, RequestRepository};

/// Error taxonomy the thin API layer maps onto its wire responses. Conflict
/// covers both race outcomes: losing the version compare at the store, and
/// acting on a level another approver already resolved.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request `{0}` was not found")]
    NotFound(String),
    #[error("division `{division_id}` cannot originate requests: {source}")]
    InvalidConfiguration {
        division_id: String,
        #[source]
        source: FlowConfigError,
    },
    #[error(transparent)]
    Validation(ValidationError),
    #[error(transparent)]
    Transition(TransitionError),
    #[error("request `{0}` was modified concurrently; refresh and retry")]
    Conflict(String),
    #[error("history for request `{id}` refused a second write of entry {seq}")]
    ImmutabilityViolation { id: String, seq: u32 },
    #[error(transparent)]
    Repository(RepositoryError),
}

fn invalid_config(source: FlowConfigError) -> ServiceError {
    let division_id = match &source {
        FlowConfigError::EmptyFlow { division_id }
        | FlowConfigError::DuplicateOrder { division_id, .. }
        | FlowConfigError::NonContiguousOrder { division_id, .. } => division_id.clone(),
    };
    ServiceError::InvalidConfiguration { division_id, source }
}

fn transition_error(id: &RequestId, error: TransitionError) -> ServiceError {
    match error {
        TransitionError::Validation(validation) => ServiceError::Validation(validation),
        TransitionError::LevelAlreadyResolved { .. } => ServiceError::Conflict(id.0.clone()),
        other => ServiceError::Transition(other),
    }
}

fn store_error(id: &RequestId, error: RepositoryError) -> ServiceError {
    match error {
        RepositoryError::StaleVersion { .. } => ServiceError::Conflict(id.0.clone()),
        RepositoryError::DuplicateHistoryEntry { id, seq } => {
            ServiceError::ImmutabilityViolation { id, seq }
        }
        other => ServiceError::Repository(other),
    }
}

/// Orchestrates load → pure transition → atomic store for every operation on
/// a request. Nothing here retries: a lost race is the caller's signal to
/// refresh and decide again.
pub struct ApprovalService<R, F, S> {
    requests: Arc<R>,
    flows: Arc<F>,
    sink: S,
    limits: PayloadLimits,
}

impl<R, F, S> ApprovalService<R, F, S>
where
    R: RequestRepository,
    F: FlowRepository,
    S: AuditSink,
{
    pub fn new(requests: Arc<R>, flows: Arc<F>, sink: S, limits: PayloadLimits) -> Self {
        Self { requests, flows, sink, limits }
    }

    pub async fn create(
        &self,
        requester: RequesterSnapshot,
        payload: RequestPayload,
        correlation_id: &str,
    ) -> Result<ServiceRequest, ServiceError> {
        let division = requester.division.clone();
        let flow = self
            .flows
            .find_by_division(&division)
            .await
            .map_err(ServiceError::Repository)?
            .ok_or_else(|| {
                invalid_config(FlowConfigError::EmptyFlow { division_id: division.0.clone() })
            })?;

        let id = RequestId(Uuid::new_v4().to_string());
        let request = ServiceRequest::create(
            id.clone(),
            requester,
            payload,
            &self.limits,
            &flow,
            Utc::now(),
        )
        .map_err(|error| match error {
            CreateError::Validation(validation) => ServiceError::Validation(validation),
            CreateError::FlowConfig(config) => invalid_config(config),
        })?;

        self.requests.insert_new(&request).await.map_err(ServiceError::Repository)?;

        self.sink.emit(
            AuditEvent::new(
                Some(id.clone()),
                correlation_id,
                "request.created",
                AuditCategory::Transition,
                request.requester.employee_id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("division", request.requester.division.0.clone())
            .with_metadata("chain_len", request.chain_len().to_string()),
        );
        tracing::info!(
            event_name = "request.created",
            correlation_id = %correlation_id,
            request_id = %id.0,
            chain_len = request.chain_len(),
            "request created"
        );
        Ok(request)
    }

    pub async fn approve(
        &self,
        id: &RequestId,
        actor: &ActorSnapshot,
        level: u32,
        comments: Option<&str>,
        correlation_id: &str,
    ) -> Result<ServiceRequest, ServiceError> {
        self.apply(id, actor, correlation_id, "request.approve", |request| {
            request.approve(actor, level, comments, Utc::now())
        })
        .await
    }

    pub async fn reject(
        &self,
        id: &RequestId,
        actor: &ActorSnapshot,
        level: u32,
        comments: &str,
        correlation_id: &str,
    ) -> Result<ServiceRequest, ServiceError> {
        self.apply(id, actor, correlation_id, "request.reject", |request| {
            request.reject(actor, level, comments, Utc::now())
        })
        .await
    }

    pub async fn cancel(
        &self,
        id: &RequestId,
        actor: &ActorSnapshot,
        comments: Option<&str>,
        correlation_id: &str,
    ) -> Result<ServiceRequest, ServiceError> {
        self.apply(id, actor, correlation_id, "request.cancel", |request| {
            request.cancel(actor, comments, Utc::now())
        })
        .await
    }

    pub async fn edit(
        &self,
        id: &RequestId,
        actor: &ActorSnapshot,
        payload: RequestPayload,
        correlation_id: &str,
    ) -> Result<ServiceRequest, ServiceError> {
        let limits = self.limits;
        self.apply(id, actor, correlation_id, "request.edit", move |request| {
            request.edit(actor, payload, &limits, Utc::now())
        })
        .await
    }

    pub async fn soft_delete(
        &self,
        id: &RequestId,
        actor: &ActorSnapshot,
        correlation_id: &str,
    ) -> Result<ServiceRequest, ServiceError> {
        self.apply(id, actor, correlation_id, "request.soft_delete", |request| {
            request.soft_delete(actor, Utc::now())
        })
        .await
    }

    pub async fn get(&self, id: &RequestId) -> Result<ServiceRequest, ServiceError> {
        self.load_active(id).await
    }

    /// The trail outlives soft deletion: it is readable for any request that
    /// ever existed.
    pub async fn history(&self, id: &RequestId) -> Result<Vec<HistoryEntry>, ServiceError> {
        let request = self
            .requests
            .find_by_id(id)
            .await
            .map_err(ServiceError::Repository)?
            .ok_or_else(|| ServiceError::NotFound(id.0.clone()))?;
        Ok(request.history.entries().to_vec())
    }

    pub async fn list(&self, view: &RequestView) -> Result<Vec<ServiceRequest>, ServiceError> {
        self.requests.list(view).await.map_err(ServiceError::Repository)
    }

    pub async fn configure_flow(
        &self,
        flow: ApprovalFlowDefinition,
    ) -> Result<(), ServiceError> {
        flow.validate().map_err(invalid_config)?;
        self.flows.save(flow).await.map_err(ServiceError::Repository)
    }

    pub async fn flow_for_division(
        &self,
        division_id: &DivisionId,
    ) -> Result<ApprovalFlowDefinition, ServiceError> {
        self.flows
            .find_by_division(division_id)
            .await
            .map_err(ServiceError::Repository)?
            .ok_or_else(|| ServiceError::NotFound(division_id.0.clone()))
    }

    async fn apply<T>(
        &self,
        id: &RequestId,
        actor: &ActorSnapshot,
        correlation_id: &str,
        event_type: &str,
        transition: T,
    ) -> Result<ServiceRequest, ServiceError>
    where
        T: FnOnce(&mut ServiceRequest) -> Result<HistoryEntry, TransitionError>,
    {
        let mut request = self.load_active(id).await?;
        let loaded_version = request.version;

        let entry = match transition(&mut request) {
            Ok(entry) => entry,
            Err(error) => {
                self.emit(
                    id,
                    actor,
                    correlation_id,
                    event_type,
                    AuditOutcome::Rejected,
                    Some(error.to_string()),
                );
                return Err(transition_error(id, error));
            }
        };

        request.version = loaded_version + 1;
        self.requests
            .store_transition(&request, loaded_version, &entry)
            .await
            .map_err(|error| store_error(id, error))?;

        self.emit(id, actor, correlation_id, event_type, AuditOutcome::Success, None);
        tracing::info!(
            event_name = %event_type,
            correlation_id = %correlation_id,
            request_id = %id.0,
            action = %entry.action.as_key(),
            new_status = %entry.new_status.as_key(),
            "transition applied"
        );
        Ok(request)
    }

    async fn load_active(&self, id: &RequestId) -> Result<ServiceRequest, ServiceError> {
        let request = self
            .requests
            .find_by_id(id)
            .await
            .map_err(ServiceError::Repository)?
            .ok_or_else(|| ServiceError::NotFound(id.0.clone()))?;
        if request.deleted {
            return Err(ServiceError::NotFound(id.0.clone()));
        }
        Ok(request)
    }

    fn emit(
        &self,
        id: &RequestId,
        actor: &ActorSnapshot,
        correlation_id: &str,
        event_type: &str,
        outcome: AuditOutcome,
        error: Option<String>,
    ) {
        let mut event = AuditEvent::new(
            Some(id.clone()),
            correlation_id,
            event_type,
            AuditCategory::Transition,
            actor.actor_id.0.clone(),
            outcome,
        );
        if let Some(error) = error {
            event = event.with_metadata("error", error);
        }
        self.sink.emit(event);
    }
}
