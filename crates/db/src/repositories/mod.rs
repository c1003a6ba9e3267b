use async_trait::async_trait;
use thiserror::Error;

use cswflow_core::domain::flow::{ApprovalFlowDefinition, DivisionId};
use cswflow_core::domain::request::{RequestId, ServiceRequest};
use cswflow_core::history::HistoryEntry;
use cswflow_core::views::RequestView;

pub mod flow;
pub mod memory;
pub mod request;

pub use flow::SqlFlowRepository;
pub use memory::{InMemoryFlowRepository, InMemoryRequestRepository};
pub use request::SqlRequestRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("stale aggregate version for request `{id}`")]
    StaleVersion { id: String },
    #[error("history entry {seq} for request `{id}` is already recorded")]
    DuplicateHistoryEntry { id: String, seq: u32 },
}

#[async_trait]
pub trait FlowRepository: Send + Sync {
    async fn find_by_division(
        &self,
        division_id: &DivisionId,
    ) -> Result<Option<ApprovalFlowDefinition>, RepositoryError>;

    async fn save(&self, flow: ApprovalFlowDefinition) -> Result<(), RepositoryError>;
}

/// Persistence contract for the request aggregate. The only write paths are
/// `insert_new` (a brand-new aggregate with its opening trail) and
/// `store_transition` (one transition + exactly one new trail entry, applied
/// atomically and guarded by the version the caller loaded).
#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Load the aggregate including its chain and trail. Soft-deleted
    /// requests are returned with their flag set; visibility policy is the
    /// service's concern.
    async fn find_by_id(&self, id: &RequestId)
        -> Result<Option<ServiceRequest>, RepositoryError>;

    async fn insert_new(&self, request: &ServiceRequest) -> Result<(), RepositoryError>;

    /// Persist one applied transition. Fails with `StaleVersion` when another
    /// writer got there first, and with `DuplicateHistoryEntry` when the
    /// trail already holds the entry's seq.
    async fn store_transition(
        &self,
        request: &ServiceRequest,
        expected_version: u32,
        entry: &HistoryEntry,
    ) -> Result<(), RepositoryError>;

    async fn history(&self, id: &RequestId) -> Result<Vec<HistoryEntry>, RepositoryError>;

    async fn list(&self, view: &RequestView) -> Result<Vec<ServiceRequest>, RepositoryError>;
}
