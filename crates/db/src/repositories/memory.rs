use std::collections::HashMap;

use tokio::sync::RwLock;

use cswflow_core::domain::flow::{ApprovalFlowDefinition, DivisionId};
use cswflow_core::domain::request::{RequestId, ServiceRequest};
use cswflow_core::history::HistoryEntry;
use cswflow_core::views::RequestView;

use super::{FlowRepository, RepositoryError, RequestRepository};

#[derive(Default)]
pub struct InMemoryFlowRepository {
    flows: RwLock<HashMap<String, ApprovalFlowDefinition>>,
}

#[async_trait::async_trait]
impl FlowRepository for InMemoryFlowRepository {
    async fn find_by_division(
        &self,
        division_id: &DivisionId,
    ) -> Result<Option<ApprovalFlowDefinition>, RepositoryError> {
        let flows = self.flows.read().await;
        Ok(flows.get(&division_id.0).cloned())
    }

    async fn save(&self, flow: ApprovalFlowDefinition) -> Result<(), RepositoryError> {
        let mut flows = self.flows.write().await;
        flows.insert(flow.division_id.0.clone(), flow);
        Ok(())
    }
}

/// In-memory stand-in with the same version-compare semantics as the SQL
/// repository, so service tests exercise the conflict paths without a pool.
#[derive(Default)]
pub struct InMemoryRequestRepository {
    requests: RwLock<HashMap<String, ServiceRequest>>,
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn find_by_id(
        &self,
        id: &RequestId,
    ) -> Result<Option<ServiceRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn insert_new(&self, request: &ServiceRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        requests.insert(request.id.0.clone(), request.clone());
        Ok(())
    }

    async fn store_transition(
        &self,
        request: &ServiceRequest,
        expected_version: u32,
        entry: &HistoryEntry,
    ) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        let Some(stored) = requests.get(&request.id.0) else {
            return Err(RepositoryError::StaleVersion { id: request.id.0.clone() });
        };
        if stored.version != expected_version {
            return Err(RepositoryError::StaleVersion { id: request.id.0.clone() });
        }
        if stored.history.len() as u32 >= entry.seq {
            return Err(RepositoryError::DuplicateHistoryEntry {
                id: request.id.0.clone(),
                seq: entry.seq,
            });
        }
        requests.insert(request.id.0.clone(), request.clone());
        Ok(())
    }

    async fn history(&self, id: &RequestId) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests
            .get(&id.0)
            .map(|request| request.history.entries().to_vec())
            .unwrap_or_default())
    }

    async fn list(&self, view: &RequestView) -> Result<Vec<ServiceRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut matches: Vec<ServiceRequest> =
            requests.values().filter(|request| view.matches(request)).cloned().collect();
        matches.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(matches)
    }
}
