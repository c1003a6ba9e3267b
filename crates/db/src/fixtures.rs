use chrono::Utc;

use cswflow_core::domain::flow::{ApprovalFlowDefinition, DivisionId, EmployeeId, FlowStep};
use cswflow_core::domain::request::{
    CategoryId, PayloadLimits, RequestId, RequestPayload, RequesterSnapshot, ServiceRequest,
};
use cswflow_core::history::ActorSnapshot;

use crate::repositories::{
    FlowRepository, RepositoryError, RequestRepository, SqlFlowRepository, SqlRequestRepository,
};
use crate::DbPool;

const SEED_REQUEST_IDS: &[&str] = &["csw-seed-0001", "csw-seed-0002", "csw-seed-0003"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub divisions: usize,
    pub requests: usize,
    pub skipped: usize,
}

/// Deterministic demo dataset: two configured divisions and three requests
/// parked at interesting points of the lifecycle (fresh, mid-chain,
/// rejected). Loading twice is a no-op for requests that already exist.
pub struct SeedDataset;

impl SeedDataset {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let flows = SqlFlowRepository::new(pool.clone());
        let requests = SqlRequestRepository::new(pool.clone());

        let division_flows = [people_operations_flow(), engineering_flow()];
        for flow in &division_flows {
            flows.save(flow.clone()).await?;
        }

        let mut inserted = 0;
        let mut skipped = 0;
        for request in seed_requests()? {
            if requests.find_by_id(&request.id).await?.is_some() {
                skipped += 1;
                continue;
            }
            requests.insert_new(&request).await?;
            inserted += 1;
        }

        Ok(SeedResult { divisions: division_flows.len(), requests: inserted, skipped })
    }
}

fn people_operations_flow() -> ApprovalFlowDefinition {
    ApprovalFlowDefinition {
        division_id: DivisionId("people-operations".to_string()),
        steps: vec![
            flow_step(1, "e-spv-01", "Dina Paramita", "Team Supervisor"),
            flow_step(2, "e-hrd-01", "Agus Salim", "HR Division Head"),
        ],
    }
}

fn engineering_flow() -> ApprovalFlowDefinition {
    ApprovalFlowDefinition {
        division_id: DivisionId("engineering".to_string()),
        steps: vec![
            flow_step(1, "e-lead-01", "Maya Kusuma", "Tech Lead"),
            flow_step(2, "e-em-01", "Bimo Nugroho", "Engineering Manager"),
            flow_step(3, "e-vpe-01", "Ratna Dewi", "VP Engineering"),
        ],
    }
}

fn flow_step(order: u32, id: &str, name: &str, position: &str) -> FlowStep {
    FlowStep {
        order,
        approver_id: EmployeeId(id.to_string()),
        approver_name: name.to_string(),
        approver_position: position.to_string(),
    }
}

fn seed_error<E: std::fmt::Display>(error: E) -> RepositoryError {
    RepositoryError::Decode(format!("seed fixture: {error}"))
}

fn seed_requests() -> Result<Vec<ServiceRequest>, RepositoryError> {
    let limits = PayloadLimits::default();
    let now = Utc::now();

    let fresh = ServiceRequest::create(
        RequestId(SEED_REQUEST_IDS[0].to_string()),
        requester("e-eng-21", "Putri Maharani", "Software Engineer", "engineering"),
        payload(
            "it-access",
            "Staging database credentials expired mid-sprint",
            "The rotation job revoked the shared service account before replacements landed",
            "Provision individual credentials for the team",
        ),
        &limits,
        &engineering_flow(),
        now,
    )
    .map_err(seed_error)?;

    let mut mid_chain = ServiceRequest::create(
        RequestId(SEED_REQUEST_IDS[1].to_string()),
        requester("e-eng-34", "Hendra Gunawan", "Site Reliability Engineer", "engineering"),
        payload(
            "procurement",
            "On-call phones are out of warranty and failing",
            "Three devices rebooted during incidents last month",
            "Replace the four on-call handsets",
        ),
        &limits,
        &engineering_flow(),
        now,
    )
    .map_err(seed_error)?;
    mid_chain
        .approve(
            &ActorSnapshot {
                actor_id: EmployeeId("e-lead-01".to_string()),
                name: "Maya Kusuma".to_string(),
                role: "Tech Lead".to_string(),
            },
            1,
            Some("verified the incident reports"),
            now,
        )
        .map_err(seed_error)?;

    let mut rejected = ServiceRequest::create(
        RequestId(SEED_REQUEST_IDS[2].to_string()),
        requester("e-po-07", "Lukman Hakim", "Recruiter", "people-operations"),
        payload(
            "office-services",
            "Interview rooms double-booked every Thursday",
            "The booking tool allows overlapping reservations for room 2.4",
            "Add a second interview room to the pool",
        ),
        &limits,
        &people_operations_flow(),
        now,
    )
    .map_err(seed_error)?;
    rejected
        .reject(
            &ActorSnapshot {
                actor_id: EmployeeId("e-spv-01".to_string()),
                name: "Dina Paramita".to_string(),
                role: "Team Supervisor".to_string(),
            },
            1,
            "room 3.1 already covers Thursdays; fix the tool instead",
            now,
        )
        .map_err(seed_error)?;

    Ok(vec![fresh, mid_chain, rejected])
}

fn requester(id: &str, name: &str, position: &str, division: &str) -> RequesterSnapshot {
    RequesterSnapshot {
        employee_id: EmployeeId(id.to_string()),
        name: name.to_string(),
        position: position.to_string(),
        division: DivisionId(division.to_string()),
    }
}

fn payload(category: &str, situation: &str, information: &str, solution: &str) -> RequestPayload {
    RequestPayload {
        category: CategoryId(category.to_string()),
        situation: situation.to_string(),
        information: information.to_string(),
        solution: solution.to_string(),
    }
}
