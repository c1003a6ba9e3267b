use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DivisionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmployeeId(pub String);

/// One slot in a division's configured approver chain. `order` is 1-based and
/// doubles as the approval level a request copy of this step will carry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStep {
    pub order: u32,
    pub approver_id: EmployeeId,
    pub approver_name: String,
    pub approver_position: String,
}

/// The approver chain template owned by a division. Requests copy it at
/// creation time; editing the definition afterwards never touches requests
/// already in flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFlowDefinition {
    pub division_id: DivisionId,
    pub steps: Vec<FlowStep>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowConfigError {
    #[error("division `{division_id}` has no configured approvers")]
    EmptyFlow { division_id: String },
    #[error("division `{division_id}` configures approver order {order} more than once")]
    DuplicateOrder { division_id: String, order: u32 },
    #[error("division `{division_id}` approver orders must run 1..={expected_len}, found {order}")]
    NonContiguousOrder { division_id: String, order: u32, expected_len: usize },
}

impl ApprovalFlowDefinition {
    /// A division with zero approvers, a duplicated order, or a gap in the
    /// order sequence cannot originate requests.
    pub fn validate(&self) -> Result<(), FlowConfigError> {
        if self.steps.is_empty() {
            return Err(FlowConfigError::EmptyFlow { division_id: self.division_id.0.clone() });
        }

        let mut orders: Vec<u32> = self.steps.iter().map(|step| step.order).collect();
        orders.sort_unstable();
        for (index, order) in orders.iter().enumerate() {
            let expected = index as u32 + 1;
            if *order == expected {
                continue;
            }
            if index > 0 && orders[index - 1] == *order {
                return Err(FlowConfigError::DuplicateOrder {
                    division_id: self.division_id.0.clone(),
                    order: *order,
                });
            }
            return Err(FlowConfigError::NonContiguousOrder {
                division_id: self.division_id.0.clone(),
                order: *order,
                expected_len: self.steps.len(),
            });
        }

        Ok(())
    }

    /// Steps sorted by `order`, the sequence a new request snapshots.
    pub fn steps_in_order(&self) -> Vec<&FlowStep> {
        let mut steps: Vec<&FlowStep> = self.steps.iter().collect();
        steps.sort_by_key(|step| step.order);
        steps
    }
}
