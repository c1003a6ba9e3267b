use chrono::Utc;
use sqlx::Row;

use cswflow_core::domain::flow::{ApprovalFlowDefinition, DivisionId, EmployeeId, FlowStep};

use super::{FlowRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFlowRepository {
    pool: DbPool,
}

impl SqlFlowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<E: std::fmt::Display>(error: E) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

#[async_trait::async_trait]
impl FlowRepository for SqlFlowRepository {
    async fn find_by_division(
        &self,
        division_id: &DivisionId,
    ) -> Result<Option<ApprovalFlowDefinition>, RepositoryError> {
        let exists: Option<String> =
            sqlx::query_scalar("SELECT division_id FROM division_flow WHERE division_id = ?")
                .bind(&division_id.0)
                .fetch_optional(&self.pool)
                .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT step_order, approver_id, approver_name, approver_position
             FROM division_flow_step WHERE division_id = ? ORDER BY step_order ASC",
        )
        .bind(&division_id.0)
        .fetch_all(&self.pool)
        .await?;

        let steps = rows
            .iter()
            .map(|row| {
                let order: i64 = row.try_get("step_order").map_err(decode)?;
                let approver_id: String = row.try_get("approver_id").map_err(decode)?;
                let approver_name: String = row.try_get("approver_name").map_err(decode)?;
                let approver_position: String =
                    row.try_get("approver_position").map_err(decode)?;
                Ok(FlowStep {
                    order: u32::try_from(order).map_err(|_| {
                        RepositoryError::Decode(format!("step_order {order} out of range"))
                    })?,
                    approver_id: EmployeeId(approver_id),
                    approver_name,
                    approver_position,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(Some(ApprovalFlowDefinition { division_id: division_id.clone(), steps }))
    }

    /// Replace the division's configured chain wholesale. Existing requests
    /// are untouched: they copied the chain at creation.
    async fn save(&self, flow: ApprovalFlowDefinition) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO division_flow (division_id, updated_at)
             VALUES (?, ?)
             ON CONFLICT(division_id) DO UPDATE SET updated_at = excluded.updated_at",
        )
        .bind(&flow.division_id.0)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM division_flow_step WHERE division_id = ?")
            .bind(&flow.division_id.0)
            .execute(&mut *tx)
            .await?;

        for step in &flow.steps {
            sqlx::query(
                "INSERT INTO division_flow_step (division_id, step_order, approver_id,
                                                 approver_name, approver_position)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&flow.division_id.0)
            .bind(i64::from(step.order))
            .bind(&step.approver_id.0)
            .bind(&step.approver_name)
            .bind(&step.approver_position)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cswflow_core::domain::flow::{ApprovalFlowDefinition, DivisionId, EmployeeId, FlowStep};

    use super::SqlFlowRepository;
    use crate::repositories::FlowRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn flow(division: &str, approvers: &[&str]) -> ApprovalFlowDefinition {
        ApprovalFlowDefinition {
            division_id: DivisionId(division.to_string()),
            steps: approvers
                .iter()
                .enumerate()
                .map(|(index, id)| FlowStep {
                    order: index as u32 + 1,
                    approver_id: EmployeeId((*id).to_string()),
                    approver_name: format!("Approver {id}"),
                    approver_position: "Department Head".to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trips_the_definition() {
        let pool = setup().await;
        let repo = SqlFlowRepository::new(pool);
        let definition = flow("div-finance", &["e-1", "e-2", "e-3"]);

        repo.save(definition.clone()).await.expect("save");
        let found = repo
            .find_by_division(&DivisionId("div-finance".to_string()))
            .await
            .expect("find")
            .expect("exists");

        assert_eq!(found, definition);
    }

    #[tokio::test]
    async fn unknown_division_yields_none() {
        let pool = setup().await;
        let repo = SqlFlowRepository::new(pool);

        let found =
            repo.find_by_division(&DivisionId("div-ghost".to_string())).await.expect("find");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn save_replaces_the_previous_chain() {
        let pool = setup().await;
        let repo = SqlFlowRepository::new(pool);

        repo.save(flow("div-finance", &["e-1", "e-2"])).await.expect("first save");
        repo.save(flow("div-finance", &["e-9"])).await.expect("second save");

        let found = repo
            .find_by_division(&DivisionId("div-finance".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(found.steps.len(), 1);
        assert_eq!(found.steps[0].approver_id.0, "e-9");
    }
}
