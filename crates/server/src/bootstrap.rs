use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use cswflow_core::audit::TracingAuditSink;
use cswflow_core::config::{AppConfig, ConfigError, LoadOptions};
use cswflow_db::repositories::{SqlFlowRepository, SqlRequestRepository};
use cswflow_db::{connect_with_settings, migrations, ApprovalService, DbPool};

pub type AppService = ApprovalService<SqlRequestRepository, SqlFlowRepository, TracingAuditSink>;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<AppService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        request_id = "unknown",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        request_id = "unknown",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        request_id = "unknown",
        "database migrations applied"
    );

    let service = Arc::new(ApprovalService::new(
        Arc::new(SqlRequestRepository::new(db_pool.clone())),
        Arc::new(SqlFlowRepository::new(db_pool.clone())),
        TracingAuditSink,
        config.limits.payload_limits(),
    ));

    Ok(Application { config, db_pool, service })
}
