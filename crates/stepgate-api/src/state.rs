//! Application state wiring the workflow service to its infrastructure.
//!
//! `WorkflowService` is generic over the store and notifier ports; AppState
//! pins it to the SQLite store and the configured notifier.

use std::sync::Arc;

use stepgate_core::service::WorkflowService;
use stepgate_infra::config::{load_global_config, resolve_data_dir};
use stepgate_infra::notify::ConfiguredNotifier;
use stepgate_infra::sqlite::pool::{DatabasePool, database_url};
use stepgate_infra::sqlite::SqliteStore;
use stepgate_infra::tasks::{builtin_compensations, builtin_executor};

/// Concrete service type pinned to infra implementations.
pub type ConcreteWorkflowService = WorkflowService<SqliteStore, ConfiguredNotifier>;

/// Shared application state used by every CLI command.
#[derive(Clone)]
pub struct AppState {
    pub workflow_service: Arc<ConcreteWorkflowService>,
}

impl AppState {
    /// Initialize the application state: load config, connect to DB, wire services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_global_config(&data_dir).await;

        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;
        let store = SqliteStore::new(db_pool);
        let notifier = ConfiguredNotifier::from_config(&config.notifications);

        let workflow_service = WorkflowService::new(
            Arc::new(store),
            Arc::new(notifier),
            builtin_executor(),
            builtin_compensations(),
            config.engine.clone(),
        );

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");

        Ok(Self {
            workflow_service: Arc::new(workflow_service),
        })
    }
}
