use std::sync::Arc;

use crate::config::AppConfig;
use crate::graph::{GraphQuery, SqliteGraph};
use crate::metrics::Metrics;

/// The shared application state.
///
/// Cloned into every handler and background task. The relational store and the graph
/// store share one SQLite pool; the graph is reached only through [`GraphQuery`] so it
/// can be swapped out in tests.
#[derive(Clone)]
pub struct AppState {
    /// The database connection pool.
    pub db: sqlx::SqlitePool,
    /// The graph database handle.
    pub graph: Arc<dyn GraphQuery>,
    /// The application configuration.
    pub config: Arc<AppConfig>,
    /// Ingest and saved-query counters.
    pub metrics: Metrics,
}

impl AppState {
    /// Creates a new `AppState` whose graph lives on the same pool as the relational data.
    pub fn new(db: sqlx::SqlitePool, config: AppConfig) -> Self {
        let graph: Arc<dyn GraphQuery> = Arc::new(SqliteGraph::new(db.clone()));
        Self::with_graph(db, graph, config)
    }

    pub fn with_graph(db: sqlx::SqlitePool, graph: Arc<dyn GraphQuery>, config: AppConfig) -> Self {
        Self { db, graph, config: Arc::new(config), metrics: Metrics::new() }
    }

    pub fn etac_enabled(&self) -> bool {
        self.config.access_control.etac_enabled
    }
}
