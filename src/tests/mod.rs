//! Integration and unit tests for the bhapi application.
//!
//! Every API test builds the full router over a throwaway SQLite database and drives it
//! with `tower::ServiceExt::oneshot`, acting as the users created in [`common`].
//!
//! ## Test Modules
//!
//! - **common**: shared application setup and request helpers
//! - **assetgrouptags_tests**: tags, selectors, members and history
//! - **fileingest_tests**: upload jobs, the datapipe and the idle timeout
//! - **savedqueries_tests**: saved-query CRUD, sharing, import and export
//! - **entities_tests**: entity info and relationship endpoints, ETAC filtering
//! - **dataquality_tests**: completeness and data-quality statistics
//! - **admin_tests**: analysis requests, parameters, audit log and environment access
//! - **graph_tests**: the SQLite graph store and the ingest pipeline
//! - **error_tests**: error envelope and authentication
//! - **config_tests**: configuration defaults and validation
//! - **health_api_tests**: health, readiness, metrics and version endpoints
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test
//! cargo test savedqueries_tests
//! ```

pub mod common;

pub mod assetgrouptags_tests;
pub mod fileingest_tests;
pub mod graph_tests;
pub mod health_api_tests;
pub mod savedqueries_tests;
