//! # bhapi Backend Library
//!
//! HTTP API for asset-group tags, file ingest jobs, data-quality statistics, saved
//! queries and AD/Azure entity lookups, backed by a relational store and a graph store.
//!
//! ## Architecture
//!
//! The application is built using:
//! - **Axum**: web framework for the HTTP server and routing
//! - **SQLx**: asynchronous SQLite access for the relational store and the reference graph
//! - **Tokio**: async runtime for request handling and the background ingest loops
//! - **Serde**: serialization for JSON APIs and ingest documents
//!
//! ## Core Components
//!
//! - [`access_control`]: environment targeted access control (ETAC)
//! - [`analysis`]: post-ingest tag membership rebuild and data-quality snapshots
//! - [`config`]: application configuration management
//! - [`db`]: schema initialization and relational queries
//! - [`error`]: centralized error handling and the JSON error envelope
//! - [`graph`]: the `GraphQuery` interface and its SQLite implementation
//! - [`ingest`]: upload validation, job lifecycle and the datapipe
//! - [`metrics`]: in-process counters
//! - [`middleware`]: request ids, auth, validation and security headers
//! - [`model`]: records, query-parameter filters and response wrappers
//! - [`routes`]: HTTP API endpoint handlers
//! - [`state`]: shared application state

pub mod access_control;
pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod metrics;
pub mod middleware;
pub mod model;
pub mod routes;
pub mod state;

#[cfg(test)]
mod tests;
