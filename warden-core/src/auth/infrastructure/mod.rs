//! Adapters for the authentication ports
//!
//! In-memory repositories back tests and single-process deployments. The
//! PostgreSQL adapters are behind the `database` feature.

pub mod repositories;
