//! Core types for the Portico gateway: configuration, error taxonomy,
//! response envelope, plugin manifest / registry snapshot data model,
//! path resolution, and readiness state.

pub mod config;
pub mod envelope;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod readiness;
pub mod snapshot;
