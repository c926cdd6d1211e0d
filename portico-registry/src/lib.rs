//! Plugin registry: discovery provider contract, the filesystem provider,
//! the snapshot store, manifest validation, and the discovery client that
//! ties them together.

pub mod client;
pub mod provider;
pub mod store;
pub mod validator;

pub use client::{ChangeSet, DiscoveryClient, RefreshOutcome};
pub use provider::{DiscoveredSet, DiscoveryProvider, FsDiscoveryProvider, RedisStatus};
pub use store::SnapshotStore;
