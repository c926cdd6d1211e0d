//! HTTP surface of the Portico gateway.
//!
//! Wires the registry, event bus, and metrics crates into an axum server:
//! middleware chain, plugin route table, mount orchestrator, request
//! dispatcher, SSE fan-out, and the core-owned endpoints.

pub mod backend;
pub mod cors;
pub mod dispatch;
pub mod handlers;
pub mod middleware;
pub mod mount;
pub mod platform;
pub mod reply;
pub mod router;
pub mod server;
pub mod sse;
pub mod state;
pub mod tasks;

pub use backend::{EchoBackend, EntryHandle, ExecuteBackend, ExecuteRequest, ExecuteResult};
pub use mount::MountOrchestrator;
pub use server::{Gateway, build_router};
pub use state::AppState;
