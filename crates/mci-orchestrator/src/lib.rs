//! mci-orchestrator: Multi-cloud VM fleet orchestrator
//!
//! Provisions groups of VMs (MCIs) across cloud connections, tracks their
//! lifecycle, scales them out, tears them down, and runs commands on them
//! over SSH. Per-VM work fans out concurrently under a bounded parallelism
//! and an operation deadline. A JSON-line control server exposes every
//! operation to the CLI.

pub mod action;
pub mod connection;
pub mod driver;
pub mod fanout;
pub mod fleet;
pub mod ipc;
pub mod lifecycle;
pub mod namespace;
pub mod provision;
pub mod query;
pub mod remote;
pub mod retry;
pub mod scale;
pub mod state;
pub mod status;
pub mod store;

pub use fleet::Fleet;
pub use state::OrchestratorState;
