//! Collaborator seams consumed by the orchestrator

mod driver;
mod remote;
mod store;

pub use driver::{CloudDriver, InstanceAction, InstanceInfo, InstanceRequest, InstanceState};
pub use remote::{RemoteShell, SshEndpoint, SshRoute};
pub use store::RecordStore;
