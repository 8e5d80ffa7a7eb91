//! mci-core: Core abstractions and configuration for multi-cloud VM fleets
//!
//! This crate provides the fleet data model, the VM/MCI state machine,
//! the error taxonomy, configuration, the control protocol, and the
//! collaborator traits (cloud driver, record store, remote shell) the
//! orchestrator is built against.

pub mod api;
pub mod config;
pub mod error;
pub mod model;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{
    ConfigError, DriverError, MciError, RemoteError, StoreError, TaskError, ValidationError,
};
pub use types::{
    aggregate_status, MciId, MciStatus, NamespaceId, SshKeyId, StatusCount, SubGroupId, VmAction,
    VmId, VmStatus,
};
