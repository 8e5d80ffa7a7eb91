//! Error taxonomy for fleet operations
//!
//! Pre-flight problems surface as [`ValidationError`]s and abort a request
//! before anything is attempted. Driver, remote and retry failures are
//! per-VM: they end up in that VM's status or result record and only reach
//! the caller as an operation error when every VM failed.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the fleet orchestrator
#[derive(Error, Debug)]
pub enum MciError {
    /// Request rejected before any work started
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Cloud driver error
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Record store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Remote session error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Every VM targeted by a fan-out operation failed
    #[error("All {} VM(s) of MCI {mci_id} failed: {}", failures.len(), failures.join("; "))]
    AllVmsFailed {
        mci_id: String,
        failures: Vec<String>,
    },
}

/// Request validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Identifier does not follow the naming rule
    #[error("Invalid {kind} id '{id}': {reason}")]
    InvalidId {
        kind: &'static str,
        id: String,
        reason: &'static str,
    },

    /// Namespace does not exist
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    /// Namespace already exists
    #[error("Namespace already exists: {0}")]
    NamespaceExists(String),

    /// Namespace still owns records
    #[error("Namespace {ns} is not empty: {count} record(s) remain")]
    NamespaceNotEmpty { ns: String, count: usize },

    /// MCI does not exist
    #[error("MCI not found: {ns}/{mci}")]
    MciNotFound { ns: String, mci: String },

    /// MCI already exists
    #[error("MCI already exists: {ns}/{mci}")]
    MciExists { ns: String, mci: String },

    /// SubGroup does not exist
    #[error("SubGroup not found: {mci}/{sub_group}")]
    SubGroupNotFound { mci: String, sub_group: String },

    /// SubGroup already exists
    #[error("SubGroup already exists: {mci}/{sub_group}")]
    SubGroupExists { mci: String, sub_group: String },

    /// VM does not exist
    #[error("VM not found: {mci}/{vm}")]
    VmNotFound { mci: String, vm: String },

    /// Connection name is not registered
    #[error("Unknown connection: {0}")]
    ConnectionNotFound(String),

    /// No driver registered for the connection's provider
    #[error("No driver registered for provider '{0}'")]
    ProviderNotSupported(String),

    /// SSH key is not registered
    #[error("SSH key not found: {0}")]
    SshKeyNotFound(String),

    /// Replica count or delta is not positive
    #[error("Invalid replica count: {0}")]
    InvalidReplicaCount(i64),

    /// One request would add more VMs than the configured bound
    #[error("Request adds {count} VM(s), more than the maximum of {max}")]
    TooManyVms { count: u64, max: u32 },

    /// Malformed request template
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// Action is not permitted from the VM's current state
    #[error("Cannot {action} VM {vm} in state {status}")]
    IllegalTransition {
        vm: String,
        action: String,
        status: String,
    },

    /// File payload exceeds the transfer limit
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Malformed attribute filter
    #[error("Invalid filter '{0}': expected key=value")]
    InvalidFilter(String),

    /// Command request without any command
    #[error("No command given")]
    EmptyCommand,

    /// Transfer file name is empty or contains a path separator
    #[error("Invalid file name '{0}'")]
    InvalidFileName(String),
}

/// Errors reported by a cloud driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Provider does not know the instance
    #[error("Instance not found: {0}")]
    NotFound(String),

    /// Provider API rejected or failed the call
    #[error("Provider error: {0}")]
    Provider(String),

    /// The call did not complete in time
    #[error("Driver call timed out after {0:?}")]
    Timeout(Duration),

    /// Could not reach the driver service
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors from the fleet record store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Record could not be (de)serialized
    #[error("Serialization error for {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Backend failure
    #[error("Store backend error: {0}")]
    Backend(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from remote shell sessions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// VM has no reachable address
    #[error("VM {0} has no reachable address")]
    NoAddress(String),

    /// TCP/SSH connection could not be established
    #[error("Connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    /// Key was rejected
    #[error("Authentication failed for user {0}")]
    AuthenticationFailed(String),

    /// Private key could not be decoded
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    /// Session or channel failure after connecting
    #[error("Channel error: {0}")]
    Channel(String),

    /// The session did not finish in time
    #[error("Remote session timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure of a single per-VM task step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// A bounded retry loop ran out of attempts
    #[error("{step} exhausted after {attempts} attempt(s): {last}")]
    Exhausted {
        step: &'static str,
        attempts: u32,
        last: String,
    },

    /// Driver call failed
    #[error("{0}")]
    Driver(#[from] DriverError),

    /// Remote session failed
    #[error("{0}")]
    Remote(#[from] RemoteError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl MciError {
    /// Short machine-readable category, used on the control protocol
    pub fn kind(&self) -> &'static str {
        match self {
            MciError::Validation(_) => "validation",
            MciError::Driver(_) => "driver",
            MciError::Store(_) => "store",
            MciError::Remote(_) => "remote",
            MciError::Config(_) => "config",
            MciError::AllVmsFailed { .. } => "all_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_failed_message_lists_failures() {
        let err = MciError::AllVmsFailed {
            mci_id: "mci01".to_string(),
            failures: vec!["g1-1: boom".to_string(), "g1-2: bang".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("All 2 VM(s)"));
        assert!(msg.contains("g1-1: boom; g1-2: bang"));
        assert_eq!(err.kind(), "all_failed");
    }

    #[test]
    fn test_exhausted_message() {
        let err = TaskError::Exhausted {
            step: "agent bootstrap",
            attempts: 30,
            last: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "agent bootstrap exhausted after 30 attempt(s): connection refused"
        );
    }
}
