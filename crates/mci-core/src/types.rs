//! Core domain types: identifiers and the VM/MCI state machine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Validate a user supplied identifier and return its lower-cased form.
///
/// Ids start with a letter, contain only lower-case letters, digits and
/// `-`, and do not end with `-`.
pub fn validate_id(kind: &'static str, raw: &str) -> Result<String, ValidationError> {
    let id = raw.trim().to_lowercase();
    let invalid = |reason| ValidationError::InvalidId {
        kind,
        id: raw.to_string(),
        reason,
    };

    if id.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if id.len() > 63 {
        return Err(invalid("must be at most 63 characters"));
    }
    if !id.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(invalid("must start with a letter"));
    }
    if id.ends_with('-') {
        return Err(invalid("must not end with '-'"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid("may only contain letters, digits and '-'"));
    }
    Ok(id)
}

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an id that is already known to be valid
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Validate and normalise a user supplied id
            pub fn parse(raw: &str) -> Result<Self, ValidationError> {
                validate_id($kind, raw).map(Self)
            }

            /// Get the raw id string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

resource_id!(
    /// Tenant boundary identifier
    NamespaceId,
    "namespace"
);
resource_id!(
    /// Multi-cloud infrastructure (fleet) identifier
    MciId,
    "mci"
);
resource_id!(
    /// SubGroup identifier, unique within an MCI
    SubGroupId,
    "subgroup"
);
resource_id!(
    /// VM identifier, unique within an MCI
    VmId,
    "vm"
);
resource_id!(
    /// Registered SSH key identifier, unique within a namespace
    SshKeyId,
    "sshKey"
);

/// Lifecycle status of a single VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmStatus {
    /// Being provisioned
    Creating,
    /// Running and bootstrapped
    Running,
    /// Suspended at the provider
    Suspended,
    /// Reboot in progress
    Rebooting,
    /// Termination requested, not yet confirmed
    Terminating,
    /// Confirmed terminated
    Terminated,
    /// Unrecoverable driver or bootstrap error
    Failed,
    /// No final result was recorded before the operation deadline
    Unknown,
}

impl VmStatus {
    /// `Terminated` and `Failed` are final for a VM
    pub fn is_terminal(self) -> bool {
        matches!(self, VmStatus::Terminated | VmStatus::Failed)
    }

    /// States that are expected to change without further requests
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            VmStatus::Creating | VmStatus::Rebooting | VmStatus::Terminating | VmStatus::Unknown
        )
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmStatus::Creating => "Creating",
            VmStatus::Running => "Running",
            VmStatus::Suspended => "Suspended",
            VmStatus::Rebooting => "Rebooting",
            VmStatus::Terminating => "Terminating",
            VmStatus::Terminated => "Terminated",
            VmStatus::Failed => "Failed",
            VmStatus::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Control action applied to one VM or fanned out over an MCI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmAction {
    Suspend,
    Resume,
    Reboot,
    Terminate,
}

impl VmAction {
    /// Status the VM settles in once the action completes
    pub fn target_status(self) -> VmStatus {
        match self {
            VmAction::Suspend => VmStatus::Suspended,
            VmAction::Resume | VmAction::Reboot => VmStatus::Running,
            VmAction::Terminate => VmStatus::Terminated,
        }
    }

    /// Whether the action may be applied to a VM in `status`
    pub fn permits(self, status: VmStatus) -> bool {
        match self {
            VmAction::Suspend | VmAction::Reboot => status == VmStatus::Running,
            VmAction::Resume => status == VmStatus::Suspended,
            VmAction::Terminate => matches!(
                status,
                VmStatus::Running | VmStatus::Suspended | VmStatus::Rebooting | VmStatus::Unknown
            ),
        }
    }
}

impl fmt::Display for VmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmAction::Suspend => "suspend",
            VmAction::Resume => "resume",
            VmAction::Reboot => "reboot",
            VmAction::Terminate => "terminate",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for VmAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "suspend" => Ok(VmAction::Suspend),
            "resume" => Ok(VmAction::Resume),
            "reboot" => Ok(VmAction::Reboot),
            "terminate" => Ok(VmAction::Terminate),
            other => Err(format!(
                "unknown action '{}' (expected suspend, resume, reboot or terminate)",
                other
            )),
        }
    }
}

/// Aggregate status of an MCI, derived from its VMs at read time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MciStatus {
    /// Every VM is running
    Running,
    /// Every VM is suspended
    Suspended,
    /// Healthy VMs in mixed states
    Partial,
    /// At least one VM failed
    PartialFailure,
    /// At least one VM is in a transitional state
    InProgress,
    /// Every VM is terminated
    Terminated,
    /// The MCI has no VMs
    Empty,
}

impl fmt::Display for MciStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MciStatus::Running => "Running",
            MciStatus::Suspended => "Suspended",
            MciStatus::Partial => "Partial",
            MciStatus::PartialFailure => "PartialFailure",
            MciStatus::InProgress => "InProgress",
            MciStatus::Terminated => "Terminated",
            MciStatus::Empty => "Empty",
        };
        write!(f, "{}", s)
    }
}

/// Per-state VM counts of an MCI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub total: u32,
    pub creating: u32,
    pub running: u32,
    pub suspended: u32,
    pub rebooting: u32,
    pub terminating: u32,
    pub terminated: u32,
    pub failed: u32,
    pub unknown: u32,
}

impl StatusCount {
    /// Record one VM status
    pub fn add(&mut self, status: VmStatus) {
        self.total += 1;
        match status {
            VmStatus::Creating => self.creating += 1,
            VmStatus::Running => self.running += 1,
            VmStatus::Suspended => self.suspended += 1,
            VmStatus::Rebooting => self.rebooting += 1,
            VmStatus::Terminating => self.terminating += 1,
            VmStatus::Terminated => self.terminated += 1,
            VmStatus::Failed => self.failed += 1,
            VmStatus::Unknown => self.unknown += 1,
        }
    }

    /// Fold the counts into one MCI status.
    ///
    /// Precedence, highest first: any failure, any transitional VM, all
    /// terminated, all running, all suspended, otherwise partial.
    pub fn aggregate(&self) -> MciStatus {
        if self.total == 0 {
            MciStatus::Empty
        } else if self.failed > 0 {
            MciStatus::PartialFailure
        } else if self.creating + self.terminating + self.rebooting + self.unknown > 0 {
            MciStatus::InProgress
        } else if self.terminated == self.total {
            MciStatus::Terminated
        } else if self.running == self.total {
            MciStatus::Running
        } else if self.suspended == self.total {
            MciStatus::Suspended
        } else {
            MciStatus::Partial
        }
    }
}

impl FromIterator<VmStatus> for StatusCount {
    fn from_iter<I: IntoIterator<Item = VmStatus>>(iter: I) -> Self {
        let mut count = StatusCount::default();
        for status in iter {
            count.add(status);
        }
        count
    }
}

/// Compute an MCI's aggregate status from its VMs' statuses
pub fn aggregate_status<I: IntoIterator<Item = VmStatus>>(statuses: I) -> MciStatus {
    statuses.into_iter().collect::<StatusCount>().aggregate()
}
