//! Remote execution requests, results and bastion assignments

use serde::{Deserialize, Serialize};

use crate::types::{MciId, SubGroupId, VmId};

/// Commands to run on every selected VM, in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    /// Override the login user recorded on the VM
    #[serde(default)]
    pub user_name: Option<String>,
    pub commands: Vec<String>,
}

/// A file to copy to every selected VM
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransferRequest {
    pub file_name: String,
    /// Destination directory on the VM
    pub target_path: String,
    pub payload: Vec<u8>,
}

impl FileTransferRequest {
    /// Full destination path on the VM
    pub fn destination(&self) -> String {
        let dir = self.target_path.trim_end_matches('/');
        if dir.is_empty() {
            format!("/{}", self.file_name)
        } else {
            format!("{}/{}", dir, self.file_name)
        }
    }
}

impl std::fmt::Debug for FileTransferRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTransferRequest")
            .field("file_name", &self.file_name)
            .field("target_path", &self.target_path)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Narrows a remote-execution call to one SubGroup or one VM.
///
/// An empty filter selects the whole MCI. When both are set the VM must
/// belong to the SubGroup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetFilter {
    #[serde(default)]
    pub sub_group: Option<SubGroupId>,
    #[serde(default)]
    pub vm: Option<VmId>,
}

impl TargetFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn sub_group(id: SubGroupId) -> Self {
        Self {
            sub_group: Some(id),
            vm: None,
        }
    }

    pub fn vm(id: VmId) -> Self {
        Self {
            sub_group: None,
            vm: Some(id),
        }
    }
}

/// Output of one command on one VM
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<u32>,
}

/// Per-VM result of a command or file transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub mci_id: MciId,
    pub vm_id: VmId,
    pub vm_ip: Option<String>,
    #[serde(default)]
    pub outputs: Vec<CommandOutput>,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A VM acting as SSH relay
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BastionNode {
    pub mci_id: MciId,
    pub vm_id: VmId,
}

/// Bastion nodes serving one VNet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnetBastions {
    pub vnet_id: String,
    pub nodes: Vec<BastionNode>,
}
