//! Control protocol between the CLI and the orchestrator daemon
//!
//! One JSON object per line over TCP on localhost. Every request gets
//! exactly one response line.

use serde::{Deserialize, Serialize};

use crate::model::{
    ActionReport, CommandRequest, CommandResult, ConnectionConfig, DeleteOption, DeleteReport,
    FileTransferRequest, MciAccessInfo, MciDynamicRequest, MciInfo, MciRequest, MciStatusInfo,
    MciView, Namespace, SshKey, TargetFilter, Vm, VmActionResult, VmDeleteResult, VmFilter,
    VmTemplate, VnetBastions,
};
use crate::types::{VmAction, VmId};

/// Request from a client to the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiRequest {
    /// Keepalive
    Ping,

    /// Daemon status
    GetStatus,

    /// Stop the daemon
    Shutdown,

    CreateNamespace {
        ns: String,
        #[serde(default)]
        description: String,
    },
    GetNamespace {
        ns: String,
    },
    ListNamespaces,
    DeleteNamespace {
        ns: String,
    },

    RegisterConnection {
        connection: ConnectionConfig,
    },
    GetConnection {
        name: String,
    },
    ListConnections,

    RegisterSshKey {
        ns: String,
        key: SshKey,
    },
    ListSshKeys {
        ns: String,
    },
    DeleteSshKey {
        ns: String,
        key_id: String,
    },

    /// Create an MCI from fully specified templates
    CreateMci {
        ns: String,
        request: MciRequest,
    },

    /// Create an MCI from `provider+region+spec` templates
    CreateMciDynamic {
        ns: String,
        request: MciDynamicRequest,
    },

    /// Add a new SubGroup to an existing MCI
    AddSubGroup {
        ns: String,
        mci: String,
        template: VmTemplate,
    },

    /// Add `count` replicas to an existing SubGroup
    ScaleOutSubGroup {
        ns: String,
        mci: String,
        sub_group: String,
        count: i64,
    },

    GetMci {
        ns: String,
        mci: String,
        #[serde(default)]
        view: MciView,
        #[serde(default)]
        filter: Option<VmFilter>,
    },
    ListMci {
        ns: String,
        #[serde(default)]
        view: MciView,
        #[serde(default)]
        filter: Option<VmFilter>,
    },
    GetVm {
        ns: String,
        mci: String,
        vm: String,
    },
    ListVms {
        ns: String,
        mci: String,
        #[serde(default)]
        filter: Option<VmFilter>,
    },

    /// Apply an action to every VM of an MCI
    ControlMci {
        ns: String,
        mci: String,
        action: VmAction,
    },
    ControlVm {
        ns: String,
        mci: String,
        vm: String,
        action: VmAction,
    },

    /// Drop the records of failed VMs
    RefineMci {
        ns: String,
        mci: String,
    },

    DeleteVm {
        ns: String,
        mci: String,
        vm: String,
        #[serde(default)]
        option: DeleteOption,
    },
    DeleteMci {
        ns: String,
        mci: String,
        #[serde(default)]
        option: DeleteOption,
    },
    DeleteAllMci {
        ns: String,
        #[serde(default)]
        option: DeleteOption,
    },

    SendCommand {
        ns: String,
        mci: String,
        #[serde(default)]
        filter: TargetFilter,
        request: CommandRequest,
    },
    TransferFile {
        ns: String,
        mci: String,
        #[serde(default)]
        filter: TargetFilter,
        request: FileTransferRequest,
    },

    /// Make `bastion_vm` a bastion for the VNet of `vm`
    SetBastion {
        ns: String,
        mci: String,
        vm: String,
        bastion_vm: String,
    },
    /// Bastions serving the VNet of `vm`
    GetBastions {
        ns: String,
        mci: String,
        vm: String,
    },
    ListBastions {
        ns: String,
    },
    /// Remove `bastion_vm` from every VNet it serves
    RemoveBastion {
        ns: String,
        mci: String,
        bastion_vm: String,
    },
}

/// Response from the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiResponse {
    Pong,

    /// Generic success
    Ok,

    /// Request failed as a whole
    Error { kind: String, message: String },

    Status(DaemonStatus),

    Namespace(Namespace),
    Namespaces { namespaces: Vec<Namespace> },

    Connection(ConnectionConfig),
    Connections { connections: Vec<ConnectionConfig> },

    SshKeys { keys: Vec<SshKeySummary> },

    Mci(MciInfo),
    Mcis { mcis: Vec<MciInfo> },
    MciStatus(MciStatusInfo),
    MciStatuses { statuses: Vec<MciStatusInfo> },
    AccessInfo(MciAccessInfo),
    AccessInfos { infos: Vec<MciAccessInfo> },
    Ids { ids: Vec<String> },

    Vm(Vm),
    Vms { vms: Vec<Vm> },

    ActionReport(ActionReport),
    VmActionResult(VmActionResult),

    Refined { removed: Vec<VmId> },

    DeleteReport(DeleteReport),
    DeleteReports { reports: Vec<DeleteReport> },
    VmDeleted(VmDeleteResult),

    CommandResults { results: Vec<CommandResult> },

    Bastions(VnetBastions),
    BastionList { vnets: Vec<VnetBastions> },
}

impl ApiResponse {
    /// Build an error response
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ApiResponse::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Daemon status information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub version: String,
    pub bind_address: String,
    pub namespace_count: usize,
    pub connection_count: usize,
    /// Providers with a registered driver
    pub providers: Vec<String>,
}

/// SSH key listing entry, without the private key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKeySummary {
    pub id: String,
    pub user_name: String,
    pub description: String,
}

impl From<&SshKey> for SshKeySummary {
    fn from(key: &SshKey) -> Self {
        Self {
            id: key.id.clone(),
            user_name: key.user_name.clone(),
            description: key.description.clone(),
        }
    }
}
