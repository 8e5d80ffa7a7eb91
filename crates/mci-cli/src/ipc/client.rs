//! Control protocol client for the orchestrator daemon
//!
//! One JSON request per line, one JSON response per line, over a single
//! TCP connection kept open for the lifetime of the client.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use mci_core::api::{ApiRequest, ApiResponse, DaemonStatus, SshKeySummary};
use mci_core::model::{
    ActionReport, CommandRequest, CommandResult, ConnectionConfig, DeleteOption, DeleteReport,
    FileTransferRequest, MciAccessInfo, MciDynamicRequest, MciInfo, MciRequest, MciStatusInfo,
    MciView, Namespace, SshKey, TargetFilter, Vm, VmActionResult, VmDeleteResult, VmFilter,
    VmTemplate, VnetBastions,
};
use mci_core::{VmAction, VmId};

/// Address the daemon listens on unless configured otherwise
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:1323";

/// Errors talking to the daemon
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to connect to orchestrator at {address}. Is it running? ({source})")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to orchestrator failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Orchestrator closed the connection")]
    Closed,

    #[error("Malformed message: {0}")]
    Protocol(#[from] serde_json::Error),

    /// The daemon rejected the request
    #[error("{message}")]
    Api { kind: String, message: String },

    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

impl ClientError {
    /// The daemon could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::Connect { .. })
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

fn unexpected<T>(response: ApiResponse) -> ClientResult<T> {
    Err(ClientError::Unexpected(format!("{:?}", response)))
}

/// MCI read result, shaped by the requested view
#[derive(Debug, Clone)]
pub enum MciOutput {
    Full(Vec<MciInfo>),
    Ids(Vec<String>),
    Status(Vec<MciStatusInfo>),
    Access(Vec<MciAccessInfo>),
}

impl MciOutput {
    fn from_response(response: ApiResponse) -> ClientResult<Self> {
        match response {
            ApiResponse::Mci(info) => Ok(MciOutput::Full(vec![info])),
            ApiResponse::Mcis { mcis } => Ok(MciOutput::Full(mcis)),
            ApiResponse::Ids { ids } => Ok(MciOutput::Ids(ids)),
            ApiResponse::MciStatus(status) => Ok(MciOutput::Status(vec![status])),
            ApiResponse::MciStatuses { statuses } => Ok(MciOutput::Status(statuses)),
            ApiResponse::AccessInfo(info) => Ok(MciOutput::Access(vec![info])),
            ApiResponse::AccessInfos { infos } => Ok(MciOutput::Access(infos)),
            other => unexpected(other),
        }
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

/// Client for the orchestrator control server
pub struct FleetClient {
    address: String,
    conn: Option<Connection>,
}

impl Default for FleetClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetClient {
    pub fn new() -> Self {
        Self::with_address(DEFAULT_ADDRESS)
    }

    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            conn: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&mut self) -> ClientResult<&mut Connection> {
        if self.conn.is_none() {
            tracing::debug!("Connecting to orchestrator at {}", self.address);
            let stream =
                TcpStream::connect(&self.address)
                    .await
                    .map_err(|source| ClientError::Connect {
                        address: self.address.clone(),
                        source,
                    })?;
            let (reader, writer) = stream.into_split();
            self.conn = Some(Connection {
                reader: BufReader::new(reader),
                writer: BufWriter::new(writer),
            });
        }
        self.conn.as_mut().ok_or(ClientError::Closed)
    }

    /// Send one request and read its response line.
    ///
    /// Error responses come back as [`ClientError::Api`]; a dropped
    /// connection is forgotten so the next call reconnects.
    pub async fn call(&mut self, request: ApiRequest) -> ClientResult<ApiResponse> {
        let result = self.round_trip(&request).await;
        if matches!(
            result,
            Err(ClientError::Io(_)) | Err(ClientError::Closed)
        ) {
            self.conn = None;
        }
        match result? {
            ApiResponse::Error { kind, message } => Err(ClientError::Api { kind, message }),
            response => Ok(response),
        }
    }

    async fn round_trip(&mut self, request: &ApiRequest) -> ClientResult<ApiResponse> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');

        let conn = self.connect().await?;
        conn.writer.write_all(line.as_bytes()).await?;
        conn.writer.flush().await?;

        let mut response = String::new();
        if conn.reader.read_line(&mut response).await? == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(&response)?)
    }

    /// Check whether the daemon answers at all
    pub async fn ping(&mut self) -> ClientResult<bool> {
        match self.call(ApiRequest::Ping).await {
            Ok(ApiResponse::Pong) => Ok(true),
            Ok(_) => Ok(false),
            Err(e) if e.is_unreachable() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn status(&mut self) -> ClientResult<DaemonStatus> {
        match self.call(ApiRequest::GetStatus).await? {
            ApiResponse::Status(status) => Ok(status),
            other => unexpected(other),
        }
    }

    pub async fn shutdown(&mut self) -> ClientResult<()> {
        match self.call(ApiRequest::Shutdown).await? {
            ApiResponse::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    // Namespaces

    pub async fn create_namespace(&mut self, ns: &str, description: &str) -> ClientResult<Namespace> {
        let request = ApiRequest::CreateNamespace {
            ns: ns.to_string(),
            description: description.to_string(),
        };
        match self.call(request).await? {
            ApiResponse::Namespace(namespace) => Ok(namespace),
            other => unexpected(other),
        }
    }

    pub async fn get_namespace(&mut self, ns: &str) -> ClientResult<Namespace> {
        let request = ApiRequest::GetNamespace { ns: ns.to_string() };
        match self.call(request).await? {
            ApiResponse::Namespace(namespace) => Ok(namespace),
            other => unexpected(other),
        }
    }

    pub async fn list_namespaces(&mut self) -> ClientResult<Vec<Namespace>> {
        match self.call(ApiRequest::ListNamespaces).await? {
            ApiResponse::Namespaces { namespaces } => Ok(namespaces),
            other => unexpected(other),
        }
    }

    pub async fn delete_namespace(&mut self, ns: &str) -> ClientResult<()> {
        let request = ApiRequest::DeleteNamespace { ns: ns.to_string() };
        match self.call(request).await? {
            ApiResponse::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    // Connections and keys

    pub async fn register_connection(
        &mut self,
        connection: ConnectionConfig,
    ) -> ClientResult<ConnectionConfig> {
        match self.call(ApiRequest::RegisterConnection { connection }).await? {
            ApiResponse::Connection(conn) => Ok(conn),
            other => unexpected(other),
        }
    }

    pub async fn get_connection(&mut self, name: &str) -> ClientResult<ConnectionConfig> {
        let request = ApiRequest::GetConnection {
            name: name.to_string(),
        };
        match self.call(request).await? {
            ApiResponse::Connection(conn) => Ok(conn),
            other => unexpected(other),
        }
    }

    pub async fn list_connections(&mut self) -> ClientResult<Vec<ConnectionConfig>> {
        match self.call(ApiRequest::ListConnections).await? {
            ApiResponse::Connections { connections } => Ok(connections),
            other => unexpected(other),
        }
    }

    pub async fn register_ssh_key(&mut self, ns: &str, key: SshKey) -> ClientResult<SshKeySummary> {
        let request = ApiRequest::RegisterSshKey {
            ns: ns.to_string(),
            key,
        };
        match self.call(request).await? {
            ApiResponse::SshKeys { mut keys } if keys.len() == 1 => Ok(keys.remove(0)),
            other => unexpected(other),
        }
    }

    pub async fn list_ssh_keys(&mut self, ns: &str) -> ClientResult<Vec<SshKeySummary>> {
        let request = ApiRequest::ListSshKeys { ns: ns.to_string() };
        match self.call(request).await? {
            ApiResponse::SshKeys { keys } => Ok(keys),
            other => unexpected(other),
        }
    }

    pub async fn delete_ssh_key(&mut self, ns: &str, key_id: &str) -> ClientResult<()> {
        let request = ApiRequest::DeleteSshKey {
            ns: ns.to_string(),
            key_id: key_id.to_string(),
        };
        match self.call(request).await? {
            ApiResponse::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    // Provisioning

    pub async fn create_mci(&mut self, ns: &str, request: MciRequest) -> ClientResult<MciInfo> {
        let request = ApiRequest::CreateMci {
            ns: ns.to_string(),
            request,
        };
        match self.call(request).await? {
            ApiResponse::Mci(info) => Ok(info),
            other => unexpected(other),
        }
    }

    pub async fn create_mci_dynamic(
        &mut self,
        ns: &str,
        request: MciDynamicRequest,
    ) -> ClientResult<MciInfo> {
        let request = ApiRequest::CreateMciDynamic {
            ns: ns.to_string(),
            request,
        };
        match self.call(request).await? {
            ApiResponse::Mci(info) => Ok(info),
            other => unexpected(other),
        }
    }

    pub async fn add_sub_group(
        &mut self,
        ns: &str,
        mci: &str,
        template: VmTemplate,
    ) -> ClientResult<MciInfo> {
        let request = ApiRequest::AddSubGroup {
            ns: ns.to_string(),
            mci: mci.to_string(),
            template,
        };
        match self.call(request).await? {
            ApiResponse::Mci(info) => Ok(info),
            other => unexpected(other),
        }
    }

    pub async fn scale_out(
        &mut self,
        ns: &str,
        mci: &str,
        sub_group: &str,
        count: i64,
    ) -> ClientResult<MciInfo> {
        let request = ApiRequest::ScaleOutSubGroup {
            ns: ns.to_string(),
            mci: mci.to_string(),
            sub_group: sub_group.to_string(),
            count,
        };
        match self.call(request).await? {
            ApiResponse::Mci(info) => Ok(info),
            other => unexpected(other),
        }
    }

    // Reads

    pub async fn get_mci(
        &mut self,
        ns: &str,
        mci: &str,
        view: MciView,
        filter: Option<VmFilter>,
    ) -> ClientResult<MciOutput> {
        let request = ApiRequest::GetMci {
            ns: ns.to_string(),
            mci: mci.to_string(),
            view,
            filter,
        };
        MciOutput::from_response(self.call(request).await?)
    }

    pub async fn list_mci(
        &mut self,
        ns: &str,
        view: MciView,
        filter: Option<VmFilter>,
    ) -> ClientResult<MciOutput> {
        let request = ApiRequest::ListMci {
            ns: ns.to_string(),
            view,
            filter,
        };
        MciOutput::from_response(self.call(request).await?)
    }

    pub async fn get_vm(&mut self, ns: &str, mci: &str, vm: &str) -> ClientResult<Vm> {
        let request = ApiRequest::GetVm {
            ns: ns.to_string(),
            mci: mci.to_string(),
            vm: vm.to_string(),
        };
        match self.call(request).await? {
            ApiResponse::Vm(vm) => Ok(vm),
            other => unexpected(other),
        }
    }

    pub async fn list_vms(
        &mut self,
        ns: &str,
        mci: &str,
        filter: Option<VmFilter>,
    ) -> ClientResult<Vec<Vm>> {
        let request = ApiRequest::ListVms {
            ns: ns.to_string(),
            mci: mci.to_string(),
            filter,
        };
        match self.call(request).await? {
            ApiResponse::Vms { vms } => Ok(vms),
            other => unexpected(other),
        }
    }

    // Actions

    pub async fn control_mci(
        &mut self,
        ns: &str,
        mci: &str,
        action: VmAction,
    ) -> ClientResult<ActionReport> {
        let request = ApiRequest::ControlMci {
            ns: ns.to_string(),
            mci: mci.to_string(),
            action,
        };
        match self.call(request).await? {
            ApiResponse::ActionReport(report) => Ok(report),
            other => unexpected(other),
        }
    }

    pub async fn control_vm(
        &mut self,
        ns: &str,
        mci: &str,
        vm: &str,
        action: VmAction,
    ) -> ClientResult<VmActionResult> {
        let request = ApiRequest::ControlVm {
            ns: ns.to_string(),
            mci: mci.to_string(),
            vm: vm.to_string(),
            action,
        };
        match self.call(request).await? {
            ApiResponse::VmActionResult(result) => Ok(result),
            other => unexpected(other),
        }
    }

    pub async fn refine_mci(&mut self, ns: &str, mci: &str) -> ClientResult<Vec<VmId>> {
        let request = ApiRequest::RefineMci {
            ns: ns.to_string(),
            mci: mci.to_string(),
        };
        match self.call(request).await? {
            ApiResponse::Refined { removed } => Ok(removed),
            other => unexpected(other),
        }
    }

    pub async fn delete_vm(
        &mut self,
        ns: &str,
        mci: &str,
        vm: &str,
        option: DeleteOption,
    ) -> ClientResult<VmDeleteResult> {
        let request = ApiRequest::DeleteVm {
            ns: ns.to_string(),
            mci: mci.to_string(),
            vm: vm.to_string(),
            option,
        };
        match self.call(request).await? {
            ApiResponse::VmDeleted(result) => Ok(result),
            other => unexpected(other),
        }
    }

    pub async fn delete_mci(
        &mut self,
        ns: &str,
        mci: &str,
        option: DeleteOption,
    ) -> ClientResult<DeleteReport> {
        let request = ApiRequest::DeleteMci {
            ns: ns.to_string(),
            mci: mci.to_string(),
            option,
        };
        match self.call(request).await? {
            ApiResponse::DeleteReport(report) => Ok(report),
            other => unexpected(other),
        }
    }

    pub async fn delete_all_mci(
        &mut self,
        ns: &str,
        option: DeleteOption,
    ) -> ClientResult<Vec<DeleteReport>> {
        let request = ApiRequest::DeleteAllMci {
            ns: ns.to_string(),
            option,
        };
        match self.call(request).await? {
            ApiResponse::DeleteReports { reports } => Ok(reports),
            other => unexpected(other),
        }
    }

    // Remote execution

    pub async fn send_command(
        &mut self,
        ns: &str,
        mci: &str,
        filter: TargetFilter,
        request: CommandRequest,
    ) -> ClientResult<Vec<CommandResult>> {
        let request = ApiRequest::SendCommand {
            ns: ns.to_string(),
            mci: mci.to_string(),
            filter,
            request,
        };
        match self.call(request).await? {
            ApiResponse::CommandResults { results } => Ok(results),
            other => unexpected(other),
        }
    }

    pub async fn transfer_file(
        &mut self,
        ns: &str,
        mci: &str,
        filter: TargetFilter,
        request: FileTransferRequest,
    ) -> ClientResult<Vec<CommandResult>> {
        let request = ApiRequest::TransferFile {
            ns: ns.to_string(),
            mci: mci.to_string(),
            filter,
            request,
        };
        match self.call(request).await? {
            ApiResponse::CommandResults { results } => Ok(results),
            other => unexpected(other),
        }
    }

    // Bastions

    pub async fn set_bastion(
        &mut self,
        ns: &str,
        mci: &str,
        vm: &str,
        bastion_vm: &str,
    ) -> ClientResult<VnetBastions> {
        let request = ApiRequest::SetBastion {
            ns: ns.to_string(),
            mci: mci.to_string(),
            vm: vm.to_string(),
            bastion_vm: bastion_vm.to_string(),
        };
        match self.call(request).await? {
            ApiResponse::Bastions(bastions) => Ok(bastions),
            other => unexpected(other),
        }
    }

    pub async fn get_bastions(&mut self, ns: &str, mci: &str, vm: &str) -> ClientResult<VnetBastions> {
        let request = ApiRequest::GetBastions {
            ns: ns.to_string(),
            mci: mci.to_string(),
            vm: vm.to_string(),
        };
        match self.call(request).await? {
            ApiResponse::Bastions(bastions) => Ok(bastions),
            other => unexpected(other),
        }
    }

    pub async fn list_bastions(&mut self, ns: &str) -> ClientResult<Vec<VnetBastions>> {
        let request = ApiRequest::ListBastions { ns: ns.to_string() };
        match self.call(request).await? {
            ApiResponse::BastionList { vnets } => Ok(vnets),
            other => unexpected(other),
        }
    }

    pub async fn remove_bastion(&mut self, ns: &str, mci: &str, bastion_vm: &str) -> ClientResult<()> {
        let request = ApiRequest::RemoveBastion {
            ns: ns.to_string(),
            mci: mci.to_string(),
            bastion_vm: bastion_vm.to_string(),
        };
        match self.call(request).await? {
            ApiResponse::Ok => Ok(()),
            other => unexpected(other),
        }
    }
}
