//! Control server implementation
//!
//! Listens on TCP for JSON-line requests from the CLI. Only loopback peers
//! are accepted unless `allow_remote` is set.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use mci_core::api::{ApiRequest, ApiResponse, DaemonStatus};
use mci_core::model::MciView;
use mci_core::MciError;

use crate::fleet::Fleet;

/// Control server for CLI communication
pub struct IpcServer {
    /// Address to bind
    pub address: String,
    allow_remote: bool,
    fleet: Fleet,
    shutdown_token: Option<CancellationToken>,
}

impl IpcServer {
    pub fn new(address: String, fleet: Fleet) -> Self {
        Self {
            address,
            allow_remote: false,
            fleet,
            shutdown_token: None,
        }
    }

    /// Accept peers from other hosts too
    pub fn with_allow_remote(mut self, allow: bool) -> Self {
        self.allow_remote = allow;
        self
    }

    /// Set the shutdown token (call before run)
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = Some(token);
        self
    }

    /// Bind and serve until the shutdown token is cancelled
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind control server to {}", self.address))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("Control server listening on {}", listener.local_addr()?);
        let token = self.shutdown_token.clone().unwrap_or_default();

        loop {
            let accepted = tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Control server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    if !self.allow_remote && !peer_addr.ip().is_loopback() {
                        tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                        continue;
                    }
                    tracing::debug!("Control client connected from {}", peer_addr);

                    let fleet = self.fleet.clone();
                    let token = self.shutdown_token.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, fleet, token).await {
                            tracing::warn!("Control client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept control connection: {}", e);
                }
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    fleet: Fleet,
    shutdown_token: Option<CancellationToken>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ApiRequest>(trimmed) {
            Ok(request) => handle_request(request, &fleet, shutdown_token.as_ref()).await,
            Err(e) => ApiResponse::error("invalid_request", format!("Invalid request: {}", e)),
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
    }

    Ok(())
}

fn respond<T>(result: Result<T, MciError>, ok: impl FnOnce(T) -> ApiResponse) -> ApiResponse {
    match result {
        Ok(value) => ok(value),
        Err(e) => {
            tracing::warn!("Request failed: {}", e);
            ApiResponse::error(e.kind(), e.to_string())
        }
    }
}

/// Dispatch one request to the fleet services
pub async fn handle_request(
    request: ApiRequest,
    fleet: &Fleet,
    shutdown_token: Option<&CancellationToken>,
) -> ApiResponse {
    let state = fleet.state();
    match request {
        ApiRequest::Ping => ApiResponse::Pong,

        ApiRequest::GetStatus => {
            let namespace_count = match state.repo.list_namespaces().await {
                Ok(namespaces) => namespaces.len(),
                Err(e) => return ApiResponse::error("store", e.to_string()),
            };
            ApiResponse::Status(DaemonStatus {
                running: true,
                uptime_secs: state.uptime().as_secs(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                bind_address: state.config.bind_address.clone(),
                namespace_count,
                connection_count: state.connections.len(),
                providers: state.drivers.providers(),
            })
        }

        ApiRequest::Shutdown => {
            tracing::info!("Shutdown requested via control server");
            match shutdown_token {
                Some(token) => {
                    token.cancel();
                    ApiResponse::Ok
                }
                None => ApiResponse::error(
                    "unsupported",
                    "Shutdown not supported (no shutdown token configured)",
                ),
            }
        }

        ApiRequest::CreateNamespace { ns, description } => respond(
            fleet.namespaces.create(&ns, &description).await,
            ApiResponse::Namespace,
        ),
        ApiRequest::GetNamespace { ns } => {
            respond(fleet.namespaces.get(&ns).await, ApiResponse::Namespace)
        }
        ApiRequest::ListNamespaces => respond(fleet.namespaces.list().await, |namespaces| {
            ApiResponse::Namespaces { namespaces }
        }),
        ApiRequest::DeleteNamespace { ns } => {
            respond(fleet.namespaces.delete(&ns).await, |()| ApiResponse::Ok)
        }

        ApiRequest::RegisterConnection { connection } => respond(
            state
                .connections
                .register(connection.clone())
                .map_err(MciError::from),
            |()| ApiResponse::Connection(connection),
        ),
        ApiRequest::GetConnection { name } => respond(
            state.connections.require(&name).map_err(MciError::from),
            ApiResponse::Connection,
        ),
        ApiRequest::ListConnections => ApiResponse::Connections {
            connections: state.connections.list(),
        },

        ApiRequest::RegisterSshKey { ns, key } => respond(
            fleet.namespaces.register_ssh_key(&ns, key).await,
            |key| ApiResponse::SshKeys { keys: vec![key] },
        ),
        ApiRequest::ListSshKeys { ns } => respond(
            fleet.namespaces.list_ssh_keys(&ns).await,
            |keys| ApiResponse::SshKeys { keys },
        ),
        ApiRequest::DeleteSshKey { ns, key_id } => respond(
            fleet.namespaces.delete_ssh_key(&ns, &key_id).await,
            |()| ApiResponse::Ok,
        ),

        ApiRequest::CreateMci { ns, request } => respond(
            fleet.provisioner.create_mci(&ns, request).await,
            ApiResponse::Mci,
        ),
        ApiRequest::CreateMciDynamic { ns, request } => respond(
            fleet.provisioner.create_mci_dynamic(&ns, request).await,
            ApiResponse::Mci,
        ),
        ApiRequest::AddSubGroup { ns, mci, template } => respond(
            fleet.provisioner.add_sub_group(&ns, &mci, template).await,
            ApiResponse::Mci,
        ),
        ApiRequest::ScaleOutSubGroup {
            ns,
            mci,
            sub_group,
            count,
        } => respond(
            fleet.scaler.scale_out(&ns, &mci, &sub_group, count).await,
            ApiResponse::Mci,
        ),

        ApiRequest::GetMci {
            ns,
            mci,
            view,
            filter,
        } => {
            let filter = filter.as_ref();
            match view {
                MciView::Default => respond(
                    fleet.query.get_mci(&ns, &mci, filter).await,
                    ApiResponse::Mci,
                ),
                MciView::Id => respond(fleet.query.vm_ids(&ns, &mci, filter).await, |ids| {
                    ApiResponse::Ids { ids }
                }),
                MciView::Status => respond(
                    fleet.status.mci_status(&ns, &mci, filter).await,
                    ApiResponse::MciStatus,
                ),
                MciView::AccessInfo => respond(
                    fleet.query.access_info(&ns, &mci, filter).await,
                    ApiResponse::AccessInfo,
                ),
            }
        }
        ApiRequest::ListMci { ns, view, filter } => {
            let filter = filter.as_ref();
            match view {
                MciView::Default => respond(fleet.query.list_mci(&ns, filter).await, |mcis| {
                    ApiResponse::Mcis { mcis }
                }),
                MciView::Id => respond(fleet.query.mci_ids(&ns, filter).await, |ids| {
                    ApiResponse::Ids { ids }
                }),
                MciView::Status => respond(
                    fleet.status.list_mci_status(&ns, filter).await,
                    |statuses| ApiResponse::MciStatuses { statuses },
                ),
                MciView::AccessInfo => respond(
                    fleet.query.list_access_info(&ns, filter).await,
                    |infos| ApiResponse::AccessInfos { infos },
                ),
            }
        }
        ApiRequest::GetVm { ns, mci, vm } => {
            respond(fleet.query.get_vm(&ns, &mci, &vm).await, ApiResponse::Vm)
        }
        ApiRequest::ListVms { ns, mci, filter } => respond(
            fleet.query.list_vms(&ns, &mci, filter.as_ref()).await,
            |vms| ApiResponse::Vms { vms },
        ),

        ApiRequest::ControlMci { ns, mci, action } => respond(
            fleet.actions.control_mci(&ns, &mci, action).await,
            ApiResponse::ActionReport,
        ),
        ApiRequest::ControlVm {
            ns,
            mci,
            vm,
            action,
        } => respond(
            fleet.actions.control_vm(&ns, &mci, &vm, action).await,
            ApiResponse::VmActionResult,
        ),
        ApiRequest::RefineMci { ns, mci } => respond(
            fleet.lifecycle.refine_mci(&ns, &mci).await,
            |removed| ApiResponse::Refined { removed },
        ),

        ApiRequest::DeleteVm {
            ns,
            mci,
            vm,
            option,
        } => respond(
            fleet.lifecycle.delete_vm(&ns, &mci, &vm, option).await,
            ApiResponse::VmDeleted,
        ),
        ApiRequest::DeleteMci { ns, mci, option } => respond(
            fleet.lifecycle.delete_mci(&ns, &mci, option).await,
            ApiResponse::DeleteReport,
        ),
        ApiRequest::DeleteAllMci { ns, option } => respond(
            fleet.lifecycle.delete_all_mci(&ns, option).await,
            |reports| ApiResponse::DeleteReports { reports },
        ),

        ApiRequest::SendCommand {
            ns,
            mci,
            filter,
            request,
        } => respond(
            fleet.remote.send_command(&ns, &mci, filter, request).await,
            |results| ApiResponse::CommandResults { results },
        ),
        ApiRequest::TransferFile {
            ns,
            mci,
            filter,
            request,
        } => respond(
            fleet.remote.transfer_file(&ns, &mci, filter, request).await,
            |results| ApiResponse::CommandResults { results },
        ),

        ApiRequest::SetBastion {
            ns,
            mci,
            vm,
            bastion_vm,
        } => respond(
            fleet.bastions.set_bastion(&ns, &mci, &vm, &bastion_vm).await,
            ApiResponse::Bastions,
        ),
        ApiRequest::GetBastions { ns, mci, vm } => respond(
            fleet.bastions.get_bastions(&ns, &mci, &vm).await,
            ApiResponse::Bastions,
        ),
        ApiRequest::ListBastions { ns } => respond(
            fleet.bastions.list_bastions(&ns).await,
            |vnets| ApiResponse::BastionList { vnets },
        ),
        ApiRequest::RemoveBastion {
            ns,
            mci,
            bastion_vm,
        } => respond(
            fleet.bastions.remove_bastion(&ns, &mci, &bastion_vm).await,
            |_| ApiResponse::Ok,
        ),
    }
}
