//! Remote shell sessions to fleet VMs

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use crate::error::RemoteError;
use crate::model::CommandOutput;

/// One SSH hop
#[derive(Clone, PartialEq, Eq)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// OpenSSH or PEM encoded private key
    pub private_key: String,
}

impl SshEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for SshEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Route to a VM: directly, or through a bastion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshRoute {
    pub target: SshEndpoint,
    pub jump: Option<SshEndpoint>,
}

impl SshRoute {
    pub fn direct(target: SshEndpoint) -> Self {
        Self { target, jump: None }
    }

    pub fn via(jump: SshEndpoint, target: SshEndpoint) -> Self {
        Self {
            target,
            jump: Some(jump),
        }
    }
}

/// Executes commands and uploads files over a route.
///
/// Implementations enforce their own connect timeout; the caller bounds the
/// whole session.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run commands sequentially in one session
    async fn run(
        &self,
        route: &SshRoute,
        commands: &[String],
    ) -> Result<Vec<CommandOutput>, RemoteError>;

    /// Write `payload` to `path` on the target
    async fn upload(&self, route: &SshRoute, payload: Bytes, path: &str)
        -> Result<(), RemoteError>;
}
