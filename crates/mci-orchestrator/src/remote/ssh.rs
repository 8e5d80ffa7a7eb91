//! russh-backed remote shell
//!
//! One SSH session per call. With a bastion, the session to the target is
//! tunnelled through a `direct-tcpip` channel opened on the bastion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Config, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};

use mci_core::error::RemoteError;
use mci_core::model::CommandOutput;
use mci_core::traits::{RemoteShell, SshEndpoint, SshRoute};

/// Client handler for fleet VMs.
///
/// Fleet VMs are freshly created with provider-generated host keys, so
/// there is nothing to pin them against; every key is accepted.
struct FleetHandler;

#[async_trait]
impl client::Handler for FleetHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!("Server host key: {}", server_public_key.fingerprint());
        Ok(true)
    }
}

/// An authenticated session, plus the bastion session it runs through
struct Connected {
    session: Handle<FleetHandler>,
    jump: Option<Handle<FleetHandler>>,
}

impl Connected {
    async fn close(self) {
        let _ = self
            .session
            .disconnect(Disconnect::ByApplication, "done", "en")
            .await;
        if let Some(jump) = self.jump {
            let _ = jump.disconnect(Disconnect::ByApplication, "done", "en").await;
        }
    }
}

/// Remote shell speaking SSH with public key authentication
pub struct SshShell {
    connect_timeout: Duration,
}

fn channel_error(e: russh::Error) -> RemoteError {
    RemoteError::Channel(e.to_string())
}

fn decode_key(endpoint: &SshEndpoint) -> Result<Arc<KeyPair>, RemoteError> {
    russh_keys::decode_secret_key(&endpoint.private_key, None)
        .map(Arc::new)
        .map_err(|e| RemoteError::InvalidKey(e.to_string()))
}

/// Quote a value for a POSIX shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl SshShell {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn authenticate(
        &self,
        session: &mut Handle<FleetHandler>,
        endpoint: &SshEndpoint,
        key: Arc<KeyPair>,
    ) -> Result<(), RemoteError> {
        let accepted = session
            .authenticate_publickey(&endpoint.user, key)
            .await
            .map_err(|e| RemoteError::Connect {
                host: endpoint.address(),
                reason: format!("authentication error: {}", e),
            })?;
        if !accepted {
            return Err(RemoteError::AuthenticationFailed(endpoint.user.clone()));
        }
        Ok(())
    }

    async fn connect_direct(
        &self,
        config: Arc<Config>,
        endpoint: &SshEndpoint,
        key: Arc<KeyPair>,
    ) -> Result<Handle<FleetHandler>, RemoteError> {
        let address = endpoint.address();
        tracing::debug!("Connecting to {} as {}", address, endpoint.user);
        let mut session = tokio::time::timeout(
            self.connect_timeout,
            client::connect(config, address.as_str(), FleetHandler),
        )
        .await
        .map_err(|_| RemoteError::Connect {
            host: address.clone(),
            reason: format!("timed out after {:?}", self.connect_timeout),
        })?
        .map_err(|e| RemoteError::Connect {
            host: address.clone(),
            reason: e.to_string(),
        })?;

        self.authenticate(&mut session, endpoint, key).await?;
        Ok(session)
    }

    async fn open(&self, route: &SshRoute) -> Result<Connected, RemoteError> {
        // Decode keys first so a bad key fails before any network traffic
        let target_key = decode_key(&route.target)?;
        let config = Arc::new(Config::default());

        let Some(jump) = &route.jump else {
            let session = self
                .connect_direct(config, &route.target, target_key)
                .await?;
            return Ok(Connected {
                session,
                jump: None,
            });
        };

        let jump_key = decode_key(jump)?;
        let bastion = self.connect_direct(Arc::clone(&config), jump, jump_key).await?;
        let target = &route.target;
        let channel = bastion
            .channel_open_direct_tcpip(target.host.clone(), u32::from(target.port), "127.0.0.1", 0)
            .await
            .map_err(|e| RemoteError::Connect {
                host: target.address(),
                reason: format!("tunnel through {} failed: {}", jump.address(), e),
            })?;

        let mut session = tokio::time::timeout(
            self.connect_timeout,
            client::connect_stream(config, channel.into_stream(), FleetHandler),
        )
        .await
        .map_err(|_| RemoteError::Connect {
            host: target.address(),
            reason: format!("timed out after {:?}", self.connect_timeout),
        })?
        .map_err(|e| RemoteError::Connect {
            host: target.address(),
            reason: e.to_string(),
        })?;
        self.authenticate(&mut session, target, target_key).await?;

        Ok(Connected {
            session,
            jump: Some(bastion),
        })
    }
}

/// Run one command on its own channel, optionally feeding it stdin
async fn exec(
    session: &Handle<FleetHandler>,
    command: &str,
    stdin: Option<&[u8]>,
) -> Result<CommandOutput, RemoteError> {
    let mut channel = session.channel_open_session().await.map_err(channel_error)?;
    channel.exec(true, command).await.map_err(channel_error)?;
    if let Some(input) = stdin {
        channel.data(input).await.map_err(channel_error)?;
        channel.eof().await.map_err(channel_error)?;
    }

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
            ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
            ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
            _ => {}
        }
    }

    Ok(CommandOutput {
        command: command.to_string(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_status,
    })
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn run(
        &self,
        route: &SshRoute,
        commands: &[String],
    ) -> Result<Vec<CommandOutput>, RemoteError> {
        let connected = self.open(route).await?;
        let mut outputs = Vec::with_capacity(commands.len());
        let mut failure = None;
        for command in commands {
            match exec(&connected.session, command, None).await {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        connected.close().await;

        match failure {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }

    async fn upload(
        &self,
        route: &SshRoute,
        payload: Bytes,
        path: &str,
    ) -> Result<(), RemoteError> {
        let dir = match path.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => dir,
            _ => "/",
        };
        let command = format!(
            "mkdir -p {} && cat > {}",
            shell_quote(dir),
            shell_quote(path)
        );

        let connected = self.open(route).await?;
        let result = exec(&connected.session, &command, Some(&payload[..])).await;
        connected.close().await;

        let output = result?;
        match output.exit_status {
            Some(0) => Ok(()),
            status => Err(RemoteError::Channel(format!(
                "writing {} exited with {:?}: {}",
                path,
                status,
                output.stderr.trim()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/app.conf"), "'/tmp/app.conf'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_invalid_key_fails_before_connecting() {
        let shell = SshShell::new(Duration::from_secs(1));
        let route = SshRoute::direct(SshEndpoint {
            host: "192.0.2.1".to_string(),
            port: 22,
            user: "cb-user".to_string(),
            private_key: "not a key".to_string(),
        });

        let err = shell
            .run(&route, &["uptime".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::InvalidKey(_)));
    }
}
