//! Daemon lifecycle commands

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::ipc::FleetClient;
use crate::output::{format_status, print_error, print_info, print_success, print_warning};

const DAEMON_BINARY: &str = "mci-orchestrator";

/// Prefer the daemon installed next to this binary, then fall back to PATH
fn daemon_executable() -> PathBuf {
    let name = format!("{}{}", DAEMON_BINARY, std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(name))
}

/// Spawn the orchestrator daemon in the background and wait for it to answer
pub async fn start_command(
    client: &mut FleetClient,
    config_path: Option<&PathBuf>,
    store: Option<&PathBuf>,
) -> Result<()> {
    if client.ping().await? {
        print_warning(&format!("Orchestrator already running at {}", client.address()));
        return Ok(());
    }

    let exe = daemon_executable();
    let mut cmd = std::process::Command::new(&exe);
    cmd.arg("--bind").arg(client.address());
    if let Some(path) = config_path {
        cmd.arg("--config").arg(path);
    }
    if let Some(path) = store {
        cmd.arg("--store").arg(path);
    }

    let child = cmd
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to start {:?}", exe))?;
    print_info(&format!("Orchestrator starting (PID: {})", child.id()));

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        if client.ping().await? {
            print_success(&format!("Orchestrator listening on {}", client.address()));
            return Ok(());
        }
    }

    print_warning("Orchestrator may still be starting...");
    Ok(())
}

/// Ask the daemon to shut down
pub async fn stop_command(client: &mut FleetClient) -> Result<()> {
    print_info("Stopping orchestrator...");
    match client.shutdown().await {
        Ok(()) => {
            print_success("Orchestrator stopped");
            Ok(())
        }
        Err(e) if e.is_unreachable() => {
            print_warning("Orchestrator is not running");
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to stop orchestrator: {}", e));
            Err(e.into())
        }
    }
}

pub async fn ping_command(client: &mut FleetClient) -> Result<()> {
    if client.ping().await? {
        print_success(&format!("Orchestrator at {} is up", client.address()));
        Ok(())
    } else {
        anyhow::bail!("Orchestrator at {} is not responding", client.address())
    }
}

pub async fn status_command(client: &mut FleetClient) -> Result<()> {
    let status = match client.status().await {
        Ok(s) => s,
        Err(e) => {
            print_error(&format!("Failed to get orchestrator status: {}", e));
            if e.is_unreachable() {
                print_error("Is the orchestrator running? Try: mci start");
            }
            return Err(e.into());
        }
    };

    println!("{}", format_status(&status));
    Ok(())
}
