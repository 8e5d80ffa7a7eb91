//! Namespace, connection and SSH key commands

use std::path::Path;

use anyhow::{Context, Result};

use crate::ipc::FleetClient;
use crate::output::{
    format_connections, format_namespaces, format_ssh_keys, print_success,
};
use mci_core::model::{ConnectionConfig, SshKey};

pub async fn namespace_create(client: &mut FleetClient, id: &str, description: &str) -> Result<()> {
    let ns = client.create_namespace(id, description).await?;
    print_success(&format!("Created namespace {}", ns.id));
    Ok(())
}

pub async fn namespace_get(client: &mut FleetClient, id: &str) -> Result<()> {
    let ns = client.get_namespace(id).await?;
    println!("{}", format_namespaces(std::slice::from_ref(&ns)));
    Ok(())
}

pub async fn namespace_list(client: &mut FleetClient) -> Result<()> {
    let namespaces = client.list_namespaces().await?;
    println!("{}", format_namespaces(&namespaces));
    Ok(())
}

pub async fn namespace_delete(client: &mut FleetClient, id: &str) -> Result<()> {
    client.delete_namespace(id).await?;
    print_success(&format!("Deleted namespace {}", id));
    Ok(())
}

pub async fn connection_register(client: &mut FleetClient, connection: ConnectionConfig) -> Result<()> {
    let conn = client.register_connection(connection).await?;
    print_success(&format!(
        "Registered connection {} ({} / {})",
        conn.name, conn.provider, conn.region
    ));
    Ok(())
}

pub async fn connection_get(client: &mut FleetClient, name: &str) -> Result<()> {
    let conn = client.get_connection(name).await?;
    println!("{}", format_connections(std::slice::from_ref(&conn)));
    Ok(())
}

pub async fn connection_list(client: &mut FleetClient) -> Result<()> {
    let connections = client.list_connections().await?;
    println!("{}", format_connections(&connections));
    Ok(())
}

/// Register a key whose private half is read from a local file
pub async fn key_register(
    client: &mut FleetClient,
    ns: &str,
    id: &str,
    user_name: &str,
    private_key_file: &Path,
    description: &str,
) -> Result<()> {
    let private_key = std::fs::read_to_string(private_key_file)
        .with_context(|| format!("Failed to read private key {:?}", private_key_file))?;
    let key = SshKey {
        id: id.to_string(),
        user_name: user_name.to_string(),
        private_key,
        description: description.to_string(),
    };
    let summary = client.register_ssh_key(ns, key).await?;
    print_success(&format!(
        "Registered SSH key {} for user {} in {}",
        summary.id, summary.user_name, ns
    ));
    Ok(())
}

pub async fn key_list(client: &mut FleetClient, ns: &str) -> Result<()> {
    let keys = client.list_ssh_keys(ns).await?;
    println!("{}", format_ssh_keys(&keys));
    Ok(())
}

pub async fn key_delete(client: &mut FleetClient, ns: &str, id: &str) -> Result<()> {
    client.delete_ssh_key(ns, id).await?;
    print_success(&format!("Deleted SSH key {}", id));
    Ok(())
}
