//! Daemon configuration file commands
//!
//! These operate on the orchestrator's TOML file directly and work
//! without a running daemon.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_info, print_success, print_warning};
use mci_core::config::{self, OrchestratorConfig};

fn resolve_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
}

/// Follow a dotted key such as `fanout.max_parallelism`
fn lookup<'a>(table: &'a toml::Table, key: &str) -> Option<&'a toml::Value> {
    let mut parts = key.split('.');
    let mut current = table.get(parts.next()?)?;
    for part in parts {
        current = current.as_table()?.get(part)?;
    }
    Some(current)
}

fn parse_value(raw: &str) -> toml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        toml::Value::Boolean(b)
    } else if let Ok(i) = raw.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        toml::Value::Float(f)
    } else {
        toml::Value::String(raw.to_string())
    }
}

/// Set a dotted key, creating intermediate tables
fn assign(table: &mut toml::Table, key: &str, value: toml::Value) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    let (last, parents) = match parts.split_last() {
        Some((last, parents)) if !last.is_empty() => (last, parents),
        _ => anyhow::bail!("Invalid key: {:?}", key),
    };

    let mut current = table;
    for part in parents {
        current = current
            .entry(part.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()))
            .as_table_mut()
            .ok_or_else(|| anyhow::anyhow!("Cannot navigate to key: {}", key))?;
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// Write a default configuration file
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = resolve_path(config_path);
    if path.exists() && !force {
        print_warning(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &OrchestratorConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

/// Print the configuration file
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_path(config_path);
    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'mci config init' to create one");
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    println!("{}", content);
    Ok(())
}

/// Print one value by dotted key
pub fn config_get(config_path: Option<&PathBuf>, key: &str) -> Result<()> {
    let path = resolve_path(config_path);
    let table = read_table(&path)?;
    let value = lookup(&table, key).ok_or_else(|| anyhow::anyhow!("Key not found: {}", key))?;

    match value {
        toml::Value::String(s) => println!("{}", s),
        toml::Value::Table(_) => println!("{}", toml::to_string_pretty(value)?),
        other => println!("{}", other),
    }
    Ok(())
}

/// Set one value by dotted key.
///
/// The edited file must still load as an orchestrator configuration;
/// otherwise nothing is written.
pub fn config_set(config_path: Option<&PathBuf>, key: &str, value: &str) -> Result<()> {
    let path = resolve_path(config_path);
    if !path.exists() {
        config_init(Some(&path), false)?;
    }

    let mut table = read_table(&path)?;
    assign(&mut table, key, parse_value(value))?;

    let content = toml::to_string_pretty(&table)?;
    let parsed: OrchestratorConfig = toml::from_str(&content)
        .with_context(|| format!("{} = {} is not a valid setting", key, value))?;
    parsed.validate().context("Invalid configuration")?;

    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Set {} = {}", key, value));
    Ok(())
}
