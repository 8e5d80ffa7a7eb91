//! mci-fleet: command-line client for the multi-cloud VM fleet orchestrator

pub mod commands;
pub mod ipc;
pub mod output;
