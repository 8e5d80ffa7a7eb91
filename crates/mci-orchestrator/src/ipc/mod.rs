//! Control server for CLI communication
//!
//! A line-delimited JSON protocol over TCP that the CLI uses to drive the
//! running orchestrator daemon.

mod server;

pub use server::{handle_request, IpcServer};
