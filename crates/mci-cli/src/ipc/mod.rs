//! Control protocol client
//!
//! Speaks the daemon's newline-delimited JSON protocol over TCP.

mod client;

pub use client::{ClientError, ClientResult, FleetClient, MciOutput, DEFAULT_ADDRESS};
