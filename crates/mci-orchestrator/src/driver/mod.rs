//! Cloud driver implementations

mod http;
mod sim;

use std::future::Future;
use std::time::Duration;

use mci_core::error::DriverError;

pub use http::HttpDriver;
pub use sim::{Fault, SimulatedDriver};

/// Bound a driver call; an expired call reports [`DriverError::Timeout`]
pub async fn call_with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, DriverError>>,
) -> Result<T, DriverError> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(DriverError::Timeout(timeout)))
}
