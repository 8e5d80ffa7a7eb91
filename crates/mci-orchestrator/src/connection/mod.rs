//! Connection and driver registries
//!
//! A connection names a (provider, region, credential) triple. Each is
//! resolved once per request to the driver registered for its provider.

mod drivers;
mod registry;

pub use drivers::{DriverRegistry, ResolvedConnection};
pub use registry::ConnectionRegistry;
