//! Fleet record storage
//!
//! [`RecordStore`](mci_core::traits::RecordStore) backends plus the typed
//! [`FleetRepository`] every service reads and writes through.

mod file;
pub mod keys;
mod memory;
mod repository;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use repository::FleetRepository;
