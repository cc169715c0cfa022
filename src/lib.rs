pub mod config;
pub mod executor;
pub mod export;
pub mod harvest;
pub mod model;
pub mod traits;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export common types for convenience
pub use config::{HarvesterConfig, RetryPolicy};
pub use harvest::{HarvestError, Harvester, ListOptions};
pub use model::*;
pub use traits::*;
