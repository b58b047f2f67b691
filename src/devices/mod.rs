//! Physical models: vehicle charge curves and the site storage buffer.

/// Stationary storage buffer attached to the capacity tree.
pub mod storage;
/// Vehicle types and their charge-power curves.
pub mod vehicle;

pub use storage::StorageBuffer;
pub use vehicle::{Derating, VehicleType, instantaneous_max_power};
