//! EV charging site simulator: shares limited grid capacity among charging
//! sessions under a choice of allocation policies.

/// TOML scenario configuration and built-in presets.
pub mod config;
pub mod devices;
pub mod error;
pub mod io;
/// Capacity tree, session lifecycle, allocation, and the step driver.
pub mod sim;
