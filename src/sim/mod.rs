/// Simulation clock for timestep management.
pub mod clock;
pub mod engine;
/// Parallel runs of independent scenarios.
pub mod ensemble;
pub mod ledger;
/// Admission, queueing, and departure rules.
pub mod lifecycle;
/// Allocation policies and the per-step allocation engine.
pub mod policy;
pub mod queue;
pub mod registry;
pub mod scenario;
pub mod session;
/// Capacity tree of feeder, branches, and outlets.
pub mod tree;
pub mod types;

pub use engine::Engine;
pub use ensemble::run_ensemble;
pub use policy::{AllocationPolicy, Policy, PolicyKind};
pub use scenario::Scenario;
