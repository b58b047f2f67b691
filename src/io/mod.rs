//! Outer-surface file output.

/// CSV export of load profiles and session outcomes.
pub mod export;
