//! Doc Intake — document classification and routing core.

pub mod agents;
pub mod config;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod scorer;
pub mod store;
