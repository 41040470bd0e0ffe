//! Subcommand implementations

pub mod load;
pub mod sinks;
pub mod status;
