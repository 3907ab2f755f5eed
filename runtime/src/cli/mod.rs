//! CLI subcommand implementations for the harvest binary.

pub mod collect_cmd;
pub mod doctor;
pub mod output;
pub mod profiles_cmd;
