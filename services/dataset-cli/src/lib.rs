//! Dataset CLI
//!
//! Lists and describes the variables of a dataset the same way the tile
//! server resolves it: through the configured cache tier and filesystem.

pub mod cli;
pub mod commands;
