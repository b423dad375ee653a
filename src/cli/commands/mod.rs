//! Command implementations for the CLI.
//!
//! Each command is implemented in its own module.

pub mod dispatch;
pub mod inspect;
pub mod serve;
