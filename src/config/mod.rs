//! # Configuration
//!
//! Controller settings: defaults, overridden by environment variables, then
//! by command-line flags.
//!
//! - `controller.rs` - `ControllerConfig` and environment loading
//! - `flags.rs` - Command-line flags

pub mod controller;
pub mod flags;

pub use controller::ControllerConfig;
pub use flags::Args;
