//! KDL configuration parsing for Shipgate.
//!
//! This crate handles:
//! - Manifest definitions (shipgate.kdl)
//! - Settings, with environment overrides
//! - Variable interpolation

pub mod error;
pub mod manifest;
pub mod settings;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use manifest::{Manifest, RelayDef, TargetDef, parse_manifest};
pub use settings::Settings;
pub use variables::{GitContext, RunContext, VariableContext, VariableContextBuilder};
