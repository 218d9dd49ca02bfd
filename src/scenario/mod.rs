//! Scenario scripts
//!
//! Loads YAML or JSON scripts describing a target, variables and the list
//! of steps each session runs.

mod config;

pub use config::{Script, ScriptConfig};
