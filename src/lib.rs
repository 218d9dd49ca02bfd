//! wsbench - scripted WebSocket sessions
//!
//! A scenario is a list of steps (`connect`, `send`, `think`) whose payloads
//! are templates resolved per session. The [`engine`] compiles a scenario
//! once and runs any number of independent sessions from it, publishing
//! lifecycle events for a consumer to aggregate.

pub mod cli;
pub mod commands;
pub mod common;
pub mod engine;
pub mod scenario;
pub mod template;
pub mod transport;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use engine::{compile, EngineConfig, EngineEvent, SessionContext, SessionFactory};
