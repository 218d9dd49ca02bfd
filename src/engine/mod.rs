//! Scripted session engine
//!
//! A scenario (a list of [`StepSpec`]) is compiled once into a
//! [`SessionFactory`]; each call to [`SessionFactory::run`] drives one
//! independent session through its steps and reports lifecycle events to
//! the configured [`Emitter`].

mod compiler;
mod context;
mod events;
mod runner;
mod step;

pub use compiler::{compile, EngineConfig, SessionFactory};
pub use context::SessionContext;
pub use events::{ChannelEmitter, Emitter, EngineEvent, NullEmitter};
pub use runner::{SessionOutcome, SessionState};
pub use step::{ConnectSpec, SendSpec, StepSpec};
