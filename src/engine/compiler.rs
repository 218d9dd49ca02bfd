//! Scenario compilation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::transport::Connector;

use super::context::SessionContext;
use super::events::Emitter;
use super::runner::{self, SessionOutcome};
use super::step::{Step, StepSpec};

/// Connection settings for a compiled scenario
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Base URL; the initial connection goes here and root-relative
    /// `connect` URLs are appended to it
    #[serde(default)]
    pub target: String,

    /// Skip the initial connection; the caller supplies one (or a
    /// `connect` step does)
    #[serde(default, alias = "deferConnection")]
    pub defer_connection: bool,
}

/// Everything a step needs besides the session context
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) emitter: Arc<dyn Emitter>,
}

struct Compiled {
    shared: Shared,
    steps: Vec<Step>,
    requests: usize,
    next_session: AtomicU64,
}

/// Runs sessions of one compiled scenario
///
/// Cheap to clone; clones share the compiled steps.
#[derive(Clone)]
pub struct SessionFactory {
    inner: Arc<Compiled>,
}

/// Compile step specs into a session factory
///
/// Payload templates are kept as written and resolved when each step runs.
pub fn compile(
    specs: &[StepSpec],
    config: EngineConfig,
    connector: Arc<dyn Connector>,
    emitter: Arc<dyn Emitter>,
) -> Result<SessionFactory> {
    if !config.defer_connection && config.target.is_empty() {
        return Err(Error::Config(
            "A target is required unless the connection is deferred".to_string(),
        ));
    }

    let steps = specs
        .iter()
        .enumerate()
        .map(|(index, spec)| Step::compile(index, spec))
        .collect::<Result<Vec<_>>>()?;
    let requests = specs.iter().filter(|spec| spec.is_request()).count();

    tracing::debug!(
        steps = steps.len(),
        requests,
        url = %config.target,
        defer_connection = config.defer_connection,
        "Compiled scenario"
    );

    Ok(SessionFactory {
        inner: Arc::new(Compiled {
            shared: Shared {
                config,
                connector,
                emitter,
            },
            steps,
            requests,
            next_session: AtomicU64::new(1),
        }),
    })
}

impl SessionFactory {
    /// Run one complete session starting from `initial`
    pub async fn run(&self, initial: SessionContext) -> SessionOutcome {
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        runner::run(id, &self.inner.shared, &self.inner.steps, self.inner.requests, initial).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.shared.config
    }

    /// Number of compiled steps
    pub fn step_count(&self) -> usize {
        self.inner.steps.len()
    }

    /// Number of steps that produce request/response activity
    pub fn request_count(&self) -> usize {
        self.inner.requests
    }

    /// Human-readable step listing
    pub fn describe(&self) -> Vec<String> {
        self.inner.steps.iter().map(ToString::to_string).collect()
    }
}
