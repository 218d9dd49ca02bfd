//! Session state machine
//!
//! ```text
//! Idle ──> Connecting ──> Executing(0) ──> ... ──> Executing(n-1) ──> Closed
//!   │           │                  │                                  ^
//!   │           └── connect error ─┴──────── step error ──────────────┤
//!   └── deferred connection ──> Executing(0)                          │
//! ```
//! Steps run strictly one after another. Whatever path a session takes, an
//! open connection is closed before the outcome is handed back.

use std::fmt;

use crate::common::{Error, Result};

use super::compiler::Shared;
use super::context::SessionContext;
use super::events::EngineEvent;
use super::step::Step;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing done yet
    Idle,
    /// Opening the initial connection
    Connecting,
    /// Running the step at this index
    Executing(usize),
    /// Finished, successfully or not
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Executing(i) => write!(f, "executing({})", i),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Result of one session
#[derive(Debug)]
pub struct SessionOutcome {
    /// First error, if the session aborted
    pub error: Option<Error>,
    /// Context as it was when the session ended (connection already closed)
    pub context: SessionContext,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

struct Runner<'a> {
    shared: &'a Shared,
    steps: &'a [Step],
    state: SessionState,
}

#[tracing::instrument(name = "session", skip_all, fields(id = id))]
pub(crate) async fn run(
    id: u64,
    shared: &Shared,
    steps: &[Step],
    requests: usize,
    mut initial: SessionContext,
) -> SessionOutcome {
    initial.reset_counters(requests);

    let mut runner = Runner {
        shared,
        steps,
        state: SessionState::Idle,
    };

    let (error, context) = match runner.open(initial).await {
        Ok(mut ctx) => (runner.execute(&mut ctx).await.err(), ctx),
        Err((e, ctx)) => (Some(e), ctx),
    };

    runner.close(error, context).await
}

impl Runner<'_> {
    fn transition(&mut self, next: SessionState) {
        tracing::trace!(from = %self.state, to = %next, "Session state");
        self.state = next;
    }

    /// Establish the initial connection unless it is deferred
    ///
    /// On failure the caller gets an empty context back.
    async fn open(
        &mut self,
        mut ctx: SessionContext,
    ) -> std::result::Result<SessionContext, (Error, SessionContext)> {
        let shared = self.shared;
        let config = &shared.config;

        if config.defer_connection {
            self.transition(SessionState::Executing(0));
            shared.emitter.emit(EngineEvent::Started);
            return Ok(ctx);
        }

        self.transition(SessionState::Connecting);
        match shared.connector.connect(&config.target).await {
            Ok(connection) => {
                if let Some(mut supplied) = ctx.set_connection(connection) {
                    if let Err(e) = supplied.close().await {
                        tracing::debug!(error = %e, "Error closing supplied connection");
                    }
                }
                self.transition(SessionState::Executing(0));
                shared.emitter.emit(EngineEvent::Started);
                Ok(ctx)
            }
            Err(e) => {
                tracing::warn!(url = %config.target, error = %e, "Initial connection failed");
                shared.emitter.emit(EngineEvent::Error(e.code().to_string()));
                if let Some(mut supplied) = ctx.take_connection() {
                    if let Err(e) = supplied.close().await {
                        tracing::debug!(error = %e, "Error closing supplied connection");
                    }
                }
                Err((e, SessionContext::default()))
            }
        }
    }

    /// Run every step in order, stopping at the first failure
    async fn execute(&mut self, ctx: &mut SessionContext) -> Result<()> {
        let steps = self.steps;
        for (index, step) in steps.iter().enumerate() {
            self.transition(SessionState::Executing(index));
            if let Err(e) = step.execute(ctx, self.shared).await {
                tracing::debug!(step = index, %step, "Step failed, aborting session");
                return Err(e);
            }
        }
        Ok(())
    }

    async fn close(&mut self, error: Option<Error>, mut ctx: SessionContext) -> SessionOutcome {
        self.transition(SessionState::Closed);

        if let Some(mut connection) = ctx.take_connection() {
            if let Err(e) = connection.close().await {
                tracing::debug!(error = %e, "Error closing connection");
            }
        }

        match &error {
            None => tracing::debug!(successes = ctx.success_count(), "Session complete"),
            Some(e) => tracing::info!(error = %e, "Session failed"),
        }

        SessionOutcome {
            error,
            context: ctx,
        }
    }
}
