//! Per-session mutable state

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::template::{Bindings, Functions};
use crate::transport::Connection;

/// State threaded through every step of one session
///
/// Created fresh for each run and owned by the runner until the run ends.
#[derive(Default)]
pub struct SessionContext {
    /// Open connection, absent until a connect succeeds
    connection: Option<Box<dyn Connection>>,
    /// Request-producing steps not yet completed
    pending_requests: usize,
    /// Messages written successfully so far
    success_count: usize,
    /// Variables for `{{name}}` interpolation
    vars: Map<String, Value>,
    /// Functions for `{{ $name() }}` calls
    funcs: Arc<Functions>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("connected", &self.connection.is_some())
            .field("pending_requests", &self.pending_requests)
            .field("success_count", &self.success_count)
            .field("vars", &self.vars)
            .field("funcs", &self.funcs)
            .finish()
    }
}

impl SessionContext {
    /// Context with the given bindings and no connection
    pub fn new(vars: Map<String, Value>, funcs: Arc<Functions>) -> Self {
        Self {
            vars,
            funcs,
            ..Self::default()
        }
    }

    /// Attach a connection opened outside the session (deferred mode)
    pub fn with_connection(mut self, connection: Box<dyn Connection>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Bindings for template resolution
    pub fn bindings(&self) -> Bindings<'_> {
        Bindings::new(&self.vars, &self.funcs)
    }

    pub fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.vars
    }

    pub fn funcs(&self) -> &Functions {
        &self.funcs
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn pending_requests(&self) -> usize {
        self.pending_requests
    }

    pub fn success_count(&self) -> usize {
        self.success_count
    }

    pub(crate) fn connection_mut(&mut self) -> Option<&mut Box<dyn Connection>> {
        self.connection.as_mut()
    }

    /// Store a connection, handing back the one it replaces
    pub(crate) fn set_connection(
        &mut self,
        connection: Box<dyn Connection>,
    ) -> Option<Box<dyn Connection>> {
        self.connection.replace(connection)
    }

    pub(crate) fn take_connection(&mut self) -> Option<Box<dyn Connection>> {
        self.connection.take()
    }

    pub(crate) fn reset_counters(&mut self, pending_requests: usize) {
        self.pending_requests = pending_requests;
        self.success_count = 0;
    }

    pub(crate) fn record_success(&mut self) {
        self.pending_requests = self.pending_requests.saturating_sub(1);
        self.success_count += 1;
    }
}
