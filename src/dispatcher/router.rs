//! Call routing
//!
//! Frames are checked in a fixed order and every rejection is terminal:
//! undecodable frames, frames with the wrong keys and frames whose id is
//! not a string are dropped silently; bad arguments and unknown calls are
//! answered with a failure reply.
//!
//! The call table is built before the server starts and frozen into a
//! [`Dispatcher`] afterwards; nothing registers calls at runtime.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use super::args::Args;
use crate::session::Session;
use crate::transport::message::{MAX_ARGS, Rejection, Reply, parse_frame};
use crate::utils::error::{CallError, RegisterError};

/// What a handler answers with. `None` sends no reply.
pub type CallResult = Result<Option<Map<String, Value>>, CallError>;

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, session: &Session, args: Args) -> CallResult;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Session, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Session, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult> + Send + 'static,
{
    async fn call(&self, session: &Session, args: Args) -> CallResult {
        (self.0)(session.clone(), args).await
    }
}

/// Registered calls by name.
#[derive(Default)]
pub struct CallTable {
    calls: HashMap<String, Arc<dyn Handler>>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: Handler>(&mut self, name: &str, handler: H) -> Result<(), RegisterError> {
        if name.is_empty() {
            return Err(RegisterError::EmptyName);
        }
        if self.calls.contains_key(name) {
            return Err(RegisterError::Duplicate(name.to_string()));
        }
        self.calls.insert(name.to_string(), Arc::new(handler));
        debug!(call = %name, "Registered call");
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.calls.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.calls.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for CallTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallTable")
            .field("calls", &self.names())
            .finish()
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    calls: CallTable,
}

impl Dispatcher {
    pub fn new(calls: CallTable) -> Self {
        Self { calls }
    }

    pub fn calls(&self) -> &CallTable {
        &self.calls
    }

    /// Handle one inbound text frame for `session`.
    pub async fn dispatch(&self, session: &Session, text: &str) {
        let request = match parse_frame(text) {
            Ok(request) => request,
            Err(e) => {
                debug!(session = %session.id(), error = %e, "Dropping malformed frame");
                return;
            }
        };
        let id = request.id;

        let Value::Object(args) = request.args else {
            return reject(session, &id, Rejection::InvalidArgs);
        };
        if args.len() > MAX_ARGS {
            return reject(session, &id, Rejection::TooManyArgs);
        }
        let Some((name, handler)) = request
            .call
            .as_str()
            .and_then(|name| self.calls.calls.get_key_value(name))
        else {
            debug!(session = %session.id(), call = %request.call, "Unknown call");
            return reject(session, &id, Rejection::UnknownCall);
        };

        let outcome = AssertUnwindSafe(handler.call(session, Args::new(args)))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(Some(fields))) => {
                if let Err(e) = session.reply(&id, fields) {
                    debug!(session = %session.id(), call = %name, error = %e, "Reply not delivered");
                }
            }
            Ok(Ok(None)) => {}
            Ok(Err(CallError::InvalidArgs(detail))) => {
                debug!(session = %session.id(), call = %name, detail = %detail, "Invalid arguments");
                reject(session, &id, Rejection::InvalidArgs);
            }
            Ok(Err(e)) => {
                warn!(session = %session.id(), call = %name, error = %e, "Call failed");
                reject(session, &id, Rejection::ServerError);
            }
            Err(_) => {
                error!(session = %session.id(), call = %name, "Call handler panicked");
                reject(session, &id, Rejection::ServerError);
            }
        }
    }
}

fn reject(session: &Session, id: &str, rejection: Rejection) {
    if let Err(e) = session.outbound().send(Reply::rejected(id, rejection)) {
        debug!(session = %session.id(), error = %e, "Rejection not delivered");
    }
}
