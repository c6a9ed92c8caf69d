//! Applications built on the relay.
//!
//! An application registers a fixed set of calls into the call table when
//! it is installed. Handlers are thin: they bind their arguments, call
//! `subscribe`/`unsubscribe`/`publish` on the session and acknowledge.

pub mod chat;
pub mod echo;
pub mod rooms;

use std::future::Future;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::dispatcher::{Args, CallResult, CallTable, Handler, handler_fn};
use crate::session::Session;
use crate::utils::error::RegisterError;

pub use chat::ChatApp;
pub use echo::EchoApp;
pub use rooms::RoomsApp;

/// Install every bundled application.
pub fn install_all(calls: &mut CallTable) -> Result<(), RegisterError> {
    ChatApp::install(calls)?;
    RoomsApp::install(calls)?;
    EchoApp::install(calls)?;
    Ok(())
}

/// Turn an application method into a call handler bound to `app`.
pub(crate) fn method<A, F, Fut>(app: &Arc<A>, f: F) -> impl Handler
where
    A: Send + Sync + 'static,
    F: Fn(Arc<A>, Session, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult> + Send + 'static,
{
    let app = Arc::clone(app);
    handler_fn(move |session, args| f(Arc::clone(&app), session, args))
}

/// Reply fields from a `json!` object literal.
pub(crate) fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
