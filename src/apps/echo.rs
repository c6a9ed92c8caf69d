use serde_json::json;
use tracing::info;

use super::fields;
use crate::dispatcher::{Args, CallResult, CallTable, handler_fn};
use crate::session::Session;
use crate::utils::error::RegisterError;

/// `echo` answers with the arguments it was called with. Handy for
/// checking a client's framing.
#[derive(Debug, Default)]
pub struct EchoApp;

impl EchoApp {
    pub fn install(calls: &mut CallTable) -> Result<(), RegisterError> {
        calls.register("echo", handler_fn(echo))?;
        info!("Configured echo application");
        Ok(())
    }
}

async fn echo(_session: Session, args: Args) -> CallResult {
    Ok(Some(fields(json!({ "args": args.into_value() }))))
}
