use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use relayhub::Server;
use relayhub::apps;
use relayhub::config::{Cli, resolve};
use relayhub::utils::error::RelayError;
use relayhub::utils::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match resolve(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("relayhub: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.logging.level);

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Relay failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: relayhub::config::Settings) -> Result<(), RelayError> {
    info!(
        bind = %settings.bind_addr(),
        path = %settings.server.path,
        standalone = settings.upstream.standalone,
        "Starting relay"
    );
    let mut server = Server::new(settings);
    apps::install_all(server.calls_mut())?;
    server.run().await
}
