use clap::Parser;

use super::settings::Settings;

/// Command line flags. Every flag is optional and, when given, overrides
/// the value from the config file and environment.
#[derive(Parser, Debug, Default, Clone, PartialEq)]
#[command(name = "relayhub")]
#[command(about = "Real-time channel relay over WebSockets")]
#[command(version)]
pub struct Cli {
    /// Configuration file, extension optional
    #[arg(long, default_value = super::DEFAULT_CONFIG_FILE)]
    pub config: String,

    /// Interface the WebSocket listener binds to
    #[arg(long)]
    pub http_host: Option<String>,

    /// Port the WebSocket listener binds to
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Path WebSocket upgrades are accepted on
    #[arg(long)]
    pub http_path: Option<String>,

    /// Redis host
    #[arg(long)]
    pub redis_host: Option<String>,

    /// Redis port
    #[arg(long)]
    pub redis_port: Option<u16>,

    /// Use an in-process bus instead of Redis (single node only)
    #[arg(long)]
    pub standalone: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,
}

impl Cli {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.http_host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.http_port {
            settings.server.port = port;
        }
        if let Some(path) = &self.http_path {
            settings.server.path = path.clone();
        }
        if let Some(host) = &self.redis_host {
            settings.upstream.host = host.clone();
        }
        if let Some(port) = self.redis_port {
            settings.upstream.port = port;
        }
        if self.standalone {
            settings.upstream.standalone = true;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = level.clone();
        }
    }
}
