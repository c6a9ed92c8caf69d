mod cli;
mod settings;

use config::{Config, Environment, File};

use crate::utils::error::SettingsError;
use settings::PartialSettings;

pub use cli::Cli;
pub use settings::{
    LoggingSettings, ServerSettings, Settings, UpstreamSettings, is_valid_host, is_valid_port,
};

/// Default configuration file, looked up relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Loads the configuration from the default file and environment variables
/// and merges it with default values.
pub fn load_config() -> Result<Settings, SettingsError> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Same as [`load_config`] with an explicit file (extension optional).
///
/// Environment variables use the `RELAY` prefix and `__` as the section
/// separator, e.g. `RELAY__SERVER__PORT=9000`.
pub fn load_config_from(file: &str) -> Result<Settings, SettingsError> {
    let builder = Config::builder()
        .add_source(File::with_name(file).required(false))
        .add_source(
            Environment::with_prefix("RELAY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}

/// Settings for a run: file and environment, then command line flags,
/// then validation.
pub fn resolve(cli: &Cli) -> Result<Settings, SettingsError> {
    let mut settings = load_config_from(&cli.config)?;
    cli.apply(&mut settings);
    settings.validate()?;
    Ok(settings)
}
