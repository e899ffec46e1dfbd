//! Layered configuration: built-in defaults, then an optional
//! `config/default.*` file, then `NT_`-prefixed environment variables
//! (`NT_SERVER__NT4_PORT=5811`).

mod settings;

use config::{Config, Environment, File};

use crate::utils::NtError;

pub use settings::{
    ClientSettings, LogSettings, PartialSettings, ServerSettings, SessionSettings, Settings,
};

/// Loads the configuration from the default file and environment variables
/// and merges it over the default values.
pub fn load_config() -> Result<Settings, NtError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("NT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}

#[cfg(test)]
mod tests;
