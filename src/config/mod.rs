mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    ClientSettings, LogSettings, PartialClientSettings, PartialLogSettings, PartialSettings,
    Settings,
};

/// Loads the configuration from `config/default` (any format the `config`
/// crate understands) and `MQTTKIT_*` environment variables, then merges it
/// over the defaults.
///
/// Nested keys are separated by `__`, so `MQTTKIT_CLIENT__URL` sets
/// `client.url`. `MQTTKIT_CLIENT__TOPICS` takes a comma separated list.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("MQTTKIT")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("client.topics")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}
