//! Layered configuration loading
//!
//! Defaults, then an optional TOML file, then `MARKET__`-prefixed
//! environment variables (`MARKET__PORT=9000`,
//! `MARKET__MARKET__STREAM__MAX_SUBSCRIPTIONS=20`).

use std::path::Path;

use config::{Config, Environment, File, FileFormat};

use mktdata_core::{ConfigError, ConfigResult, ServerConfig};

fn load_error(e: config::ConfigError) -> ConfigError {
    ConfigError::Load(e.to_string())
}

pub const DEFAULT_CONFIG_PATH: &str = "config/market.toml";
pub const ENV_PREFIX: &str = "MARKET";

pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<ServerConfig> {
    let path = path.as_ref();
    // Seed with the serialized defaults so a partial table keeps the
    // per-field defaults of its own section.
    let defaults = Config::try_from(&ServerConfig::default()).map_err(load_error)?;
    let settings = Config::builder()
        .add_source(defaults)
        .add_source(File::from(path).format(FileFormat::Toml).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(load_error)?;

    let config: ServerConfig = settings.try_deserialize().map_err(load_error)?;
    config.market.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mktdata_core::RateLimitConfig;

    fn temp_file(name: &str, contents: &str) -> std::path::PathBuf {
        let file_name = format!("mktdata-{}-{}.toml", name, std::process::id());
        let path = std::env::temp_dir().join(file_name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config("/nonexistent/market.toml").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.market.providers.chunk_size, 50);
        assert_eq!(config.market.sparkline_len, 30);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = temp_file(
            "override",
            r#"
            port = 9100

            [market.stream]
            max_subscriptions = 5

            [market.universe]
            crypto = ["BTC-USD"]
            "#,
        );
        let config = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.port, 9100);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.market.stream.max_subscriptions, 5);
        assert_eq!(config.market.stream.heartbeat_interval_ms, 30_000);
        assert_eq!(config.market.universe.crypto, vec!["BTC-USD"]);
        assert_eq!(config.market.universe.stocks.len(), 5);
    }

    #[test]
    fn test_partial_rate_limit_keeps_its_preset() {
        let path = temp_file("limits", "[market.providers.fx_limit]\ncapacity = 3\n");
        let config = load_config(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let providers = &config.market.providers;
        assert_eq!(providers.fx_limit.capacity, 3);
        assert_eq!(providers.fx_limit.refill_every_ms, 60_000);
        assert_eq!(providers.yahoo_limit, RateLimitConfig::yahoo());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let path = temp_file("invalid", "[market.providers]\nchunk_size = 0\n");
        let result = load_config(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
