use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "PARTITIONER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/partitioner.toml";
const ENV_PREFIX: &str = "PARTITIONER";
const ENV_SEPARATOR: &str = "__";
const DATABASE_URL_ENV_VAR: &str = "DATABASE_URL";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_sources(config_path)
}

/// Fill the database URL from `DATABASE_URL` unless configured explicitly
fn load_secrets(config: &mut Config) {
    if config.database.url.is_none() {
        if let Ok(url) = env::var(DATABASE_URL_ENV_VAR) {
            config.database.url = Some(url);
        }
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // PARTITIONER__RUNNER__PERIOD -> runner.period
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let mut config: Config = builder.build()?.try_deserialize()?;
    load_secrets(&mut config);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Interval;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.runner.period.as_duration(), Duration::from_secs(21600));
        assert!(config.tables.is_empty());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[runner]
period = "30m"

[database]
url = "postgres://localhost/app"
max_connections = 2
tolerate_existing = false

[[tables]]
name = "events"
interval = "monthly"
keep = 12
protected = ["events_default"]

[[tables]]
name = "audit_log"
interval = "daily"
keep = 90
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.runner.period.as_duration(), Duration::from_secs(1800));
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/app"));
        assert_eq!(config.database.max_connections, 2);
        assert!(!config.database.tolerate_existing);

        assert_eq!(config.tables.len(), 2);
        assert_eq!(config.tables[0].name, "events");
        assert_eq!(config.tables[0].interval, Interval::Monthly);
        assert_eq!(config.tables[0].protected, vec!["events_default"]);
        assert_eq!(config.tables[1].interval, Interval::Daily);
        assert_eq!(config.tables[1].keep, 90);
        assert!(config.tables[1].protected.is_empty());
    }

    #[test]
    fn test_malformed_interval() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(
            &config_path,
            r#"
[[tables]]
name = "events"
interval = "hourly"
keep = 1
            "#,
        )
        .unwrap();

        assert!(load_from_sources(config_path).is_err());
    }
}
