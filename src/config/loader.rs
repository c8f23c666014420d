use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::KilnConfig;

/// Prefix of environment overrides, e.g. `KILN__REGISTRY__ACTIVE_WAIT_TIMEOUT=5s`
pub const ENV_PREFIX: &str = "KILN";

/// `KILN__`-prefixed overrides; `filters.builtin` is a space-separated list.
fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(" ")
        .with_list_parse_key("filters.builtin")
}

/// Load configuration from a file using the config crate, then apply
/// `KILN__`-prefixed environment overrides.
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: &str) -> Result<KilnConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<KilnConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(env_source())
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let kiln_config: KilnConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(kiln_config)
}

/// Defaults plus environment overrides, for running without a config file
pub fn load_config_from_env() -> Result<KilnConfig> {
    let settings = Config::builder()
        .add_source(env_source())
        .build()
        .context("Failed to read KILN__ environment overrides")?;

    settings
        .try_deserialize()
        .context("Failed to deserialize environment configuration")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_toml_config() {
        let toml_content = r#"
[registry]
active_poll_interval = "20ms"
strict_admin_thread = false

[filters]
builtin = ["gzip", "gunzip"]

[logging]
level = "kiln=debug"
json = true
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(
            config.registry.active_poll_interval(),
            std::time::Duration::from_millis(20)
        );
        assert_eq!(config.registry.active_wait_timeout, "30s");
        assert!(!config.registry.strict_admin_thread);
        assert_eq!(config.filters.builtin, vec!["gzip", "gunzip"]);
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_yaml_config() {
        let yaml_content = r#"
registry:
  active_wait_timeout: "2s"
logging:
  level: "warn"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config_sync(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(
            config.registry.active_wait_timeout(),
            std::time::Duration::from_secs(2)
        );
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.filters.builtin.len(), 5);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = load_config_sync("/nonexistent/kiln.toml");
        assert!(result.is_err());
    }
}
