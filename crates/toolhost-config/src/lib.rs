//! TOML configuration loading for toolhost.
//!
//! Finds the configuration file with precedence:
//! explicit path > `TOOLHOST_CONFIG` > `./toolhost.toml` > `~/.toolhost/config.toml`

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toolhost_mcp::McpConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TOOLHOST_CONFIG";

/// Environment variable overriding the global config directory.
pub const CONFIG_DIR_ENV: &str = "TOOLHOST_CONFIG_DIR";

/// Project-local configuration file, relative to the working directory.
pub const PROJECT_CONFIG_FILE: &str = "toolhost.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// A parsed configuration and the file it came from.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: McpConfig,
    /// `None` when no file was found and defaults apply.
    pub source: Option<PathBuf>,
}

/// Load configuration from the standard locations.
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    load_from(
        explicit,
        from_env.as_deref(),
        Path::new(PROJECT_CONFIG_FILE),
        &config_dir().join("config.toml"),
    )
}

/// Load configuration from the given candidates.
///
/// `explicit` and `from_env` name files that must exist and parse. The
/// implicit `project` and `global` files are optional; one that fails to
/// parse is logged and skipped.
pub fn load_from(
    explicit: Option<&Path>,
    from_env: Option<&Path>,
    project: &Path,
    global: &Path,
) -> Result<LoadedConfig, ConfigError> {
    if let Some(path) = explicit.or(from_env) {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        return Ok(LoadedConfig {
            config: parse(&content, path)?,
            source: Some(path.to_path_buf()),
        });
    }

    for path in [project, global] {
        let Ok(content) = std::fs::read_to_string(path) else {
            continue;
        };
        match parse(&content, path) {
            Ok(config) => {
                tracing::debug!("Loaded configuration from {}", path.display());
                return Ok(LoadedConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
            Err(e) => tracing::warn!("Ignoring {}: {e}", path.display()),
        }
    }

    tracing::debug!("No configuration file found; no servers configured");
    Ok(LoadedConfig::default())
}

/// Parse and validate configuration text. `path` is used for messages only.
pub fn parse(content: &str, path: &Path) -> Result<McpConfig, ConfigError> {
    let config: McpConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validate(&config)?;
    Ok(config)
}

/// Reject configurations the adapter cannot run unambiguously.
pub fn validate(config: &McpConfig) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for (idx, server) in config.servers.iter().enumerate() {
        if server.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: format!("servers[{idx}].name"),
                message: "server name must not be empty".into(),
            });
        }
        if server.name.contains(':') {
            return Err(ConfigError::InvalidValue {
                key: format!("servers[{idx}].name"),
                message: format!("'{}' must not contain ':'", server.name),
            });
        }
        if !names.insert(server.name.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: format!("servers[{idx}].name"),
                message: format!("duplicate server name '{}'", server.name),
            });
        }
        if server.command.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: format!("servers[{idx}].command"),
                message: format!("server '{}' has an empty command", server.name),
            });
        }
    }
    Ok(())
}

/// Get the toolhost config directory path (~/.toolhost/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolhost")
}
