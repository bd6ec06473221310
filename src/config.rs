//! Configuration for the Area display core
//!
//! Loads configuration from TOML file at `~/.config/area/display.toml`
//! Auto-generates default config file on first run if missing.
//! Command line flags override what the file says.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::wm::display::DisplayOptions;

/// Log filter used when neither `RUST_LOG` nor the config file sets one
pub const DEFAULT_LOG_FILTER: &str = "area_display=debug,info";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config = Self::parse(&content)?;

        info!("Configuration loaded from {:?}", config_path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("area");

        Ok(config_dir.join("display.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string).context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }

    /// Apply command line flags on top of the file
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--replace" | "-r" => {
                    info!("--replace flag detected: will attempt to replace existing WM");
                    self.display.replace = true;
                }
                "--sync" => self.display.synchronous = true,
                "--display" => match args.next() {
                    Some(name) => self.display.name = Some(name),
                    None => warn!("--display needs a display name"),
                },
                other => warn!("Ignoring unknown argument '{}'", other),
            }
        }
    }

    /// Options the display session is opened with
    pub fn to_options(&self) -> DisplayOptions {
        DisplayOptions {
            name: self.display.name.clone(),
            replace: self.display.replace,
            synchronous: self.display.synchronous,
            wm_name: self.display.wm_name.clone(),
            selection_wait_timeout: self
                .display
                .selection_wait_timeout_ms
                .map(Duration::from_millis),
            timestamp_wait_timeout: self
                .display
                .timestamp_wait_timeout_ms
                .map(Duration::from_millis),
        }
    }
}

/// `[display]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// X display to connect to; `$DISPLAY` when unset
    pub name: Option<String>,
    /// Replace a running window manager
    pub replace: bool,
    /// Check every X request as it is sent (slow, for debugging)
    pub synchronous: bool,
    /// Name advertised through `_NET_WM_NAME`
    pub wm_name: String,
    /// How long to wait for a replaced manager to exit; forever when unset
    pub selection_wait_timeout_ms: Option<u64>,
    /// How long to wait for a timestamp round trip; forever when unset
    pub timestamp_wait_timeout_ms: Option<u64>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            name: None,
            replace: false,
            synchronous: false,
            wm_name: "area".to_string(),
            selection_wait_timeout_ms: None,
            timestamp_wait_timeout_ms: None,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_match_display_options() {
        let config = Config::default();
        assert_eq!(config.to_options(), DisplayOptions::default());
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_partial_file() {
        let config = Config::parse(
            r#"
            [display]
            replace = true
            selection_wait_timeout_ms = 5000
            "#,
        )
        .unwrap();

        assert!(config.display.replace);
        assert_eq!(config.display.wm_name, "area");
        let options = config.to_options();
        assert_eq!(options.selection_wait_timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.timestamp_wait_timeout, None);
    }

    #[test]
    fn test_default_file_round_trips() {
        let written = toml::to_string_pretty(&Config::default()).unwrap();
        assert_eq!(Config::parse(&written).unwrap(), Config::default());
    }

    #[test]
    fn test_invalid_file() {
        assert!(Config::parse("[display]\nreplace = \"yes\"").is_err());
    }

    #[test]
    fn test_args_override_file() {
        let mut config = Config::default();
        config.apply_args(args(&["-r", "--display", ":2", "--sync", "--bogus"]));

        let options = config.to_options();
        assert!(options.replace);
        assert!(options.synchronous);
        assert_eq!(options.name.as_deref(), Some(":2"));
    }

    #[test]
    fn test_display_flag_without_value() {
        let mut config = Config::default();
        config.apply_args(args(&["--display"]));
        assert_eq!(config.display.name, None);
    }
}
