//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Reporter settings
    #[serde(default)]
    pub reporter: ReporterConfig,
}

/// Default settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// ANSI color mode: "auto", "always", or "never"
    #[serde(default = "default_color")]
    pub color: String,

    /// Request deadline applied to every step, in seconds (0 = none)
    #[serde(default)]
    pub timeout_secs: u64,

    /// Directory plugins are resolved against
    pub plugin_dir: Option<PathBuf>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            color: default_color(),
            timeout_secs: 0,
            plugin_dir: None,
        }
    }
}

fn default_color() -> String {
    "auto".to_string()
}

/// Reporter configuration
#[derive(Debug, Deserialize, Default)]
pub struct ReporterConfig {
    /// Maximum number of parallel subtests (0 = unlimited)
    #[serde(default)]
    pub max_parallel: usize,
}

impl Config {
    /// Load configuration from the given file
    ///
    /// Returns default configuration if no path is given or the file
    /// doesn't exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| super::Error::file_read(path.display(), e))?;
        toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Whether ANSI colors should be enabled for the given tty state
    pub fn color_enabled(&self, is_tty: bool) -> bool {
        match self.defaults.color.as_str() {
            "always" => true,
            "never" => false,
            _ => is_tty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.defaults.color, "auto");
        assert_eq!(config.reporter.max_parallel, 0);
    }

    #[test]
    fn test_parse() {
        let config: Config = toml::from_str(
            r#"
[defaults]
color = "never"
timeout_secs = 30

[reporter]
max_parallel = 4
"#,
        )
        .unwrap();
        assert!(!config.color_enabled(true));
        assert_eq!(config.defaults.timeout_secs, 30);
        assert_eq!(config.reporter.max_parallel, 4);
    }
}
