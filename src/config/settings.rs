//! Harness settings

use crate::core::session::{LineEnding, SessionConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration
    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Serialization failed
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Harness configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Console session settings
    pub session: SessionSettings,
    /// HTTP file server settings
    pub http: HttpSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl HarnessConfig {
    /// Load from `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path`, or use defaults when it does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Session configuration derived from these settings
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(Duration::from_secs(self.session.timeout_secs))
            .exit_timeout(self.session.exit_timeout_secs.map(Duration::from_secs))
            .line_ending(self.session.line_ending)
    }
}

/// Console session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Command that builds and boots the image
    pub command: String,
    /// Expect timeout in seconds
    pub timeout_secs: u64,
    /// Bound on the emulator exit wait; unset waits forever
    pub exit_timeout_secs: Option<u64>,
    /// Line ending for sent commands
    pub line_ending: LineEnding,
    /// Log console output lines
    pub echo: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            command: "make -s run".to_string(),
            timeout_secs: 30,
            exit_timeout_secs: None,
            line_ending: LineEnding::Lf,
            echo: true,
        }
    }
}

/// HTTP file server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Directory served
    pub root: PathBuf,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level filter, overridden by `RUST_LOG`
    pub level: String,
    /// Console transcript file
    pub transcript: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            transcript: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.session.command, "make -s run");
        assert_eq!(config.session.timeout_secs, 30);
        assert!(config.session.echo);
        assert_eq!(config.http.root, PathBuf::from("."));

        let session = config.session_config();
        assert_eq!(session.timeout, Duration::from_secs(30));
        assert_eq!(session.exit_timeout, None);
        assert_eq!(session.line_ending, LineEnding::Lf);
    }

    #[test]
    fn test_partial_file() {
        let config = HarnessConfig::from_toml_str(
            r#"
            [session]
            timeout_secs = 90
            exit_timeout_secs = 10
            line_ending = "crlf"

            [logging]
            transcript = "console.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.session.command, "make -s run");
        assert_eq!(config.session.timeout_secs, 90);
        assert_eq!(config.session.line_ending, LineEnding::Crlf);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.transcript, Some(PathBuf::from("console.log")));
        assert_eq!(config.session_config().exit_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");

        let mut config = HarnessConfig::default();
        config.session.command = "make -s run-debug".to_string();
        config.http.root = PathBuf::from("/srv/files");
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        assert_eq!(HarnessConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert_eq!(HarnessConfig::load_or_default(&missing).unwrap(), HarnessConfig::default());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[session]\ntimeout_secs = \"soon\"\n").unwrap();
        assert!(matches!(HarnessConfig::load_or_default(&broken), Err(ConfigError::Parse { .. })));
    }
}
