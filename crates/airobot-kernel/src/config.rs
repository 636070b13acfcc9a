//! Kernel configuration.
//!
//! Settings live in the `[kernel]` table of a TOML file (by convention
//! `config/default.toml`).  Every key is optional; anything missing falls
//! back to [`KernelConfig::default`].
//!
//! ```toml
//! [kernel]
//! max_pending = 0      # 0 = unbounded
//! max_agents = 0       # 0 = unbounded
//! event_capacity = 256
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// Default capacity of the kernel event bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Tunables for a [`Kernel`](crate::Kernel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Maximum number of messages waiting in the global queue.  `0` means
    /// unbounded.
    pub max_pending: usize,
    /// Maximum number of simultaneously registered agents.  `0` means
    /// unbounded.
    pub max_agents: usize,
    /// How far an event subscriber may lag before it starts missing events.
    pub event_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_pending: 0,
            max_agents: 0,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    kernel: KernelConfig,
}

impl KernelConfig {
    /// Parse the `[kernel]` table out of a TOML document.
    ///
    /// A document without a `[kernel]` table yields the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| KernelError::Config {
            reason: e.to_string(),
        })?;
        Ok(file.kernel.normalized())
    }

    /// Load the configuration from `path`.
    ///
    /// A missing file is not an error: the defaults are returned.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(KernelError::Config {
                    reason: format!("{}: {e}", path.display()),
                });
            }
        };
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), ?config, "kernel config loaded");
        Ok(config)
    }

    /// Render as a TOML document with a `[kernel]` table.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(&ConfigFile {
            kernel: self.clone(),
        })
        .map_err(|e| KernelError::Config {
            reason: e.to_string(),
        })
    }

    fn normalized(mut self) -> Self {
        self.event_capacity = self.event_capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_unbounded() {
        let config = KernelConfig::default();
        assert_eq!(config.max_pending, 0);
        assert_eq!(config.max_agents, 0);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let config = KernelConfig::from_toml_str("[kernel]\nmax_pending = 8\n").unwrap();
        assert_eq!(config.max_pending, 8);
        assert_eq!(config.max_agents, 0);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn missing_table_yields_defaults() {
        let config = KernelConfig::from_toml_str("[other]\nkey = 1\n").unwrap();
        assert_eq!(config, KernelConfig::default());
    }

    #[test]
    fn zero_event_capacity_is_raised() {
        let config = KernelConfig::from_toml_str("[kernel]\nevent_capacity = 0\n").unwrap();
        assert_eq!(config.event_capacity, 1);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let result = KernelConfig::from_toml_str("[kernel\nmax_pending = ");
        assert!(matches!(result, Err(KernelError::Config { .. })));
    }

    #[test]
    fn wrong_type_is_a_config_error() {
        let result = KernelConfig::from_toml_str("[kernel]\nmax_agents = \"lots\"\n");
        assert!(matches!(result, Err(KernelError::Config { .. })));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[kernel]\nmax_agents = 3\nevent_capacity = 32").unwrap();

        let config = KernelConfig::load(file.path()).unwrap();
        assert_eq!(config.max_agents, 3);
        assert_eq!(config.event_capacity, 32);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = KernelConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, KernelConfig::default());
    }

    #[test]
    fn toml_output_parses_back() {
        let config = KernelConfig {
            max_pending: 100,
            max_agents: 4,
            event_capacity: 64,
        };
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("[kernel]"));
        assert_eq!(KernelConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
