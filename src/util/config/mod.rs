//! Playground configuration system
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Environment variables (YXPLAY_ADDR, YXPLAY_TIMEOUT_MS, YXPLAY_LOG)
//! 3. Config file (--config PATH, or ./yxplay.toml when present)
//! 4. Default values
//! ```
//!
//! # Example file
//!
//! ```toml
//! [service]
//! addr = "127.0.0.1:7878"
//!
//! [limits]
//! timeout_ms = 2000
//! max_instructions = 50000000
//!
//! [dispatch]
//! policy = "fail-fast"
//! exclusive = false
//!
//! [log]
//! level = "info"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runner::dispatch::DispatchPolicy;
use crate::util::logger::LogLevel;
use crate::vm::VMConfig;

/// File looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "yxplay.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaygroundConfig {
    /// Network service settings
    #[serde(default)]
    pub service: ServiceConfig,
    /// Per-execution sandbox limits
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Entry point dispatch settings
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Listen address
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Longest accepted request line, in bytes
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

fn default_addr() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_max_request_bytes() -> usize {
    256 * 1024
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            max_request_bytes: default_max_request_bytes(),
        }
    }
}

/// Sandbox limits applied to every execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Wall-clock deadline for dispatch, in milliseconds
    pub timeout_ms: u64,
    /// Instruction budget shared by all entry points of one call
    pub max_instructions: u64,
    /// Deepest allowed call stack
    pub max_call_depth: usize,
    /// Captured output cap, in bytes
    pub max_output_bytes: usize,
    /// Allocation budget for strings, lists and objects, in bytes
    pub max_alloc_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let vm = VMConfig::default();
        Self {
            timeout_ms: vm.timeout.as_millis() as u64,
            max_instructions: vm.max_instructions,
            max_call_depth: vm.max_call_depth,
            max_output_bytes: 1024 * 1024,
            max_alloc_bytes: vm.max_alloc_bytes,
        }
    }
}

impl LimitsConfig {
    /// VM configuration for these limits
    pub fn vm_config(&self) -> VMConfig {
        VMConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            max_instructions: self.max_instructions,
            max_call_depth: self.max_call_depth,
            max_alloc_bytes: self.max_alloc_bytes,
            ..VMConfig::default()
        }
    }
}

/// Dispatch configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// What to do after an entry point fails
    #[serde(default)]
    pub policy: DispatchPolicy,
    /// Run one pipeline at a time in this process
    #[serde(default)]
    pub exclusive: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {var}: {message}")]
    InvalidEnv { var: &'static str, message: String },
}

impl PlaygroundConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(
        path: &Path,
        content: &str,
    ) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from an explicit file, or from `./yxplay.toml` when it exists
    ///
    /// Returns defaults when neither is available.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.exists() {
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&path, &content)
    }

    /// Apply `YXPLAY_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `YXPLAY_*` overrides from an arbitrary lookup
    pub fn apply_env_from<F>(
        &mut self,
        lookup: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("YXPLAY_ADDR") {
            self.service.addr = addr;
        }
        if let Some(ms) = lookup("YXPLAY_TIMEOUT_MS") {
            self.limits.timeout_ms = ms.trim().parse().map_err(|e| ConfigError::InvalidEnv {
                var: "YXPLAY_TIMEOUT_MS",
                message: format!("{}", e),
            })?;
        }
        if let Some(level) = lookup("YXPLAY_LOG") {
            self.log.level = level.parse().map_err(|message| ConfigError::InvalidEnv {
                var: "YXPLAY_LOG",
                message,
            })?;
        }
        Ok(())
    }
}
