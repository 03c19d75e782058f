// rust/coordinator-core/src/config.rs

//! Configuration management for the coordination service.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::frame::MAX_FRAME_LENGTH;
use crate::error::{CoordinatorError, Result};

/// Port the coordinator listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 3079;

/// Receive chunk size in bytes.
pub const DEFAULT_BLOCKSIZE: usize = 4 * 1024;

// Top-level coordinator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub server: ServerConfig,
    pub groups: GroupConfig,
    pub client: ClientConfig,
}

// Listener options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    pub host: String,
    /// TCP port to bind to.
    pub port: u16,
    /// Receive chunk size in bytes.
    pub blocksize: usize,
    /// Largest payload length a request header may declare.
    pub max_frame_bytes: u64,
    /// Deadline for reading one request frame, in milliseconds.
    pub read_timeout_ms: u64,
    /// Deadline for writing one reply frame, in milliseconds.
    pub write_timeout_ms: u64,
    /// Initial delay between bind attempts; doubles after each failure.
    pub bind_retry_delay_ms: u64,
    /// Number of bind attempts before giving up.
    pub bind_max_attempts: u32,
}

// Group bookkeeping options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Extra `wait` rounds handed to the primary aggregator once every
    /// bundle has arrived.
    pub aggregate_pacing_rounds: u32,
}

// Options used by `CoordinatorClient`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Coordinator address as `host:port`.
    pub address: String,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Timeout for one request/reply exchange in milliseconds.
    pub request_timeout_ms: u64,
    /// Delay before the first re-poll after a `wait` reply.
    pub poll_interval_ms: u64,
    /// Upper bound for the re-poll delay.
    pub max_poll_interval_ms: u64,
    /// Maximum number of polls; 0 polls until the coordinator answers.
    pub max_polls: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            blocksize: DEFAULT_BLOCKSIZE,
            max_frame_bytes: 64 * 1024 * 1024, // 64 MB
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
            bind_retry_delay_ms: 1_000,
            bind_max_attempts: 8,
        }
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            aggregate_pacing_rounds: 2,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{DEFAULT_PORT}"),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            poll_interval_ms: 1_000,
            max_poll_interval_ms: 10_000,
            max_polls: 0,
        }
    }
}

impl ServerConfig {
    /// The `host:port` pair to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Replace `field` with the parsed value of `key`, if set and parsable.
fn env_override<T: FromStr>(key: &str, field: &mut T) {
    if let Some(value) = std::env::var(key).ok().and_then(|v| v.parse().ok()) {
        *field = value;
    }
}

impl FromStr for CoordinatorConfig {
    type Err = CoordinatorError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| CoordinatorError::config_with_source("failed to parse TOML config", e))
    }
}

impl CoordinatorConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoordinatorError::io_with_source(
                path.display().to_string(),
                "failed to read config file",
                e,
            )
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `MNC_` and use underscores
    // to separate nested fields. For example:
    // - `MNC_SERVER_PORT` overrides `server.port`
    // - `MNC_SERVER_BLOCKSIZE` overrides `server.blocksize`
    // - `MNC_GROUPS_AGGREGATE_PACING_ROUNDS` overrides `groups.aggregate_pacing_rounds`
    // - `MNC_CLIENT_ADDRESS` overrides `client.address`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        let server = &mut self.server;
        env_override("MNC_SERVER_HOST", &mut server.host);
        env_override("MNC_SERVER_PORT", &mut server.port);
        env_override("MNC_SERVER_BLOCKSIZE", &mut server.blocksize);
        env_override("MNC_SERVER_MAX_FRAME_BYTES", &mut server.max_frame_bytes);
        env_override("MNC_SERVER_READ_TIMEOUT_MS", &mut server.read_timeout_ms);
        env_override("MNC_SERVER_WRITE_TIMEOUT_MS", &mut server.write_timeout_ms);

        env_override(
            "MNC_GROUPS_AGGREGATE_PACING_ROUNDS",
            &mut self.groups.aggregate_pacing_rounds,
        );

        let client = &mut self.client;
        env_override("MNC_CLIENT_ADDRESS", &mut client.address);
        env_override("MNC_CLIENT_POLL_INTERVAL_MS", &mut client.poll_interval_ms);
        env_override("MNC_CLIENT_MAX_POLLS", &mut client.max_polls);

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(CoordinatorError::config("server.host must not be empty"));
        }

        if self.server.blocksize == 0 {
            return Err(CoordinatorError::config(
                "server.blocksize must be greater than 0",
            ));
        }

        if self.server.max_frame_bytes == 0 {
            return Err(CoordinatorError::config(
                "server.max_frame_bytes must be greater than 0",
            ));
        }

        if self.server.max_frame_bytes > u64::from(MAX_FRAME_LENGTH) {
            return Err(CoordinatorError::config(format!(
                "server.max_frame_bytes must not exceed {MAX_FRAME_LENGTH:#X}"
            )));
        }

        if self.server.bind_max_attempts == 0 {
            return Err(CoordinatorError::config(
                "server.bind_max_attempts must be greater than 0",
            ));
        }

        if self.client.address.is_empty() {
            return Err(CoordinatorError::config("client.address must not be empty"));
        }

        if self.client.poll_interval_ms > self.client.max_poll_interval_ms {
            return Err(CoordinatorError::config(
                "client.poll_interval_ms must not exceed client.max_poll_interval_ms",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.server.port, 3079);
        assert_eq!(config.server.blocksize, 4096);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.groups.aggregate_pacing_rounds, 2);
        assert_eq!(config.client.max_polls, 0);
    }

    #[test]
    fn test_default_validates() {
        assert!(CoordinatorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_str_empty() {
        let config: CoordinatorConfig = "".parse().unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
    }

    #[test]
    fn test_from_str_partial() {
        let config: CoordinatorConfig = r#"
            [server]
            port = 4000

            [groups]
            aggregate_pacing_rounds = 0
        "#
        .parse()
        .unwrap();

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.blocksize, DEFAULT_BLOCKSIZE);
        assert_eq!(config.groups.aggregate_pacing_rounds, 0);
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: std::result::Result<CoordinatorConfig, _> = "invalid = [".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [server]
            host = "127.0.0.1"
            blocksize = 1024
            "#
        )
        .unwrap();

        let config = CoordinatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.blocksize, 1024);
        assert_eq!(config.server.bind_address(), "127.0.0.1:3079");
    }

    #[test]
    fn test_from_file_not_found() {
        let result = CoordinatorConfig::from_file("/nonexistent/coordinator.toml");
        assert!(matches!(result, Err(CoordinatorError::Io { .. })));
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nblocksize = 0").unwrap();

        let result = CoordinatorConfig::from_file(file.path());
        assert!(matches!(result, Err(CoordinatorError::Config { .. })));
    }

    #[test]
    fn test_validate_invalid_blocksize() {
        let mut config = CoordinatorConfig::default();
        config.server.blocksize = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_frame_limit_bounds() {
        let mut config = CoordinatorConfig::default();
        config.server.max_frame_bytes = 0;
        assert!(config.validate().is_err());

        config.server.max_frame_bytes = u64::from(u32::MAX) + 1;
        assert!(config.validate().is_err());

        config.server.max_frame_bytes = u64::from(u32::MAX);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_host() {
        let mut config = CoordinatorConfig::default();
        config.server.host = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_poll_interval_ordering() {
        let mut config = CoordinatorConfig::default();
        config.client.poll_interval_ms = 20_000;
        config.client.max_poll_interval_ms = 10_000;
        assert!(config.validate().is_err());
    }

    // Helper to clear all MNC_ environment variables for test isolation
    fn clear_mnc_env_vars() {
        for (key, _) in std::env::vars() {
            if key.starts_with("MNC_") {
                std::env::remove_var(&key);
            }
        }
    }

    // Environment variable tests are combined into a single test to avoid
    // race conditions when tests run in parallel, since env vars are global state.
    #[test]
    fn test_env_overrides() {
        clear_mnc_env_vars();

        std::env::set_var("MNC_SERVER_HOST", "127.0.0.1");
        std::env::set_var("MNC_SERVER_PORT", "4001");
        std::env::set_var("MNC_SERVER_BLOCKSIZE", "8192");
        std::env::set_var("MNC_GROUPS_AGGREGATE_PACING_ROUNDS", "5");
        std::env::set_var("MNC_CLIENT_ADDRESS", "coordinator.lab:4001");

        let config = CoordinatorConfig::default().with_env_overrides();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 4001);
        assert_eq!(config.server.blocksize, 8192);
        assert_eq!(config.groups.aggregate_pacing_rounds, 5);
        assert_eq!(config.client.address, "coordinator.lab:4001");

        clear_mnc_env_vars();

        // Invalid values should be ignored (keep defaults)
        std::env::set_var("MNC_SERVER_PORT", "not_a_port");

        let config = CoordinatorConfig::default().with_env_overrides();
        assert_eq!(config.server.port, DEFAULT_PORT);

        clear_mnc_env_vars();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let original = CoordinatorConfig::default();
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: CoordinatorConfig = toml_str.parse().unwrap();

        assert_eq!(original.server.port, parsed.server.port);
        assert_eq!(original.server.max_frame_bytes, parsed.server.max_frame_bytes);
        assert_eq!(original.client.address, parsed.client.address);
    }
}
