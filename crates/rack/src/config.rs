//! Settings shared by the environment builder and the dispatcher.

use thiserror::Error;

use crate::input::{DEFAULT_MEMORY_THRESHOLD, DEFAULT_READ_CHUNK_SIZE};

/// How the environment builder wraps a host request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPolicy {
    /// Record the body so `rewind` always works, spilling to a temp file past
    /// `memory_threshold` bytes.
    Buffered { memory_threshold: usize },
    /// Hand the body through as is. `rewind` fails once anything was read.
    Streaming,
}

impl Default for InputPolicy {
    fn default() -> Self {
        Self::Buffered { memory_threshold: DEFAULT_MEMORY_THRESHOLD }
    }
}

#[derive(Debug, Clone)]
pub struct RackConfig {
    input_policy: InputPolicy,
    read_chunk_size: usize,
    script_name: String,
    default_server_name: String,
    default_server_port: u16,
    url_scheme: String,
    multithread: bool,
}

impl RackConfig {
    pub fn builder() -> RackConfigBuilder {
        RackConfigBuilder::new()
    }

    pub fn input_policy(&self) -> InputPolicy {
        self.input_policy
    }

    pub fn read_chunk_size(&self) -> usize {
        self.read_chunk_size
    }

    /// The mount prefix of the application, stripped from `PATH_INFO`.
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn default_server_name(&self) -> &str {
        &self.default_server_name
    }

    pub fn default_server_port(&self) -> u16 {
        self.default_server_port
    }

    pub fn url_scheme(&self) -> &str {
        &self.url_scheme
    }

    pub fn multithread(&self) -> bool {
        self.multithread
    }
}

impl Default for RackConfig {
    fn default() -> Self {
        Self {
            input_policy: InputPolicy::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            script_name: String::new(),
            default_server_name: "localhost".to_owned(),
            default_server_port: 80,
            url_scheme: "http".to_owned(),
            multithread: true,
        }
    }
}

#[derive(Debug)]
pub struct RackConfigBuilder {
    config: RackConfig,
}

impl RackConfigBuilder {
    fn new() -> Self {
        Self { config: RackConfig::default() }
    }

    pub fn input_policy(mut self, input_policy: InputPolicy) -> Self {
        self.config.input_policy = input_policy;
        self
    }

    pub fn read_chunk_size(mut self, read_chunk_size: usize) -> Self {
        self.config.read_chunk_size = read_chunk_size;
        self
    }

    pub fn script_name<S: Into<String>>(mut self, script_name: S) -> Self {
        self.config.script_name = script_name.into();
        self
    }

    pub fn default_server_name<S: Into<String>>(mut self, server_name: S) -> Self {
        self.config.default_server_name = server_name.into();
        self
    }

    pub fn default_server_port(mut self, server_port: u16) -> Self {
        self.config.default_server_port = server_port;
        self
    }

    pub fn url_scheme<S: Into<String>>(mut self, url_scheme: S) -> Self {
        self.config.url_scheme = url_scheme.into();
        self
    }

    pub fn multithread(mut self, multithread: bool) -> Self {
        self.config.multithread = multithread;
        self
    }

    pub fn build(self) -> Result<RackConfig, ConfigError> {
        let config = self.config;

        if config.read_chunk_size == 0 {
            return Err(ConfigError::ZeroReadChunkSize);
        }

        let script_name = &config.script_name;
        if !script_name.is_empty() && (!script_name.starts_with('/') || script_name.ends_with('/')) {
            return Err(ConfigError::InvalidScriptName { script_name: script_name.clone() });
        }

        if config.url_scheme.is_empty() {
            return Err(ConfigError::EmptyUrlScheme);
        }

        Ok(config)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("read chunk size must be greater than zero")]
    ZeroReadChunkSize,

    #[error("script name must be empty or start with '/' without a trailing '/', got {script_name:?}")]
    InvalidScriptName { script_name: String },

    #[error("url scheme must be set")]
    EmptyUrlScheme,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RackConfig::builder().build().unwrap();

        assert_eq!(config.input_policy(), InputPolicy::Buffered { memory_threshold: DEFAULT_MEMORY_THRESHOLD });
        assert_eq!(config.read_chunk_size(), DEFAULT_READ_CHUNK_SIZE);
        assert_eq!(config.script_name(), "");
        assert_eq!(config.default_server_name(), "localhost");
        assert_eq!(config.default_server_port(), 80);
        assert_eq!(config.url_scheme(), "http");
        assert!(config.multithread());
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(RackConfig::builder().read_chunk_size(0).build().unwrap_err(), ConfigError::ZeroReadChunkSize);
        assert_eq!(
            RackConfig::builder().script_name("app/").build().unwrap_err(),
            ConfigError::InvalidScriptName { script_name: "app/".to_owned() }
        );
        assert_eq!(RackConfig::builder().script_name("/app/").build().unwrap_err(), ConfigError::InvalidScriptName {
            script_name: "/app/".to_owned()
        });
        assert_eq!(RackConfig::builder().url_scheme("").build().unwrap_err(), ConfigError::EmptyUrlScheme);
    }

    #[test]
    fn accepts_mount_prefix() {
        let config = RackConfig::builder().script_name("/app").input_policy(InputPolicy::Streaming).build().unwrap();

        assert_eq!(config.script_name(), "/app");
        assert_eq!(config.input_policy(), InputPolicy::Streaming);
    }
}
