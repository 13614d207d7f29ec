//! Connection options
//!
//! Loaded from TOML:
//!
//! ```toml
//! reset_server = true
//!
//! [server]
//! url = "http://127.0.0.1:8080/"
//! # or spawn the server and talk over its stdio:
//! # command = ["verification-server", "--stdio"]
//! timeout_secs = 120
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080/";

/// Options for [`connect`](crate::session::connect)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectOptions {
    /// Ask the server to discard all state before this session
    #[serde(default)]
    pub reset_server: bool,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Where the server lives; exactly one of `url` and `command`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// HTTP request timeout; unset waits indefinitely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: Some(DEFAULT_SERVER_URL.to_string()),
            command: None,
            timeout_secs: None,
        }
    }
}

/// Resolved server endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Http {
        url: String,
        timeout: Option<Duration>,
    },
    Process {
        program: String,
        args: Vec<String>,
    },
}

impl ConnectOptions {
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            reset_server: false,
            server: ServerConfig {
                url: Some(url.into()),
                command: None,
                timeout_secs: None,
            },
        }
    }

    pub fn process(program: impl Into<String>, args: &[&str]) -> Self {
        let mut command = vec![program.into()];
        command.extend(args.iter().map(|arg| arg.to_string()));
        Self {
            reset_server: false,
            server: ServerConfig {
                url: None,
                command: Some(command),
                timeout_secs: None,
            },
        }
    }

    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset_server = reset;
        self
    }

    /// Set the HTTP request timeout in seconds
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.server.timeout_secs = Some(seconds);
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let options: Self = toml::from_str(text)?;
        options.endpoint()?;
        Ok(options)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        match (&self.server.url, &self.server.command) {
            (Some(url), None) => {
                if url.is_empty() {
                    return Err(ConfigError::invalid("server.url is empty"));
                }
                Ok(Endpoint::Http {
                    url: url.clone(),
                    timeout: self.server.timeout_secs.map(Duration::from_secs),
                })
            }
            (None, Some(command)) => {
                let (program, args) = command
                    .split_first()
                    .ok_or_else(|| ConfigError::invalid("server.command is empty"))?;
                Ok(Endpoint::Process {
                    program: program.clone(),
                    args: args.to_vec(),
                })
            }
            (Some(_), Some(_)) => Err(ConfigError::invalid(
                "server.url and server.command are mutually exclusive",
            )),
            (None, None) => Err(ConfigError::invalid("one of server.url or server.command is required")),
        }
    }
}
