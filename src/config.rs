//! Configuration loading and constants.
//!
//! Loads server options from a TOML file, merges command-line overrides on
//! top, and resolves the result against the built-in defaults. `Options` is
//! the loaded shape with every field optional; `Settings` is the fully
//! resolved record the server runs with.

use const_format::formatcp;
use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;

// =============================================================================
// Security Headers
// =============================================================================

/// HSTS lifetime in seconds (one year)
pub const HSTS_MAX_AGE: u32 = 31536000;

pub const STRICT_TRANSPORT_SECURITY: &str =
    formatcp!("max-age={}; includeSubDomains", HSTS_MAX_AGE);

/// Path browsers report XSS filter violations to
pub const SECURITY_REPORT_PATH: &str = "/api/security/report";

// =============================================================================
// Default Options
// =============================================================================

pub const DEFAULT_ADDRESS: &str = "localhost";

pub const DEFAULT_PORT: u16 = 443;

pub const DEFAULT_INSECURE_PORT: u16 = 80;

/// Directory under the filesystem root holding the site build
pub const DEFAULT_STATIC_CONTENT: &str = "build";

#[cfg(windows)]
fn default_pki_file(name: &str) -> String {
    let program_data = std::env::var("PROGRAMDATA").unwrap_or_default();
    format!("{program_data}/pki/{name}")
}

#[cfg(not(windows))]
fn default_pki_file(name: &str) -> String {
    format!("/etc/pki/{name}")
}

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/bastion.toml";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "bastion=info,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

/// Grace period for draining connections on shutdown
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Server options as loaded from file and flags.
///
/// Unset, empty and zero values all mean "use the default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Options {
    pub address: Option<String>,
    /// Port for the TLS listener
    pub port: Option<u16>,
    /// Port for the HTTP->HTTPS redirect listener
    pub insecure_port: Option<u16>,
    pub key_file: Option<String>,
    pub cert_file: Option<String>,
    /// Document root, relative to the served filesystem
    pub static_content: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Fully resolved server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub address: String,
    pub port: u16,
    pub insecure_port: u16,
    pub key_file: String,
    pub cert_file: String,
    pub static_content: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            insecure_port: DEFAULT_INSECURE_PORT,
            key_file: default_pki_file("server.key"),
            cert_file: default_pki_file("server.crt"),
            static_content: DEFAULT_STATIC_CONTENT.to_string(),
        }
    }
}

impl Settings {
    /// `address:port` of the TLS listener
    pub fn secure_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// `address:port` of the redirect listener
    pub fn insecure_addr(&self) -> String {
        format!("{}:{}", self.address, self.insecure_port)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn non_zero(value: Option<u16>) -> Option<u16> {
    value.filter(|v| *v != 0)
}

impl Options {
    /// Load options from a TOML file. A missing file yields empty options.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Overlay `overrides` on these options, field by field.
    pub fn merge(self, overrides: Options) -> Self {
        Self {
            address: non_empty(overrides.address).or(self.address),
            port: non_zero(overrides.port).or(self.port),
            insecure_port: non_zero(overrides.insecure_port).or(self.insecure_port),
            key_file: non_empty(overrides.key_file).or(self.key_file),
            cert_file: non_empty(overrides.cert_file).or(self.cert_file),
            static_content: non_empty(overrides.static_content).or(self.static_content),
            logging: self.logging,
        }
    }

    /// Resolve every field independently against [`Settings::default`].
    pub fn resolve(&self) -> Settings {
        let defaults = Settings::default();
        Settings {
            address: non_empty(self.address.clone()).unwrap_or(defaults.address),
            port: non_zero(self.port).unwrap_or(defaults.port),
            insecure_port: non_zero(self.insecure_port).unwrap_or(defaults.insecure_port),
            key_file: non_empty(self.key_file.clone()).unwrap_or(defaults.key_file),
            cert_file: non_empty(self.cert_file.clone()).unwrap_or(defaults.cert_file),
            static_content: non_empty(self.static_content.clone())
                .unwrap_or(defaults.static_content),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }
}
