//! Gateway configuration
//!
//! Layered loading: embedded defaults, then optional files under
//! `config/`, then `TOOLGATE_*` environment variables on top.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;
use toolgate_connectors::{EnterpriseDataConfig, QuantumConfig, SourceControlConfig};
use toolgate_core::RetryPolicy;

/// Embedded default configuration (compiled into the binary)
const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub tenants: TenantsConfig,
    #[serde(default)]
    pub resolver: ResolverSettings,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Tenant store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TenantsConfig {
    /// Path to the tenants TOML file
    pub file: String,
}

/// Tenant resolver cache settings
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverSettings {
    #[serde(default = "default_resolver_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_resolver_max_entries")]
    pub max_entries: usize,
}

fn default_resolver_ttl() -> u64 {
    300
}

fn default_resolver_max_entries() -> usize {
    10_000
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_resolver_ttl(),
            max_entries: default_resolver_max_entries(),
        }
    }
}

/// Audit log configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Path of the JSONL audit file
    #[serde(default = "default_audit_path")]
    pub path: String,
    /// In-memory queue bound before drop-oldest kicks in
    #[serde(default = "default_audit_capacity")]
    pub buffer_capacity: usize,
}

fn default_audit_path() -> String {
    "toolgate-audit.jsonl".to_string()
}

fn default_audit_capacity() -> usize {
    1024
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
            buffer_capacity: default_audit_capacity(),
        }
    }
}

/// Step execution settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_deadline_secs")]
    pub default_deadline_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_deadline_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_deadline_secs: default_deadline_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl ExecutionConfig {
    pub fn default_deadline(&self) -> Duration {
        Duration::from_secs(self.default_deadline_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Per-connector backend configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConnectorsConfig {
    #[serde(default)]
    pub source_control: SourceControlConfig,
    #[serde(default)]
    pub enterprise_data: EnterpriseDataConfig,
    #[serde(default)]
    pub quantum: QuantumConfig,
}

/// Load configuration from defaults, files, and environment
pub fn load_config() -> Result<GatewayConfig> {
    let config = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name("config/local").required(false))
        .add_source(
            Environment::with_prefix("TOOLGATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}
