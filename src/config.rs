use config::{self, File, FileFormat};
use log::{debug, error};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::error::{AgentError, Result};
use crate::target::Target;

/// Prefix of environment variable overrides (`INSPECTOR__INSPECTOR__REGION=…`)
pub const ENV_PREFIX: &str = "INSPECTOR";

/// Agent configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AgentConfig {
    /// Logging level
    #[serde(default)]
    pub log_level: LogLevel,
    /// Scan loop tuning
    #[serde(default)]
    pub inspector: InspectorSettings,
    /// Metrics sink connection
    #[serde(default)]
    pub metrics_db: SinkConfig,
    /// Probed targets
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// Scan loop tuning
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct InspectorSettings {
    /// Added as a `region` tag to every record
    #[serde(default)]
    pub region: Option<String>,
    /// Pause between scan cycles in seconds
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    /// Upper bound of the random pause between launches
    #[serde(default = "default_max_jitter")]
    pub max_jitter_ms: u64,
    /// Maximum concurrently running probes
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Capacity of the metrics queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long shutdown waits for running probes
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_scan_interval() -> u64 {
    60
}

fn default_max_jitter() -> u64 {
    2000
}

fn default_max_in_flight() -> usize {
    256
}

fn default_queue_capacity() -> usize {
    crate::metrics::DEFAULT_QUEUE_CAPACITY
}

fn default_shutdown_grace() -> u64 {
    30
}

impl Default for InspectorSettings {
    fn default() -> Self {
        Self {
            region: None,
            scan_interval_secs: default_scan_interval(),
            max_jitter_ms: default_max_jitter(),
            max_in_flight: default_max_in_flight(),
            queue_capacity: default_queue_capacity(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Metrics sink configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SinkConfig {
    /// Sink backend: `postgres` or `log`
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Database host
    #[serde(default = "default_address")]
    pub address: String,
    /// Database port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name
    #[serde(default = "default_database")]
    pub database: String,
    /// Database username
    #[serde(default)]
    pub username: Option<String>,
    /// Database password
    #[serde(default)]
    pub password: Option<String>,
    /// SSL mode
    #[serde(default)]
    pub ssl_mode: SslMode,
    /// CA certificate path
    #[serde(default)]
    pub ca_cert: Option<String>,
    /// Metrics table
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_backend() -> String {
    "log".to_string()
}

fn default_address() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "inspector".to_string()
}

fn default_table() -> String {
    "metrics".to_string()
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            address: default_address(),
            port: default_port(),
            database: default_database(),
            username: None,
            password: None,
            ssl_mode: SslMode::default(),
            ca_cert: None,
            table: default_table(),
        }
    }
}

/// SSL mode for database connections
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// Disable SSL
    Disable,
    /// Allow SSL
    Allow,
    /// Prefer SSL
    Prefer,
    /// Require SSL
    Require,
    /// Verify CA
    VerifyCa,
    /// Verify full
    VerifyFull,
}

impl Default for SslMode {
    fn default() -> Self {
        SslMode::Disable
    }
}

/// Logging level
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl AgentConfig {
    /// Check identifiers and tuning values
    pub fn validate(&self) -> Result<()> {
        let settings = &self.inspector;
        if settings.scan_interval_secs == 0 {
            return Err(AgentError::Config("inspector.scan_interval_secs must be positive".to_string()));
        }
        if settings.max_in_flight == 0 {
            return Err(AgentError::Config("inspector.max_in_flight must be positive".to_string()));
        }
        if settings.queue_capacity == 0 {
            return Err(AgentError::Config("inspector.queue_capacity must be positive".to_string()));
        }

        let mut target_ids = HashSet::new();
        for target in &self.targets {
            if target.id.trim().is_empty() {
                return Err(AgentError::Config("target with empty id".to_string()));
            }
            if !target_ids.insert(target.id.as_str()) {
                return Err(AgentError::Config(format!("duplicate target id '{}'", target.id)));
            }

            let mut prober_ids = HashSet::new();
            for descriptor in &target.probers {
                if descriptor.id.trim().is_empty() {
                    return Err(AgentError::Config(format!(
                        "target '{}' has a prober with empty id",
                        target.id
                    )));
                }
                if !prober_ids.insert(descriptor.id.as_str()) {
                    return Err(AgentError::Config(format!(
                        "duplicate prober id '{}' in target '{}'",
                        descriptor.id, target.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Total number of prober descriptors across all targets
    pub fn prober_count(&self) -> usize {
        self.targets.iter().map(|t| t.probers.len()).sum()
    }
}

/// Source of configuration
#[derive(Debug, Clone)]
enum ConfigSource {
    /// File path with its format
    File(String, FileFormat),
    /// Inline document
    Inline(String, FileFormat),
    /// Environment variables with a prefix
    Environment(String),
}

/// Layers configuration sources; later sources override earlier ones
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    sources: Vec<ConfigSource>,
}

impl ConfigBuilder {
    /// Create a new config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file source; the format follows the extension
    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = format_for(path)?;
        self.sources
            .push(ConfigSource::File(path.to_string_lossy().into_owned(), format));
        Ok(self)
    }

    /// Add a TOML string
    pub fn add_toml(mut self, toml: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Inline(toml.into(), FileFormat::Toml));
        self
    }

    /// Add a JSON string
    pub fn add_json(mut self, json: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Inline(json.into(), FileFormat::Json));
        self
    }

    /// Add environment variables (`<PREFIX>__SECTION__KEY`)
    pub fn add_env(mut self, prefix: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Environment(prefix.into()));
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<AgentConfig> {
        let mut builder = config::Config::builder();

        for source in self.sources {
            match source {
                ConfigSource::File(path, format) => {
                    debug!("Loading configuration from {}", path);
                    builder = builder.add_source(File::new(&path, format));
                }
                ConfigSource::Inline(document, format) => {
                    builder = builder.add_source(File::from_str(&document, format));
                }
                ConfigSource::Environment(prefix) => {
                    debug!("Loading configuration from environment with prefix: {}", prefix);
                    builder = builder.add_source(
                        config::Environment::with_prefix(&prefix)
                            .separator("__")
                            .try_parsing(true),
                    );
                }
            }
        }

        let config: AgentConfig = builder
            .build()
            .map_err(|e| AgentError::Config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| AgentError::Config(format!("Failed to deserialize configuration: {}", e)))?;

        config.validate()?;
        debug!(
            "Configuration loaded: {} targets, {} probers",
            config.targets.len(),
            config.prober_count()
        );
        Ok(config)
    }
}

fn format_for(path: &Path) -> Result<FileFormat> {
    let extension = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => {
            error!("Configuration file has no extension");
            return Err(AgentError::Config(format!(
                "Configuration file has no extension: {}",
                path.display()
            )));
        }
    };

    match extension.as_str() {
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        format => {
            error!("Unsupported configuration format: {}", format);
            Err(AgentError::Config(format!("Unsupported config format: {}", format)))
        }
    }
}

/// Load agent configuration from a file, with `INSPECTOR__…` overrides
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AgentConfig> {
    let path = path.as_ref();

    if !path.exists() {
        error!("Configuration file {} does not exist", path.display());
        return Err(AgentError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    ConfigBuilder::new().add_file(path)?.add_env(ENV_PREFIX).build()
}
