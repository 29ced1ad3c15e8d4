use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use native_tls::{Certificate, TlsConnector};
use postgres_native_tls::MakeTlsConnector;
use std::fs;
use std::path::Path;
use uuid::Uuid;

use super::record::MetricRecord;
use super::sink::{MetricsSink, SinkError, local_hostname, with_host_tag};
use crate::config::{SinkConfig, SslMode};

/// Connection settings for the PostgreSQL sink that are not part of `initialize`
#[derive(Debug, Clone)]
pub struct PostgresSettings {
    pub username: String,
    pub password: String,
    pub ssl_mode: SslMode,
    pub ca_cert: Option<String>,
    pub table: String,
    pub pool_size: usize,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            username: "postgres".to_string(),
            password: String::new(),
            ssl_mode: SslMode::Disable,
            ca_cert: None,
            table: "metrics".to_string(),
            pool_size: 4,
        }
    }
}

impl From<&SinkConfig> for PostgresSettings {
    fn from(config: &SinkConfig) -> Self {
        let defaults = Self::default();
        Self {
            username: config.username.clone().unwrap_or(defaults.username),
            password: config.password.clone().unwrap_or(defaults.password),
            ssl_mode: config.ssl_mode.clone(),
            ca_cert: config.ca_cert.clone(),
            table: config.table.clone(),
            pool_size: defaults.pool_size,
        }
    }
}

/// Sink storing one row per record in a PostgreSQL table
pub struct PostgresSink {
    settings: PostgresSettings,
    pool: Option<deadpool_postgres::Pool>,
    insert_sql: String,
    host: String,
}

impl PostgresSink {
    /// Create an unconnected sink; `initialize` opens the pool
    pub fn new(settings: PostgresSettings) -> Result<Self, SinkError> {
        validate_table_name(&settings.table)?;
        let insert_sql = insert_statement(&settings.table);
        Ok(Self {
            settings,
            pool: None,
            insert_sql,
            host: local_hostname(),
        })
    }

    fn create_pool(&self, address: &str, port: u16, database: &str) -> Result<deadpool_postgres::Pool, SinkError> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(address)
            .port(port)
            .dbname(database)
            .user(&self.settings.username)
            .password(&self.settings.password);

        let builder = match self.settings.ssl_mode {
            SslMode::Disable => {
                debug!("Creating PostgreSQL pool with SSL disabled");
                let manager = deadpool_postgres::Manager::new(pg_config, tokio_postgres::NoTls);
                deadpool_postgres::Pool::builder(manager)
            }
            _ => {
                debug!(
                    "Creating PostgreSQL pool with SSL enabled (mode: {:?})",
                    self.settings.ssl_mode
                );
                pg_config.ssl_mode(match self.settings.ssl_mode {
                    SslMode::Allow | SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
                    _ => tokio_postgres::config::SslMode::Require,
                });
                let connector = build_tls_connector(&self.settings)?;
                let manager = deadpool_postgres::Manager::new(pg_config, MakeTlsConnector::new(connector));
                deadpool_postgres::Pool::builder(manager)
            }
        };

        builder
            .max_size(self.settings.pool_size)
            .build()
            .map_err(|e| SinkError::Initialization(format!("Failed to create connection pool: {}", e)))
    }
}

#[async_trait]
impl MetricsSink for PostgresSink {
    async fn initialize(&mut self, address: &str, port: u16, database: &str) -> Result<(), SinkError> {
        let pool = self.create_pool(address, port, database)?;

        let client = pool
            .get()
            .await
            .map_err(|e| SinkError::Initialization(format!("Failed to connect to database: {}", e)))?;

        client
            .batch_execute(&create_table_statement(&self.settings.table))
            .await
            .map_err(|e| SinkError::Initialization(format!("Failed to prepare metrics table: {}", e)))?;

        info!(
            "Connected to PostgreSQL database: {}:{}/{} (table: {})",
            address, port, database, self.settings.table
        );

        self.pool = Some(pool);
        Ok(())
    }

    async fn emit(&self, record: &MetricRecord) -> Result<(), SinkError> {
        let pool = self.pool.as_ref().ok_or(SinkError::NotInitialized)?;
        let record = with_host_tag(record, &self.host);

        let fields = record
            .fields()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| SinkError::Delivery(e.to_string()))?;
        let tags = record
            .tags()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| SinkError::Delivery(e.to_string()))?;

        let client = pool
            .get()
            .await
            .map_err(|e| SinkError::Delivery(format!("Failed to get client from pool: {}", e)))?;

        client
            .execute(
                self.insert_sql.as_str(),
                &[
                    &Uuid::new_v4(),
                    &record.name(),
                    &record.value(),
                    &fields,
                    &tags,
                    &Utc::now(),
                ],
            )
            .await
            .map_err(|e| SinkError::Delivery(format!("Insert failed: {}", e)))?;

        Ok(())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass
fn validate_table_name(table: &str) -> Result<(), SinkError> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(SinkError::Initialization(format!("Invalid table name: '{}'", table)))
    }
}

fn create_table_statement(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            value BIGINT NOT NULL,
            fields JSONB,
            tags JSONB,
            recorded_at TIMESTAMPTZ NOT NULL
        );
        CREATE INDEX IF NOT EXISTS {table}_name_recorded_at_idx ON {table} (name, recorded_at);"
    )
}

fn insert_statement(table: &str) -> String {
    format!(
        "INSERT INTO {} (id, name, value, fields, tags, recorded_at) VALUES ($1, $2, $3, $4, $5, $6)",
        table
    )
}

fn build_tls_connector(settings: &PostgresSettings) -> Result<TlsConnector, SinkError> {
    let mut builder = TlsConnector::builder();

    if let Some(ca_cert_path) = &settings.ca_cert {
        builder.add_root_certificate(load_certificate(ca_cert_path)?);
    }

    match settings.ssl_mode {
        SslMode::VerifyFull => {}
        SslMode::VerifyCa => {
            builder.danger_accept_invalid_hostnames(true);
        }
        _ => {
            builder.danger_accept_invalid_certs(true);
        }
    }

    builder
        .build()
        .map_err(|e| SinkError::Initialization(format!("Failed to build TLS connector: {}", e)))
}

fn load_certificate<P: AsRef<Path>>(path: P) -> Result<Certificate, SinkError> {
    let cert_data = fs::read(path.as_ref()).map_err(|e| {
        SinkError::Initialization(format!(
            "Failed to read certificate file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    Certificate::from_pem(&cert_data)
        .map_err(|e| SinkError::Initialization(format!("Invalid certificate format: {}", e)))
}
