// src/error.rs
use std::io;
use thiserror::Error;

use crate::metrics::SinkError;
use crate::prober::ProberError;

/// Result type used throughout the inspector library
pub type Result<T, E = AgentError> = std::result::Result<T, E>;

/// Custom Error type for the inspector library
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Prober error: {0}")]
    Prober(#[from] ProberError),

    #[error("Task error: {0}")]
    Task(String),
}

impl From<config::ConfigError> for AgentError {
    fn from(err: config::ConfigError) -> Self {
        AgentError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AgentError {
    fn from(err: tokio::task::JoinError) -> Self {
        AgentError::Task(err.to_string())
    }
}
