use thiserror::Error;

use crate::config::Transport;

/// Errors raised while assembling or driving the OTLP metrics pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A connection URL was requested for a transport other than the one
    /// the connection details were configured for. This is a wiring bug,
    /// not a transient condition.
    #[error("Requested transport {requested:?} doesn't match configured transport {configured:?}")]
    TransportMismatch {
        requested: Transport,
        configured: Transport,
    },

    #[error("Failed to build OTLP metric exporter: {0}")]
    ExporterBuild(String),

    #[error("Metrics export failed: {0}")]
    Export(String),

    #[error("Failed to spawn export worker '{name}': {source}")]
    Worker {
        name: String,
        source: std::io::Error,
    },
}

impl From<otelcast_common::Error> for Error {
    fn from(e: otelcast_common::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result type alias using this crate's Error.
pub type Result<T> = std::result::Result<T, Error>;
