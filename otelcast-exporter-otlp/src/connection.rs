//! Connection details for the OTLP metrics endpoint.
//!
//! A [`ConnectionDetails`] implementation answers one question: given a
//! transport, what URL should the metrics exporter send to. The
//! properties-backed implementation resolves it from the two
//! configuration layers; [`DiscoveredConnectionDetails`] derives it from
//! an already-running collector service.

use tracing::debug;

use crate::config::{ExportProperties, MetricsExportProperties, Transport, effective_transport};
use crate::error::{Error, Result};

/// Path appended to HTTP endpoints for the metrics signal.
pub const METRICS_PATH: &str = "/v1/metrics";

/// Default port for OTLP over gRPC.
pub const DEFAULT_GRPC_PORT: u16 = 4317;

/// Default port for OTLP over HTTP/protobuf.
pub const DEFAULT_HTTP_PORT: u16 = 4318;

/// Default endpoint for OTLP over gRPC.
pub const DEFAULT_GRPC_ENDPOINT: &str = "http://localhost:4317";

/// Default endpoint for OTLP over HTTP/protobuf.
pub const DEFAULT_HTTP_ENDPOINT: &str = "http://localhost:4318/v1/metrics";

/// Connection details to establish a connection to an OTLP endpoint for
/// metrics.
pub trait ConnectionDetails: Send + Sync {
    /// The URL to send metrics to over `transport`.
    fn url(&self, transport: Transport) -> Result<String>;
}

/// Append the metrics path to an HTTP endpoint exactly once.
fn with_metrics_path(endpoint: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), METRICS_PATH)
}

/// [`ConnectionDetails`] resolved from the two configuration layers.
///
/// Resolution order: the metrics-layer endpoint verbatim, then the
/// common-layer endpoint (with the metrics path appended for HTTP), then
/// the hard-coded default for the effective transport.
#[derive(Debug, Clone)]
pub struct PropertiesConnectionDetails {
    transport: Transport,
    metrics_endpoint: Option<String>,
    common_endpoint: Option<String>,
}

impl PropertiesConnectionDetails {
    pub fn new(common: &ExportProperties, metrics: &MetricsExportProperties) -> Self {
        Self {
            transport: effective_transport(common, metrics),
            metrics_endpoint: metrics.otlp.endpoint.clone(),
            common_endpoint: common.otlp.endpoint.clone(),
        }
    }

    /// The transport this instance was configured for.
    pub fn transport(&self) -> Transport {
        self.transport
    }
}

impl ConnectionDetails for PropertiesConnectionDetails {
    fn url(&self, transport: Transport) -> Result<String> {
        if transport != self.transport {
            return Err(Error::TransportMismatch {
                requested: transport,
                configured: self.transport,
            });
        }

        let url = if let Some(endpoint) = &self.metrics_endpoint {
            // Metrics-specific endpoints are used verbatim; the caller is
            // responsible for a transport-appropriate path.
            endpoint.clone()
        } else if let Some(endpoint) = &self.common_endpoint {
            match self.transport {
                Transport::Http => with_metrics_path(endpoint),
                Transport::Grpc => endpoint.clone(),
            }
        } else {
            match self.transport {
                Transport::Http => DEFAULT_HTTP_ENDPOINT.to_string(),
                Transport::Grpc => DEFAULT_GRPC_ENDPOINT.to_string(),
            }
        };

        debug!(transport = transport.as_str(), url = %url, "Resolved OTLP metrics URL");
        Ok(url)
    }
}

/// [`ConnectionDetails`] for a collector discovered at runtime, for
/// example a container started alongside the process with its OTLP ports
/// mapped to the host.
#[derive(Debug, Clone)]
pub struct DiscoveredConnectionDetails {
    host: String,
    grpc_port: u16,
    http_port: u16,
}

impl DiscoveredConnectionDetails {
    pub fn new(host: impl Into<String>, grpc_port: u16, http_port: u16) -> Self {
        Self {
            host: host.into(),
            grpc_port,
            http_port,
        }
    }
}

impl ConnectionDetails for DiscoveredConnectionDetails {
    fn url(&self, transport: Transport) -> Result<String> {
        Ok(match transport {
            Transport::Http => format!(
                "http://{}:{}{}",
                self.host, self.http_port, METRICS_PATH
            ),
            Transport::Grpc => format!("http://{}:{}", self.host, self.grpc_port),
        })
    }
}
