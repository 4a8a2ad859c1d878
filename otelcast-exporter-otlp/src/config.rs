//! Configuration for the OTLP metrics export pipeline.
//!
//! Settings come in two layers: the common exporter layer (`export.otlp`)
//! carries defaults for every OTLP exporter in the process, and the
//! metrics-specific layer (`metrics.export.otlp`) optionally overrides
//! them field by field. [`ResolvedOtlpSettings::resolve`] is the only
//! place that precedence is applied.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use otelcast_common::config::LoggingConfig;

use crate::error::{Error, Result};

/// Complete configuration for the exporter binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Common exporter settings shared by all signals.
    #[serde(default)]
    pub export: ExportProperties,

    /// Metrics-specific settings.
    #[serde(default)]
    pub metrics: MetricsProperties,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Worker strategy for the periodic export loop.
    #[serde(default)]
    pub workers: WorkerMode,
}

/// Common exporter layer (`export.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportProperties {
    /// The kind of exporter to use. Absent means "otlp" when queried.
    #[serde(rename = "type", default)]
    pub kind: Option<ExporterKind>,

    /// Whether to reuse objects to reduce allocation or work with
    /// immutable data structures.
    #[serde(default)]
    pub memory_mode: MemoryMode,

    /// Common options for the OTLP exporters.
    #[serde(default)]
    pub otlp: OtlpExportProperties,
}

/// Common OTLP options with process-wide defaults (`export.otlp.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpExportProperties {
    /// The endpoint to which telemetry data will be sent.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// The maximum waiting time for the exporter to send each batch.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// The maximum waiting time for the exporter to establish a
    /// connection to the endpoint.
    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,

    /// Transport protocol to use for OTLP requests.
    #[serde(default)]
    pub transport: Transport,

    /// Compression type to use for OTLP requests.
    #[serde(default = "default_compression")]
    pub compression: Compression,

    /// Additional headers to include in each request to the endpoint.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Whether to generate metrics for the exporter itself.
    #[serde(default)]
    pub metrics: bool,
}

fn default_timeout() -> u64 {
    10
}

fn default_compression() -> Compression {
    Compression::Gzip
}

impl Default for OtlpExportProperties {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_timeout(),
            transport: Transport::default(),
            compression: default_compression(),
            headers: HashMap::new(),
            metrics: false,
        }
    }
}

/// Metrics namespace (`metrics.*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsProperties {
    /// Export settings for metrics.
    #[serde(default)]
    pub export: MetricsExportProperties,
}

/// Metrics export layer (`metrics.export.*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsExportProperties {
    /// The interval between two consecutive exports of metrics.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// The kind of exporter to use for metrics, overriding the common
    /// `export.type` when set.
    #[serde(rename = "type", default)]
    pub kind: Option<ExporterKind>,

    /// The aggregation temporality to use for exporting metrics.
    #[serde(default)]
    pub aggregation_temporality: AggregationTemporality,

    /// The aggregation strategy to use for exporting histograms.
    #[serde(default)]
    pub histogram_aggregation: HistogramAggregation,

    /// Metrics-specific OTLP overrides.
    #[serde(default)]
    pub otlp: OtlpOverrides,
}

fn default_interval() -> u64 {
    60
}

impl Default for MetricsExportProperties {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            kind: None,
            aggregation_temporality: AggregationTemporality::default(),
            histogram_aggregation: HistogramAggregation::default(),
            otlp: OtlpOverrides::default(),
        }
    }
}

impl MetricsExportProperties {
    /// Get the export interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Metrics-specific OTLP overrides (`metrics.export.otlp.*`).
///
/// Every field is optional; a set field takes precedence over the common
/// layer for that field only. Headers are additive on top of the common
/// headers, same-key entries winning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OtlpOverrides {
    /// Overrides the common endpoint. Used verbatim, so it must carry a
    /// transport-appropriate path.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Overrides the common batch timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Overrides the common connect timeout.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// Overrides the common transport.
    #[serde(default)]
    pub transport: Option<Transport>,

    /// Overrides the common compression.
    #[serde(default)]
    pub compression: Option<Compression>,

    /// Additional headers applied on top of the common headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Overrides the common exporter self-instrumentation flag.
    #[serde(default)]
    pub metrics: Option<bool>,
}

/// The kind of exporter to activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    /// Export via OTLP.
    Otlp,
    /// Exporting disabled.
    None,
}

impl ExporterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExporterKind::Otlp => "otlp",
            ExporterKind::None => "none",
        }
    }
}

/// Transport protocol for OTLP requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// HTTP/protobuf (default, port 4318).
    #[default]
    Http,
    /// gRPC (port 4317).
    Grpc,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::Grpc => "grpc",
        }
    }
}

/// Compression for OTLP requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression.
    None,
    /// Gzip compression.
    Gzip,
}

/// Whether exported data structures are reused across cycles or rebuilt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryMode {
    /// Reuse objects to reduce allocation (default).
    #[default]
    ReusableData,
    /// Work with immutable data structures.
    ImmutableData,
}

/// Aggregation temporality applied to exported metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationTemporality {
    /// All instruments keep cumulative temporality (default).
    #[default]
    Cumulative,
    /// Counters and histograms are delta, up-down counters cumulative.
    Delta,
    /// Sync counters and histograms are delta, everything else cumulative.
    LowMemory,
}

/// Bucketing algorithm applied to all histogram instruments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistogramAggregation {
    /// Base-2 exponential bucket boundaries with an integer scale.
    Base2ExponentialBucketHistogram,
    /// Pre-defined, fixed bucket boundaries (default).
    #[default]
    ExplicitBucketHistogram,
}

/// Worker strategy for the periodic export loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    /// A dedicated platform thread per exporter (default).
    #[default]
    Thread,
    /// The tokio blocking pool.
    Tokio,
}

/// The per-field merge of the common layer and the metrics-specific
/// overrides. Endpoint resolution is deliberately excluded; it belongs to
/// [`crate::connection::ConnectionDetails`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOtlpSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub transport: Transport,
    pub compression: Compression,
    pub headers: HashMap<String, String>,
    pub metrics: bool,
}

impl ResolvedOtlpSettings {
    /// Merge the metrics-specific overrides over the common layer, field
    /// by field. A set override always wins for its field; headers are
    /// applied common-first so metrics-layer entries with the same key
    /// win.
    pub fn resolve(common: &ExportProperties, metrics: &MetricsExportProperties) -> Self {
        let overrides = &metrics.otlp;
        let base = &common.otlp;

        let mut headers = base.headers.clone();
        headers.extend(
            overrides
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        Self {
            timeout: Duration::from_secs(overrides.timeout_secs.unwrap_or(base.timeout_secs)),
            connect_timeout: Duration::from_secs(
                overrides
                    .connect_timeout_secs
                    .unwrap_or(base.connect_timeout_secs),
            ),
            transport: overrides.transport.unwrap_or(base.transport),
            compression: overrides.compression.unwrap_or(base.compression),
            headers,
            metrics: overrides.metrics.unwrap_or(base.metrics),
        }
    }
}

/// The transport in effect: the metrics-layer transport when set, the
/// common-layer transport otherwise.
pub fn effective_transport(common: &ExportProperties, metrics: &MetricsExportProperties) -> Transport {
    metrics.otlp.transport.unwrap_or(common.otlp.transport)
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: ExporterConfig = otelcast_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: ExporterConfig = otelcast_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.metrics.export.interval_secs == 0 {
            return Err(Error::Config(
                "metrics.export.interval_secs must be > 0".to_string(),
            ));
        }

        if self.export.otlp.timeout_secs == 0 {
            return Err(Error::Config(
                "export.otlp.timeout_secs must be > 0".to_string(),
            ));
        }

        if let Some(endpoint) = &self.export.otlp.endpoint
            && endpoint.is_empty()
        {
            return Err(Error::Config(
                "export.otlp.endpoint cannot be empty".to_string(),
            ));
        }

        if let Some(endpoint) = &self.metrics.export.otlp.endpoint
            && endpoint.is_empty()
        {
            return Err(Error::Config(
                "metrics.export.otlp.endpoint cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
