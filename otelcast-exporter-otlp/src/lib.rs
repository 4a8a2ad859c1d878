//! OTLP metrics export pipeline for OtelCast.
//!
//! This crate resolves layered OTLP exporter configuration into a single
//! running export pipeline:
//!
//! ```text
//! ┌──────────────────┐     ┌───────────────────┐     ┌─────────────────┐
//! │  Configuration   │────>│  Metrics Pipeline │────>│  OTLP Endpoint  │
//! │  (two layers)    │     │  (one exporter +  │     │  (Collector)    │
//! │                  │     │   periodic push)  │     │                 │
//! └──────────────────┘     └───────────────────┘     └─────────────────┘
//! ```
//!
//! Settings come from a common exporter layer (`export.otlp`) and a
//! metrics-specific override layer (`metrics.export.otlp`); a set override
//! wins field by field. The effective transport selects exactly one
//! exporter (HTTP/protobuf by default, gRPC when requested), and a
//! dedicated worker pushes exports at the configured interval.
//!
//! # Usage
//!
//! Run the exporter binary with a configuration file:
//!
//! ```bash
//! otelcast-exporter-otlp --config config.json5
//! ```
//!
//! Or assemble a pipeline in process:
//!
//! ```ignore
//! use otelcast_exporter_otlp::{ExporterConfig, MetricsPipelineBuilder};
//!
//! let config = ExporterConfig::load_from_file("config.json5")?;
//! let pipeline = MetricsPipelineBuilder::new(&config.export, &config.metrics.export)
//!     .build()?;
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod condition;
pub mod config;
pub mod connection;
pub mod error;
pub mod exporter;
pub mod periodic;
pub mod pipeline;

pub use config::{ExporterConfig, ResolvedOtlpSettings, Transport};
pub use connection::{ConnectionDetails, DiscoveredConnectionDetails, PropertiesConnectionDetails};
pub use error::{Error, Result};
pub use periodic::{PeriodicExportScheduler, PushMetrics, WorkerFactory};
pub use pipeline::{MetricsPipeline, MetricsPipelineBuilder};
