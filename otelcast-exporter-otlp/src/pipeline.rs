//! Explicit assembly of the OTLP metrics export pipeline.
//!
//! One startup routine reads the merged configuration, decides whether an
//! OTLP exporter is enabled at all, resolves the connection URL, builds
//! exactly one transport-specific exporter and hands it to a scheduled
//! reader. There is no conditional registry; the decision points of the
//! configuration surface map to ordinary control flow here.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry_otlp::MetricExporter;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use tracing::{debug, error, info};

use crate::condition::exporter_enabled;
use crate::config::{
    ExportProperties, MetricsExportProperties, ResolvedOtlpSettings, Transport,
};
use crate::connection::{ConnectionDetails, PropertiesConnectionDetails};
use crate::error::{Error, Result};
use crate::exporter::{build_metric_exporter, histogram_view};
use crate::periodic::{
    PeriodicExportScheduler, PushMetrics, ReaderHandle, ThreadWorkerFactory, WorkerFactory,
};

const THREAD_NAME_PREFIX: &str = "otel-metrics";

/// The reader's built-in cadence is parked far beyond any real horizon;
/// the scheduler worker drives flushes at the configured interval.
const PARKED_READER_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

const DEFAULT_SERVICE_NAME: &str = "otelcast";

/// Builder for [`MetricsPipeline`].
///
/// Caller-registered connection details or exporters take precedence over
/// the property-derived ones; registration is first-wins.
pub struct MetricsPipelineBuilder {
    common: ExportProperties,
    metrics: MetricsExportProperties,
    service_name: String,
    connection_details: Option<Arc<dyn ConnectionDetails>>,
    exporter: Option<MetricExporter>,
    self_meter: Option<Meter>,
    scheduler: Arc<PeriodicExportScheduler>,
    worker_factory: Arc<dyn WorkerFactory>,
}

impl MetricsPipelineBuilder {
    pub fn new(common: &ExportProperties, metrics: &MetricsExportProperties) -> Self {
        Self {
            common: common.clone(),
            metrics: metrics.clone(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            connection_details: None,
            exporter: None,
            self_meter: None,
            scheduler: Arc::new(PeriodicExportScheduler::new(THREAD_NAME_PREFIX)),
            worker_factory: Arc::new(ThreadWorkerFactory),
        }
    }

    /// Service name reported in the exported resource attributes.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Register connection details, taking precedence over the
    /// property-derived ones.
    pub fn with_connection_details(mut self, details: Arc<dyn ConnectionDetails>) -> Self {
        self.connection_details = Some(details);
        self
    }

    /// Register an already-built exporter. The transport-specific builder
    /// is skipped entirely.
    pub fn with_exporter(mut self, exporter: MetricExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Meter used for exporter self-instrumentation. Only consulted when
    /// the resolved `metrics` flag is true.
    pub fn with_self_meter(mut self, meter: Meter) -> Self {
        self.self_meter = Some(meter);
        self
    }

    /// Share a scheduler across pipelines so worker names stay unique.
    pub fn with_scheduler(mut self, scheduler: Arc<PeriodicExportScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Worker strategy for the export loop.
    pub fn with_worker_factory(mut self, factory: Arc<dyn WorkerFactory>) -> Self {
        self.worker_factory = factory;
        self
    }

    /// Assemble the pipeline.
    ///
    /// Returns `Ok(None)` when no OTLP exporter is enabled for metrics;
    /// that is a valid steady state, not an error.
    pub fn build(mut self) -> Result<Option<MetricsPipeline>> {
        let outcome = exporter_enabled("otlp", &self.common, &self.metrics);
        if !outcome.is_match() {
            info!(reason = outcome.reason(), "OTLP metrics exporter not enabled");
            return Ok(None);
        }
        debug!(reason = outcome.reason(), "OTLP metrics exporter enabled");

        if let (Some(general), Some(metrics)) = (self.common.kind, self.metrics.kind)
            && general != metrics
        {
            debug!(
                general = general.as_str(),
                metrics = metrics.as_str(),
                "Exporter types disagree between layers; the metrics-specific type wins"
            );
        }

        let settings = ResolvedOtlpSettings::resolve(&self.common, &self.metrics);
        debug!(
            memory_mode = ?self.common.memory_mode,
            connect_timeout = ?settings.connect_timeout,
            "Resolved OTLP exporter settings"
        );

        let connection_details: Arc<dyn ConnectionDetails> = match self.connection_details.take() {
            Some(details) => {
                debug!("Using caller-registered connection details");
                details
            }
            None => Arc::new(PropertiesConnectionDetails::new(
                &self.common,
                &self.metrics,
            )),
        };

        let transport = settings.transport;
        let exporter = match self.exporter.take() {
            Some(exporter) => {
                debug!("Using caller-registered metric exporter");
                exporter
            }
            None => build_metric_exporter(
                &settings,
                self.metrics.aggregation_temporality,
                connection_details.as_ref(),
            )?,
        };

        let resource = Resource::builder()
            .with_attributes(vec![KeyValue::new(
                "service.name",
                self.service_name.clone(),
            )])
            .build();

        let reader = PeriodicReader::builder(exporter)
            .with_interval(PARKED_READER_INTERVAL)
            .build();

        let provider = SdkMeterProvider::builder()
            .with_resource(resource)
            .with_reader(reader)
            .with_view(histogram_view(self.metrics.histogram_aggregation))
            .build();

        let interval = self.metrics.interval();
        let push = ProviderPush {
            provider: provider.clone(),
        };

        let reader = if settings.metrics
            && let Some(meter) = self.self_meter.take()
        {
            self.scheduler.schedule(
                InstrumentedPush::new(push, &meter),
                interval,
                self.worker_factory.as_ref(),
            )?
        } else {
            if settings.metrics {
                debug!("Exporter self-instrumentation enabled but no meter available");
            }
            self.scheduler
                .schedule(push, interval, self.worker_factory.as_ref())?
        };

        info!(
            transport = transport.as_str(),
            interval_secs = interval.as_secs(),
            worker = reader.worker_name(),
            "OTLP metrics pipeline started"
        );

        Ok(Some(MetricsPipeline {
            provider,
            transport,
            reader,
        }))
    }
}

/// A running metrics export pipeline.
pub struct MetricsPipeline {
    provider: SdkMeterProvider,
    transport: Transport,
    reader: ReaderHandle,
}

impl MetricsPipeline {
    /// The meter provider backing this pipeline. Install it globally or
    /// hand it to instrumented components.
    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    /// The transport the single active exporter was built for.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Handle to the scheduled periodic reader.
    pub fn reader(&self) -> &ReaderHandle {
        &self.reader
    }

    /// Flush pending metrics and shut the provider down. Failures are
    /// logged; shutdown itself does not fail the caller.
    pub fn shutdown(self) {
        info!("Shutting down OTLP metrics pipeline");

        if let Err(e) = self.provider.force_flush() {
            error!(error = %e, "Error flushing meter provider");
        }
        if let Err(e) = self.provider.shutdown() {
            error!(error = %e, "Error shutting down meter provider");
        }
    }
}

/// One export cycle: flush the provider, which collects current metric
/// state and pushes it through the exporter.
struct ProviderPush {
    provider: SdkMeterProvider,
}

impl PushMetrics for ProviderPush {
    fn push(&self) -> Result<()> {
        self.provider
            .force_flush()
            .map_err(|e| Error::Export(e.to_string()))
    }
}

/// Counts export cycles on a caller-provided meter.
struct InstrumentedPush<E> {
    inner: E,
    exports: Counter<u64>,
    failures: Counter<u64>,
}

impl<E: PushMetrics> InstrumentedPush<E> {
    fn new(inner: E, meter: &Meter) -> Self {
        Self {
            inner,
            exports: meter.u64_counter("otelcast.exporter.exports").build(),
            failures: meter.u64_counter("otelcast.exporter.failures").build(),
        }
    }
}

impl<E: PushMetrics> PushMetrics for InstrumentedPush<E> {
    fn push(&self) -> Result<()> {
        let result = self.inner.push();
        match &result {
            Ok(()) => self.exports.add(1, &[]),
            Err(_) => self.failures.add(1, &[]),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Compression, ExporterConfig, ExporterKind};

    fn config(json: &str) -> ExporterConfig {
        ExporterConfig::parse(json).unwrap()
    }

    #[tokio::test]
    async fn test_pipeline_not_built_when_type_is_none() {
        let config = config(r#"{ metrics: { export: { type: "none" } } }"#);

        let pipeline = MetricsPipelineBuilder::new(&config.export, &config.metrics.export)
            .build()
            .unwrap();

        assert!(pipeline.is_none());
    }

    #[tokio::test]
    async fn test_pipeline_not_built_when_general_type_is_none() {
        let config = config(r#"{ export: { type: "none" } }"#);

        let pipeline = MetricsPipelineBuilder::new(&config.export, &config.metrics.export)
            .build()
            .unwrap();

        assert!(pipeline.is_none());
    }

    #[tokio::test]
    async fn test_metrics_type_wins_over_general_none() {
        let config = config(
            r#"{
                export: { type: "none" },
                metrics: { export: { type: "otlp" } },
            }"#,
        );

        let pipeline = MetricsPipelineBuilder::new(&config.export, &config.metrics.export)
            .build()
            .unwrap();

        assert!(pipeline.is_some());
    }

    #[tokio::test]
    async fn test_http_pipeline_built_by_default() {
        let config = config("{}");

        let pipeline = MetricsPipelineBuilder::new(&config.export, &config.metrics.export)
            .build()
            .unwrap()
            .expect("pipeline should be built");

        assert_eq!(pipeline.transport(), Transport::Http);
        assert_eq!(pipeline.reader().worker_name(), "otel-metrics");
    }

    #[tokio::test]
    async fn test_exactly_one_grpc_exporter_when_transport_is_grpc() {
        let config = config(r#"{ metrics: { export: { otlp: { transport: "grpc" } } } }"#);

        let pipeline = MetricsPipelineBuilder::new(&config.export, &config.metrics.export)
            .build()
            .unwrap()
            .expect("pipeline should be built");

        // One exporter per pipeline, and it is the gRPC one.
        assert_eq!(pipeline.transport(), Transport::Grpc);
    }

    #[tokio::test]
    async fn test_caller_registered_connection_details_win() {
        use crate::connection::DiscoveredConnectionDetails;

        let config = config("{}");
        let details = Arc::new(DiscoveredConnectionDetails::new("collector", 4317, 4318));

        let pipeline = MetricsPipelineBuilder::new(&config.export, &config.metrics.export)
            .with_connection_details(details)
            .build()
            .unwrap();

        assert!(pipeline.is_some());
    }

    #[tokio::test]
    async fn test_shared_scheduler_sequences_worker_names() {
        let config = config("{}");
        let scheduler = Arc::new(PeriodicExportScheduler::new("otel-metrics"));

        let first = MetricsPipelineBuilder::new(&config.export, &config.metrics.export)
            .with_scheduler(scheduler.clone())
            .build()
            .unwrap()
            .expect("pipeline should be built");
        let second = MetricsPipelineBuilder::new(&config.export, &config.metrics.export)
            .with_scheduler(scheduler)
            .build()
            .unwrap()
            .expect("pipeline should be built");

        assert_eq!(first.reader().worker_name(), "otel-metrics");
        assert_eq!(second.reader().worker_name(), "otel-metrics-2");
    }

    #[test]
    fn test_resolved_settings_feed_the_pipeline() {
        let config = config(
            r#"{
                export: { otlp: { compression: "none", timeout_secs: 3 } },
                metrics: { export: { otlp: { timeout_secs: 1 } } },
            }"#,
        );

        let settings = ResolvedOtlpSettings::resolve(&config.export, &config.metrics.export);

        assert_eq!(settings.compression, Compression::None);
        assert_eq!(settings.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_exporter_kind_strings() {
        assert_eq!(ExporterKind::Otlp.as_str(), "otlp");
        assert_eq!(ExporterKind::None.as_str(), "none");
    }
}
