//! Transport-specific construction of the OTLP metric exporter.
//!
//! Exactly one exporter is built per pipeline, dispatched on the effective
//! transport: HTTP/protobuf when the transport is unset or "http", gRPC
//! only when it is explicitly "grpc".

use std::collections::HashMap;

use opentelemetry_otlp::{MetricExporter, WithExportConfig, WithHttpConfig, WithTonicConfig};
use opentelemetry_sdk::metrics::{Aggregation, Instrument, InstrumentKind, Stream, Temporality};
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};
use tracing::{debug, info, warn};

use crate::config::{
    AggregationTemporality, Compression, HistogramAggregation, ResolvedOtlpSettings, Transport,
};
use crate::connection::ConnectionDetails;
use crate::error::{Error, Result};

/// Map the configured temporality strategy to the SDK selector.
pub fn temporality(strategy: AggregationTemporality) -> Temporality {
    match strategy {
        AggregationTemporality::Cumulative => Temporality::Cumulative,
        AggregationTemporality::Delta => Temporality::Delta,
        AggregationTemporality::LowMemory => Temporality::LowMemory,
    }
}

/// Map the configured histogram strategy to the SDK aggregation.
pub fn histogram_aggregation(strategy: HistogramAggregation) -> Aggregation {
    match strategy {
        HistogramAggregation::Base2ExponentialBucketHistogram => {
            Aggregation::Base2ExponentialHistogram {
                max_size: 160,
                max_scale: 20,
                record_min_max: true,
            }
        }
        HistogramAggregation::ExplicitBucketHistogram => Aggregation::ExplicitBucketHistogram {
            boundaries: vec![
                0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0,
                5000.0, 7500.0, 10000.0,
            ],
            record_min_max: true,
        },
    }
}

/// A view rule scoped to all histogram instruments, applying the
/// configured bucketing algorithm. Global for the process.
pub fn histogram_view(
    strategy: HistogramAggregation,
) -> impl Fn(&Instrument) -> Option<Stream> + Send + Sync + 'static {
    let aggregation = histogram_aggregation(strategy);
    move |instrument: &Instrument| {
        if matches!(instrument.kind, Some(InstrumentKind::Histogram)) {
            Some(Stream::new().aggregation(aggregation.clone()))
        } else {
            None
        }
    }
}

/// Build the metric exporter for the effective transport in `settings`,
/// resolving the endpoint through `connection`.
pub fn build_metric_exporter(
    settings: &ResolvedOtlpSettings,
    temporality_strategy: AggregationTemporality,
    connection: &dyn ConnectionDetails,
) -> Result<MetricExporter> {
    match settings.transport {
        Transport::Http => build_http_exporter(settings, temporality_strategy, connection),
        Transport::Grpc => build_grpc_exporter(settings, temporality_strategy, connection),
    }
}

fn build_http_exporter(
    settings: &ResolvedOtlpSettings,
    temporality_strategy: AggregationTemporality,
    connection: &dyn ConnectionDetails,
) -> Result<MetricExporter> {
    let endpoint = connection.url(Transport::Http)?;

    let mut builder = MetricExporter::builder()
        .with_http()
        .with_endpoint(&endpoint)
        .with_timeout(settings.timeout)
        .with_temporality(temporality(temporality_strategy));

    if !settings.headers.is_empty() {
        builder = builder.with_headers(settings.headers.clone());
    }

    if settings.compression == Compression::Gzip {
        // The HTTP exporter in this SDK version sends uncompressed.
        debug!("Compression is configured but the HTTP metric exporter sends uncompressed");
    }

    info!(endpoint = %endpoint, "Configuring OpenTelemetry HTTP/Protobuf metric exporter");

    builder
        .build()
        .map_err(|e| Error::ExporterBuild(e.to_string()))
}

fn build_grpc_exporter(
    settings: &ResolvedOtlpSettings,
    temporality_strategy: AggregationTemporality,
    connection: &dyn ConnectionDetails,
) -> Result<MetricExporter> {
    let endpoint = connection.url(Transport::Grpc)?;

    let mut builder = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .with_timeout(settings.timeout)
        .with_temporality(temporality(temporality_strategy));

    if settings.compression == Compression::Gzip {
        builder = builder.with_compression(opentelemetry_otlp::Compression::Gzip);
    }

    if !settings.headers.is_empty() {
        builder = builder.with_metadata(metadata_from_headers(&settings.headers));
    }

    info!(endpoint = %endpoint, "Configuring OpenTelemetry gRPC metric exporter");

    builder
        .build()
        .map_err(|e| Error::ExporterBuild(e.to_string()))
}

/// Convert configured headers to gRPC metadata, skipping entries that are
/// not valid metadata keys or values.
fn metadata_from_headers(headers: &HashMap<String, String>) -> MetadataMap {
    let mut metadata = MetadataMap::with_capacity(headers.len());
    for (key, value) in headers {
        if let (Ok(k), Ok(v)) = (
            key.parse::<MetadataKey<_>>(),
            value.parse::<MetadataValue<_>>(),
        ) {
            metadata.insert(k, v);
        } else {
            warn!(header = %key, "Skipping header that is not valid gRPC metadata");
        }
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExportProperties, MetricsExportProperties};
    use crate::connection::PropertiesConnectionDetails;

    fn settings(transport: Transport) -> ResolvedOtlpSettings {
        let mut common = ExportProperties::default();
        common.otlp.transport = transport;
        ResolvedOtlpSettings::resolve(&common, &MetricsExportProperties::default())
    }

    fn connection(transport: Transport) -> PropertiesConnectionDetails {
        let mut common = ExportProperties::default();
        common.otlp.transport = transport;
        PropertiesConnectionDetails::new(&common, &MetricsExportProperties::default())
    }

    #[test]
    fn test_temporality_mapping() {
        assert_eq!(
            temporality(AggregationTemporality::Cumulative),
            Temporality::Cumulative
        );
        assert_eq!(
            temporality(AggregationTemporality::Delta),
            Temporality::Delta
        );
        assert_eq!(
            temporality(AggregationTemporality::LowMemory),
            Temporality::LowMemory
        );
    }

    #[test]
    fn test_histogram_aggregation_mapping() {
        assert!(matches!(
            histogram_aggregation(HistogramAggregation::ExplicitBucketHistogram),
            Aggregation::ExplicitBucketHistogram { .. }
        ));
        assert!(matches!(
            histogram_aggregation(HistogramAggregation::Base2ExponentialBucketHistogram),
            Aggregation::Base2ExponentialHistogram { .. }
        ));
    }

    #[test]
    fn test_build_http_exporter() {
        let result = build_metric_exporter(
            &settings(Transport::Http),
            AggregationTemporality::Cumulative,
            &connection(Transport::Http),
        );
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_build_grpc_exporter() {
        let result = build_metric_exporter(
            &settings(Transport::Grpc),
            AggregationTemporality::Delta,
            &connection(Transport::Grpc),
        );
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_build_fails_on_transport_mismatch() {
        // gRPC settings against HTTP-configured connection details.
        let result = build_metric_exporter(
            &settings(Transport::Grpc),
            AggregationTemporality::Cumulative,
            &connection(Transport::Http),
        );
        assert!(matches!(result, Err(Error::TransportMismatch { .. })));
    }

    #[test]
    fn test_metadata_from_headers_skips_invalid_entries() {
        let mut headers = HashMap::new();
        headers.insert("x-tenant".to_string(), "edge".to_string());
        headers.insert("bad header name".to_string(), "value".to_string());

        let metadata = metadata_from_headers(&headers);

        assert!(metadata.get("x-tenant").is_some());
        assert_eq!(metadata.len(), 1);
    }
}
