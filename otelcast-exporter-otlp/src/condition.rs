//! Activation decision for a metrics exporter kind.
//!
//! The metrics-specific `metrics.export.type`, when set, decides alone;
//! the common `export.type` is consulted only when the metrics-specific
//! value is absent, and itself defaults to "otlp" when absent. Matching is
//! case-insensitive on both sides.

use crate::config::{ExportProperties, MetricsExportProperties};

/// Config key for the common exporter kind.
pub const GENERAL_EXPORTER_TYPE_KEY: &str = "export.type";

/// Config key for the metrics-specific exporter kind.
pub const METRICS_EXPORTER_TYPE_KEY: &str = "metrics.export.type";

const DEFAULT_EXPORTER_TYPE: &str = "otlp";

/// The outcome of an exporter activation decision, with the reason that
/// drove it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionOutcome {
    matched: bool,
    reason: String,
}

impl ConditionOutcome {
    fn matched(reason: impl Into<String>) -> Self {
        Self {
            matched: true,
            reason: reason.into(),
        }
    }

    fn no_match(reason: impl Into<String>) -> Self {
        Self {
            matched: false,
            reason: reason.into(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.matched
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Decide whether the exporter kind `requested` is enabled for metrics.
pub fn exporter_condition(
    requested: &str,
    metrics_type: Option<&str>,
    general_type: Option<&str>,
) -> ConditionOutcome {
    if requested.trim().is_empty() {
        return ConditionOutcome::no_match("a valid exporter type is not specified");
    }

    if let Some(metrics_type) = metrics_type.filter(|t| !t.trim().is_empty()) {
        return if metrics_type.eq_ignore_ascii_case(requested) {
            ConditionOutcome::matched(format!(
                "{} is set to {}",
                METRICS_EXPORTER_TYPE_KEY, metrics_type
            ))
        } else {
            ConditionOutcome::no_match(format!(
                "{} is set to {}, but requested {}",
                METRICS_EXPORTER_TYPE_KEY, metrics_type, requested
            ))
        };
    }

    let general_type = match general_type {
        Some(t) if !t.trim().is_empty() => Some(t),
        Some(_) => None,
        None => Some(DEFAULT_EXPORTER_TYPE),
    };

    if let Some(general_type) = general_type {
        return if general_type.eq_ignore_ascii_case(requested) {
            ConditionOutcome::matched(format!(
                "{} is set to {}",
                GENERAL_EXPORTER_TYPE_KEY, general_type
            ))
        } else {
            ConditionOutcome::no_match(format!(
                "{} is set to {}, but requested {}",
                GENERAL_EXPORTER_TYPE_KEY, general_type, requested
            ))
        };
    }

    ConditionOutcome::no_match(format!("exporter type not enabled: {}", requested))
}

/// Decide from the two configuration layers directly.
pub fn exporter_enabled(
    requested: &str,
    common: &ExportProperties,
    metrics: &MetricsExportProperties,
) -> ConditionOutcome {
    exporter_condition(
        requested,
        metrics.kind.map(|k| k.as_str()),
        common.kind.map(|k| k.as_str()),
    )
}
