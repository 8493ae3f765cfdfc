//! Metric declarations for tile retrieval.
//!
//! Metrics are emitted through the [`metrics`] facade and are no-ops until
//! the application installs a recorder. Call [`describe_metrics`] once at
//! startup to register descriptions and units.
//!
//! ```rust,ignore
//! use spatialetl_imagery::telemetry::{describe_metrics, metric_defs};
//!
//! describe_metrics();
//! metrics::counter!(metric_defs::TILES_FETCHED.name).increment(1);
//! ```

use metrics::{describe_counter, describe_histogram, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A histogram for recording distributions.
    Histogram,
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name.
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// The unit of measurement.
    pub unit: Unit,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a counter metric.
    pub const fn counter(name: &'static str, description: &'static str, unit: Unit) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description,
            unit,
            labels: &[],
        }
    }

    /// Creates a histogram metric.
    pub const fn histogram(name: &'static str, description: &'static str, unit: Unit) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description,
            unit,
            labels: &[],
        }
    }

    /// Sets the expected label keys.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => {
                describe_counter!(self.name, self.unit, self.description);
            }
            MetricKind::Histogram => {
                describe_histogram!(self.name, self.unit, self.description);
            }
        }
    }
}

/// All metrics emitted by this crate.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Tiles downloaded and decoded.
    pub const TILES_FETCHED: Metric = Metric::counter(
        "spatialetl.imagery.tiles_fetched",
        "Tiles downloaded and decoded",
        Unit::Count,
    );

    /// Encoded tile bytes downloaded.
    pub const TILE_BYTES: Metric = Metric::counter(
        "spatialetl.imagery.tile_bytes",
        "Encoded tile bytes downloaded",
        Unit::Bytes,
    );

    /// Tile fetch duration, including decoding.
    pub const TILE_FETCH_DURATION: Metric = Metric::histogram(
        "spatialetl.imagery.tile_fetch_seconds",
        "Tile fetch duration including decoding",
        Unit::Seconds,
    );

    /// Retries issued after transient fetch failures.
    pub const FETCH_RETRIES: Metric = Metric::counter(
        "spatialetl.imagery.fetch_retries",
        "Retries issued after transient fetch failures",
        Unit::Count,
    );

    /// Tiles identical to the provider's "no data" image.
    pub const NULL_TILES: Metric = Metric::counter(
        "spatialetl.imagery.null_tiles",
        "Tiles identical to the provider's no-data image",
        Unit::Count,
    );

    /// Zoom levels rejected during resolution selection.
    ///
    /// Labels: reason (`degenerate`, `oversized`, `too_many_tiles`, `incomplete`)
    pub const LEVELS_REJECTED: Metric = Metric::counter(
        "spatialetl.imagery.levels_rejected",
        "Zoom levels rejected during resolution selection",
        Unit::Count,
    )
    .with_labels(&["reason"]);

    /// Every metric declared above.
    pub const ALL: &[Metric] = &[
        TILES_FETCHED,
        TILE_BYTES,
        TILE_FETCH_DURATION,
        FETCH_RETRIES,
        NULL_TILES,
        LEVELS_REJECTED,
    ];
}

/// Registers descriptions for all metrics in [`metric_defs::ALL`].
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
