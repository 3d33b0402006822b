//! Collected metric data: summaries, data points, and the window they were
//! computed over.

use crate::common::KeyValue;

/// Whether a reader observes deltas since its last collection, or running
/// totals since the stream started.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Temporality {
    /// Running total since the stream's `start_timestamp`.
    #[default]
    Cumulative,
    /// Only the measurements folded in since the previous collection.
    Delta,
}

/// A single retained raw measurement, sampled by an
/// [`crate::exemplar::ExemplarReservoir`] to provide provenance for an
/// aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar {
    /// The raw recorded value.
    pub value: f64,
    /// Nanosecond timestamp the measurement was recorded at.
    pub timestamp_nanos: u64,
    /// Attributes dropped by the view's allow-list but present on the
    /// original measurement, retained here for context.
    pub filtered_attributes: Vec<KeyValue>,
    /// Trace ID active at record time, if any.
    pub trace_id: Option<[u8; 16]>,
    /// Span ID active at record time, if any.
    pub span_id: Option<[u8; 8]>,
}

/// A single attribute-keyed sum data point.
#[derive(Debug, Clone, PartialEq)]
pub struct SumDataPoint {
    /// Attributes identifying this series.
    pub attributes: Vec<KeyValue>,
    /// The accumulated value.
    pub value: f64,
    /// Exemplars sampled for this series during the collection window.
    pub exemplars: Vec<Exemplar>,
}

/// A single attribute-keyed last-value (gauge) data point.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeDataPoint {
    /// Attributes identifying this series.
    pub attributes: Vec<KeyValue>,
    /// The most recently observed value.
    pub value: f64,
    /// Nanosecond timestamp of the most recent observation contributing to
    /// this value (used to break merge ties: later wins).
    pub observed_at_nanos: u64,
    /// Exemplars sampled for this series during the collection window.
    pub exemplars: Vec<Exemplar>,
}

/// A single attribute-keyed explicit-bucket histogram data point.
///
/// Invariants: `count == sum(bucket_counts)`;
/// `bucket_counts.len() == boundaries.len() + 1`;
/// `min <= sum / count <= max` whenever `count > 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramDataPoint {
    /// Attributes identifying this series.
    pub attributes: Vec<KeyValue>,
    /// Increasing bucket boundaries shared across all data points of a
    /// given stream.
    pub bounds: Vec<f64>,
    /// Counts per bucket; `bucket_counts.len() == bounds.len() + 1`.
    pub bucket_counts: Vec<u64>,
    /// Total number of observations folded into this data point.
    pub count: u64,
    /// Sum of all observed values.
    pub sum: f64,
    /// Smallest observed value, if any observations were made and
    /// min/max recording was enabled.
    pub min: Option<f64>,
    /// Largest observed value, if any observations were made and min/max
    /// recording was enabled.
    pub max: Option<f64>,
    /// Exemplars sampled for this series during the collection window.
    pub exemplars: Vec<Exemplar>,
}

impl HistogramDataPoint {
    /// Checks the data point's internal count/bucket/min/max invariants
    /// (§8, property 4).
    pub fn check_invariants(&self) -> bool {
        let bucket_sum: u64 = self.bucket_counts.iter().sum();
        if bucket_sum != self.count {
            return false;
        }
        if self.bucket_counts.len() != self.bounds.len() + 1 {
            return false;
        }
        if self.count > 0 {
            let mean = self.sum / self.count as f64;
            if let (Some(min), Some(max)) = (self.min, self.max) {
                if mean < min - f64::EPSILON || mean > max + f64::EPSILON {
                    return false;
                }
            }
        }
        let mut running = 0u64;
        for &c in &self.bucket_counts {
            running += c;
            if running > self.count {
                return false;
            }
        }
        true
    }
}

/// The per-aggregation summary produced for one instrument's collection
/// window, holding every attribute-keyed data point.
#[derive(Debug, Clone, PartialEq)]
pub enum Summary {
    /// Arithmetic sum aggregation.
    Sum {
        /// Per-series data points.
        points: Vec<SumDataPoint>,
        /// Whether this sum can only increase (mirrors the owning
        /// instrument's monotonicity).
        is_monotonic: bool,
    },
    /// Last-value aggregation.
    Gauge {
        /// Per-series data points.
        points: Vec<GaugeDataPoint>,
    },
    /// Explicit-bucket histogram aggregation.
    Histogram {
        /// Per-series data points.
        points: Vec<HistogramDataPoint>,
    },
}

impl Summary {
    /// True if this summary carries no data points: [`crate::delta_storage::DeltaStorage::add`]
    /// skips empty metrics rather than retaining them.
    pub fn is_empty(&self) -> bool {
        match self {
            Summary::Sum { points, .. } => points.is_empty(),
            Summary::Gauge { points } => points.is_empty(),
            Summary::Histogram { points } => points.is_empty(),
        }
    }
}

/// A complete collection result for one instrument: the summary together
/// with the window it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Instrument name this metric was produced for.
    pub name: std::borrow::Cow<'static, str>,
    /// Instrument description.
    pub description: std::borrow::Cow<'static, str>,
    /// Instrument unit.
    pub unit: String,
    /// Start of the collection window, in nanoseconds.
    pub start_time_nanos: u64,
    /// End of the collection window, in nanoseconds.
    pub time_nanos: u64,
    /// The aggregated data.
    pub summary: Summary,
    /// Temporality this metric is expressed in.
    pub temporality: Temporality,
}

impl Metric {
    /// True if the metric carries no data points.
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty()
    }
}

/// Every metric produced by one meter's instruments during a single
/// collection, grouped by the [`crate::common::InstrumentationScope`] that
/// created them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScopeMetrics {
    /// The instrumentation scope the metrics below were recorded under.
    pub scope: crate::common::InstrumentationScope,
    /// Metrics collected from every live instrument of that scope.
    pub metrics: Vec<Metric>,
}
