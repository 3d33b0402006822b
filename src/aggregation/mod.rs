//! Folds individual measurements into per-attribute [`crate::data::Summary`]
//! values, and merges summaries produced by different collection cycles.

mod histogram;
mod last_value;
mod sum;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::attributes::{AttributeProcessor, AttributeSet, IdentityAttributeProcessor};
use crate::clock::Clock;
use crate::common::KeyValue;
use crate::data::{Metric, Summary, Temporality};
use crate::error::{MetricError, MetricResult};
use crate::exemplar::ExemplarReservoir;

pub(crate) use histogram::HistogramEntry;
pub(crate) use last_value::GaugeEntry;
pub(crate) use sum::SumEntry;

/// A measurement value accepted by an instrument. Implemented for `i64` and
/// `f64`, the two numeric kinds the wire format distinguishes.
pub trait Number:
    Copy + Clone + fmt::Debug + PartialOrd + Default + Send + Sync + 'static
{
    /// Converts the measurement into the `f64` representation used
    /// internally by every [`Summary`] variant.
    fn into_f64(self) -> f64;
}

impl Number for i64 {
    fn into_f64(self) -> f64 {
        self as f64
    }
}

impl Number for f64 {
    fn into_f64(self) -> f64 {
        self
    }
}

/// The algorithm used to summarize a stream's measurements, and its
/// configuration.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Aggregation {
    /// Arithmetic sum, optionally monotonic.
    Sum,
    /// Most recent value wins.
    LastValue,
    /// Histogram with explicitly configured bucket boundaries.
    ExplicitBucketHistogram {
        /// Increasing bucket upper bounds.
        boundaries: Vec<f64>,
        /// Whether to track min/max across the window.
        record_min_max: bool,
    },
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Aggregation::Sum => "Sum",
            Aggregation::LastValue => "LastValue",
            Aggregation::ExplicitBucketHistogram { .. } => "ExplicitBucketHistogram",
        };
        f.write_str(name)
    }
}

impl Aggregation {
    /// Validates the aggregation's configuration -- e.g. that histogram
    /// boundaries are strictly increasing. Raised to the caller as a
    /// [`MetricError::Config`]; never silently corrected.
    pub fn validate(&self) -> MetricResult<()> {
        if let Aggregation::ExplicitBucketHistogram { boundaries, .. } = self {
            for w in boundaries.windows(2) {
                if w[0] >= w[1] {
                    return Err(MetricError::Config(format!(
                        "explicit bucket histogram: non-monotonic boundaries: {:?}",
                        boundaries
                    )));
                }
            }
        }
        Ok(())
    }

    /// Merges `next` into `dest` in place, following the aggregation-specific
    /// semantics from §4.2: sums add, last-value keeps the more recent
    /// observation (ties broken by append order -- `next` wins ties), and
    /// histograms add counts/buckets element-wise while keeping the widest
    /// min/max.
    pub(crate) fn merge(dest: &mut Summary, next: &Summary) {
        match (dest, next) {
            (Summary::Sum { points, .. }, Summary::Sum { points: np, .. }) => {
                sum::merge_points(points, np)
            }
            (Summary::Gauge { points }, Summary::Gauge { points: np }) => {
                last_value::merge_points(points, np)
            }
            (Summary::Histogram { points }, Summary::Histogram { points: np }) => {
                histogram::merge_points(points, np)
            }
            _ => unreachable!("DeltaStorage never mixes aggregation kinds within one stream"),
        }
    }
}

enum Entry {
    Sum(SumEntry),
    Gauge(GaugeEntry),
    Histogram(HistogramEntry),
}

/// Folds measurements into per-attribute summaries for one instrument
/// stream, and swaps out the working map on `collect` (§4.1).
///
/// Concurrency: a single mutex guards the working map; `record` holds the
/// lock only for the duration of updating one entry, and `collect` holds it
/// only to swap the map pointer -- no lock is ever held across I/O since the
/// aggregator never performs I/O.
pub struct Aggregator<T: Number> {
    aggregation: Aggregation,
    monotonic: bool,
    working: Mutex<HashMap<AttributeSet, Entry>>,
    attribute_processor: Box<dyn AttributeProcessor>,
    exemplar_reservoir: Option<Mutex<ExemplarReservoir>>,
    clock: Arc<dyn Clock>,
    name: std::borrow::Cow<'static, str>,
    warned_negative: std::sync::atomic::AtomicBool,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Number> fmt::Debug for Aggregator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("aggregation", &self.aggregation)
            .field("name", &self.name)
            .finish()
    }
}

impl<T: Number> Aggregator<T> {
    /// Creates an aggregator for `aggregation`, folding values of monotonic
    /// instruments only when non-negative.
    pub fn new(
        name: impl Into<std::borrow::Cow<'static, str>>,
        aggregation: Aggregation,
        monotonic: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Aggregator {
            aggregation,
            monotonic,
            working: Mutex::new(HashMap::new()),
            attribute_processor: Box::new(IdentityAttributeProcessor),
            exemplar_reservoir: None,
            clock,
            name: name.into(),
            warned_negative: std::sync::atomic::AtomicBool::new(false),
            _marker: std::marker::PhantomData,
        }
    }

    /// Overrides the attribute processor, e.g. to apply a view's
    /// allow-listed keys.
    pub fn with_attribute_processor(mut self, processor: Box<dyn AttributeProcessor>) -> Self {
        self.attribute_processor = processor;
        self
    }

    /// Attaches a bounded exemplar reservoir.
    pub fn with_exemplar_reservoir(mut self, reservoir: ExemplarReservoir) -> Self {
        self.exemplar_reservoir = Some(Mutex::new(reservoir));
        self
    }

    /// Folds one measurement into the working summary. Never fails
    /// observably (§7): invalid values are dropped with a one-time warning.
    pub fn record(&self, value: T, attributes: &[KeyValue]) {
        if self.monotonic && value.into_f64() < 0.0 {
            if !self.warned_negative.swap(true, std::sync::atomic::Ordering::Relaxed) {
                crate::otel_warn!(
                    name: "Aggregator.NegativeValue",
                    message = "monotonic instrument received a negative measurement; dropping",
                    instrument = self.name.as_ref(),
                );
            }
            return;
        }

        let attrs = self.attribute_processor.process(attributes);
        let now = self.clock.now_nanos();
        let value_f64 = value.into_f64();

        let mut working = match self.working.lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        let entry = working.entry(attrs.clone()).or_insert_with(|| match &self.aggregation {
            Aggregation::Sum => Entry::Sum(SumEntry::default()),
            Aggregation::LastValue => Entry::Gauge(GaugeEntry::default()),
            Aggregation::ExplicitBucketHistogram { boundaries, .. } => {
                Entry::Histogram(HistogramEntry::new(boundaries.clone()))
            }
        });
        match entry {
            Entry::Sum(s) => s.add(value_f64),
            Entry::Gauge(g) => g.assign(value_f64, now),
            Entry::Histogram(h) => h.record(value_f64),
        }
        drop(working);

        if let Some(reservoir) = &self.exemplar_reservoir {
            if let Ok(mut r) = reservoir.lock() {
                r.offer(value_f64, now, attrs.as_slice().to_vec());
            }
        }
    }

    /// Swaps the working summary map with a fresh one and returns the
    /// collected [`Metric`], whose window runs from the stream's previous
    /// timestamp to `now`.
    pub fn collect(&self, start_time_nanos: u64, now_nanos: u64, descriptor: &crate::instrument::InstrumentDescriptor) -> Metric {
        let collected = {
            let mut working = self.working.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *working)
        };

        let record_min_max = matches!(
            self.aggregation,
            Aggregation::ExplicitBucketHistogram { record_min_max: true, .. }
        );

        let summary = match &self.aggregation {
            Aggregation::Sum => Summary::Sum {
                points: collected
                    .into_iter()
                    .map(|(attrs, entry)| match entry {
                        Entry::Sum(s) => s.into_data_point(attrs),
                        _ => unreachable!(),
                    })
                    .collect(),
                is_monotonic: self.monotonic,
            },
            Aggregation::LastValue => Summary::Gauge {
                points: collected
                    .into_iter()
                    .map(|(attrs, entry)| match entry {
                        Entry::Gauge(g) => g.into_data_point(attrs),
                        _ => unreachable!(),
                    })
                    .collect(),
            },
            Aggregation::ExplicitBucketHistogram { boundaries, .. } => Summary::Histogram {
                points: collected
                    .into_iter()
                    .map(|(attrs, entry)| match entry {
                        Entry::Histogram(h) => h.into_data_point(attrs, boundaries, record_min_max),
                        _ => unreachable!(),
                    })
                    .collect(),
            },
        };

        Metric {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            unit: descriptor.unit.as_str().to_string(),
            start_time_nanos,
            time_nanos: now_nanos,
            summary,
            temporality: Temporality::Delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn record_then_collect_sums_by_attribute_set() {
        let agg = Aggregator::<i64>::new("reqs", Aggregation::Sum, true, Arc::new(FakeClock::new(0, 1)));
        agg.record(5, &[KeyValue::new("route", "/a")]);
        agg.record(3, &[KeyValue::new("route", "/a")]);
        agg.record(1, &[KeyValue::new("route", "/b")]);

        let descriptor = crate::instrument::InstrumentDescriptor::new(
            crate::instrument::InstrumentKind::Counter,
            "reqs",
        );
        let metric = agg.collect(0, 10, &descriptor);
        let Summary::Sum { points, is_monotonic } = metric.summary else {
            panic!("expected sum summary");
        };
        assert!(is_monotonic);
        assert_eq!(points.len(), 2);
        let a = points.iter().find(|p| p.attributes[0].value == crate::common::Value::String("/a".into())).unwrap();
        assert_eq!(a.value, 8.0);
    }

    #[test]
    fn collect_resets_working_map() {
        let agg = Aggregator::<i64>::new("c", Aggregation::Sum, true, Arc::new(FakeClock::new(0, 1)));
        agg.record(5, &[]);
        let descriptor = crate::instrument::InstrumentDescriptor::new(
            crate::instrument::InstrumentKind::Counter,
            "c",
        );
        let first = agg.collect(0, 1, &descriptor);
        assert!(!first.is_empty());
        let second = agg.collect(1, 2, &descriptor);
        assert!(second.is_empty());
    }

    #[test]
    fn monotonic_drops_negative_values() {
        let agg = Aggregator::<i64>::new("c", Aggregation::Sum, true, Arc::new(FakeClock::new(0, 1)));
        agg.record(-5, &[]);
        let descriptor = crate::instrument::InstrumentDescriptor::new(
            crate::instrument::InstrumentKind::Counter,
            "c",
        );
        let metric = agg.collect(0, 1, &descriptor);
        assert!(metric.is_empty());
    }
}
