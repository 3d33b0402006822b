//! Buffers collected deltas so that N readers with differing cadences each
//! observe every delta exactly once, while cumulative readers see running
//! totals (§4.2).

use std::collections::HashMap;

use crate::aggregation::Aggregation;
use crate::bitmask::ReaderBitmask;
use crate::data::{Metric, Temporality};

struct DeltaNode {
    metric: Metric,
    reader_bitmask: ReaderBitmask,
}

/// An oldest-to-newest list of uncollected deltas plus, for each cumulative
/// reader, a running accumulated [`Metric`].
///
/// Invariant C (§4.3): the list length never exceeds the number of
/// collections not yet observed by the slowest reader, because `collect`
/// unlinks a node the moment its bitmask reaches zero.
#[derive(Default)]
pub struct DeltaStorage {
    nodes: Vec<DeltaNode>,
    cumulative: HashMap<usize, Metric>,
}

impl DeltaStorage {
    /// Creates an empty delta storage.
    pub fn new() -> Self {
        DeltaStorage::default()
    }

    /// Appends a delta observed by every reader bit set in
    /// `active_readers_bitmask`. Empty metrics (no data points) are
    /// dropped rather than retained.
    pub fn add(&mut self, metric: Metric, active_readers_bitmask: ReaderBitmask) {
        if metric.is_empty() {
            return;
        }
        self.nodes.push(DeltaNode {
            metric,
            reader_bitmask: active_readers_bitmask,
        });
    }

    /// Merges every unconsumed node for `reader_id` in oldest-first order,
    /// clearing that reader's bit as each is merged and unlinking any node
    /// whose bitmask then reaches zero. If `cumulative`, additionally folds
    /// the merged delta into the reader's running sum and returns a clone
    /// of that sum; otherwise returns the merged delta itself.
    ///
    /// Returns `None` if there was nothing to merge and no prior
    /// cumulative state exists for this reader.
    pub fn collect(&mut self, reader_id: usize, cumulative: bool, now_nanos: u64) -> Option<Metric> {
        let mut merged: Option<Metric> = None;
        let mut keep = Vec::with_capacity(self.nodes.len());

        for mut node in self.nodes.drain(..) {
            if node.reader_bitmask.test(reader_id) {
                node.reader_bitmask.clear(reader_id);
                match &mut merged {
                    Some(m) => Aggregation::merge(&mut m.summary, &node.metric.summary),
                    None => merged = Some(node.metric.clone()),
                }
            }
            if !node.reader_bitmask.is_empty() {
                keep.push(node);
            }
        }
        self.nodes = keep;

        if let Some(m) = &mut merged {
            m.time_nanos = now_nanos;
        }

        if cumulative {
            match merged {
                Some(delta) => {
                    let running = self.cumulative.entry(reader_id).or_insert_with(|| Metric {
                        temporality: Temporality::Cumulative,
                        ..delta.clone_with_empty_summary()
                    });
                    Aggregation::merge(&mut running.summary, &delta.summary);
                    running.time_nanos = now_nanos;
                    Some(running.clone())
                }
                None => self.cumulative.get(&reader_id).cloned().map(|mut m| {
                    m.time_nanos = now_nanos;
                    m
                }),
            }
        } else {
            merged
        }
    }

    /// Number of retained, not-yet-fully-consumed delta nodes. Exposed for
    /// Invariant C testing.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if no deltas are retained.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drops all cumulative state and pending deltas for `reader_id`,
    /// called from `unregister` after a final drain collect.
    pub fn forget_reader(&mut self, reader_id: usize) {
        self.cumulative.remove(&reader_id);
        for node in &mut self.nodes {
            node.reader_bitmask.clear(reader_id);
        }
        self.nodes.retain(|n| !n.reader_bitmask.is_empty());
    }
}

impl Metric {
    fn clone_with_empty_summary(&self) -> Metric {
        let summary = match &self.summary {
            crate::data::Summary::Sum { is_monotonic, .. } => crate::data::Summary::Sum {
                points: Vec::new(),
                is_monotonic: *is_monotonic,
            },
            crate::data::Summary::Gauge { .. } => crate::data::Summary::Gauge { points: Vec::new() },
            crate::data::Summary::Histogram { .. } => {
                crate::data::Summary::Histogram { points: Vec::new() }
            }
        };
        Metric {
            name: self.name.clone(),
            description: self.description.clone(),
            unit: self.unit.clone(),
            start_time_nanos: self.start_time_nanos,
            time_nanos: self.time_nanos,
            summary,
            temporality: self.temporality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::KeyValue;
    use crate::data::{Summary, SumDataPoint};

    fn sum_metric(value: f64) -> Metric {
        Metric {
            name: "c".into(),
            description: "".into(),
            unit: "".into(),
            start_time_nanos: 0,
            time_nanos: 0,
            summary: Summary::Sum {
                points: vec![SumDataPoint {
                    attributes: vec![KeyValue::new("k", "v")],
                    value,
                    exemplars: vec![],
                }],
                is_monotonic: true,
            },
            temporality: Temporality::Delta,
        }
    }

    #[test]
    fn two_readers_different_cadences() {
        // Mirrors §8 scenario 1.
        let mut storage = DeltaStorage::new();
        let mut readers = ReaderBitmask::default();
        readers.set(0); // reader A: delta
        readers.set(1); // reader B: cumulative

        storage.add(sum_metric(5.0), readers.clone());
        let a1 = storage.collect(0, false, 1).unwrap();
        assert_eq!(sum_value(&a1), 5.0);

        storage.add(sum_metric(3.0), readers.clone());
        let b1 = storage.collect(1, true, 2).unwrap();
        assert_eq!(sum_value(&b1), 8.0);

        let a2 = storage.collect(0, false, 3).unwrap();
        assert_eq!(sum_value(&a2), 3.0);

        let b2 = storage.collect(1, true, 4).unwrap();
        assert_eq!(sum_value(&b2), 8.0);

        assert_eq!(storage.len(), 0);
    }

    #[test]
    fn late_registration_misses_prior_deltas() {
        // §8 scenario 2.
        let mut storage = DeltaStorage::new();
        let mut readers = ReaderBitmask::default(); // no readers yet
        storage.add(sum_metric(10.0), readers.clone());

        readers.set(0); // reader A registers after the measurement
        storage.add(sum_metric(4.0), readers);

        let a1 = storage.collect(0, false, 1);
        // Reader A was not registered when the first delta was produced, so
        // it never observes it.
        assert_eq!(a1.map(|m| sum_value(&m)), Some(4.0));
    }

    fn sum_value(metric: &Metric) -> f64 {
        match &metric.summary {
            Summary::Sum { points, .. } => points.iter().map(|p| p.value).sum(),
            _ => panic!("expected sum"),
        }
    }
}
