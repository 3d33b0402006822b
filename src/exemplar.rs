//! Bounded random sampling of raw measurements for provenance.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::common::KeyValue;
use crate::data::Exemplar;

/// A fixed-capacity reservoir implementing uniform random sampling without
/// replacement within one collection window (Algorithm R).
///
/// `offer` is called once per measurement on the hot path, so it must stay
/// O(1) amortized: a running counter plus a single RNG draw per call.
pub struct ExemplarReservoir {
    capacity: usize,
    seen: u64,
    samples: Vec<Exemplar>,
    rng: SmallRng,
    trace_context: Option<([u8; 16], [u8; 8])>,
}

impl std::fmt::Debug for ExemplarReservoir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExemplarReservoir")
            .field("capacity", &self.capacity)
            .field("len", &self.samples.len())
            .finish()
    }
}

impl ExemplarReservoir {
    /// Creates a reservoir retaining at most `capacity` exemplars per
    /// collection window.
    pub fn new(capacity: usize) -> Self {
        ExemplarReservoir {
            capacity,
            seen: 0,
            samples: Vec::with_capacity(capacity),
            rng: SmallRng::from_os_rng(),
            trace_context: None,
        }
    }

    /// Attaches trace/span context that subsequently sampled exemplars
    /// should carry (§3: `Exemplar` optionally records `trace_id`/`span_id`).
    pub fn with_trace_context(mut self, trace_id: [u8; 16], span_id: [u8; 8]) -> Self {
        self.trace_context = Some((trace_id, span_id));
        self
    }

    /// Offers a measurement to the reservoir. Uses reservoir sampling so
    /// that, across an unbounded stream of offers, each one lands in the
    /// final sample set with probability `capacity / seen`.
    pub fn offer(&mut self, value: f64, timestamp_nanos: u64, filtered_attributes: Vec<KeyValue>) {
        self.seen += 1;
        let exemplar = Exemplar {
            value,
            timestamp_nanos,
            filtered_attributes,
            trace_id: self.trace_context.map(|(t, _)| t),
            span_id: self.trace_context.map(|(_, s)| s),
        };

        if self.samples.len() < self.capacity {
            self.samples.push(exemplar);
            return;
        }
        if self.capacity == 0 {
            return;
        }
        let j = self.rng.random_range(0..self.seen);
        if (j as usize) < self.capacity {
            self.samples[j as usize] = exemplar;
        }
    }

    /// Atomically swaps out the accumulated samples, resetting the
    /// reservoir for the next collection window -- mirrors
    /// [`crate::aggregation::Aggregator::collect`]'s working-map swap.
    pub fn collect(&mut self) -> Vec<Exemplar> {
        self.seen = 0;
        std::mem::take(&mut self.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservoir_never_exceeds_capacity() {
        let mut reservoir = ExemplarReservoir::new(3);
        for i in 0..100 {
            reservoir.offer(i as f64, i, vec![]);
        }
        assert_eq!(reservoir.collect().len(), 3);
    }

    #[test]
    fn collect_resets_for_next_window() {
        let mut reservoir = ExemplarReservoir::new(2);
        reservoir.offer(1.0, 0, vec![]);
        assert_eq!(reservoir.collect().len(), 1);
        assert_eq!(reservoir.collect().len(), 0);
    }

    #[test]
    fn zero_capacity_retains_nothing() {
        let mut reservoir = ExemplarReservoir::new(0);
        reservoir.offer(1.0, 0, vec![]);
        assert_eq!(reservoir.collect().len(), 0);
    }
}
