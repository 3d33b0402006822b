//! The multi-reader metric stream state machine (§4.3, §4.4): owns one
//! instrument's aggregator and delta storage, and reconciles N readers each
//! with their own temporality and cadence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::aggregation::{Aggregation, Aggregator, Number};
use crate::bitmask::ReaderBitmask;
use crate::clock::Clock;
use crate::common::KeyValue;
use crate::data::{Metric, Summary, Temporality};
use crate::delta_storage::DeltaStorage;
use crate::error::{MetricError, MetricResult};
use crate::instrument::InstrumentDescriptor;
use crate::otel_warn;

/// A reader's requested temporality, passed to [`SyncMetricStream::register`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReaderTemporality {
    /// Observe only what changed since the reader's previous collection.
    Delta,
    /// Observe the running total since the stream was created.
    Cumulative,
}

struct StreamState {
    readers: ReaderBitmask,
    cumulative: ReaderBitmask,
    delta_storage: DeltaStorage,
    timestamp_nanos: u64,
    /// Maps an externally-issued [`crate::reader::ReaderToken`] to the bit
    /// index this particular stream assigned it. Bit indices are local to
    /// one stream (`readers_bitmask` in §4.3 is per-stream state), so a
    /// reader attached to many streams can land on a different bit in
    /// each; this map is what lets `MetricReader` address a stream using a
    /// stable token instead of a stream-specific integer.
    token_to_bit: std::collections::HashMap<u64, usize>,
}

impl StreamState {
    fn bit_for_token(&mut self, token: u64, temporality: ReaderTemporality) -> usize {
        if let Some(&id) = self.token_to_bit.get(&token) {
            return id;
        }
        let id = self.readers.lowest_unset();
        self.readers.set(id);
        if temporality == ReaderTemporality::Cumulative {
            self.cumulative.set(id);
        }
        self.token_to_bit.insert(token, id);
        id
    }

    fn forget_token(&mut self, token: u64) {
        if let Some(id) = self.token_to_bit.remove(&token) {
            self.delta_storage.forget_reader(id);
            self.readers.clear(id);
            self.cumulative.clear(id);
        }
    }
}

/// Synchronous metric stream: a live aggregator plus the reader fan-out
/// state machine described in §4.3.
///
/// `record` only ever touches the aggregator (lock-free from the stream's
/// point of view); `collect`/`register`/`unregister` serialize through
/// `state`, matching the §5 shared-resource policy.
pub struct SyncMetricStream<T: Number> {
    descriptor: InstrumentDescriptor,
    aggregator: Aggregator<T>,
    state: Mutex<StreamState>,
    start_time_nanos: u64,
    clock: Arc<dyn Clock>,
}

impl<T: Number> SyncMetricStream<T> {
    /// Creates a new stream for `descriptor`, using `aggregation` to fold
    /// measurements.
    pub fn new(
        descriptor: InstrumentDescriptor,
        aggregation: Aggregation,
        clock: Arc<dyn Clock>,
    ) -> MetricResult<Self> {
        aggregation.validate()?;
        let monotonic = descriptor.kind.is_monotonic();
        let start = clock.now_nanos();
        let aggregator = Aggregator::<T>::new(
            descriptor.name.clone(),
            aggregation,
            monotonic,
            clock.clone(),
        );
        Ok(SyncMetricStream {
            descriptor,
            aggregator,
            state: Mutex::new(StreamState {
                readers: ReaderBitmask::default(),
                cumulative: ReaderBitmask::default(),
                delta_storage: DeltaStorage::new(),
                timestamp_nanos: start,
                token_to_bit: std::collections::HashMap::new(),
            }),
            start_time_nanos: start,
            clock,
        })
    }

    /// Overrides the stream's attribute processor, e.g. to apply a
    /// matching view's allow-listed keys.
    pub fn with_attribute_processor(self, processor: Box<dyn crate::attributes::AttributeProcessor>) -> Self {
        let SyncMetricStream { descriptor, aggregator, state, start_time_nanos, clock } = self;
        SyncMetricStream {
            descriptor,
            aggregator: aggregator.with_attribute_processor(processor),
            state,
            start_time_nanos,
            clock,
        }
    }

    /// Attaches a bounded exemplar reservoir to the stream's aggregator.
    pub fn with_exemplar_reservoir(self, reservoir: crate::exemplar::ExemplarReservoir) -> Self {
        let SyncMetricStream { descriptor, aggregator, state, start_time_nanos, clock } = self;
        SyncMetricStream {
            descriptor,
            aggregator: aggregator.with_exemplar_reservoir(reservoir),
            state,
            start_time_nanos,
            clock,
        }
    }

    /// Folds one measurement into the live aggregator.
    pub fn record(&self, value: T, attributes: &[KeyValue]) {
        self.aggregator.record(value, attributes);
    }

    /// Registers a new reader, returning its id. Widens the bitmask with a
    /// `CapacityWarning` past the 64th reader rather than silently
    /// overflowing (§4.3).
    pub fn register(&self, temporality: ReaderTemporality) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state.readers.lowest_unset();
        state.readers.set(id);
        if temporality == ReaderTemporality::Cumulative {
            state.cumulative.set(id);
        }
        id
    }

    /// Unregisters `reader_id`, draining and discarding any outstanding
    /// deltas so other readers' bitmasks can still reach zero and unlink.
    pub fn unregister(&self, reader_id: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.readers.test(reader_id) {
            return;
        }
        state.delta_storage.forget_reader(reader_id);
        state.readers.clear(reader_id);
        state.cumulative.clear(reader_id);
    }

    /// Collects data for `reader_id`.
    ///
    /// If `advance` is `true`, the aggregator is swapped and the new delta
    /// recorded before reading; if `false`, this is a "replay without
    /// advancing" call that only re-reads already-collected state.
    pub fn collect(&self, reader_id: usize, advance: bool) -> MetricResult<Metric> {
        let mut state = self.state.lock()?;
        if !state.readers.test(reader_id) {
            return Err(MetricError::Other(format!(
                "reader {reader_id} is not registered on this stream"
            )));
        }

        if advance {
            let now = self.clock.now_nanos();
            let prev = state.timestamp_nanos;
            let delta = self.aggregator.collect(prev, now, &self.descriptor);
            state.timestamp_nanos = now;
            let readers = state.readers.clone();
            state.delta_storage.add(delta, readers);
        }

        let cumulative = state.cumulative.test(reader_id);
        let now = state.timestamp_nanos;
        let data = state
            .delta_storage
            .collect(reader_id, cumulative, now)
            .unwrap_or_else(|| empty_metric(&self.descriptor, self.start_time_nanos, now, cumulative));

        Ok(Metric {
            temporality: if cumulative {
                Temporality::Cumulative
            } else {
                Temporality::Delta
            },
            ..data
        })
    }

    /// Current number of retained, unconsumed delta nodes (Invariant C).
    pub fn pending_delta_count(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.delta_storage.len())
            .unwrap_or(0)
    }

    /// Registers `token` with this stream on first use, then collects for
    /// it -- the entry point [`crate::reader::MetricReader`] drives so a
    /// reader never needs a stream-specific integer id.
    pub fn collect_for_token(&self, token: u64, temporality: ReaderTemporality, advance: bool) -> MetricResult<Metric> {
        let reader_id = {
            let mut state = self.state.lock()?;
            state.bit_for_token(token, temporality)
        };
        self.collect(reader_id, advance)
    }

    /// Releases `token`'s bit on this stream, if it was ever registered.
    pub fn forget_token(&self, token: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.forget_token(token);
        }
    }
}

fn empty_metric(descriptor: &InstrumentDescriptor, start: u64, now: u64, _cumulative: bool) -> Metric {
    let summary = match descriptor.kind.default_aggregation() {
        crate::aggregation::Aggregation::Sum => Summary::Sum {
            points: Vec::new(),
            is_monotonic: descriptor.kind.is_monotonic(),
        },
        crate::aggregation::Aggregation::LastValue => Summary::Gauge { points: Vec::new() },
        crate::aggregation::Aggregation::ExplicitBucketHistogram { .. } => {
            Summary::Histogram { points: Vec::new() }
        }
    };
    Metric {
        name: descriptor.name.clone(),
        description: descriptor.description.clone(),
        unit: descriptor.unit.as_str().to_string(),
        start_time_nanos: start,
        time_nanos: now,
        summary,
        temporality: Temporality::Delta,
    }
}

/// A callback registered on an [`AsyncMetricStream`]: invoked once per
/// collection, yielding the current `(attributes, value)` pairs for every
/// series the observable instrument reports.
pub trait ObserverCallback<T>: Send + Sync {
    /// Returns the current measurements.
    fn observe(&self) -> Vec<(Vec<KeyValue>, T)>;
}

impl<T, F> ObserverCallback<T> for F
where
    F: Fn() -> Vec<(Vec<KeyValue>, T)> + Send + Sync,
{
    fn observe(&self) -> Vec<(Vec<KeyValue>, T)> {
        self()
    }
}

/// An asynchronous (observable) metric stream. Identical reader fan-out
/// interface to [`SyncMetricStream`], but `collect` drives registered
/// callbacks instead of reading a live aggregator (§4.4): last-value
/// semantics for observable gauges, sum semantics (with temporality-diffed
/// emission) for observable counters.
pub struct AsyncMetricStream<T: Number> {
    descriptor: InstrumentDescriptor,
    callbacks: Mutex<Vec<Box<dyn ObserverCallback<T>>>>,
    state: Mutex<StreamState>,
    previous_cumulative: Mutex<std::collections::HashMap<Vec<KeyValue>, f64>>,
    start_time_nanos: u64,
    clock: Arc<dyn Clock>,
    is_gauge: bool,
    attribute_processor: Box<dyn crate::attributes::AttributeProcessor>,
}

impl<T: Number> AsyncMetricStream<T> {
    /// Creates a new asynchronous stream.
    pub fn new(descriptor: InstrumentDescriptor, clock: Arc<dyn Clock>) -> Self {
        let is_gauge = matches!(descriptor.kind.default_aggregation(), Aggregation::LastValue);
        let start = clock.now_nanos();
        AsyncMetricStream {
            descriptor,
            callbacks: Mutex::new(Vec::new()),
            state: Mutex::new(StreamState {
                readers: ReaderBitmask::default(),
                cumulative: ReaderBitmask::default(),
                delta_storage: DeltaStorage::new(),
                timestamp_nanos: start,
                token_to_bit: std::collections::HashMap::new(),
            }),
            previous_cumulative: Mutex::new(std::collections::HashMap::new()),
            start_time_nanos: start,
            clock,
            is_gauge,
            attribute_processor: Box::new(crate::attributes::IdentityAttributeProcessor),
        }
    }

    /// Overrides the stream's attribute processor, e.g. to apply a
    /// matching view's allow-listed keys.
    pub fn with_attribute_processor(mut self, processor: Box<dyn crate::attributes::AttributeProcessor>) -> Self {
        self.attribute_processor = processor;
        self
    }

    /// Registers an observer callback invoked on every collection.
    pub fn register_callback(&self, callback: Box<dyn ObserverCallback<T>>) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(callback);
        }
    }

    /// See [`SyncMetricStream::register`].
    pub fn register(&self, temporality: ReaderTemporality) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state.readers.lowest_unset();
        state.readers.set(id);
        if temporality == ReaderTemporality::Cumulative {
            state.cumulative.set(id);
        }
        id
    }

    /// See [`SyncMetricStream::unregister`].
    pub fn unregister(&self, reader_id: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.delta_storage.forget_reader(reader_id);
        state.readers.clear(reader_id);
        state.cumulative.clear(reader_id);
    }

    /// Invokes every registered callback and folds the results into the
    /// current-collection summary, then fans it out exactly like
    /// [`SyncMetricStream::collect`].
    pub fn collect(&self, reader_id: usize, advance: bool) -> MetricResult<Metric> {
        let mut state = self.state.lock()?;
        if !state.readers.test(reader_id) {
            return Err(MetricError::Other(format!(
                "reader {reader_id} is not registered on this stream"
            )));
        }

        if advance {
            let now = self.clock.now_nanos();
            let prev = state.timestamp_nanos;
            let observations = self.run_callbacks();
            let metric = self.observations_to_metric(observations, prev, now);
            state.timestamp_nanos = now;
            let readers = state.readers.clone();
            state.delta_storage.add(metric, readers);
        }

        let cumulative = state.cumulative.test(reader_id);
        let now = state.timestamp_nanos;
        let data = state
            .delta_storage
            .collect(reader_id, cumulative, now)
            .unwrap_or_else(|| empty_metric(&self.descriptor, self.start_time_nanos, now, cumulative));

        Ok(Metric {
            temporality: if cumulative {
                Temporality::Cumulative
            } else {
                Temporality::Delta
            },
            ..data
        })
    }

    /// See [`SyncMetricStream::collect_for_token`].
    pub fn collect_for_token(&self, token: u64, temporality: ReaderTemporality, advance: bool) -> MetricResult<Metric> {
        let reader_id = {
            let mut state = self.state.lock()?;
            state.bit_for_token(token, temporality)
        };
        self.collect(reader_id, advance)
    }

    /// See [`SyncMetricStream::forget_token`].
    pub fn forget_token(&self, token: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.forget_token(token);
        }
    }

    fn run_callbacks(&self) -> Vec<(Vec<KeyValue>, T)> {
        let callbacks = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        for cb in callbacks.iter() {
            out.extend(cb.observe());
        }
        out
    }

    fn observations_to_metric(&self, observations: Vec<(Vec<KeyValue>, T)>, start: u64, now: u64) -> Metric {
        let observations: Vec<(Vec<KeyValue>, T)> = observations
            .into_iter()
            .map(|(attrs, v)| (self.attribute_processor.process(&attrs).into_inner(), v))
            .collect();
        let summary = if self.is_gauge {
            Summary::Gauge {
                points: observations
                    .into_iter()
                    .map(|(attrs, v)| crate::data::GaugeDataPoint {
                        attributes: attrs,
                        value: v.into_f64(),
                        observed_at_nanos: now,
                        exemplars: Vec::new(),
                    })
                    .collect(),
            }
        } else {
            // Observable counters report an absolute current total; the
            // delta reported this collection is the diff against the last
            // observed total per attribute set.
            let mut previous = self
                .previous_cumulative
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let mut points = Vec::with_capacity(observations.len());
            for (attrs, v) in observations {
                let current = v.into_f64();
                let prior = previous.insert(attrs.clone(), current).unwrap_or(0.0);
                let delta = current - prior;
                if delta != 0.0 {
                    points.push(crate::data::SumDataPoint {
                        attributes: attrs,
                        value: delta,
                        exemplars: Vec::new(),
                    });
                }
            }
            Summary::Sum {
                points,
                is_monotonic: self.descriptor.kind.is_monotonic(),
            }
        };

        Metric {
            name: self.descriptor.name.clone(),
            description: self.descriptor.description.clone(),
            unit: self.descriptor.unit.as_str().to_string(),
            start_time_nanos: start,
            time_nanos: now,
            summary,
            temporality: Temporality::Delta,
        }
    }
}

/// The handle stored inside an [`crate::instrument::InstrumentHandle`]:
/// either a live synchronous stream or an observable one, sharing a single
/// `record`/`observe` entry point so `Writable`/`Observable` can stay
/// generic over both.
pub enum MetricStreamHandle<T: Number> {
    /// Backs synchronous instruments.
    Sync(SyncMetricStream<T>),
    /// Backs observable instruments.
    Async(AsyncMetricStream<T>),
}

impl<T: Number> MetricStreamHandle<T> {
    pub(crate) fn record(&self, value: T, attributes: &[KeyValue]) {
        if let MetricStreamHandle::Sync(s) = self {
            s.record(value, attributes);
        } else {
            otel_warn!(
                name: "MetricStreamHandle.RecordOnObservable",
                message = "record() called on an observable instrument; use observe() from within a callback instead",
            );
        }
    }

    pub(crate) fn observe(&self, _value: T, _attributes: &[KeyValue]) {
        // Observable instruments report values through registered
        // callbacks invoked during `collect`, not through direct pushes;
        // `observe` on the handle itself is a documented no-op.
    }

    /// Collects for `token` regardless of whether this stream backs a
    /// synchronous or observable instrument, assigning the token a local
    /// bit index on first use.
    pub(crate) fn collect_for_token(
        &self,
        token: u64,
        temporality: ReaderTemporality,
        advance: bool,
    ) -> MetricResult<Metric> {
        match self {
            MetricStreamHandle::Sync(s) => s.collect_for_token(token, temporality, advance),
            MetricStreamHandle::Async(a) => a.collect_for_token(token, temporality, advance),
        }
    }

    /// Releases `token`'s bit on this stream, if ever assigned.
    pub(crate) fn forget_token(&self, token: u64) {
        match self {
            MetricStreamHandle::Sync(s) => s.forget_token(token),
            MetricStreamHandle::Async(a) => a.forget_token(token),
        }
    }

    pub(crate) fn descriptor(&self) -> &InstrumentDescriptor {
        match self {
            MetricStreamHandle::Sync(s) => &s.descriptor,
            MetricStreamHandle::Async(a) => &a.descriptor,
        }
    }
}

static ATOMIC_ID: AtomicU64 = AtomicU64::new(0);

/// Allocates a process-unique id, used when a stable instrument identity
/// beyond `(scope, name)` is needed (e.g. log correlation).
pub fn next_stream_id() -> u64 {
    ATOMIC_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::instrument::{InstrumentDescriptor, InstrumentKind};

    fn counter_stream() -> SyncMetricStream<i64> {
        let descriptor = InstrumentDescriptor::new(InstrumentKind::Counter, "reqs");
        SyncMetricStream::new(descriptor, Aggregation::Sum, Arc::new(FakeClock::new(0, 1))).unwrap()
    }

    #[test]
    fn sixty_fifth_reader_gets_capacity_warning_sink() {
        // §8 scenario 3: register 64 real readers, 65th must still behave
        // as a usable (if capacity-limited) reader id.
        let stream = counter_stream();
        for _ in 0..64 {
            stream.register(ReaderTemporality::Delta);
        }
        let id = stream.register(ReaderTemporality::Delta);
        assert_eq!(id, 64);
        stream.record(1, &[]);
        let metric = stream.collect(id, true).unwrap();
        // The 65th reader was registered after bit 64's node was already
        // created with bit 64 set, so it should observe the recorded value.
        assert!(!metric.is_empty());
    }

    #[test]
    fn unregister_then_register_starts_clean() {
        let stream = counter_stream();
        let r = stream.register(ReaderTemporality::Delta);
        stream.record(5, &[]);
        stream.unregister(r);
        let r2 = stream.register(ReaderTemporality::Delta);
        assert_eq!(r2, r);
        stream.record(1, &[]);
        let metric = stream.collect(r2, true).unwrap();
        match metric.summary {
            Summary::Sum { points, .. } => {
                assert_eq!(points.iter().map(|p| p.value).sum::<f64>(), 1.0);
            }
            _ => panic!("expected sum"),
        }
    }
}
