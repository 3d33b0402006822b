//! User-facing instrument factory, scoped to one instrumentation library
//! (§4.5): dedup by `(scope_id, instrument_id)`, staleness-triggered
//! removal, conflict-warn-and-reuse semantics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::aggregation::Number;
use crate::attributes::{canonical_instrument_id, canonical_scope_id};
use crate::clock::{Clock, SystemClock};
use crate::common::InstrumentationScope;
use crate::data::Metric;
use crate::error::MetricResult;
use crate::instrument::{validate_descriptor, InstrumentDescriptor, InstrumentHandle};
use crate::otel_warn;
use crate::staleness::{StalenessHandler, StalenessPolicy};
use crate::stream::{AsyncMetricStream, MetricStreamHandle, ObserverCallback, ReaderTemporality, SyncMetricStream};
use crate::view::{attribute_processor_for_mask, resolve_aggregation, ViewRegistry};

struct RegisteredSync<T: Number> {
    descriptor: InstrumentDescriptor,
    stream: Arc<MetricStreamHandle<T>>,
    staleness: Arc<StalenessHandler>,
}

struct RegisteredAsync<T: Number> {
    descriptor: InstrumentDescriptor,
    stream: Arc<AsyncMetricStream<T>>,
    staleness: Arc<StalenessHandler>,
}

type SyncRegistry<T> = Arc<Mutex<HashMap<String, RegisteredSync<T>>>>;
type AsyncRegistry<T> = Arc<Mutex<HashMap<String, RegisteredAsync<T>>>>;

/// A factory for instruments scoped to one [`InstrumentationScope`].
///
/// Each numeric type gets its own registry (mirroring how the aggregation
/// and stream layers are generic over `T`): a `Meter` tracks `i64` and
/// `f64` synchronous and asynchronous instruments independently, so an
/// `i64` counter and an `f64` counter sharing a name are distinct entries
/// and both detected as conflicts against same-typed duplicates only.
pub struct Meter {
    scope: InstrumentationScope,
    scope_id: String,
    views: Arc<ViewRegistry>,
    clock: Arc<dyn Clock>,
    i64_sync: SyncRegistry<i64>,
    f64_sync: SyncRegistry<f64>,
    i64_async: AsyncRegistry<i64>,
    f64_async: AsyncRegistry<f64>,
}

impl Meter {
    /// Creates a meter for `scope`, using `views` to resolve aggregation
    /// overrides and `clock` as the shared timestamp source for every
    /// stream it creates.
    pub fn new(scope: InstrumentationScope, views: Arc<ViewRegistry>, clock: Arc<dyn Clock>) -> Self {
        let scope_id = canonical_scope_id(&scope);
        Meter {
            scope,
            scope_id,
            views,
            clock,
            i64_sync: Arc::new(Mutex::new(HashMap::new())),
            f64_sync: Arc::new(Mutex::new(HashMap::new())),
            i64_async: Arc::new(Mutex::new(HashMap::new())),
            f64_async: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The scope this meter was created for.
    pub fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    /// Creates (or returns the existing) synchronous `i64` instrument.
    pub fn create_i64_instrument(&self, descriptor: InstrumentDescriptor) -> MetricResult<InstrumentHandle<i64>> {
        create_sync(&self.i64_sync, &self.scope_id, descriptor, &self.views, self.clock.clone())
    }

    /// Creates (or returns the existing) synchronous `f64` instrument.
    pub fn create_f64_instrument(&self, descriptor: InstrumentDescriptor) -> MetricResult<InstrumentHandle<f64>> {
        create_sync(&self.f64_sync, &self.scope_id, descriptor, &self.views, self.clock.clone())
    }

    /// Creates (or returns the existing) observable `i64` instrument,
    /// registering `callback` to be invoked on every collection.
    pub fn create_i64_observable(
        &self,
        descriptor: InstrumentDescriptor,
        callback: impl ObserverCallback<i64> + 'static,
    ) -> MetricResult<()> {
        create_async(&self.i64_async, &self.scope_id, descriptor, &self.views, self.clock.clone(), callback)
    }

    /// Creates (or returns the existing) observable `f64` instrument,
    /// registering `callback` to be invoked on every collection.
    pub fn create_f64_observable(
        &self,
        descriptor: InstrumentDescriptor,
        callback: impl ObserverCallback<f64> + 'static,
    ) -> MetricResult<()> {
        create_async(&self.f64_async, &self.scope_id, descriptor, &self.views, self.clock.clone(), callback)
    }

    /// Collects from every live stream this meter owns under `token`,
    /// the entry point a [`crate::reader::MetricReader`] drives once per
    /// meter it knows about. Empty summaries (an instrument with no
    /// recorded/observed values yet) are still returned, matching
    /// per-stream `collect`.
    pub(crate) fn collect_all(&self, token: u64, temporality: ReaderTemporality, advance: bool) -> Vec<Metric> {
        let mut out = Vec::new();
        collect_sync_registry(&self.i64_sync, token, temporality, advance, &mut out);
        collect_sync_registry(&self.f64_sync, token, temporality, advance, &mut out);
        collect_async_registry(&self.i64_async, token, temporality, advance, &mut out);
        collect_async_registry(&self.f64_async, token, temporality, advance, &mut out);
        out
    }

    /// Releases `token`'s bit on every stream this meter owns, called when
    /// a reader that held it shuts down.
    pub(crate) fn forget_token(&self, token: u64) {
        forget_sync_registry(&self.i64_sync, token);
        forget_sync_registry(&self.f64_sync, token);
        forget_async_registry(&self.i64_async, token);
        forget_async_registry(&self.f64_async, token);
    }
}

fn collect_sync_registry<T: Number>(
    registry: &SyncRegistry<T>,
    token: u64,
    temporality: ReaderTemporality,
    advance: bool,
    out: &mut Vec<Metric>,
) {
    let map = registry.lock().unwrap_or_else(|e| e.into_inner());
    for entry in map.values() {
        match entry.stream.collect_for_token(token, temporality, advance) {
            Ok(metric) => out.push(metric),
            Err(err) => otel_warn!(
                name: "Meter.CollectFailed",
                message = "failed to collect a synchronous stream",
                instrument = entry.descriptor.name.as_ref(),
                reason = err.to_string().as_str(),
            ),
        }
    }
}

fn collect_async_registry<T: Number>(
    registry: &AsyncRegistry<T>,
    token: u64,
    temporality: ReaderTemporality,
    advance: bool,
    out: &mut Vec<Metric>,
) {
    let map = registry.lock().unwrap_or_else(|e| e.into_inner());
    for entry in map.values() {
        match entry.stream.collect_for_token(token, temporality, advance) {
            Ok(metric) => out.push(metric),
            Err(err) => otel_warn!(
                name: "Meter.CollectFailed",
                message = "failed to collect an observable stream",
                instrument = entry.descriptor.name.as_ref(),
                reason = err.to_string().as_str(),
            ),
        }
    }
}

fn forget_sync_registry<T: Number>(registry: &SyncRegistry<T>, token: u64) {
    let map = registry.lock().unwrap_or_else(|e| e.into_inner());
    for entry in map.values() {
        entry.stream.forget_token(token);
    }
}

fn forget_async_registry<T: Number>(registry: &AsyncRegistry<T>, token: u64) {
    let map = registry.lock().unwrap_or_else(|e| e.into_inner());
    for entry in map.values() {
        entry.stream.forget_token(token);
    }
}

fn registry_key(instrument_id: &str, scope_id: &str) -> String {
    format!("{scope_id}\u{1}{instrument_id}")
}

fn create_sync<T: Number>(
    registry: &SyncRegistry<T>,
    scope_id: &str,
    descriptor: InstrumentDescriptor,
    views: &ViewRegistry,
    clock: Arc<dyn Clock>,
) -> MetricResult<InstrumentHandle<T>> {
    validate_descriptor(&descriptor)?;
    let instrument_id = canonical_instrument_id(descriptor.kind, &descriptor.name);
    let key = registry_key(&instrument_id, scope_id);

    let mut map = registry.lock()?;
    if let Some(existing) = map.get(&key) {
        if existing.descriptor.conflicts_with(&descriptor) {
            otel_warn!(
                name: "Meter.InstrumentConflict",
                message = "instrument re-registered with a conflicting kind/unit/description; keeping first registration",
                instrument = descriptor.name.as_ref(),
            );
        }
        existing.staleness.acquire();
        return Ok(InstrumentHandle {
            stream: existing.stream.clone(),
            descriptor: existing.descriptor.clone(),
            staleness: existing.staleness.clone(),
        });
    }

    let mask = views.resolve(&descriptor);
    let aggregation = resolve_aggregation(&descriptor, mask.as_ref());
    let mut stream = SyncMetricStream::<T>::new(descriptor.clone(), aggregation, clock)?;
    if let Some(mask) = &mask {
        stream = stream.with_attribute_processor(attribute_processor_for_mask(mask));
    }
    let stream = Arc::new(MetricStreamHandle::Sync(stream));
    let staleness = Arc::new(StalenessHandler::new(StalenessPolicy::Immediate));

    let weak_registry: Weak<Mutex<HashMap<String, RegisteredSync<T>>>> = Arc::downgrade(registry);
    let reclaim_key = key.clone();
    staleness.on_stale(move || {
        if let Some(registry) = weak_registry.upgrade() {
            if let Ok(mut map) = registry.lock() {
                map.remove(&reclaim_key);
            }
        }
    });

    let handle = InstrumentHandle {
        stream: stream.clone(),
        descriptor: descriptor.clone(),
        staleness: staleness.clone(),
    };
    map.insert(
        key,
        RegisteredSync {
            descriptor,
            stream,
            staleness,
        },
    );
    Ok(handle)
}

fn create_async<T: Number>(
    registry: &AsyncRegistry<T>,
    scope_id: &str,
    descriptor: InstrumentDescriptor,
    views: &ViewRegistry,
    clock: Arc<dyn Clock>,
    callback: impl ObserverCallback<T> + 'static,
) -> MetricResult<()> {
    validate_descriptor(&descriptor)?;
    let instrument_id = canonical_instrument_id(descriptor.kind, &descriptor.name);
    let key = registry_key(&instrument_id, scope_id);

    let mut map = registry.lock()?;
    if let Some(existing) = map.get(&key) {
        if existing.descriptor.conflicts_with(&descriptor) {
            otel_warn!(
                name: "Meter.InstrumentConflict",
                message = "observable instrument re-registered with a conflicting kind/unit/description; keeping first registration",
                instrument = descriptor.name.as_ref(),
            );
        }
        existing.stream.register_callback(Box::new(callback));
        return Ok(());
    }

    let mask = views.resolve(&descriptor);
    let mut stream = AsyncMetricStream::<T>::new(descriptor.clone(), clock);
    if let Some(mask) = &mask {
        stream = stream.with_attribute_processor(attribute_processor_for_mask(mask));
    }
    stream.register_callback(Box::new(callback));
    let stream = Arc::new(stream);
    let staleness = Arc::new(StalenessHandler::new(StalenessPolicy::Immediate));

    let weak_registry: Weak<Mutex<HashMap<String, RegisteredAsync<T>>>> = Arc::downgrade(registry);
    let reclaim_key = key.clone();
    staleness.on_stale(move || {
        if let Some(registry) = weak_registry.upgrade() {
            if let Ok(mut map) = registry.lock() {
                map.remove(&reclaim_key);
            }
        }
    });

    map.insert(
        key,
        RegisteredAsync {
            descriptor,
            stream,
            staleness,
        },
    );
    Ok(())
}

/// Top-level factory for [`Meter`]s, the root of the metrics pipeline.
/// Owns the shared [`ViewRegistry`] and [`Clock`] every meter it creates
/// will use.
pub struct MeterProvider {
    views: Arc<ViewRegistry>,
    clock: Arc<dyn Clock>,
    meters: Mutex<HashMap<String, Arc<Meter>>>,
}

impl Default for MeterProvider {
    fn default() -> Self {
        MeterProvider::builder().build()
    }
}

impl MeterProvider {
    /// Starts a [`MeterProviderBuilder`].
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder::default()
    }

    /// Returns the meter for `scope`, creating it on first use. Distinct
    /// scopes (by `(name, version, schema_url)`) get distinct meters and
    /// therefore distinct instrument registries.
    pub fn meter(&self, scope: InstrumentationScope) -> Arc<Meter> {
        let scope_id = canonical_scope_id(&scope);
        let mut meters = self.meters.lock().unwrap_or_else(|e| e.into_inner());
        meters
            .entry(scope_id)
            .or_insert_with(|| Arc::new(Meter::new(scope, self.views.clone(), self.clock.clone())))
            .clone()
    }

    /// Every meter created through this provider so far, for a
    /// [`crate::reader::MetricReader`] to collect across.
    pub(crate) fn meters_snapshot(&self) -> Vec<Arc<Meter>> {
        self.meters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

/// Builder for [`MeterProvider`].
#[derive(Default)]
pub struct MeterProviderBuilder {
    views: Vec<Box<dyn crate::view::View>>,
    clock: Option<Arc<dyn Clock>>,
}

impl MeterProviderBuilder {
    /// Registers a view, consulted in registration order.
    pub fn with_view(mut self, view: impl crate::view::View + 'static) -> Self {
        self.views.push(Box::new(view));
        self
    }

    /// Overrides the clock used by every stream this provider's meters
    /// create. Defaults to [`SystemClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the [`MeterProvider`].
    pub fn build(self) -> MeterProvider {
        let mut registry = ViewRegistry::new();
        for view in self.views {
            registry.add(view);
        }
        MeterProvider {
            views: Arc::new(registry),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            meters: Mutex::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::InstrumentKind;

    fn scope() -> InstrumentationScope {
        InstrumentationScope::builder("test").build()
    }

    #[test]
    fn duplicate_registration_returns_shared_stream() {
        let provider = MeterProvider::default();
        let meter = provider.meter(scope());
        let a = meter
            .create_i64_instrument(InstrumentDescriptor::new(InstrumentKind::Counter, "reqs"))
            .unwrap();
        let b = meter
            .create_i64_instrument(InstrumentDescriptor::new(InstrumentKind::Counter, "reqs"))
            .unwrap();

        a.stream.record(5, &[]);
        let MetricStreamHandle::Sync(s) = b.stream.as_ref() else {
            panic!("expected sync stream");
        };
        let reader = s.register(crate::stream::ReaderTemporality::Delta);
        let metric = s.collect(reader, true).unwrap();
        assert!(!metric.is_empty());
    }

    #[test]
    fn staleness_reclaims_after_last_handle_drops() {
        let provider = MeterProvider::default();
        let meter = provider.meter(scope());
        let descriptor = InstrumentDescriptor::new(InstrumentKind::Counter, "reqs");

        let handle = meter.create_i64_instrument(descriptor.clone()).unwrap();
        assert_eq!(meter.i64_sync.lock().unwrap().len(), 1);
        drop(handle);
        assert_eq!(meter.i64_sync.lock().unwrap().len(), 0);

        // Re-creating yields a fresh stream with a new start timestamp.
        let second = meter.create_i64_instrument(descriptor).unwrap();
        let MetricStreamHandle::Sync(s) = second.stream.as_ref() else {
            panic!("expected sync stream");
        };
        assert_eq!(s.pending_delta_count(), 0);
    }

    #[test]
    fn conflicting_redefinition_keeps_first_registration() {
        let provider = MeterProvider::default();
        let meter = provider.meter(scope());
        let first = meter
            .create_i64_instrument(InstrumentDescriptor::new(InstrumentKind::Counter, "reqs").with_unit("1"))
            .unwrap();
        let second = meter
            .create_i64_instrument(InstrumentDescriptor::new(InstrumentKind::Counter, "reqs").with_unit("ms"))
            .unwrap();
        assert_eq!(first.descriptor.unit.as_str(), second.descriptor.unit.as_str());
    }
}
