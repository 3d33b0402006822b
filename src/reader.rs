//! The pull-based collection contract between a [`crate::meter::MeterProvider`]
//! and whatever drives export (§6 "MetricReader contract"): a
//! [`ManualMetricReader`] for on-demand collection, and a
//! [`PeriodicExportingMetricReader`] that collects and exports on a fixed
//! interval from a background thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use crate::data::ScopeMetrics;
use crate::error::{MetricError, MetricResult};
use crate::exporter::Exporter;
use crate::meter::MeterProvider;
use crate::otel_debug;
use crate::stream::ReaderTemporality;

static NEXT_READER_TOKEN: AtomicU64 = AtomicU64::new(1);

/// A stream-independent identity for a registered reader. Each
/// [`crate::stream::SyncMetricStream`]/[`crate::stream::AsyncMetricStream`]
/// assigns its own locally-significant bit index the first time it sees a
/// given token (see `StreamState::bit_for_token`); the token itself is what
/// stays stable across every stream a reader collects from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderToken(u64);

impl ReaderToken {
    /// Allocates a fresh, process-unique token.
    pub fn new() -> Self {
        ReaderToken(NEXT_READER_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ReaderToken {
    fn default() -> Self {
        ReaderToken::new()
    }
}

/// The interface a reader presents to its owner: pull-based collection plus
/// lifecycle management, mirrored from the teacher's `MetricReader` trait.
/// `register_provider` establishes the weak back-reference a reader needs
/// to pull from every meter without keeping the provider alive (§9 "Cyclic
/// ownership" applies here too: a reader must not be the reason a
/// `MeterProvider` never drops).
pub trait MetricReader: fmt::Debug + Send + Sync + 'static {
    /// Attaches this reader to `provider`. Readers collect lazily, so this
    /// only needs to record the provider; no collection happens yet.
    fn register_provider(&self, provider: Weak<MeterProvider>);

    /// Gathers every metric from every meter the registered provider
    /// currently knows about.
    fn collect(&self) -> MetricResult<Vec<ScopeMetrics>>;

    /// Releases resources held by this reader. After shutdown, `collect`
    /// returns an error and any background thread is joined.
    fn shutdown(&self) -> MetricResult<()>;
}

fn collect_from_provider(
    provider: &Weak<MeterProvider>,
    token: ReaderToken,
    temporality: ReaderTemporality,
    advance: bool,
) -> MetricResult<Vec<ScopeMetrics>> {
    let provider = provider.upgrade().ok_or_else(|| {
        MetricError::Other("reader is shut down or was never registered with a provider".into())
    })?;
    Ok(provider
        .meters_snapshot()
        .into_iter()
        .map(|meter| ScopeMetrics {
            scope: meter.scope().clone(),
            metrics: meter.collect_all(token.0, temporality, advance),
        })
        .filter(|sm| !sm.metrics.is_empty())
        .collect())
}

/// A [`MetricReader`] that only collects when explicitly asked, for tests
/// and pull-based exporters (e.g. a Prometheus scrape handler).
pub struct ManualMetricReader {
    token: ReaderToken,
    temporality: ReaderTemporality,
    provider: Mutex<Option<Weak<MeterProvider>>>,
    is_shutdown: AtomicBool,
}

impl fmt::Debug for ManualMetricReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ManualMetricReader")
    }
}

impl Default for ManualMetricReader {
    fn default() -> Self {
        ManualMetricReader::builder().build()
    }
}

impl ManualMetricReader {
    /// Starts a builder, defaulting to [`ReaderTemporality::Cumulative`].
    pub fn builder() -> ManualMetricReaderBuilder {
        ManualMetricReaderBuilder::default()
    }

    /// Creates a reader with the default (cumulative) temporality, not yet
    /// attached to any provider.
    pub fn new() -> Self {
        ManualMetricReader::builder().build()
    }
}

impl MetricReader for ManualMetricReader {
    fn register_provider(&self, provider: Weak<MeterProvider>) {
        let mut slot = self.provider.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            otel_debug!(
                name: "ManualMetricReader.DuplicateRegistration",
                message = "reader is already registered with a provider; ignoring",
            );
            return;
        }
        *slot = Some(provider);
    }

    fn collect(&self) -> MetricResult<Vec<ScopeMetrics>> {
        if self.is_shutdown.load(Ordering::Acquire) {
            return Err(MetricError::Other("reader is shut down".into()));
        }
        let slot = self.provider.lock()?;
        let provider = slot
            .as_ref()
            .ok_or_else(|| MetricError::Other("reader is not registered with a provider".into()))?;
        collect_from_provider(provider, self.token, self.temporality, true)
    }

    fn shutdown(&self) -> MetricResult<()> {
        self.is_shutdown.store(true, Ordering::Release);
        if let Ok(slot) = self.provider.lock() {
            if let Some(provider) = slot.as_ref().and_then(Weak::upgrade) {
                for meter in provider.meters_snapshot() {
                    meter.forget_token(self.token.0);
                }
            }
        }
        Ok(())
    }
}

/// Configuration for a [`ManualMetricReader`].
pub struct ManualMetricReaderBuilder {
    temporality: ReaderTemporality,
}

impl Default for ManualMetricReaderBuilder {
    fn default() -> Self {
        ManualMetricReaderBuilder { temporality: ReaderTemporality::Cumulative }
    }
}

impl ManualMetricReaderBuilder {
    /// Sets the temporality this reader requests from every stream.
    pub fn with_temporality(mut self, temporality: ReaderTemporality) -> Self {
        self.temporality = temporality;
        self
    }

    /// Builds the reader.
    pub fn build(self) -> ManualMetricReader {
        ManualMetricReader {
            token: ReaderToken::new(),
            temporality: self.temporality,
            provider: Mutex::new(None),
            is_shutdown: AtomicBool::new(false),
        }
    }
}

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

enum WorkerMessage {
    ForceFlush(mpsc::Sender<MetricResult<()>>),
    Shutdown,
}

/// A [`MetricReader`] that collects and exports at a fixed interval from a
/// dedicated background thread, mirroring the teacher's `PeriodicReader`.
/// The export time does not count towards the interval between attempts.
pub struct PeriodicExportingMetricReader {
    token: ReaderToken,
    temporality: ReaderTemporality,
    provider: Arc<Mutex<Option<Weak<MeterProvider>>>>,
    sender: mpsc::Sender<WorkerMessage>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl fmt::Debug for PeriodicExportingMetricReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PeriodicExportingMetricReader")
    }
}

impl PeriodicExportingMetricReader {
    /// Starts a builder around `exporter`.
    pub fn builder(exporter: impl Exporter + 'static) -> PeriodicExportingMetricReaderBuilder {
        PeriodicExportingMetricReaderBuilder {
            exporter: Box::new(exporter),
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            temporality: ReaderTemporality::Cumulative,
        }
    }

    fn new(exporter: Box<dyn Exporter>, interval: Duration, timeout: Duration, temporality: ReaderTemporality) -> Self {
        let token = ReaderToken::new();
        let provider: Arc<Mutex<Option<Weak<MeterProvider>>>> = Arc::new(Mutex::new(None));
        let (sender, receiver) = mpsc::channel();

        let worker_provider = provider.clone();
        let worker = thread::Builder::new()
            .name("metric-stream-core-periodic-reader".into())
            .spawn(move || run_worker(token, temporality, worker_provider, exporter, interval, timeout, receiver))
            .expect("failed to spawn periodic metric reader thread");

        PeriodicExportingMetricReader {
            token,
            temporality,
            provider,
            sender,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Requests an out-of-band collection-and-export on the worker thread
    /// without waiting for the next interval tick, and blocks until it
    /// completes (§4.8).
    pub fn force_flush(&self) -> MetricResult<()> {
        let (ack, reply) = mpsc::channel();
        self.sender
            .send(WorkerMessage::ForceFlush(ack))
            .map_err(|_| MetricError::Other("periodic reader worker thread is no longer running".into()))?;
        reply
            .recv()
            .map_err(|_| MetricError::Other("periodic reader worker thread dropped the flush ack".into()))?
    }
}

fn run_worker(
    token: ReaderToken,
    temporality: ReaderTemporality,
    provider: Arc<Mutex<Option<Weak<MeterProvider>>>>,
    exporter: Box<dyn Exporter>,
    interval: Duration,
    _timeout: Duration,
    receiver: mpsc::Receiver<WorkerMessage>,
) {
    loop {
        match receiver.recv_timeout(interval) {
            Ok(WorkerMessage::ForceFlush(ack)) => {
                let result = export_once(token, temporality, &provider, exporter.as_ref());
                let _ = ack.send(result);
            }
            Ok(WorkerMessage::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = export_once(token, temporality, &provider, exporter.as_ref());
                let _ = exporter.shutdown();
                if let Ok(slot) = provider.lock() {
                    if let Some(provider) = slot.as_ref().and_then(Weak::upgrade) {
                        for meter in provider.meters_snapshot() {
                            meter.forget_token(token.0);
                        }
                    }
                }
                return;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Err(err) = export_once(token, temporality, &provider, exporter.as_ref()) {
                    otel_debug!(
                        name: "PeriodicExportingMetricReader.ExportFailed",
                        message = "periodic export cycle failed",
                        reason = err.to_string().as_str(),
                    );
                }
            }
        }
    }
}

fn export_once(
    token: ReaderToken,
    temporality: ReaderTemporality,
    provider: &Mutex<Option<Weak<MeterProvider>>>,
    exporter: &dyn Exporter,
) -> MetricResult<()> {
    let slot = provider.lock()?;
    let provider = slot.as_ref().cloned().unwrap_or_default();
    let batch = collect_from_provider(&provider, token, temporality, true)?;
    if batch.is_empty() {
        return Ok(());
    }
    exporter.export(batch)
}

impl MetricReader for PeriodicExportingMetricReader {
    fn register_provider(&self, provider: Weak<MeterProvider>) {
        let mut slot = self.provider.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(provider);
    }

    fn collect(&self) -> MetricResult<Vec<ScopeMetrics>> {
        let slot = self.provider.lock()?;
        let provider = slot.as_ref().cloned().unwrap_or_default();
        collect_from_provider(&provider, self.token, self.temporality, true)
    }

    fn shutdown(&self) -> MetricResult<()> {
        let _ = self.sender.send(WorkerMessage::Shutdown);
        if let Some(handle) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for PeriodicExportingMetricReader {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerMessage::Shutdown);
        if let Some(handle) = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

/// Configuration for a [`PeriodicExportingMetricReader`].
pub struct PeriodicExportingMetricReaderBuilder {
    exporter: Box<dyn Exporter>,
    interval: Duration,
    timeout: Duration,
    temporality: ReaderTemporality,
}

impl PeriodicExportingMetricReaderBuilder {
    /// Sets the interval between export attempts. Zero is ignored, keeping
    /// the default.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    /// Sets the timeout for a single export attempt. Zero is ignored,
    /// keeping the default. The core does not itself enforce this timeout
    /// (it has no async runtime of its own); it is passed through for the
    /// exporter to honor.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    /// Sets the temporality this reader requests from every stream.
    pub fn with_temporality(mut self, temporality: ReaderTemporality) -> Self {
        self.temporality = temporality;
        self
    }

    /// Builds the reader and starts its background thread.
    pub fn build(self) -> PeriodicExportingMetricReader {
        PeriodicExportingMetricReader::new(self.exporter, self.interval, self.timeout, self.temporality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::common::InstrumentationScope;
    use crate::instrument::{InstrumentDescriptor, Writable};
    use std::sync::atomic::AtomicUsize;

    fn provider() -> Arc<MeterProvider> {
        Arc::new(
            MeterProvider::builder()
                .with_clock(Arc::new(FakeClock::new(0, 1)))
                .build(),
        )
    }

    #[test]
    fn manual_reader_collects_recorded_values() {
        let provider = provider();
        let reader = Arc::new(ManualMetricReader::new());
        reader.register_provider(Arc::downgrade(&provider));

        let meter = provider.meter(InstrumentationScope::builder("test").build());
        let counter = meter
            .create_i64_instrument(InstrumentDescriptor::new(
                crate::instrument::InstrumentKind::Counter,
                "reqs",
            ))
            .unwrap();
        counter.record(3, &[]);

        let scopes = reader.collect().unwrap();
        assert_eq!(scopes.len(), 1);
        assert_eq!(scopes[0].metrics.len(), 1);
        assert!(!scopes[0].metrics[0].is_empty());
    }

    #[test]
    fn collect_after_shutdown_errors() {
        let provider = provider();
        let reader = ManualMetricReader::new();
        reader.register_provider(Arc::downgrade(&provider));
        reader.shutdown().unwrap();
        assert!(reader.collect().is_err());
    }

    #[derive(Debug, Default)]
    struct CountingExporter {
        exports: Arc<AtomicUsize>,
    }

    impl Exporter for CountingExporter {
        fn export(&self, _batch: Vec<ScopeMetrics>) -> MetricResult<()> {
            self.exports.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn force_flush(&self) -> MetricResult<()> {
            Ok(())
        }
        fn shutdown(&self) -> MetricResult<()> {
            Ok(())
        }
    }

    #[test]
    fn periodic_reader_exports_on_shutdown_drain() {
        let provider = provider();
        let meter = provider.meter(InstrumentationScope::builder("test").build());
        let counter = meter
            .create_i64_instrument(InstrumentDescriptor::new(
                crate::instrument::InstrumentKind::Counter,
                "reqs",
            ))
            .unwrap();
        counter.record(1, &[]);

        let exports = Arc::new(AtomicUsize::new(0));
        let exporter = CountingExporter { exports: exports.clone() };
        let reader = PeriodicExportingMetricReader::builder(exporter)
            .with_interval(Duration::from_secs(3600))
            .build();
        reader.register_provider(Arc::downgrade(&provider));
        reader.shutdown().unwrap();
        assert_eq!(exports.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn force_flush_collects_without_waiting_for_the_interval() {
        let provider = provider();
        let meter = provider.meter(InstrumentationScope::builder("test").build());
        let counter = meter
            .create_i64_instrument(InstrumentDescriptor::new(
                crate::instrument::InstrumentKind::Counter,
                "reqs",
            ))
            .unwrap();
        counter.record(1, &[]);

        let exports = Arc::new(AtomicUsize::new(0));
        let exporter = CountingExporter { exports: exports.clone() };
        let reader = PeriodicExportingMetricReader::builder(exporter)
            .with_interval(Duration::from_secs(3600))
            .build();
        reader.register_provider(Arc::downgrade(&provider));

        reader.force_flush().unwrap();
        assert_eq!(exports.load(Ordering::SeqCst), 1);

        // Every meter keeps reporting its instruments once created, even
        // with nothing new recorded, so shutdown's own drain still exports.
        reader.shutdown().unwrap();
        assert_eq!(exports.load(Ordering::SeqCst), 2);
    }
}
