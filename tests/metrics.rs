//! End-to-end coverage across meter -> reader -> serializer, exercising
//! scenarios that only show up once several modules compose.

use std::sync::{Arc, Mutex};

use metric_stream_core::instrument::{InstrumentDescriptor, InstrumentKind, Writable};
use metric_stream_core::{
    InstrumentationScope, ManualMetricReader, MetricReader, MeterProvider, ReaderTemporality,
};

fn counter_descriptor(name: &'static str) -> InstrumentDescriptor {
    InstrumentDescriptor::new(InstrumentKind::Counter, name)
}

#[test]
fn two_readers_different_cadences_see_independent_views() {
    let provider = Arc::new(MeterProvider::builder().build());
    let meter = provider.meter(InstrumentationScope::builder("billing").build());
    let counter = meter.create_i64_instrument(counter_descriptor("requests")).unwrap();

    let delta_reader = Arc::new(
        ManualMetricReader::builder()
            .with_temporality(ReaderTemporality::Delta)
            .build(),
    );
    delta_reader.register_provider(Arc::downgrade(&provider));

    let cumulative_reader = Arc::new(
        ManualMetricReader::builder()
            .with_temporality(ReaderTemporality::Cumulative)
            .build(),
    );
    cumulative_reader.register_provider(Arc::downgrade(&provider));

    counter.record(5, &[]);

    let a_first = delta_reader.collect().unwrap();
    let a_value = sum_value(&a_first);
    assert_eq!(a_value, 5.0);

    counter.record(3, &[]);

    let b_first = cumulative_reader.collect().unwrap();
    assert_eq!(sum_value(&b_first), 8.0);

    let a_second = delta_reader.collect().unwrap();
    assert_eq!(sum_value(&a_second), 3.0);

    let b_second = cumulative_reader.collect().unwrap();
    assert_eq!(sum_value(&b_second), 8.0);
}

#[test]
fn late_registered_reader_misses_earlier_measurements() {
    let provider = Arc::new(MeterProvider::builder().build());
    let meter = provider.meter(InstrumentationScope::builder("billing").build());
    let counter = meter.create_i64_instrument(counter_descriptor("requests")).unwrap();

    counter.record(10, &[]);

    let reader = Arc::new(ManualMetricReader::new());
    reader.register_provider(Arc::downgrade(&provider));

    let first = reader.collect().unwrap();
    assert_eq!(sum_value(&first), 0.0);

    counter.record(4, &[]);
    let second = reader.collect().unwrap();
    assert_eq!(sum_value(&second), 4.0);
}

#[test]
fn manual_reader_forgets_its_token_on_shutdown() {
    let provider = Arc::new(MeterProvider::builder().build());
    let meter = provider.meter(InstrumentationScope::builder("billing").build());
    let counter = meter.create_i64_instrument(counter_descriptor("requests")).unwrap();
    counter.record(1, &[]);

    let reader = ManualMetricReader::new();
    reader.register_provider(Arc::downgrade(&provider));
    reader.collect().unwrap();
    reader.shutdown().unwrap();

    assert!(reader.collect().is_err());
}

#[test]
fn periodic_reader_serializes_a_drained_batch_with_integer_enum() {
    use metric_stream_core::serialize::{ContentType, Serializer};
    use std::time::Duration;

    let provider = Arc::new(MeterProvider::builder().build());
    let meter = provider.meter(InstrumentationScope::builder("billing").build());
    let counter = meter.create_i64_instrument(counter_descriptor("requests")).unwrap();
    counter.record(7, &[]);

    let exports = Arc::new(Mutex::new(Vec::new()));
    let exports_for_export = exports.clone();

    #[derive(Debug)]
    struct Forwarding(Arc<Mutex<Vec<Vec<metric_stream_core::data::ScopeMetrics>>>>);
    impl metric_stream_core::exporter::Exporter for Forwarding {
        fn export(&self, batch: Vec<metric_stream_core::data::ScopeMetrics>) -> metric_stream_core::MetricResult<()> {
            self.0.lock().unwrap().push(batch);
            Ok(())
        }
        fn force_flush(&self) -> metric_stream_core::MetricResult<()> {
            Ok(())
        }
        fn shutdown(&self) -> metric_stream_core::MetricResult<()> {
            Ok(())
        }
    }

    let reader = metric_stream_core::PeriodicExportingMetricReader::builder(Forwarding(exports_for_export))
        .with_interval(Duration::from_secs(3600))
        .with_temporality(ReaderTemporality::Cumulative)
        .build();
    reader.register_provider(Arc::downgrade(&provider));
    reader.shutdown().unwrap();

    let batches = exports.lock().unwrap();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.len(), 1);

    let serializer = Serializer::new(ContentType::Json);
    let bytes = serializer.serialize(&batch[0..]).unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("\"aggregationTemporality\":2"), "got: {text}");
}

fn sum_value(scopes: &[metric_stream_core::data::ScopeMetrics]) -> f64 {
    scopes
        .iter()
        .flat_map(|s| s.metrics.iter())
        .map(|metric| match &metric.summary {
            metric_stream_core::data::Summary::Sum { points, .. } => {
                points.iter().map(|p| p.value).sum::<f64>()
            }
            _ => 0.0,
        })
        .sum()
}
