//! The boundary between the core and whatever actually ships bytes
//! somewhere (§6 "External interfaces"): an [`Exporter`] receives collected
//! batches from a [`crate::reader::MetricReader`], and a [`Transport`]
//! carries already-serialized bytes to a receiver. Both are plain traits
//! the core consumes -- it never implements a concrete network transport
//! itself, mirroring how the teacher keeps `PushMetricExporter` separate
//! from any one wire protocol.

use std::fmt;

use crate::data::ScopeMetrics;
use crate::error::MetricResult;

/// Delivers collected metric batches to an external receiver.
///
/// All retry logic belongs here; the core never retries a failed export
/// (§7). Implementations are typically a serializer paired with a
/// [`Transport`].
pub trait Exporter: fmt::Debug + Send + Sync + 'static {
    /// Serializes and transmits one collection's worth of metrics.
    fn export(&self, batch: Vec<ScopeMetrics>) -> MetricResult<()>;

    /// Flushes any metrics buffered by this exporter.
    fn force_flush(&self) -> MetricResult<()>;

    /// Releases any held resources. Calls to `export` after `shutdown`
    /// should fail rather than silently drop data.
    fn shutdown(&self) -> MetricResult<()>;
}

/// The contract a wire transport presents to a [`crate::serialize::Serializer`]:
/// a declared content type, and a way to send already-encoded bytes.
/// [`crate::serialize::Serializer::for_transport`] fails with
/// "Not supported content type" for any `content_type()` it does not
/// recognize.
pub trait Transport: fmt::Debug + Send + Sync + 'static {
    /// The MIME content type this transport accepts, e.g.
    /// `"application/x-protobuf"` or `"application/json"`.
    fn content_type(&self) -> &str;

    /// Sends already-encoded bytes to the receiver.
    fn send(&self, bytes: Vec<u8>) -> MetricResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct RecordingTransport {
        sent: Arc<AtomicUsize>,
        content_type: &'static str,
    }

    impl Transport for RecordingTransport {
        fn content_type(&self) -> &str {
            self.content_type
        }
        fn send(&self, _bytes: Vec<u8>) -> MetricResult<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn transport_reports_its_content_type() {
        let transport = RecordingTransport {
            sent: Arc::new(AtomicUsize::new(0)),
            content_type: "application/x-protobuf",
        };
        assert_eq!(transport.content_type(), "application/x-protobuf");
        transport.send(vec![1, 2, 3]).unwrap();
    }
}
