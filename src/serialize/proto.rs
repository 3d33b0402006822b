//! OTLP metrics wire messages (§6 "Wire formats"). Field numbers follow the
//! published `opentelemetry/proto/metrics/v1/metrics.proto` /
//! `opentelemetry/proto/common/v1/common.proto` IDL so protobuf encoding
//! here is bit-compatible with it. Enum fields are plain `i32` on the wire,
//! per `prost`'s convention; [`AggregationTemporality`] is the sibling type
//! that gives those integers names.

/// `opentelemetry.proto.metrics.v1.AggregationTemporality`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum AggregationTemporality {
    /// Unset; producers should not emit this value.
    Unspecified = 0,
    /// Matches [`crate::data::Temporality::Delta`].
    Delta = 1,
    /// Matches [`crate::data::Temporality::Cumulative`].
    Cumulative = 2,
}

impl AggregationTemporality {
    /// The descriptor-pool name for this value, as a real protobuf
    /// reflection API would return it.
    pub fn as_str_name(self) -> &'static str {
        match self {
            AggregationTemporality::Unspecified => "AGGREGATION_TEMPORALITY_UNSPECIFIED",
            AggregationTemporality::Delta => "AGGREGATION_TEMPORALITY_DELTA",
            AggregationTemporality::Cumulative => "AGGREGATION_TEMPORALITY_CUMULATIVE",
        }
    }

    /// Looks up a value by its descriptor-pool name.
    pub fn from_str_name(name: &str) -> Option<Self> {
        match name {
            "AGGREGATION_TEMPORALITY_UNSPECIFIED" => Some(AggregationTemporality::Unspecified),
            "AGGREGATION_TEMPORALITY_DELTA" => Some(AggregationTemporality::Delta),
            "AGGREGATION_TEMPORALITY_CUMULATIVE" => Some(AggregationTemporality::Cumulative),
            _ => None,
        }
    }

    /// Converts from the wire `i32`, defaulting to `Unspecified` for any
    /// value outside the known range rather than failing decode.
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => AggregationTemporality::Delta,
            2 => AggregationTemporality::Cumulative,
            _ => AggregationTemporality::Unspecified,
        }
    }
}

impl Default for AggregationTemporality {
    fn default() -> Self {
        AggregationTemporality::Unspecified
    }
}

impl TryFrom<i32> for AggregationTemporality {
    type Error = ::prost::DecodeError;

    fn try_from(value: i32) -> ::core::result::Result<Self, ::prost::DecodeError> {
        match value {
            0 => Ok(AggregationTemporality::Unspecified),
            1 => Ok(AggregationTemporality::Delta),
            2 => Ok(AggregationTemporality::Cumulative),
            _ => Err(::prost::DecodeError::new("invalid AggregationTemporality value")),
        }
    }
}

impl From<crate::data::Temporality> for AggregationTemporality {
    fn from(t: crate::data::Temporality) -> Self {
        match t {
            crate::data::Temporality::Delta => AggregationTemporality::Delta,
            crate::data::Temporality::Cumulative => AggregationTemporality::Cumulative,
        }
    }
}

/// `opentelemetry.proto.common.v1.AnyValue`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AnyValue {
    #[prost(oneof = "any_value::Value", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub value: Option<any_value::Value>,
}

/// Nested types for [`AnyValue`].
pub mod any_value {
    /// The oneof carried by an [`super::AnyValue`].
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        /// A UTF-8 string.
        #[prost(string, tag = "1")]
        StringValue(String),
        /// A boolean.
        #[prost(bool, tag = "2")]
        BoolValue(bool),
        /// A signed 64-bit integer.
        #[prost(int64, tag = "3")]
        IntValue(i64),
        /// A double-precision float.
        #[prost(double, tag = "4")]
        DoubleValue(f64),
        /// A homogeneous-or-not array of values.
        #[prost(message, tag = "5")]
        ArrayValue(super::ArrayValue),
        /// Raw bytes.
        #[prost(bytes, tag = "7")]
        BytesValue(Vec<u8>),
    }
}

/// `opentelemetry.proto.common.v1.ArrayValue`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ArrayValue {
    /// Element values.
    #[prost(message, repeated, tag = "1")]
    pub values: Vec<AnyValue>,
}

/// `opentelemetry.proto.common.v1.KeyValue`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValue {
    /// Attribute key.
    #[prost(string, tag = "1")]
    pub key: String,
    /// Attribute value.
    #[prost(message, optional, tag = "2")]
    pub value: Option<AnyValue>,
}

/// `opentelemetry.proto.common.v1.InstrumentationScope`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstrumentationScope {
    /// Library name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Library version.
    #[prost(string, tag = "2")]
    pub version: String,
    /// Attributes describing the scope.
    #[prost(message, repeated, tag = "3")]
    pub attributes: Vec<KeyValue>,
}

/// `opentelemetry.proto.metrics.v1.Exemplar`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Exemplar {
    /// Attributes dropped from the parent data point's attribute set.
    #[prost(message, repeated, tag = "7")]
    pub filtered_attributes: Vec<KeyValue>,
    /// Nanosecond timestamp the measurement was taken at.
    #[prost(fixed64, tag = "2")]
    pub time_unix_nano: u64,
    /// The sampled value.
    #[prost(oneof = "exemplar::Value", tags = "3, 6")]
    pub value: Option<exemplar::Value>,
    /// Span ID active when the measurement was taken.
    #[prost(bytes, tag = "4")]
    pub span_id: Vec<u8>,
    /// Trace ID active when the measurement was taken.
    #[prost(bytes, tag = "5")]
    pub trace_id: Vec<u8>,
}

/// Nested types for [`Exemplar`].
pub mod exemplar {
    /// The oneof carried by an [`super::Exemplar`].
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        /// Double-precision sampled value.
        #[prost(double, tag = "3")]
        AsDouble(f64),
        /// Integer sampled value.
        #[prost(sfixed64, tag = "6")]
        AsInt(i64),
    }
}

/// `opentelemetry.proto.metrics.v1.NumberDataPoint`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NumberDataPoint {
    /// Attributes identifying this series.
    #[prost(message, repeated, tag = "7")]
    pub attributes: Vec<KeyValue>,
    /// Start of the collection window.
    #[prost(fixed64, tag = "2")]
    pub start_time_unix_nano: u64,
    /// End of the collection window.
    #[prost(fixed64, tag = "3")]
    pub time_unix_nano: u64,
    /// The data point's value.
    #[prost(oneof = "number_data_point::Value", tags = "4, 6")]
    pub value: Option<number_data_point::Value>,
    /// Exemplars sampled during the window.
    #[prost(message, repeated, tag = "5")]
    pub exemplars: Vec<Exemplar>,
}

/// Nested types for [`NumberDataPoint`].
pub mod number_data_point {
    /// The oneof carried by a [`super::NumberDataPoint`].
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        /// Double-precision value.
        #[prost(double, tag = "4")]
        AsDouble(f64),
        /// Integer value.
        #[prost(sfixed64, tag = "6")]
        AsInt(i64),
    }
}

/// `opentelemetry.proto.metrics.v1.HistogramDataPoint`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistogramDataPoint {
    /// Attributes identifying this series.
    #[prost(message, repeated, tag = "9")]
    pub attributes: Vec<KeyValue>,
    /// Start of the collection window.
    #[prost(fixed64, tag = "2")]
    pub start_time_unix_nano: u64,
    /// End of the collection window.
    #[prost(fixed64, tag = "3")]
    pub time_unix_nano: u64,
    /// Total number of observations folded in.
    #[prost(fixed64, tag = "4")]
    pub count: u64,
    /// Sum of all observed values.
    #[prost(double, optional, tag = "5")]
    pub sum: Option<f64>,
    /// Counts per bucket, one more entry than `explicit_bounds`.
    #[prost(fixed64, repeated, tag = "6")]
    pub bucket_counts: Vec<u64>,
    /// Increasing bucket boundaries.
    #[prost(double, repeated, tag = "7")]
    pub explicit_bounds: Vec<f64>,
    /// Exemplars sampled during the window.
    #[prost(message, repeated, tag = "8")]
    pub exemplars: Vec<Exemplar>,
    /// Smallest observed value.
    #[prost(double, optional, tag = "11")]
    pub min: Option<f64>,
    /// Largest observed value.
    #[prost(double, optional, tag = "12")]
    pub max: Option<f64>,
}

/// `opentelemetry.proto.metrics.v1.Gauge`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Gauge {
    /// Per-series data points.
    #[prost(message, repeated, tag = "1")]
    pub data_points: Vec<NumberDataPoint>,
}

/// `opentelemetry.proto.metrics.v1.Sum`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Sum {
    /// Per-series data points.
    #[prost(message, repeated, tag = "1")]
    pub data_points: Vec<NumberDataPoint>,
    /// Whether readers should interpret `data_points` as deltas or
    /// cumulative totals. Wire-encoded as `i32`; see
    /// [`AggregationTemporality`] for the symbolic names.
    #[prost(enumeration = "AggregationTemporality", tag = "2")]
    pub aggregation_temporality: i32,
    /// Whether the sum can only increase.
    #[prost(bool, tag = "3")]
    pub is_monotonic: bool,
}

/// `opentelemetry.proto.metrics.v1.Histogram`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Histogram {
    /// Per-series data points.
    #[prost(message, repeated, tag = "1")]
    pub data_points: Vec<HistogramDataPoint>,
    /// See [`Sum::aggregation_temporality`].
    #[prost(enumeration = "AggregationTemporality", tag = "2")]
    pub aggregation_temporality: i32,
}

/// `opentelemetry.proto.metrics.v1.Metric`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Metric {
    /// Instrument name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Instrument description.
    #[prost(string, tag = "2")]
    pub description: String,
    /// Instrument unit.
    #[prost(string, tag = "3")]
    pub unit: String,
    /// The aggregated data, exactly one of `Gauge`/`Sum`/`Histogram`.
    #[prost(oneof = "metric::Data", tags = "5, 7, 9")]
    pub data: Option<metric::Data>,
}

/// Nested types for [`Metric`].
pub mod metric {
    /// The oneof carried by a [`super::Metric`].
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Data {
        /// Last-value aggregation.
        #[prost(message, tag = "5")]
        Gauge(super::Gauge),
        /// Sum aggregation.
        #[prost(message, tag = "7")]
        Sum(super::Sum),
        /// Explicit-bucket histogram aggregation.
        #[prost(message, tag = "9")]
        Histogram(super::Histogram),
    }
}

/// `opentelemetry.proto.metrics.v1.ScopeMetrics`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ScopeMetrics {
    /// The instrumentation scope these metrics were recorded under.
    #[prost(message, optional, tag = "1")]
    pub scope: Option<InstrumentationScope>,
    /// Metrics collected from that scope.
    #[prost(message, repeated, tag = "2")]
    pub metrics: Vec<Metric>,
}

/// `opentelemetry.proto.metrics.v1.ResourceMetrics`. The core has no
/// resource-attribution layer of its own (§3), so callers always see a
/// single instance with an empty resource wrapping every scope collected in
/// one batch.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResourceMetrics {
    /// Scoped metric groups.
    #[prost(message, repeated, tag = "2")]
    pub scope_metrics: Vec<ScopeMetrics>,
}

/// `opentelemetry.collector.metrics.v1.ExportMetricsServiceRequest`, the
/// top-level message a [`crate::exporter::Exporter`] hands to a
/// [`crate::serialize::Serializer`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExportMetricsServiceRequest {
    /// Resource-grouped metrics; always exactly one entry (see
    /// [`ResourceMetrics`]).
    #[prost(message, repeated, tag = "1")]
    pub resource_metrics: Vec<ResourceMetrics>,
}

/// Builds the wire request for one collection's worth of scoped metrics.
pub fn to_export_request(batch: &[crate::data::ScopeMetrics]) -> ExportMetricsServiceRequest {
    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            scope_metrics: batch.iter().map(to_scope_metrics).collect(),
        }],
    }
}

fn to_scope_metrics(scoped: &crate::data::ScopeMetrics) -> ScopeMetrics {
    ScopeMetrics {
        scope: Some(InstrumentationScope {
            name: scoped.scope.name.to_string(),
            version: scoped.scope.version.as_deref().unwrap_or_default().to_string(),
            attributes: scoped.scope.attributes.iter().map(to_key_value).collect(),
        }),
        metrics: scoped.metrics.iter().map(to_metric).collect(),
    }
}

fn to_metric(metric: &crate::data::Metric) -> Metric {
    let data = match &metric.summary {
        crate::data::Summary::Gauge { points } => metric::Data::Gauge(Gauge {
            data_points: points
                .iter()
                .map(|p| NumberDataPoint {
                    attributes: p.attributes.iter().map(to_key_value).collect(),
                    start_time_unix_nano: metric.start_time_nanos,
                    time_unix_nano: p.observed_at_nanos,
                    value: Some(number_data_point::Value::AsDouble(p.value)),
                    exemplars: p.exemplars.iter().map(to_exemplar).collect(),
                })
                .collect(),
        }),
        crate::data::Summary::Sum { points, is_monotonic } => metric::Data::Sum(Sum {
            data_points: points
                .iter()
                .map(|p| NumberDataPoint {
                    attributes: p.attributes.iter().map(to_key_value).collect(),
                    start_time_unix_nano: metric.start_time_nanos,
                    time_unix_nano: metric.time_nanos,
                    value: Some(number_data_point::Value::AsDouble(p.value)),
                    exemplars: p.exemplars.iter().map(to_exemplar).collect(),
                })
                .collect(),
            aggregation_temporality: AggregationTemporality::from(metric.temporality) as i32,
            is_monotonic: *is_monotonic,
        }),
        crate::data::Summary::Histogram { points } => metric::Data::Histogram(Histogram {
            data_points: points
                .iter()
                .map(|p| HistogramDataPoint {
                    attributes: p.attributes.iter().map(to_key_value).collect(),
                    start_time_unix_nano: metric.start_time_nanos,
                    time_unix_nano: metric.time_nanos,
                    count: p.count,
                    sum: Some(p.sum),
                    bucket_counts: p.bucket_counts.clone(),
                    explicit_bounds: p.bounds.clone(),
                    exemplars: p.exemplars.iter().map(to_exemplar).collect(),
                    min: p.min,
                    max: p.max,
                })
                .collect(),
            aggregation_temporality: AggregationTemporality::from(metric.temporality) as i32,
        }),
    };

    Metric {
        name: metric.name.to_string(),
        description: metric.description.to_string(),
        unit: metric.unit.clone(),
        data: Some(data),
    }
}

fn to_exemplar(exemplar: &crate::data::Exemplar) -> Exemplar {
    Exemplar {
        filtered_attributes: exemplar.filtered_attributes.iter().map(to_key_value).collect(),
        time_unix_nano: exemplar.timestamp_nanos,
        value: Some(exemplar::Value::AsDouble(exemplar.value)),
        span_id: exemplar.span_id.map(|b| b.to_vec()).unwrap_or_default(),
        trace_id: exemplar.trace_id.map(|b| b.to_vec()).unwrap_or_default(),
    }
}

fn to_key_value(kv: &crate::common::KeyValue) -> KeyValue {
    KeyValue {
        key: kv.key.as_str().to_string(),
        value: Some(to_any_value(&kv.value)),
    }
}

fn to_any_value(value: &crate::common::Value) -> AnyValue {
    use crate::common::Value;
    let inner = match value {
        Value::String(s) => any_value::Value::StringValue(s.as_str().to_string()),
        Value::Bool(b) => any_value::Value::BoolValue(*b),
        Value::I64(i) => any_value::Value::IntValue(*i),
        Value::F64(f) => any_value::Value::DoubleValue(*f),
        Value::Array(array) => any_value::Value::ArrayValue(ArrayValue {
            values: array_to_any_values(array),
        }),
    };
    AnyValue { value: Some(inner) }
}

fn array_to_any_values(array: &crate::common::Array) -> Vec<AnyValue> {
    use crate::common::Array;
    match array {
        Array::Bool(items) => items
            .iter()
            .map(|b| AnyValue { value: Some(any_value::Value::BoolValue(*b)) })
            .collect(),
        Array::I64(items) => items
            .iter()
            .map(|i| AnyValue { value: Some(any_value::Value::IntValue(*i)) })
            .collect(),
        Array::F64(items) => items
            .iter()
            .map(|f| AnyValue { value: Some(any_value::Value::DoubleValue(*f)) })
            .collect(),
        Array::String(items) => items
            .iter()
            .map(|s| AnyValue { value: Some(any_value::Value::StringValue(s.as_str().to_string())) })
            .collect(),
        Array::Array(items) => items
            .iter()
            .map(|nested| AnyValue {
                value: Some(any_value::Value::ArrayValue(ArrayValue {
                    values: array_to_any_values(nested),
                })),
            })
            .collect(),
    }
}
