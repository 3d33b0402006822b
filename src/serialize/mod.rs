//! Wire encoding for collected metrics (§4.7, §6): protobuf, JSON, and
//! newline-delimited JSON over a caller-supplied [`crate::exporter::Transport`].

pub mod descriptor;
pub mod proto;

use serde_json::{json, Value};

use crate::data::ScopeMetrics;
use crate::error::{MetricError, MetricResult};
use crate::exporter::Transport;
use proto::{
    any_value, exemplar, metric, number_data_point, AggregationTemporality, AnyValue, ArrayValue, Exemplar,
    ExportMetricsServiceRequest, Gauge, Histogram, HistogramDataPoint, InstrumentationScope, KeyValue, Metric,
    NumberDataPoint, ResourceMetrics, ScopeMetrics as ProtoScopeMetrics, Sum,
};

/// The content types a [`Serializer`] knows how to produce and consume
/// (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// `application/x-protobuf`.
    Protobuf,
    /// `application/json`.
    Json,
    /// `application/x-ndjson`.
    Ndjson,
}

impl ContentType {
    fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/x-protobuf" => Some(ContentType::Protobuf),
            "application/json" => Some(ContentType::Json),
            "application/x-ndjson" => Some(ContentType::Ndjson),
            _ => None,
        }
    }

    /// The canonical MIME string for this content type.
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Protobuf => "application/x-protobuf",
            ContentType::Json => "application/json",
            ContentType::Ndjson => "application/x-ndjson",
        }
    }
}

/// Encodes and decodes OTLP messages for one content type. Obtained via
/// [`Serializer::for_transport`], which is the only way to pick the
/// encoding -- there is no way to construct one for an unsupported MIME
/// type.
#[derive(Debug)]
pub struct Serializer {
    content_type: ContentType,
}

impl Serializer {
    /// Selects the serializer matching `transport`'s declared content type.
    /// Fails with [`MetricError::UnsupportedContentType`] for anything not
    /// in `{application/x-protobuf, application/json, application/x-ndjson}`.
    pub fn for_transport(transport: &dyn Transport) -> MetricResult<Self> {
        ContentType::from_mime(transport.content_type())
            .map(|content_type| Serializer { content_type })
            .ok_or_else(|| MetricError::UnsupportedContentType(transport.content_type().to_string()))
    }

    /// Builds a serializer directly from a content type, bypassing a
    /// [`Transport`] -- useful for tests and for callers that already know
    /// which encoding they want.
    pub fn new(content_type: ContentType) -> Self {
        Serializer { content_type }
    }

    /// The content type this serializer was built for.
    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Encodes a 16-byte trace ID the way this content type represents it:
    /// raw bytes for protobuf, lowercase hex for JSON/NDJSON.
    pub fn serialize_trace_id(&self, id: &[u8; 16]) -> Vec<u8> {
        match self.content_type {
            ContentType::Protobuf => id.to_vec(),
            ContentType::Json | ContentType::Ndjson => const_hex::encode(id).into_bytes(),
        }
    }

    /// Encodes an 8-byte span ID the way this content type represents it.
    pub fn serialize_span_id(&self, id: &[u8; 8]) -> Vec<u8> {
        match self.content_type {
            ContentType::Protobuf => id.to_vec(),
            ContentType::Json | ContentType::Ndjson => const_hex::encode(id).into_bytes(),
        }
    }

    /// Serializes one collection's worth of scoped metrics.
    pub fn serialize(&self, batch: &[ScopeMetrics]) -> MetricResult<Vec<u8>> {
        let request = proto::to_export_request(batch);
        match self.content_type {
            ContentType::Protobuf => {
                use prost::Message;
                Ok(request.encode_to_vec())
            }
            ContentType::Json => self.serialize_json(&request),
            ContentType::Ndjson => {
                let mut bytes = self.serialize_json(&request)?;
                bytes.push(b'\n');
                Ok(bytes)
            }
        }
    }

    fn serialize_json(&self, request: &ExportMetricsServiceRequest) -> MetricResult<Vec<u8>> {
        let naive = export_request_to_naive_json(request);
        let corrected = descriptor::coerce_enums("ExportMetricsServiceRequest", naive);
        serde_json::to_vec(&corrected).map_err(|e| MetricError::Serialization(e.to_string()))
    }

    /// Decodes a payload previously produced by [`Serializer::serialize`]
    /// (or any OTLP-conformant peer) back into the wire message.
    pub fn hydrate(&self, payload: &[u8]) -> MetricResult<ExportMetricsServiceRequest> {
        match self.content_type {
            ContentType::Protobuf => {
                use prost::Message;
                ExportMetricsServiceRequest::decode(payload).map_err(|e| MetricError::Serialization(e.to_string()))
            }
            ContentType::Json | ContentType::Ndjson => {
                let text = std::str::from_utf8(payload).map_err(|e| MetricError::Serialization(e.to_string()))?;
                let line = text.lines().next().unwrap_or(text);
                let value: Value =
                    serde_json::from_str(line).map_err(|e| MetricError::Serialization(e.to_string()))?;
                export_request_from_json(&value)
            }
        }
    }
}

// --- naive (name-valued enum) JSON emission, mirroring what a reflection-based
// protobuf-to-JSON mapper emits before OTLP's integer-enum rule is applied ---

fn export_request_to_naive_json(request: &ExportMetricsServiceRequest) -> Value {
    json!({
        "resourceMetrics": request.resource_metrics.iter().map(resource_metrics_to_naive_json).collect::<Vec<_>>(),
    })
}

fn resource_metrics_to_naive_json(rm: &ResourceMetrics) -> Value {
    json!({
        "scopeMetrics": rm.scope_metrics.iter().map(scope_metrics_to_naive_json).collect::<Vec<_>>(),
    })
}

fn scope_metrics_to_naive_json(sm: &ProtoScopeMetrics) -> Value {
    json!({
        "scope": sm.scope.as_ref().map(instrumentation_scope_to_json),
        "metrics": sm.metrics.iter().map(metric_to_naive_json).collect::<Vec<_>>(),
    })
}

fn instrumentation_scope_to_json(scope: &InstrumentationScope) -> Value {
    json!({
        "name": scope.name,
        "version": scope.version,
        "attributes": scope.attributes.iter().map(key_value_to_json).collect::<Vec<_>>(),
    })
}

fn key_value_to_json(kv: &KeyValue) -> Value {
    json!({
        "key": kv.key,
        "value": kv.value.as_ref().map(any_value_to_json),
    })
}

fn any_value_to_json(value: &AnyValue) -> Value {
    match &value.value {
        Some(any_value::Value::StringValue(s)) => json!({ "stringValue": s }),
        Some(any_value::Value::BoolValue(b)) => json!({ "boolValue": b }),
        Some(any_value::Value::IntValue(i)) => json!({ "intValue": i.to_string() }),
        Some(any_value::Value::DoubleValue(d)) => json!({ "doubleValue": d }),
        Some(any_value::Value::BytesValue(b)) => json!({ "bytesValue": const_hex::encode(b) }),
        Some(any_value::Value::ArrayValue(a)) => json!({
            "arrayValue": { "values": a.values.iter().map(any_value_to_json).collect::<Vec<_>>() }
        }),
        None => Value::Null,
    }
}

fn exemplar_to_naive_json(exemplar: &Exemplar) -> Value {
    let mut obj = json!({
        "filteredAttributes": exemplar.filtered_attributes.iter().map(key_value_to_json).collect::<Vec<_>>(),
        "timeUnixNano": exemplar.time_unix_nano.to_string(),
    });
    if !exemplar.span_id.is_empty() {
        obj["spanId"] = json!(const_hex::encode(&exemplar.span_id));
    }
    if !exemplar.trace_id.is_empty() {
        obj["traceId"] = json!(const_hex::encode(&exemplar.trace_id));
    }
    match exemplar.value {
        Some(exemplar::Value::AsDouble(v)) => obj["asDouble"] = json!(v),
        Some(exemplar::Value::AsInt(v)) => obj["asInt"] = json!(v.to_string()),
        None => {}
    }
    obj
}

fn number_data_point_to_naive_json(point: &NumberDataPoint) -> Value {
    let mut obj = json!({
        "attributes": point.attributes.iter().map(key_value_to_json).collect::<Vec<_>>(),
        "startTimeUnixNano": point.start_time_unix_nano.to_string(),
        "timeUnixNano": point.time_unix_nano.to_string(),
        "exemplars": point.exemplars.iter().map(exemplar_to_naive_json).collect::<Vec<_>>(),
    });
    match point.value {
        Some(number_data_point::Value::AsDouble(v)) => obj["asDouble"] = json!(v),
        Some(number_data_point::Value::AsInt(v)) => obj["asInt"] = json!(v.to_string()),
        None => {}
    }
    obj
}

fn histogram_data_point_to_naive_json(point: &HistogramDataPoint) -> Value {
    json!({
        "attributes": point.attributes.iter().map(key_value_to_json).collect::<Vec<_>>(),
        "startTimeUnixNano": point.start_time_unix_nano.to_string(),
        "timeUnixNano": point.time_unix_nano.to_string(),
        "count": point.count.to_string(),
        "sum": point.sum,
        "bucketCounts": point.bucket_counts.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
        "explicitBounds": point.explicit_bounds,
        "exemplars": point.exemplars.iter().map(exemplar_to_naive_json).collect::<Vec<_>>(),
        "min": point.min,
        "max": point.max,
    })
}

fn gauge_to_naive_json(gauge: &Gauge) -> Value {
    json!({ "dataPoints": gauge.data_points.iter().map(number_data_point_to_naive_json).collect::<Vec<_>>() })
}

fn sum_to_naive_json(sum: &Sum) -> Value {
    json!({
        "dataPoints": sum.data_points.iter().map(number_data_point_to_naive_json).collect::<Vec<_>>(),
        "aggregationTemporality": AggregationTemporality::from_i32(sum.aggregation_temporality).as_str_name(),
        "isMonotonic": sum.is_monotonic,
    })
}

fn histogram_to_naive_json(histogram: &Histogram) -> Value {
    json!({
        "dataPoints": histogram.data_points.iter().map(histogram_data_point_to_naive_json).collect::<Vec<_>>(),
        "aggregationTemporality": AggregationTemporality::from_i32(histogram.aggregation_temporality).as_str_name(),
    })
}

fn metric_to_naive_json(metric: &Metric) -> Value {
    let mut obj = json!({
        "name": metric.name,
        "description": metric.description,
        "unit": metric.unit,
    });
    match &metric.data {
        Some(metric::Data::Gauge(g)) => obj["gauge"] = gauge_to_naive_json(g),
        Some(metric::Data::Sum(s)) => obj["sum"] = sum_to_naive_json(s),
        Some(metric::Data::Histogram(h)) => obj["histogram"] = histogram_to_naive_json(h),
        None => {}
    }
    obj
}

// --- hydration: the reverse direction, parsing an already-integer-enum,
// camelCase JSON tree (what a conformant OTLP producer sends) back into the
// wire message ---

fn export_request_from_json(value: &Value) -> MetricResult<ExportMetricsServiceRequest> {
    let resource_metrics = array_field(value, "resourceMetrics")
        .iter()
        .map(resource_metrics_from_json)
        .collect::<MetricResult<_>>()?;
    Ok(ExportMetricsServiceRequest { resource_metrics })
}

fn resource_metrics_from_json(value: &Value) -> MetricResult<ResourceMetrics> {
    let scope_metrics = array_field(value, "scopeMetrics")
        .iter()
        .map(scope_metrics_from_json)
        .collect::<MetricResult<_>>()?;
    Ok(ResourceMetrics { scope_metrics })
}

fn scope_metrics_from_json(value: &Value) -> MetricResult<ProtoScopeMetrics> {
    let scope = match value.get("scope") {
        Some(s) if !s.is_null() => Some(instrumentation_scope_from_json(s)?),
        _ => None,
    };
    let metrics = array_field(value, "metrics")
        .iter()
        .map(metric_from_json)
        .collect::<MetricResult<_>>()?;
    Ok(ProtoScopeMetrics { scope, metrics })
}

fn instrumentation_scope_from_json(value: &Value) -> MetricResult<InstrumentationScope> {
    Ok(InstrumentationScope {
        name: string_field(value, "name"),
        version: string_field(value, "version"),
        attributes: array_field(value, "attributes")
            .iter()
            .map(key_value_from_json)
            .collect::<MetricResult<_>>()?,
    })
}

fn key_value_from_json(value: &Value) -> MetricResult<KeyValue> {
    Ok(KeyValue {
        key: string_field(value, "key"),
        value: match value.get("value") {
            Some(v) if !v.is_null() => Some(any_value_from_json(v)?),
            _ => None,
        },
    })
}

fn any_value_from_json(value: &Value) -> MetricResult<AnyValue> {
    let inner = if let Some(s) = value.get("stringValue") {
        any_value::Value::StringValue(s.as_str().unwrap_or_default().to_string())
    } else if let Some(b) = value.get("boolValue") {
        any_value::Value::BoolValue(b.as_bool().unwrap_or_default())
    } else if let Some(i) = value.get("intValue") {
        any_value::Value::IntValue(parse_i64(i)?)
    } else if let Some(d) = value.get("doubleValue") {
        any_value::Value::DoubleValue(d.as_f64().unwrap_or_default())
    } else if let Some(b) = value.get("bytesValue") {
        any_value::Value::BytesValue(decode_hex(b.as_str().unwrap_or_default())?)
    } else if let Some(arr) = value.get("arrayValue") {
        let values = array_field(arr, "values")
            .iter()
            .map(any_value_from_json)
            .collect::<MetricResult<_>>()?;
        any_value::Value::ArrayValue(ArrayValue { values })
    } else {
        return Ok(AnyValue { value: None });
    };
    Ok(AnyValue { value: Some(inner) })
}

fn exemplar_from_json(value: &Value) -> MetricResult<Exemplar> {
    let value_variant = if let Some(v) = value.get("asDouble") {
        Some(exemplar::Value::AsDouble(v.as_f64().unwrap_or_default()))
    } else if let Some(v) = value.get("asInt") {
        Some(exemplar::Value::AsInt(parse_i64(v)?))
    } else {
        None
    };
    Ok(Exemplar {
        filtered_attributes: array_field(value, "filteredAttributes")
            .iter()
            .map(key_value_from_json)
            .collect::<MetricResult<_>>()?,
        time_unix_nano: parse_u64(value.get("timeUnixNano").unwrap_or(&Value::Null))?,
        value: value_variant,
        span_id: hex_field(value, "spanId")?,
        trace_id: hex_field(value, "traceId")?,
    })
}

fn number_data_point_from_json(value: &Value) -> MetricResult<NumberDataPoint> {
    let value_variant = if let Some(v) = value.get("asDouble") {
        Some(number_data_point::Value::AsDouble(v.as_f64().unwrap_or_default()))
    } else if let Some(v) = value.get("asInt") {
        Some(number_data_point::Value::AsInt(parse_i64(v)?))
    } else {
        None
    };
    Ok(NumberDataPoint {
        attributes: array_field(value, "attributes")
            .iter()
            .map(key_value_from_json)
            .collect::<MetricResult<_>>()?,
        start_time_unix_nano: parse_u64(value.get("startTimeUnixNano").unwrap_or(&Value::Null))?,
        time_unix_nano: parse_u64(value.get("timeUnixNano").unwrap_or(&Value::Null))?,
        value: value_variant,
        exemplars: array_field(value, "exemplars")
            .iter()
            .map(exemplar_from_json)
            .collect::<MetricResult<_>>()?,
    })
}

fn histogram_data_point_from_json(value: &Value) -> MetricResult<HistogramDataPoint> {
    Ok(HistogramDataPoint {
        attributes: array_field(value, "attributes")
            .iter()
            .map(key_value_from_json)
            .collect::<MetricResult<_>>()?,
        start_time_unix_nano: parse_u64(value.get("startTimeUnixNano").unwrap_or(&Value::Null))?,
        time_unix_nano: parse_u64(value.get("timeUnixNano").unwrap_or(&Value::Null))?,
        count: parse_u64(value.get("count").unwrap_or(&Value::Null))?,
        sum: value.get("sum").and_then(Value::as_f64),
        bucket_counts: array_field(value, "bucketCounts")
            .iter()
            .map(parse_u64)
            .collect::<MetricResult<_>>()?,
        explicit_bounds: array_field(value, "explicitBounds")
            .iter()
            .map(|v| v.as_f64().unwrap_or_default())
            .collect(),
        exemplars: array_field(value, "exemplars")
            .iter()
            .map(exemplar_from_json)
            .collect::<MetricResult<_>>()?,
        min: value.get("min").and_then(Value::as_f64),
        max: value.get("max").and_then(Value::as_f64),
    })
}

fn metric_from_json(value: &Value) -> MetricResult<Metric> {
    let data = if let Some(g) = value.get("gauge") {
        Some(metric::Data::Gauge(Gauge {
            data_points: array_field(g, "dataPoints")
                .iter()
                .map(number_data_point_from_json)
                .collect::<MetricResult<_>>()?,
        }))
    } else if let Some(s) = value.get("sum") {
        Some(metric::Data::Sum(Sum {
            data_points: array_field(s, "dataPoints")
                .iter()
                .map(number_data_point_from_json)
                .collect::<MetricResult<_>>()?,
            aggregation_temporality: int_field(s, "aggregationTemporality"),
            is_monotonic: s.get("isMonotonic").and_then(Value::as_bool).unwrap_or_default(),
        }))
    } else if let Some(h) = value.get("histogram") {
        Some(metric::Data::Histogram(Histogram {
            data_points: array_field(h, "dataPoints")
                .iter()
                .map(histogram_data_point_from_json)
                .collect::<MetricResult<_>>()?,
            aggregation_temporality: int_field(h, "aggregationTemporality"),
        }))
    } else {
        None
    };

    Ok(Metric {
        name: string_field(value, "name"),
        description: string_field(value, "description"),
        unit: string_field(value, "unit"),
        data,
    })
}

fn array_field<'a>(value: &'a Value, field: &str) -> &'a [Value] {
    value.get(field).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

fn string_field(value: &Value, field: &str) -> String {
    value.get(field).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn int_field(value: &Value, field: &str) -> i32 {
    value.get(field).and_then(Value::as_i64).unwrap_or_default() as i32
}

fn hex_field(value: &Value, field: &str) -> MetricResult<Vec<u8>> {
    match value.get(field).and_then(Value::as_str) {
        Some(hex) if !hex.is_empty() => decode_hex(hex),
        _ => Ok(Vec::new()),
    }
}

fn decode_hex(hex: &str) -> MetricResult<Vec<u8>> {
    const_hex::decode(hex).map_err(|e| MetricError::Serialization(format!("invalid hex bytes {hex:?}: {e}")))
}

fn parse_i64(value: &Value) -> MetricResult<i64> {
    if let Some(s) = value.as_str() {
        s.parse().map_err(|_| MetricError::Serialization(format!("invalid int64 string {s:?}")))
    } else {
        value
            .as_i64()
            .ok_or_else(|| MetricError::Serialization(format!("expected int64, got {value}")))
    }
}

fn parse_u64(value: &Value) -> MetricResult<u64> {
    if let Some(s) = value.as_str() {
        s.parse().map_err(|_| MetricError::Serialization(format!("invalid uint64 string {s:?}")))
    } else {
        value
            .as_u64()
            .ok_or_else(|| MetricError::Serialization(format!("expected uint64, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{InstrumentationScope as CoreScope, KeyValue as CoreKeyValue, Value as CoreValue};
    use crate::data::{Metric as CoreMetric, Summary, Temporality};

    fn sample_batch() -> Vec<ScopeMetrics> {
        vec![ScopeMetrics {
            scope: CoreScope::builder("test-scope").with_version("1.0").build(),
            metrics: vec![CoreMetric {
                name: "requests".into(),
                description: "".into(),
                unit: "1".into(),
                start_time_nanos: 0,
                time_nanos: 100,
                summary: Summary::Sum {
                    points: vec![crate::data::SumDataPoint {
                        attributes: vec![CoreKeyValue::new("route", CoreValue::String("home".into()))],
                        value: 42.0,
                        exemplars: Vec::new(),
                    }],
                    is_monotonic: true,
                },
                temporality: Temporality::Cumulative,
            }],
        }]
    }

    #[test]
    fn json_output_has_integer_valued_enum() {
        let serializer = Serializer::new(ContentType::Json);
        let bytes = serializer.serialize(&sample_batch()).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        let temporality = &value["resourceMetrics"][0]["scopeMetrics"][0]["metrics"][0]["sum"]["aggregationTemporality"];
        assert_eq!(*temporality, json!(2));
    }

    #[test]
    fn ndjson_output_is_newline_terminated() {
        let serializer = Serializer::new(ContentType::Ndjson);
        let bytes = serializer.serialize(&sample_batch()).unwrap();
        assert_eq!(*bytes.last().unwrap(), b'\n');
    }

    #[test]
    fn json_round_trips_through_hydrate() {
        let serializer = Serializer::new(ContentType::Json);
        let batch = sample_batch();
        let bytes = serializer.serialize(&batch).unwrap();
        let hydrated = serializer.hydrate(&bytes).unwrap();
        let expected = proto::to_export_request(&batch);
        assert_eq!(hydrated, expected);
    }

    #[test]
    fn protobuf_round_trips_through_hydrate() {
        let serializer = Serializer::new(ContentType::Protobuf);
        let batch = sample_batch();
        let bytes = serializer.serialize(&batch).unwrap();
        let hydrated = serializer.hydrate(&bytes).unwrap();
        let expected = proto::to_export_request(&batch);
        assert_eq!(hydrated, expected);
    }

    #[test]
    fn unsupported_content_type_is_rejected() {
        #[derive(Debug)]
        struct BogusTransport;
        impl Transport for BogusTransport {
            fn content_type(&self) -> &str {
                "text/plain"
            }
            fn send(&self, _bytes: Vec<u8>) -> MetricResult<()> {
                Ok(())
            }
        }
        let err = Serializer::for_transport(&BogusTransport).unwrap_err();
        assert!(matches!(err, MetricError::UnsupportedContentType(_)));
    }

    #[test]
    fn trace_and_span_ids_encode_per_content_type() {
        let trace = [0xabu8; 16];
        let span = [0xcdu8; 8];
        let json = Serializer::new(ContentType::Json);
        assert_eq!(json.serialize_trace_id(&trace), const_hex::encode(trace).into_bytes());
        assert_eq!(json.serialize_span_id(&span), const_hex::encode(span).into_bytes());

        let protobuf = Serializer::new(ContentType::Protobuf);
        assert_eq!(protobuf.serialize_trace_id(&trace), trace.to_vec());
        assert_eq!(protobuf.serialize_span_id(&span), span.to_vec());
    }
}
