//! The JSON enum-coercion walk (§4.7, §9 "Nested descriptor walk"): OTLP's
//! JSON mapping requires enum fields as integers, but a naive
//! protobuf-to-JSON translation (ours included, deliberately, in
//! [`super::to_naive_json`]) emits their symbolic names instead. This module
//! walks the decoded tree against a small hand-built descriptor table --
//! standing in for a generated descriptor pool, per the design note that a
//! compile-time-generated map is an acceptable substitute when one isn't
//! available -- and replaces every enum-typed field's string with its
//! integer value.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde_json::Value;

/// What a message-typed field's descriptor says about its shape.
#[derive(Clone, Copy)]
enum FieldKind {
    /// A field whose value is an enum's symbolic name, looked up in `enum`.
    Enum(&'static str),
    /// A nested message, recursed into by name.
    Message(&'static str),
    /// A `repeated` field of the wrapped kind; each element is walked.
    Repeated(&'static FieldKind),
}

type FieldTable = &'static [(&'static str, FieldKind)];

fn message_descriptors() -> &'static HashMap<&'static str, FieldTable> {
    static TABLE: OnceLock<HashMap<&'static str, FieldTable>> = OnceLock::new();
    TABLE.get_or_init(|| {
        static RESOURCE_METRICS_FIELD: FieldKind = FieldKind::Message("ResourceMetrics");
        static SCOPE_METRICS_FIELD: FieldKind = FieldKind::Message("ScopeMetrics");
        static METRIC_FIELD: FieldKind = FieldKind::Message("Metric");

        static EXPORT_METRICS_SERVICE_REQUEST_FIELDS: FieldTable =
            &[("resource_metrics", FieldKind::Repeated(&RESOURCE_METRICS_FIELD))];
        static RESOURCE_METRICS_FIELDS: FieldTable =
            &[("scope_metrics", FieldKind::Repeated(&SCOPE_METRICS_FIELD))];
        static SCOPE_METRICS_FIELDS: FieldTable = &[("metrics", FieldKind::Repeated(&METRIC_FIELD))];
        static METRIC_FIELDS: FieldTable = &[
            ("gauge", FieldKind::Message("Gauge")),
            ("sum", FieldKind::Message("Sum")),
            ("histogram", FieldKind::Message("Histogram")),
        ];
        static SUM_FIELDS: FieldTable =
            &[("aggregation_temporality", FieldKind::Enum("AggregationTemporality"))];
        static HISTOGRAM_FIELDS: FieldTable =
            &[("aggregation_temporality", FieldKind::Enum("AggregationTemporality"))];

        let mut m: HashMap<&'static str, FieldTable> = HashMap::new();
        m.insert("ExportMetricsServiceRequest", EXPORT_METRICS_SERVICE_REQUEST_FIELDS);
        m.insert("ResourceMetrics", RESOURCE_METRICS_FIELDS);
        m.insert("ScopeMetrics", SCOPE_METRICS_FIELDS);
        m.insert("Metric", METRIC_FIELDS);
        m.insert("Sum", SUM_FIELDS);
        m.insert("Histogram", HISTOGRAM_FIELDS);
        m
    })
}

fn enum_value_tables() -> &'static HashMap<&'static str, HashMap<&'static str, i32>> {
    static TABLE: OnceLock<HashMap<&'static str, HashMap<&'static str, i32>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut m = HashMap::new();
        let mut aggregation_temporality = HashMap::new();
        aggregation_temporality.insert(
            super::proto::AggregationTemporality::Unspecified.as_str_name(),
            super::proto::AggregationTemporality::Unspecified as i32,
        );
        aggregation_temporality.insert(
            super::proto::AggregationTemporality::Delta.as_str_name(),
            super::proto::AggregationTemporality::Delta as i32,
        );
        aggregation_temporality.insert(
            super::proto::AggregationTemporality::Cumulative.as_str_name(),
            super::proto::AggregationTemporality::Cumulative as i32,
        );
        m.insert("AggregationTemporality", aggregation_temporality);
        m
    })
}

/// Converts a `snake_case` field name to the `camelCase` form OTLP's JSON
/// mapping uses as the object key.
pub fn snake_to_camel(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upcase_next = false;
    for c in field.chars() {
        if c == '_' {
            upcase_next = true;
        } else if upcase_next {
            out.extend(c.to_uppercase());
            upcase_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Walks `value` -- the JSON tree for an instance of `message_type` -- and
/// replaces every enum field's symbolic name with its integer value,
/// recursing into nested and repeated message fields. If `message_type`
/// isn't registered, the tree passes through unchanged (§4.7 "If the
/// descriptor is not registered...").
pub fn coerce_enums(message_type: &str, mut value: Value) -> Value {
    let Some(fields) = message_descriptors().get(message_type) else {
        return value;
    };
    let Value::Object(obj) = &mut value else {
        return value;
    };

    for (field_name, kind) in fields.iter() {
        let json_key = snake_to_camel(field_name);
        let Some(slot) = obj.get_mut(&json_key) else {
            continue;
        };
        coerce_field(*kind, slot);
    }
    value
}

fn coerce_field(kind: FieldKind, slot: &mut Value) {
    match kind {
        FieldKind::Enum(enum_name) => {
            if let Value::String(name) = slot {
                if let Some(table) = enum_value_tables().get(enum_name) {
                    if let Some(&int_value) = table.get(name.as_str()) {
                        *slot = Value::Number(int_value.into());
                    }
                }
            }
        }
        FieldKind::Message(message_type) => {
            let taken = slot.take();
            *slot = coerce_enums(message_type, taken);
        }
        FieldKind::Repeated(inner) => {
            if let Value::Array(items) = slot {
                for item in items.iter_mut() {
                    coerce_field(*inner, item);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_top_level_enum_field() {
        let input = json!({ "aggregationTemporality": "AGGREGATION_TEMPORALITY_DELTA" });
        let out = coerce_enums("Sum", input);
        assert_eq!(out["aggregationTemporality"], json!(1));
    }

    #[test]
    fn recurses_through_nested_and_repeated_fields() {
        let input = json!({
            "resourceMetrics": [{
                "scopeMetrics": [{
                    "metrics": [{
                        "sum": { "aggregationTemporality": "AGGREGATION_TEMPORALITY_CUMULATIVE" }
                    }]
                }]
            }]
        });
        let out = coerce_enums("ExportMetricsServiceRequest", input);
        let temporality = &out["resourceMetrics"][0]["scopeMetrics"][0]["metrics"][0]["sum"]["aggregationTemporality"];
        assert_eq!(*temporality, json!(2));
    }

    #[test]
    fn unregistered_message_type_passes_through() {
        let input = json!({ "whatever": "AGGREGATION_TEMPORALITY_DELTA" });
        let out = coerce_enums("NotARealMessage", input.clone());
        assert_eq!(out, input);
    }

    #[test]
    fn snake_to_camel_conversion() {
        assert_eq!(snake_to_camel("aggregation_temporality"), "aggregationTemporality");
        assert_eq!(snake_to_camel("name"), "name");
    }
}
