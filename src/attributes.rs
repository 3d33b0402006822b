//! Canonicalized, hashable attribute sets.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::common::{truncate_array_depth, InstrumentationScope, Key, KeyValue, Value};

/// A unique set of attributes, canonicalized so that equality and hashing
/// are stable across insertion order: `hash(permute(attrs)) == hash(attrs)`.
///
/// Attributes are immutable once attached to a measurement (§3 invariant);
/// this type owns its data rather than borrowing, so that invariant holds
/// for the lifetime of the set.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct AttributeSet(Vec<KeyValue>, u64);

impl AttributeSet {
    /// Builds a canonical set from a slice of attributes, truncating any
    /// array nesting beyond [`crate::common::DEFAULT_ARRAY_DEPTH_LIMIT`].
    pub fn from_values(values: &[KeyValue]) -> Self {
        Self::from_values_with_depth_limit(values, crate::common::DEFAULT_ARRAY_DEPTH_LIMIT)
    }

    /// Builds a canonical set from a slice of attributes with a caller-chosen
    /// array nesting depth limit.
    pub fn from_values_with_depth_limit(values: &[KeyValue], depth_limit: usize) -> Self {
        let mut vec: Vec<KeyValue> = values
            .iter()
            .filter(|kv| !kv.key.is_empty())
            .cloned()
            .map(|kv| KeyValue {
                key: kv.key,
                value: match kv.value {
                    Value::Array(a) => Value::Array(truncate_array_depth(a, depth_limit)),
                    other => other,
                },
            })
            .collect();
        vec.sort_by(|a, b| a.key.cmp(&b.key));

        // dedup_by removes the *last* of a run of duplicates; the OTel
        // convention is first-registration-wins, so dedup from the back.
        if vec.len() > 1 {
            let mut i = vec.len() - 1;
            while i != 0 {
                if vec[i - 1].key == vec[i].key {
                    vec.remove(i - 1);
                }
                i -= 1;
            }
        }

        let hash = calculate_hash(&vec);
        AttributeSet(vec, hash)
    }

    /// Iterates over the canonical key/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.0.iter().map(|kv| (&kv.key, &kv.value))
    }

    /// Number of distinct attribute keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the set has no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the set, returning the canonical (sorted, deduplicated)
    /// key/value pairs.
    pub fn into_inner(self) -> Vec<KeyValue> {
        self.0
    }

    /// Borrows the canonical key/value pairs.
    pub fn as_slice(&self) -> &[KeyValue] {
        &self.0
    }

    /// A new set retaining only attributes whose key is present in
    /// `allowed`, mirroring a view's `allowed_attribute_keys` mask.
    pub fn filter_allowed(&self, allowed: &[Key]) -> AttributeSet {
        let filtered: Vec<KeyValue> = self
            .0
            .iter()
            .filter(|kv| allowed.iter().any(|k| k == &kv.key))
            .cloned()
            .collect();
        let hash = calculate_hash(&filtered);
        AttributeSet(filtered, hash)
    }
}

impl From<&[KeyValue]> for AttributeSet {
    fn from(values: &[KeyValue]) -> Self {
        AttributeSet::from_values(values)
    }
}

fn calculate_hash(values: &[KeyValue]) -> u64 {
    let mut hasher = FxHasher::default();
    values.iter().fold(&mut hasher, |hasher, item| {
        item.hash(hasher);
        hasher
    });
    hasher.finish()
}

impl Hash for AttributeSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.1)
    }
}

/// Rule applied to attributes as they flow from `record` into the
/// aggregator: drop or rename keys according to a [`crate::view::View`].
pub trait AttributeProcessor: Send + Sync + 'static {
    /// Transforms the raw measurement attributes before they are folded
    /// into a summary.
    fn process(&self, attrs: &[KeyValue]) -> AttributeSet;
}

/// The identity-preserving processor: canonicalizes without dropping or
/// renaming any key.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityAttributeProcessor;

impl AttributeProcessor for IdentityAttributeProcessor {
    fn process(&self, attrs: &[KeyValue]) -> AttributeSet {
        AttributeSet::from_values(attrs)
    }
}

/// A processor that keeps only an allow-listed set of keys, as configured
/// by a view's `allowed_attribute_keys` mask.
#[derive(Debug, Clone)]
pub struct AllowListAttributeProcessor {
    allowed: Arc<[Key]>,
}

impl AllowListAttributeProcessor {
    /// Creates a processor retaining only the given keys.
    pub fn new(allowed: Vec<Key>) -> Self {
        AllowListAttributeProcessor {
            allowed: allowed.into(),
        }
    }
}

impl AttributeProcessor for AllowListAttributeProcessor {
    fn process(&self, attrs: &[KeyValue]) -> AttributeSet {
        AttributeSet::from_values(attrs).filter_allowed(&self.allowed)
    }
}

/// Canonical serialization of an instrument's `(kind, name)`, used as the
/// deduplication key for `(scope_id, instrument_id)` lookups. Deliberately
/// excludes `unit`/`description`: those are compared against the stored
/// descriptor separately so that a conflicting re-registration resolves to
/// the same entry instead of silently creating a second stream (§4.5).
pub fn canonical_instrument_id(kind: crate::instrument::InstrumentKind, name: &str) -> String {
    format!("{kind:?}\u{1}{name}")
}

/// Canonical serialization of an [`InstrumentationScope`], used as half of
/// the instrument deduplication key.
pub fn canonical_scope_id(scope: &InstrumentationScope) -> String {
    let mut attrs = scope.attributes.clone();
    attrs.sort();
    let attrs_str = attrs
        .iter()
        .map(|kv| format!("{}={}", kv.key, kv.value))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{}\u{1}{}\u{1}{}\u{1}{}",
        scope.name,
        scope.version.as_deref().unwrap_or(""),
        scope.schema_url.as_deref().unwrap_or(""),
        attrs_str
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_hash_is_order_independent() {
        let a = AttributeSet::from_values(&[KeyValue::new("a", 1i64), KeyValue::new("b", 2i64)]);
        let b = AttributeSet::from_values(&[KeyValue::new("b", 2i64), KeyValue::new("a", 1i64)]);
        assert_eq!(a, b);

        let mut h1 = std::collections::hash_map::DefaultHasher::new();
        let mut h2 = std::collections::hash_map::DefaultHasher::new();
        a.hash(&mut h1);
        b.hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn duplicate_keys_keep_first_registration() {
        let set = AttributeSet::from_values(&[
            KeyValue::new("k", 1i64),
            KeyValue::new("k", 2i64),
        ]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.as_slice()[0].value, Value::I64(1));
    }

    #[test]
    fn empty_keys_are_dropped() {
        let set = AttributeSet::from_values(&[KeyValue::new("", 1i64), KeyValue::new("k", 2i64)]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn allow_list_filters_to_named_keys() {
        let set = AttributeSet::from_values(&[KeyValue::new("a", 1i64), KeyValue::new("b", 2i64)]);
        let filtered = set.filter_allowed(&[Key::from("a")]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.as_slice()[0].key, Key::from("a"));
    }
}
