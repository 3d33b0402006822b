//! Maps `(instrument, scope)` to an aggregation policy (§4.7 "View
//! Registry" — named `new_view` criteria/mask pair and a plain trait for
//! fully custom matching, mirroring the teacher's `View`/`new_view`).

use crate::aggregation::Aggregation;
use crate::error::{MetricError, MetricResult};
use crate::instrument::{InstrumentDescriptor, StreamMask};
use crate::otel_warn;

/// Selects, for a given instrument, whether and how its stream should be
/// reconfigured relative to its default aggregation.
pub trait View: Send + Sync + 'static {
    /// Returns `Some(mask)` to apply to `instrument`'s stream, or `None` if
    /// this view does not apply.
    fn match_instrument(&self, instrument: &InstrumentDescriptor) -> Option<StreamMask>;
}

impl<F> View for F
where
    F: Fn(&InstrumentDescriptor) -> Option<StreamMask> + Send + Sync + 'static,
{
    fn match_instrument(&self, instrument: &InstrumentDescriptor) -> Option<StreamMask> {
        self(instrument)
    }
}

impl View for Box<dyn View> {
    fn match_instrument(&self, instrument: &InstrumentDescriptor) -> Option<StreamMask> {
        (**self).match_instrument(instrument)
    }
}

/// Instrument-matching criteria for [`new_view`]. An empty field matches
/// any value; `name` additionally supports `*`/`?` wildcards.
#[derive(Clone, Debug, Default)]
pub struct ViewCriteria {
    /// Instrument name pattern, or empty to match any name.
    pub name: String,
    /// Required instrument kind, or `None` to match any kind.
    pub kind: Option<crate::instrument::InstrumentKind>,
    /// Required unit, or empty to match any unit.
    pub unit: String,
}

impl ViewCriteria {
    /// An empty criteria set, matching nothing by design (see [`new_view`]).
    pub fn new() -> Self {
        ViewCriteria::default()
    }

    /// Sets the name pattern.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Restricts to a specific instrument kind.
    pub fn with_kind(mut self, kind: crate::instrument::InstrumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    fn is_empty(&self) -> bool {
        self.name.is_empty() && self.kind.is_none() && self.unit.is_empty()
    }
}

/// Builds a [`View`] that applies `mask` to every instrument matching
/// `criteria`. Returns an error if `criteria` is entirely empty (which
/// would otherwise silently match every instrument in the meter).
pub fn new_view(criteria: ViewCriteria, mask: StreamMask) -> MetricResult<Box<dyn View>> {
    if criteria.is_empty() {
        return Err(MetricError::Config(
            "view criteria must specify at least one of name/kind/unit".into(),
        ));
    }

    if let Some(aggregation) = &mask.aggregation {
        aggregation.validate()?;
    }

    let contains_wildcard = criteria.name.contains(['*', '?']);
    if contains_wildcard && mask.name.is_some() {
        return Err(MetricError::Config(format!(
            "cannot rename multiple instruments matched by wildcard pattern {:?}",
            criteria.name
        )));
    }

    let name_matcher = if contains_wildcard {
        Some(compile_wildcard(&criteria.name)?)
    } else {
        None
    };

    Ok(Box::new(move |inst: &InstrumentDescriptor| -> Option<StreamMask> {
        let name_matches = if let Some(re) = &name_matcher {
            re.is_match(&inst.name)
        } else {
            criteria.name.is_empty() || criteria.name == inst.name
        };
        let kind_matches = criteria.kind.map(|k| k == inst.kind).unwrap_or(true);
        let unit_matches = criteria.unit.is_empty() || criteria.unit == inst.unit.as_str();

        if !(name_matches && kind_matches && unit_matches) {
            return None;
        }

        Some(StreamMask {
            aggregation: mask.aggregation.clone(),
            allowed_attribute_keys: mask.allowed_attribute_keys.clone(),
            name: mask.name.clone().or_else(|| Some(inst.name.clone())),
            description: mask.description.clone().or_else(|| Some(inst.description.clone())),
        })
    }))
}

#[cfg(feature = "spec_unstable_metrics_views")]
fn compile_wildcard(pattern: &str) -> MetricResult<regex::Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    regex::Regex::new(&format!("^{escaped}$"))
        .map_err(|e| MetricError::Config(format!("invalid view name pattern {pattern:?}: {e}")))
}

#[cfg(not(feature = "spec_unstable_metrics_views"))]
fn compile_wildcard(pattern: &str) -> MetricResult<NoWildcardSupport> {
    otel_warn!(
        name: "View.WildcardUnsupported",
        message = "wildcard view name patterns require the spec_unstable_metrics_views feature",
    );
    Err(MetricError::Config(format!(
        "wildcard pattern {pattern:?} requires the spec_unstable_metrics_views feature"
    )))
}

#[cfg(not(feature = "spec_unstable_metrics_views"))]
struct NoWildcardSupport;

#[cfg(not(feature = "spec_unstable_metrics_views"))]
impl NoWildcardSupport {
    fn is_match(&self, _s: &str) -> bool {
        false
    }
}

/// A collection of registered views, consulted in registration order; the
/// first match wins.
#[derive(Default)]
pub struct ViewRegistry {
    views: Vec<Box<dyn View>>,
}

impl ViewRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        ViewRegistry::default()
    }

    /// Registers `view`.
    pub fn add(&mut self, view: Box<dyn View>) {
        self.views.push(view);
    }

    /// Returns the first matching mask, or `None` if no registered view
    /// matches `instrument` (callers fall back to the instrument's default
    /// aggregation and no attribute filtering).
    pub fn resolve(&self, instrument: &InstrumentDescriptor) -> Option<StreamMask> {
        self.views.iter().find_map(|v| v.match_instrument(instrument))
    }
}

/// Builds the [`crate::attributes::AttributeProcessor`] a [`StreamMask`]
/// implies: an allow-list if `allowed_attribute_keys` is set, identity
/// otherwise.
pub fn attribute_processor_for_mask(
    mask: &StreamMask,
) -> Box<dyn crate::attributes::AttributeProcessor> {
    match &mask.allowed_attribute_keys {
        Some(keys) => Box::new(crate::attributes::AllowListAttributeProcessor::new(keys.clone())),
        None => Box::new(crate::attributes::IdentityAttributeProcessor),
    }
}

/// Returns the aggregation to use for a stream: the mask's override if
/// present, else the instrument's default.
pub fn resolve_aggregation(instrument: &InstrumentDescriptor, mask: Option<&StreamMask>) -> Aggregation {
    mask.and_then(|m| m.aggregation.clone())
        .unwrap_or_else(|| instrument.kind.default_aggregation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::InstrumentKind;

    #[test]
    fn exact_name_match() {
        let view = new_view(
            ViewCriteria::new().with_name("requests"),
            StreamMask::default(),
        )
        .unwrap();
        let matched = InstrumentDescriptor::new(InstrumentKind::Counter, "requests");
        let unmatched = InstrumentDescriptor::new(InstrumentKind::Counter, "other");
        assert!(view.match_instrument(&matched).is_some());
        assert!(view.match_instrument(&unmatched).is_none());
    }

    #[cfg(feature = "spec_unstable_metrics_views")]
    #[test]
    fn wildcard_name_match() {
        let view = new_view(
            ViewCriteria::new().with_name("http_*"),
            StreamMask::default(),
        )
        .unwrap();
        assert!(view
            .match_instrument(&InstrumentDescriptor::new(InstrumentKind::Counter, "http_requests"))
            .is_some());
        assert!(view
            .match_instrument(&InstrumentDescriptor::new(InstrumentKind::Counter, "grpc_requests"))
            .is_none());
    }

    #[test]
    fn empty_criteria_is_rejected() {
        assert!(new_view(ViewCriteria::new(), StreamMask::default()).is_err());
    }

    #[test]
    fn registry_uses_first_match() {
        let mut registry = ViewRegistry::new();
        registry.add(new_view(
            ViewCriteria::new().with_name("a"),
            StreamMask {
                aggregation: Some(Aggregation::LastValue),
                ..Default::default()
            },
        ).unwrap());
        registry.add(new_view(
            ViewCriteria::new().with_name("a"),
            StreamMask {
                aggregation: Some(Aggregation::Sum),
                ..Default::default()
            },
        ).unwrap());

        let mask = registry
            .resolve(&InstrumentDescriptor::new(InstrumentKind::Counter, "a"))
            .unwrap();
        assert_eq!(mask.aggregation, Some(Aggregation::LastValue));
    }
}
