//! Instrument descriptors and the user-facing handles applications hold.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::aggregation::Aggregation;
use crate::common::KeyValue;
use crate::error::{MetricError, MetricResult};
use crate::stream::MetricStreamHandle;

/// The functional group an instrument belongs to.
///
/// Counters and `ObservableCounter` are monotonic: non-negative measurements
/// only.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[non_exhaustive]
pub enum InstrumentKind {
    /// Monotonic, synchronous, increasing values.
    Counter,
    /// Synchronous values that may increase or decrease.
    UpDownCounter,
    /// Synchronous distribution of values.
    Histogram,
    /// Synchronous current-value measurements (last-value wins).
    Gauge,
    /// Monotonic values reported from an asynchronous callback.
    ObservableCounter,
    /// Values reported from an asynchronous callback that may increase or
    /// decrease.
    ObservableUpDownCounter,
    /// Current-value measurements reported from an asynchronous callback.
    ObservableGauge,
}

impl InstrumentKind {
    /// True for `Counter` and `ObservableCounter`: values recorded under
    /// this kind must be non-negative.
    pub fn is_monotonic(self) -> bool {
        matches!(self, InstrumentKind::Counter | InstrumentKind::ObservableCounter)
    }

    /// True for the three `Observable*` kinds.
    pub fn is_observable(self) -> bool {
        matches!(
            self,
            InstrumentKind::ObservableCounter
                | InstrumentKind::ObservableUpDownCounter
                | InstrumentKind::ObservableGauge
        )
    }

    /// The default aggregation for this instrument kind absent a matching
    /// [`crate::view::View`].
    pub fn default_aggregation(self) -> Aggregation {
        match self {
            InstrumentKind::Gauge | InstrumentKind::ObservableGauge => Aggregation::LastValue,
            _ => Aggregation::Sum,
        }
    }
}

/// A unit of measurement string, e.g. `"ms"`, `"By"`. No validation is
/// performed beyond accepting any UTF-8 string -- unit semantics are a
/// collector/consumer concern, out of scope for the core.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Unit(Cow<'static, str>);

impl Unit {
    /// Creates a new unit from any string-like value.
    pub fn new(unit: impl Into<Cow<'static, str>>) -> Self {
        Unit(unit.into())
    }

    /// Returns the unit as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Unit {
    fn from(s: &'static str) -> Self {
        Unit::new(s)
    }
}

/// Full identity of an instrument: `(kind, name, unit?, description?)`.
///
/// Deduplication is keyed on the canonical serialization of this tuple
/// together with the creating scope (see
/// [`crate::attributes::canonical_instrument_id`]).
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentDescriptor {
    /// The functional kind of the instrument.
    pub kind: InstrumentKind,
    /// The human-readable identifier of the instrument.
    pub name: Cow<'static, str>,
    /// The unit of measurement recorded.
    pub unit: Unit,
    /// A free-text description.
    pub description: Cow<'static, str>,
}

impl InstrumentDescriptor {
    /// Creates a new descriptor with an empty unit and description.
    pub fn new(kind: InstrumentKind, name: impl Into<Cow<'static, str>>) -> Self {
        InstrumentDescriptor {
            kind,
            name: name.into(),
            unit: Unit::default(),
            description: Cow::Borrowed(""),
        }
    }

    /// Sets the unit.
    pub fn with_unit(mut self, unit: impl Into<Unit>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// True if `other` has the same kind, unit, and description as this
    /// descriptor -- used to detect conflicting re-registration under the
    /// same `(scope, name)`.
    pub fn conflicts_with(&self, other: &InstrumentDescriptor) -> bool {
        self.kind != other.kind || self.unit != other.unit || self.description != other.description
    }
}

/// A mask applied by a matching [`crate::view::View`]: which aggregation to
/// use and which attribute keys to retain, overriding the instrument's
/// default stream configuration.
#[derive(Clone, Debug, Default)]
pub struct StreamMask {
    /// Aggregation override, if any.
    pub aggregation: Option<Aggregation>,
    /// If `Some`, only these attribute keys are retained on recorded
    /// measurements.
    pub allowed_attribute_keys: Option<Vec<crate::common::Key>>,
    /// Name override.
    pub name: Option<Cow<'static, str>>,
    /// Description override.
    pub description: Option<Cow<'static, str>>,
}

/// Capability for synchronous instruments: recording a measurement.
pub trait Writable<T>: Send + Sync + fmt::Debug {
    /// Records `value` with the given attributes.
    fn record(&self, value: T, attributes: &[KeyValue]);
}

/// Capability for asynchronous (observable) instruments: reporting the
/// current value from within a registered callback.
pub trait Observable<T>: Send + Sync + fmt::Debug {
    /// Reports `value` as the current measurement for `attributes`, to be
    /// folded into the next collection.
    fn observe(&self, value: T, attributes: &[KeyValue]);
}

/// A handle returned by `Meter::create_*`. Holds a reference on the
/// instrument's [`crate::staleness::StalenessHandler`]; dropping the last
/// handle allows the instrument to be reclaimed (§4.6).
pub struct InstrumentHandle<T: crate::aggregation::Number> {
    pub(crate) stream: Arc<MetricStreamHandle<T>>,
    pub(crate) descriptor: InstrumentDescriptor,
    pub(crate) staleness: Arc<crate::staleness::StalenessHandler>,
}

impl<T: crate::aggregation::Number> fmt::Debug for InstrumentHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentHandle")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl<T: crate::aggregation::Number> Clone for InstrumentHandle<T> {
    fn clone(&self) -> Self {
        self.staleness.acquire();
        InstrumentHandle {
            stream: self.stream.clone(),
            descriptor: self.descriptor.clone(),
            staleness: self.staleness.clone(),
        }
    }
}

impl<T: crate::aggregation::Number> Drop for InstrumentHandle<T> {
    fn drop(&mut self) {
        self.staleness.release();
    }
}

impl<T: crate::aggregation::Number> Writable<T> for InstrumentHandle<T> {
    fn record(&self, value: T, attributes: &[KeyValue]) {
        self.stream.record(value, attributes);
    }
}

impl<T: crate::aggregation::Number> Observable<T> for InstrumentHandle<T> {
    fn observe(&self, value: T, attributes: &[KeyValue]) {
        self.stream.observe(value, attributes);
    }
}

/// Validates an instrument name/unit/description against basic
/// configuration constraints, raised as a hard [`MetricError::Config`] --
/// unlike attribute validation, this never silently drops.
pub fn validate_descriptor(descriptor: &InstrumentDescriptor) -> MetricResult<()> {
    if descriptor.name.is_empty() {
        return Err(MetricError::Config(
            "instrument name must not be empty".into(),
        ));
    }
    Ok(())
}
