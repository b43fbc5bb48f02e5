//! Typed, inheritance-aware property values.
//!
//! A [`Property`] is immutable once built. Changing a property means building
//! a new value (see [`Property::with_value`]) and storing it in the owning
//! node's slot, so concurrent readers never observe a half-written value.
//!
//! Provenance is not stored on the value. A non-local property's source is
//! derived by walking the owning node's parent chain, see
//! [`crate::node::StorageNode::resolve_source`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{ObjectKind, PeriodKind, RecursionMode};

/// Instant type used for snapshot and last-snapshot timestamps.
pub type Timestamp = DateTime<FixedOffset>;

/// The Unix epoch, used as "never" for last-snapshot timestamps.
pub fn epoch() -> Timestamp {
    Timestamp::default()
}

/// Value type declared by the schema for each property.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `true` / `false`
    Bool,
    /// Signed decimal integer.
    Int,
    /// RFC 3339 / ISO-8601 instant.
    Timestamp,
    /// Free-form string.
    Text,
}

impl ValueType {
    /// Human readable type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Bool => "boolean",
            ValueType::Int => "integer",
            ValueType::Timestamp => "timestamp",
            ValueType::Text => "string",
        }
    }
}

/// Every property snapkeep stores on a storage object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyName {
    /// Master switch for the object.
    Enabled,
    /// Whether new snapshots are taken.
    TakeSnapshots,
    /// Whether old snapshots are pruned.
    PruneSnapshots,
    /// Recursion mode, see [`RecursionMode`].
    Recursion,
    /// Name of the naming/timing template.
    Template,
    /// Frequent snapshots to keep.
    RetentionFrequent,
    /// Hourly snapshots to keep.
    RetentionHourly,
    /// Daily snapshots to keep.
    RetentionDaily,
    /// Weekly snapshots to keep.
    RetentionWeekly,
    /// Monthly snapshots to keep.
    RetentionMonthly,
    /// Yearly snapshots to keep.
    RetentionYearly,
    /// Capacity percentage below which pruning is deferred.
    PruneDeferral,
    /// Timestamp of the newest frequent snapshot.
    LastFrequentSnapshot,
    /// Timestamp of the newest hourly snapshot.
    LastHourlySnapshot,
    /// Timestamp of the newest daily snapshot.
    LastDailySnapshot,
    /// Timestamp of the newest weekly snapshot.
    LastWeeklySnapshot,
    /// Timestamp of the newest monthly snapshot.
    LastMonthlySnapshot,
    /// Timestamp of the newest yearly snapshot.
    LastYearlySnapshot,
    /// Period a snapshot was taken for (snapshots only).
    SnapshotPeriod,
    /// Instant a snapshot was taken (snapshots only).
    SnapshotTimestamp,
}

impl PropertyName {
    /// Every property in the schema.
    pub const ALL: [PropertyName; 20] = [
        PropertyName::Enabled,
        PropertyName::TakeSnapshots,
        PropertyName::PruneSnapshots,
        PropertyName::Recursion,
        PropertyName::Template,
        PropertyName::RetentionFrequent,
        PropertyName::RetentionHourly,
        PropertyName::RetentionDaily,
        PropertyName::RetentionWeekly,
        PropertyName::RetentionMonthly,
        PropertyName::RetentionYearly,
        PropertyName::PruneDeferral,
        PropertyName::LastFrequentSnapshot,
        PropertyName::LastHourlySnapshot,
        PropertyName::LastDailySnapshot,
        PropertyName::LastWeeklySnapshot,
        PropertyName::LastMonthlySnapshot,
        PropertyName::LastYearlySnapshot,
        PropertyName::SnapshotPeriod,
        PropertyName::SnapshotTimestamp,
    ];

    /// Name used on the wire and in the storage system.
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyName::Enabled => "snapkeep:enabled",
            PropertyName::TakeSnapshots => "snapkeep:takesnapshots",
            PropertyName::PruneSnapshots => "snapkeep:prunesnapshots",
            PropertyName::Recursion => "snapkeep:recursion",
            PropertyName::Template => "snapkeep:template",
            PropertyName::RetentionFrequent => "snapkeep:retention:frequent",
            PropertyName::RetentionHourly => "snapkeep:retention:hourly",
            PropertyName::RetentionDaily => "snapkeep:retention:daily",
            PropertyName::RetentionWeekly => "snapkeep:retention:weekly",
            PropertyName::RetentionMonthly => "snapkeep:retention:monthly",
            PropertyName::RetentionYearly => "snapkeep:retention:yearly",
            PropertyName::PruneDeferral => "snapkeep:retention:prunedeferral",
            PropertyName::LastFrequentSnapshot => "snapkeep:lastfrequentsnapshottimestamp",
            PropertyName::LastHourlySnapshot => "snapkeep:lasthourlysnapshottimestamp",
            PropertyName::LastDailySnapshot => "snapkeep:lastdailysnapshottimestamp",
            PropertyName::LastWeeklySnapshot => "snapkeep:lastweeklysnapshottimestamp",
            PropertyName::LastMonthlySnapshot => "snapkeep:lastmonthlysnapshottimestamp",
            PropertyName::LastYearlySnapshot => "snapkeep:lastyearlysnapshottimestamp",
            PropertyName::SnapshotPeriod => "snapkeep:snapshotperiod",
            PropertyName::SnapshotTimestamp => "snapkeep:snapshottimestamp",
        }
    }

    /// Value type declared for this property.
    pub fn value_type(&self) -> ValueType {
        match self {
            PropertyName::Enabled | PropertyName::TakeSnapshots | PropertyName::PruneSnapshots => {
                ValueType::Bool
            }
            PropertyName::Recursion | PropertyName::Template | PropertyName::SnapshotPeriod => {
                ValueType::Text
            }
            PropertyName::RetentionFrequent
            | PropertyName::RetentionHourly
            | PropertyName::RetentionDaily
            | PropertyName::RetentionWeekly
            | PropertyName::RetentionMonthly
            | PropertyName::RetentionYearly
            | PropertyName::PruneDeferral => ValueType::Int,
            PropertyName::LastFrequentSnapshot
            | PropertyName::LastHourlySnapshot
            | PropertyName::LastDailySnapshot
            | PropertyName::LastWeeklySnapshot
            | PropertyName::LastMonthlySnapshot
            | PropertyName::LastYearlySnapshot
            | PropertyName::SnapshotTimestamp => ValueType::Timestamp,
        }
    }

    /// Returns true if the value flows from parent to child.
    pub fn is_inheritable(&self) -> bool {
        !self.is_last_snapshot() && !self.is_snapshot_only()
    }

    /// Returns true for the six last-snapshot timestamps.
    pub fn is_last_snapshot(&self) -> bool {
        PeriodKind::SCHEDULED
            .iter()
            .any(|p| Self::last_snapshot_for(*p) == Some(*self))
    }

    /// Returns true for properties that exist only on snapshots.
    pub fn is_snapshot_only(&self) -> bool {
        matches!(
            self,
            PropertyName::SnapshotPeriod | PropertyName::SnapshotTimestamp
        )
    }

    /// Returns true if objects of `kind` carry this property.
    pub fn applies_to(&self, kind: ObjectKind) -> bool {
        kind.is_snapshot() || !self.is_snapshot_only()
    }

    /// Retention count property for a scheduled period.
    pub fn retention_for(period: PeriodKind) -> Option<PropertyName> {
        match period {
            PeriodKind::Frequent => Some(PropertyName::RetentionFrequent),
            PeriodKind::Hourly => Some(PropertyName::RetentionHourly),
            PeriodKind::Daily => Some(PropertyName::RetentionDaily),
            PeriodKind::Weekly => Some(PropertyName::RetentionWeekly),
            PeriodKind::Monthly => Some(PropertyName::RetentionMonthly),
            PeriodKind::Yearly => Some(PropertyName::RetentionYearly),
            PeriodKind::Manual | PeriodKind::Temporary => None,
        }
    }

    /// Last-snapshot timestamp property for a scheduled period.
    pub fn last_snapshot_for(period: PeriodKind) -> Option<PropertyName> {
        match period {
            PeriodKind::Frequent => Some(PropertyName::LastFrequentSnapshot),
            PeriodKind::Hourly => Some(PropertyName::LastHourlySnapshot),
            PeriodKind::Daily => Some(PropertyName::LastDailySnapshot),
            PeriodKind::Weekly => Some(PropertyName::LastWeeklySnapshot),
            PeriodKind::Monthly => Some(PropertyName::LastMonthlySnapshot),
            PeriodKind::Yearly => Some(PropertyName::LastYearlySnapshot),
            PeriodKind::Manual | PeriodKind::Temporary => None,
        }
    }

    /// Hard-coded default, as a local value.
    pub fn default_value(&self) -> PropertyValue {
        let name = *self;
        match name {
            PropertyName::Enabled | PropertyName::TakeSnapshots | PropertyName::PruneSnapshots => {
                PropertyValue::Bool(Property::new(name, false, true))
            }
            PropertyName::Recursion => PropertyValue::Text(Property::new(
                name,
                RecursionMode::default().as_str().to_string(),
                true,
            )),
            PropertyName::Template => {
                PropertyValue::Text(Property::new(name, "default".to_string(), true))
            }
            PropertyName::SnapshotPeriod => PropertyValue::Text(Property::new(
                name,
                PeriodKind::Manual.as_str().to_string(),
                true,
            )),
            PropertyName::RetentionFrequent => PropertyValue::Int(Property::new(name, 4, true)),
            PropertyName::RetentionHourly => PropertyValue::Int(Property::new(name, 48, true)),
            PropertyName::RetentionDaily => PropertyValue::Int(Property::new(name, 90, true)),
            PropertyName::RetentionWeekly => PropertyValue::Int(Property::new(name, 0, true)),
            PropertyName::RetentionMonthly => PropertyValue::Int(Property::new(name, 6, true)),
            PropertyName::RetentionYearly => PropertyValue::Int(Property::new(name, 0, true)),
            PropertyName::PruneDeferral => PropertyValue::Int(Property::new(name, 0, true)),
            PropertyName::LastFrequentSnapshot
            | PropertyName::LastHourlySnapshot
            | PropertyName::LastDailySnapshot
            | PropertyName::LastWeeklySnapshot
            | PropertyName::LastMonthlySnapshot
            | PropertyName::LastYearlySnapshot
            | PropertyName::SnapshotTimestamp => {
                PropertyValue::Timestamp(Property::new(name, epoch(), true))
            }
        }
    }
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PropertyName::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| CoreError::UnknownProperty(s.to_string()))
    }
}

/// Rust types that can back a [`Property`].
pub trait PropertyType: Clone + PartialEq + fmt::Debug + Send + Sync + Sized + 'static {
    /// Schema value type this Rust type represents.
    const VALUE_TYPE: ValueType;

    /// Parses the wire form. Returns `None` on malformed input.
    fn parse_wire(raw: &str) -> Option<Self>;

    /// Serializes to the wire form.
    fn to_wire(&self) -> String;

    /// Wraps a typed property in the dynamic [`PropertyValue`].
    fn into_value(property: Property<Self>) -> PropertyValue;

    /// Borrows the typed property out of a [`PropertyValue`], if the type matches.
    fn from_value(value: &PropertyValue) -> Option<&Property<Self>>;
}

impl PropertyType for bool {
    const VALUE_TYPE: ValueType = ValueType::Bool;

    fn parse_wire(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("true") {
            Some(true)
        } else if raw.eq_ignore_ascii_case("false") {
            Some(false)
        } else {
            None
        }
    }

    fn to_wire(&self) -> String {
        let wire = if *self { "true" } else { "false" };
        wire.to_string()
    }

    fn into_value(property: Property<Self>) -> PropertyValue {
        PropertyValue::Bool(property)
    }

    fn from_value(value: &PropertyValue) -> Option<&Property<Self>> {
        match value {
            PropertyValue::Bool(p) => Some(p),
            _ => None,
        }
    }
}

impl PropertyType for i64 {
    const VALUE_TYPE: ValueType = ValueType::Int;

    fn parse_wire(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }

    fn to_wire(&self) -> String {
        self.to_string()
    }

    fn into_value(property: Property<Self>) -> PropertyValue {
        PropertyValue::Int(property)
    }

    fn from_value(value: &PropertyValue) -> Option<&Property<Self>> {
        match value {
            PropertyValue::Int(p) => Some(p),
            _ => None,
        }
    }
}

impl PropertyType for Timestamp {
    const VALUE_TYPE: ValueType = ValueType::Timestamp;

    fn parse_wire(raw: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(raw.trim()).ok()
    }

    fn to_wire(&self) -> String {
        self.to_rfc3339()
    }

    fn into_value(property: Property<Self>) -> PropertyValue {
        PropertyValue::Timestamp(property)
    }

    fn from_value(value: &PropertyValue) -> Option<&Property<Self>> {
        match value {
            PropertyValue::Timestamp(p) => Some(p),
            _ => None,
        }
    }
}

impl PropertyType for String {
    const VALUE_TYPE: ValueType = ValueType::Text;

    fn parse_wire(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }

    fn to_wire(&self) -> String {
        self.clone()
    }

    fn into_value(property: Property<Self>) -> PropertyValue {
        PropertyValue::Text(property)
    }

    fn from_value(value: &PropertyValue) -> Option<&Property<Self>> {
        match value {
            PropertyValue::Text(p) => Some(p),
            _ => None,
        }
    }
}

/// An immutable named value with its locality.
///
/// Two properties are equal iff name, value and locality match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property<T> {
    name: PropertyName,
    value: T,
    is_local: bool,
}

impl<T: PropertyType> Property<T> {
    /// Creates a property.
    pub fn new(name: PropertyName, value: T, is_local: bool) -> Self {
        Self {
            name,
            value,
            is_local,
        }
    }

    /// The property name.
    pub fn name(&self) -> PropertyName {
        self.name
    }

    /// The value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns true if the value is defined on the owning node itself.
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// Returns a replacement property with a new value and locality.
    pub fn with_value(&self, value: T, is_local: bool) -> Self {
        Self::new(self.name, value, is_local)
    }

    /// Parses a wire value into a property.
    pub fn parse(name: PropertyName, raw: &str, is_local: bool) -> Option<Self> {
        T::parse_wire(raw).map(|value| Self::new(name, value, is_local))
    }
}

/// Rejects text a property cannot carry through the tab-separated wire format.
fn check_text(name: PropertyName, text: &str) -> Result<(), &'static str> {
    if text.contains(|c| matches!(c, '\t' | '\n' | '\r')) {
        return Err("text must not contain tabs or line breaks");
    }
    if name == PropertyName::Recursion && text.parse::<RecursionMode>().is_err() {
        return Err("recursion must be 'snapkeep' or 'zfs'");
    }
    Ok(())
}

/// A property of any supported type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Boolean property.
    Bool(Property<bool>),
    /// Integer property.
    Int(Property<i64>),
    /// Timestamp property.
    Timestamp(Property<Timestamp>),
    /// String property.
    Text(Property<String>),
}

impl PropertyValue {
    /// Builds a property, checking `T` against the schema type of `name`.
    pub fn new<T: PropertyType>(name: PropertyName, value: T, is_local: bool) -> CoreResult<Self> {
        if T::VALUE_TYPE != name.value_type() {
            return Err(CoreError::PropertyTypeMismatch {
                name,
                expected: name.value_type().as_str(),
            });
        }
        let value = T::into_value(Property::new(name, value, is_local));
        if let Some(text) = value.as_text() {
            check_text(name, text)
                .map_err(|reason| CoreError::InvalidPropertyValue { name, reason })?;
        }
        Ok(value)
    }

    /// Parses a wire value according to the schema type of `name`.
    ///
    /// Returns `None` instead of failing so callers can skip malformed input.
    pub fn parse(name: PropertyName, raw: &str, is_local: bool) -> Option<Self> {
        match name.value_type() {
            ValueType::Bool => Property::<bool>::parse(name, raw, is_local).map(Self::Bool),
            ValueType::Int => Property::<i64>::parse(name, raw, is_local).map(Self::Int),
            ValueType::Timestamp => {
                Property::<Timestamp>::parse(name, raw, is_local).map(Self::Timestamp)
            }
            ValueType::Text => Property::<String>::parse(name, raw, is_local)
                .filter(|p| check_text(name, p.value()).is_ok())
                .map(Self::Text),
        }
    }

    /// The property name.
    pub fn name(&self) -> PropertyName {
        match self {
            PropertyValue::Bool(p) => p.name(),
            PropertyValue::Int(p) => p.name(),
            PropertyValue::Timestamp(p) => p.name(),
            PropertyValue::Text(p) => p.name(),
        }
    }

    /// Returns true if the value is defined on the owning node itself.
    pub fn is_local(&self) -> bool {
        match self {
            PropertyValue::Bool(p) => p.is_local(),
            PropertyValue::Int(p) => p.is_local(),
            PropertyValue::Timestamp(p) => p.is_local(),
            PropertyValue::Text(p) => p.is_local(),
        }
    }

    /// Type of the contained value.
    pub fn value_type(&self) -> ValueType {
        match self {
            PropertyValue::Bool(_) => ValueType::Bool,
            PropertyValue::Int(_) => ValueType::Int,
            PropertyValue::Timestamp(_) => ValueType::Timestamp,
            PropertyValue::Text(_) => ValueType::Text,
        }
    }

    /// Serialized value.
    pub fn to_wire(&self) -> String {
        match self {
            PropertyValue::Bool(p) => p.value().to_wire(),
            PropertyValue::Int(p) => p.value().to_wire(),
            PropertyValue::Timestamp(p) => p.value().to_wire(),
            PropertyValue::Text(p) => p.value().to_wire(),
        }
    }

    /// `name=value` token for a batched set instruction.
    pub fn set_token(&self) -> String {
        format!("{}={}", self.name(), self.to_wire())
    }

    /// The same value with a different locality.
    pub fn with_locality(&self, is_local: bool) -> Self {
        match self {
            PropertyValue::Bool(p) => Self::Bool(p.with_value(*p.value(), is_local)),
            PropertyValue::Int(p) => Self::Int(p.with_value(*p.value(), is_local)),
            PropertyValue::Timestamp(p) => Self::Timestamp(p.with_value(*p.value(), is_local)),
            PropertyValue::Text(p) => Self::Text(p.with_value(p.value().clone(), is_local)),
        }
    }

    /// Compares values, ignoring locality.
    pub fn same_value(&self, other: &PropertyValue) -> bool {
        self.name() == other.name() && self.with_locality(true) == other.with_locality(true)
    }

    /// Boolean value, if this is a boolean property.
    pub fn as_bool(&self) -> Option<bool> {
        bool::from_value(self).map(|p| *p.value())
    }

    /// Integer value, if this is an integer property.
    pub fn as_int(&self) -> Option<i64> {
        i64::from_value(self).map(|p| *p.value())
    }

    /// Timestamp value, if this is a timestamp property.
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        Timestamp::from_value(self).map(|p| *p.value())
    }

    /// String value, if this is a string property.
    pub fn as_text(&self) -> Option<&str> {
        String::from_value(self).map(|p| p.value().as_str())
    }

    /// Errors unless the contained type matches the schema for its name.
    pub fn check_type(&self) -> CoreResult<()> {
        let name = self.name();
        if self.value_type() == name.value_type() {
            Ok(())
        } else {
            Err(CoreError::PropertyTypeMismatch {
                name,
                expected: name.value_type().as_str(),
            })
        }
    }
}

/// Where a property's effective value comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertySource {
    /// Defined on the node itself.
    Local,
    /// No local definition anywhere up the chain.
    Default,
    /// Defined locally on the named ancestor.
    InheritedFrom(String),
}

impl fmt::Display for PropertySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertySource::Local => f.write_str("local"),
            PropertySource::Default => f.write_str("default"),
            PropertySource::InheritedFrom(name) => write!(f, "inherited from {}", name),
        }
    }
}
