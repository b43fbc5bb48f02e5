//! Raw property ingestion.
//!
//! The agent streams `zfs get -H -p` style output into a
//! [`RawObjectCollector`]: one line per property, four tab-separated fields
//! `object, property, value, source`. Lines are grouped per object as they
//! arrive, from any number of concurrent streams. Once every stream has
//! finished, [`RawObjectCollector::fold_into`] decodes each object and
//! attaches it to an [`ObjectTree`], parents before children.
//!
//! Bad data never aborts the build. An object with a missing or unparseable
//! required property is skipped and reported; its descendants then fail
//! with [`IngestError::MissingParent`]. Pool roots that do not define every
//! inheritable property locally are reported as [`SchemaDefect`]s.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::error::{CoreError, CoreResult, IngestError};
use crate::names;
use crate::node::StorageNode;
use crate::property::{epoch, Property, PropertyName, PropertySource, PropertyValue};
use crate::tree::ObjectTree;
use crate::types::{Capacity, ObjectKind, PeriodKind};

/// Pseudo-property carrying the object kind.
pub const TYPE_PROPERTY: &str = "type";
/// Pseudo-property carrying available bytes.
pub const AVAILABLE_PROPERTY: &str = "available";
/// Pseudo-property carrying used bytes.
pub const USED_PROPERTY: &str = "used";

const UNSET: &str = "-";
const FIELD_SEPARATOR: char = '\t';
const INHERITED_PREFIX: &str = "inherited from ";

/// Source column of a raw property line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawPropertySource {
    /// `-`: not set anywhere, or a native read-only value.
    Native,
    /// `default`
    Default,
    /// `local` (or `received`)
    Local,
    /// `inherited from <ancestor>`
    Inherited(String),
}

impl RawPropertySource {
    /// Parses the source column. Returns `None` for anything unrecognised.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            UNSET => Some(RawPropertySource::Native),
            "default" => Some(RawPropertySource::Default),
            "local" | "received" => Some(RawPropertySource::Local),
            _ => raw
                .strip_prefix(INHERITED_PREFIX)
                .filter(|ancestor| !ancestor.is_empty())
                .map(|ancestor| RawPropertySource::Inherited(ancestor.to_string())),
        }
    }

    /// Returns true if the value is set on the object itself.
    pub fn is_local(&self) -> bool {
        matches!(self, RawPropertySource::Local)
    }
}

impl fmt::Display for RawPropertySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawPropertySource::Native => f.write_str(UNSET),
            RawPropertySource::Default => f.write_str("default"),
            RawPropertySource::Local => f.write_str("local"),
            RawPropertySource::Inherited(ancestor) => write!(f, "{}{}", INHERITED_PREFIX, ancestor),
        }
    }
}

/// One property of a raw object, still in wire form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawProperty {
    /// Property name as reported.
    pub name: String,
    /// Value as reported.
    pub value: String,
    /// Where the storage system says the value comes from.
    pub source: RawPropertySource,
}

impl RawProperty {
    /// True for `-` values with no source, i.e. never set anywhere.
    pub fn is_unset(&self) -> bool {
        self.source == RawPropertySource::Native && self.value == UNSET
    }
}

/// Parses one raw line into its object name and property.
pub fn parse_line(line: &str) -> Result<(String, RawProperty), IngestError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
    let &[object, name, value, source] = fields.as_slice() else {
        return Err(IngestError::MalformedLine {
            line: line.to_string(),
            fields: fields.len(),
        });
    };
    let source = RawPropertySource::parse(source).ok_or_else(|| IngestError::InvalidValue {
        object: object.to_string(),
        property: name.to_string(),
        value: source.to_string(),
    })?;
    Ok((
        object.to_string(),
        RawProperty {
            name: name.to_string(),
            value: value.to_string(),
            source,
        },
    ))
}

/// All raw properties reported for one object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawObject {
    name: String,
    properties: HashMap<String, RawProperty>,
}

impl RawObject {
    /// Creates an empty record.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
        }
    }

    /// Object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores a property. A repeated name replaces the earlier value.
    pub fn insert(&mut self, property: RawProperty) {
        self.properties.insert(property.name.clone(), property);
    }

    /// Looks up a property by wire name.
    pub fn property(&self, name: &str) -> Option<&RawProperty> {
        self.properties.get(name)
    }

    /// Number of properties collected.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns true if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Object kind from the `type` pseudo-property.
    pub fn kind(&self) -> Result<ObjectKind, IngestError> {
        let raw = self
            .property(TYPE_PROPERTY)
            .ok_or_else(|| self.missing(TYPE_PROPERTY))?;
        raw.value.parse().map_err(|_| IngestError::UnknownKind {
            object: self.name.clone(),
            value: raw.value.clone(),
        })
    }

    fn missing(&self, property: &str) -> IngestError {
        IngestError::MissingProperty {
            object: self.name.clone(),
            property: property.to_string(),
        }
    }

    fn invalid(&self, raw: &RawProperty) -> IngestError {
        IngestError::InvalidValue {
            object: self.name.clone(),
            property: raw.name.clone(),
            value: raw.value.clone(),
        }
    }

    fn required(&self, name: &str) -> Result<&RawProperty, IngestError> {
        self.property(name)
            .filter(|raw| !raw.is_unset())
            .ok_or_else(|| self.missing(name))
    }

    fn bytes(&self, name: &str) -> Result<u64, IngestError> {
        let raw = self.required(name)?;
        raw.value.trim().parse().map_err(|_| self.invalid(raw))
    }

    fn typed(&self, name: PropertyName, raw: &RawProperty, is_local: bool) -> Result<PropertyValue, IngestError> {
        PropertyValue::parse(name, &raw.value, is_local).ok_or_else(|| self.invalid(raw))
    }

    fn sort_key(&self) -> (usize, bool, &str) {
        let is_snapshot = self.name.contains(names::SNAPSHOT_SEPARATOR);
        (names::depth(&self.name), is_snapshot, &self.name)
    }
}

/// A pool root that does not define an inheritable property locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaDefect {
    /// The root object.
    pub object: String,
    /// The property lacking a local value.
    pub property: PropertyName,
}

impl fmt::Display for SchemaDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} has no local value for {}", self.object, self.property)
    }
}

/// Outcome of folding raw objects into a tree.
#[derive(Clone, Debug, Default)]
pub struct IngestReport {
    /// Objects built and attached.
    pub built: usize,
    /// Objects skipped because a node with the same name already existed.
    pub already_present: usize,
    /// Lines and objects rejected as malformed.
    pub skipped: Vec<IngestError>,
    /// Roots rejected for lacking schema properties.
    pub schema_defects: Vec<SchemaDefect>,
}

impl IngestReport {
    /// Returns true if nothing was skipped or defective.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.schema_defects.is_empty()
    }

    /// Fails with the first schema defect, if any.
    pub fn ensure_schema(&self) -> CoreResult<()> {
        match self.schema_defects.first() {
            Some(defect) => Err(CoreError::SchemaIntegrity {
                object: defect.object.clone(),
                property: defect.property,
            }),
            None => Ok(()),
        }
    }
}

enum Rejection {
    Malformed(IngestError),
    Schema(Vec<SchemaDefect>),
}

impl From<IngestError> for Rejection {
    fn from(err: IngestError) -> Self {
        Rejection::Malformed(err)
    }
}

struct Decoded {
    kind: ObjectKind,
    parent: Option<Arc<StorageNode>>,
    values: Vec<PropertyValue>,
    capacity: Capacity,
}

fn parent_property(
    raw: &RawObject,
    parent: &StorageNode,
    name: PropertyName,
) -> Result<PropertyValue, IngestError> {
    parent
        .property(name)
        .map(|value| value.with_locality(false))
        .map_err(|e| IngestError::InvalidParent {
            object: raw.name.clone(),
            reason: e.to_string(),
        })
}

/// Inheritable properties keep the reported locality. Inherited values are
/// taken from the parent node. `None` marks a root lacking a local value.
fn decode_inheritable(
    raw: &RawObject,
    name: PropertyName,
    parent: Option<&StorageNode>,
) -> Result<Option<PropertyValue>, IngestError> {
    let reported = raw.property(name.as_str());
    let Some(parent) = parent else {
        return match reported {
            Some(prop) if prop.source.is_local() => raw.typed(name, prop, true).map(Some),
            _ => Ok(None),
        };
    };

    let prop = raw.required(name.as_str())?;
    let value = raw.typed(name, prop, prop.source.is_local())?;
    if prop.source.is_local() {
        return Ok(Some(value));
    }
    let inherited = parent_property(raw, parent, name)?;
    if !inherited.same_value(&value) {
        debug!(object = %raw.name, property = %name, reported = %prop.value, parent = %inherited.to_wire(), "Reported inherited value differs from parent");
    }
    Ok(Some(inherited))
}

/// Last-snapshot timestamps: local on datasets and volumes, where anything
/// not set locally means "never"; mirrored from the parent on snapshots.
fn decode_last_snapshot(
    raw: &RawObject,
    name: PropertyName,
    kind: ObjectKind,
    parent: Option<&StorageNode>,
) -> Result<PropertyValue, IngestError> {
    if kind.is_snapshot() {
        let parent = parent.ok_or_else(|| IngestError::MissingParent {
            object: raw.name.clone(),
            parent: names::parent_name(&raw.name, kind).unwrap_or_default().to_string(),
        })?;
        return parent_property(raw, parent, name);
    }
    let prop = raw
        .property(name.as_str())
        .ok_or_else(|| raw.missing(name.as_str()))?;
    if prop.source.is_local() {
        raw.typed(name, prop, true)
    } else {
        Ok(PropertyValue::Timestamp(Property::new(name, epoch(), true)))
    }
}

/// Snapshot period and timestamp: required and always local.
fn decode_snapshot_local(raw: &RawObject, name: PropertyName) -> Result<PropertyValue, IngestError> {
    let prop = raw.required(name.as_str())?;
    let value = raw.typed(name, prop, true)?;
    if name == PropertyName::SnapshotPeriod
        && value.as_text().and_then(|p| p.parse::<PeriodKind>().ok()).is_none()
    {
        return Err(raw.invalid(prop));
    }
    Ok(value)
}

fn decode(raw: &RawObject, tree: &ObjectTree) -> Result<Decoded, Rejection> {
    let kind = raw.kind()?;
    names::validate_name(&raw.name, kind).map_err(|e| IngestError::InvalidName {
        object: raw.name.clone(),
        reason: e.to_string(),
    })?;

    let parent = match names::parent_name(&raw.name, kind) {
        None => None,
        Some(parent_name) => Some(tree.get(parent_name).ok_or_else(|| {
            IngestError::MissingParent {
                object: raw.name.clone(),
                parent: parent_name.to_string(),
            }
        })?),
    };
    if let Some(parent) = &parent {
        let allowed = if kind.is_snapshot() {
            !parent.kind().is_snapshot()
        } else {
            parent.kind().can_own_children()
        };
        if !allowed {
            return Err(IngestError::InvalidParent {
                object: raw.name.clone(),
                reason: format!("a {} cannot own a {}", parent.kind(), kind),
            }
            .into());
        }
    }

    let capacity = if kind.is_snapshot() {
        Capacity::default()
    } else {
        Capacity::new(raw.bytes(AVAILABLE_PROPERTY)?, raw.bytes(USED_PROPERTY)?)
    };

    let parent_ref = parent.as_deref();
    let mut values = Vec::new();
    let mut defects = Vec::new();
    for name in PropertyName::ALL.into_iter().filter(|n| n.applies_to(kind)) {
        if name.is_inheritable() {
            match decode_inheritable(raw, name, parent_ref)? {
                Some(value) => values.push(value),
                None => defects.push(SchemaDefect {
                    object: raw.name.clone(),
                    property: name,
                }),
            }
        } else if name.is_last_snapshot() {
            values.push(decode_last_snapshot(raw, name, kind, parent_ref)?);
        } else {
            values.push(decode_snapshot_local(raw, name)?);
        }
    }
    if !defects.is_empty() {
        return Err(Rejection::Schema(defects));
    }

    Ok(Decoded {
        kind,
        parent,
        values,
        capacity,
    })
}

fn attach(raw: &RawObject, decoded: Decoded, tree: &ObjectTree) -> Result<(), IngestError> {
    let structural = |e: CoreError| IngestError::InvalidParent {
        object: raw.name.clone(),
        reason: e.to_string(),
    };
    let node = StorageNode::with_properties(
        &raw.name,
        decoded.kind,
        decoded.parent.as_ref(),
        decoded.values,
        decoded.capacity,
    )
    .map_err(structural)?;
    match decoded.parent {
        None => tree.insert_root(node),
        Some(_) => tree.attach(node),
    }
    .map_err(structural)?;
    Ok(())
}

/// Groups raw lines by object. Safe to feed from several streams at once.
#[derive(Debug, Default)]
pub struct RawObjectCollector {
    objects: DashMap<String, RawObject>,
    rejected: Mutex<Vec<IngestError>>,
}

impl RawObjectCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one raw line. Blank lines are ignored; malformed ones are recorded.
    pub fn push_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match parse_line(line) {
            Ok((object, property)) => {
                trace!(object = %object, property = %property.name, "Collected raw property");
                self.objects
                    .entry(object.clone())
                    .or_insert_with(|| RawObject::new(object))
                    .insert(property);
            }
            Err(e) => {
                warn!(error = %e, "Skipping raw line");
                self.rejected.lock().push(e);
            }
        }
    }

    /// Adds every line of an iterator.
    pub fn extend<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.push_line(line.as_ref());
        }
    }

    /// Number of distinct objects seen.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if no object has been seen.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Builds a fresh tree from everything collected.
    pub fn build_tree(self) -> (ObjectTree, IngestReport) {
        let tree = ObjectTree::new();
        let report = self.fold_into(&tree);
        (tree, report)
    }

    /// Decodes every collected object and attaches it to `tree`.
    ///
    /// Objects are processed parents first. A name already present in the
    /// tree is left untouched.
    pub fn fold_into(self, tree: &ObjectTree) -> IngestReport {
        let mut report = IngestReport {
            skipped: self.rejected.into_inner(),
            ..IngestReport::default()
        };
        let mut objects: Vec<RawObject> = self.objects.into_iter().map(|(_, o)| o).collect();
        objects.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        for raw in &objects {
            if tree.contains(&raw.name) {
                report.already_present += 1;
                continue;
            }
            let outcome = match decode(raw, tree) {
                Ok(decoded) => attach(raw, decoded, tree).map_err(Rejection::Malformed),
                Err(rejection) => Err(rejection),
            };
            match outcome {
                Ok(()) => report.built += 1,
                Err(Rejection::Malformed(e)) => {
                    warn!(object = %raw.name, error = %e, "Skipping object");
                    report.skipped.push(e);
                }
                Err(Rejection::Schema(defects)) => {
                    for defect in defects {
                        error!(object = %defect.object, property = %defect.property, "Pool root lacks a local schema property");
                        report.schema_defects.push(defect);
                    }
                }
            }
        }

        debug!(built = report.built, skipped = report.skipped.len(), schema_defects = report.schema_defects.len(), "Ingestion finished");
        report
    }
}

/// Renders a node in the raw line format, as the storage system would report it.
pub fn raw_lines(node: &Arc<StorageNode>) -> Vec<String> {
    let line = |property: &str, value: &str, source: &RawPropertySource| {
        format!(
            "{}\t{}\t{}\t{}",
            node.name(),
            property,
            value,
            source
        )
    };

    let mut lines = vec![line(
        TYPE_PROPERTY,
        node.kind().as_str(),
        &RawPropertySource::Native,
    )];
    if !node.kind().is_snapshot() {
        let capacity = node.capacity();
        lines.push(line(
            AVAILABLE_PROPERTY,
            &capacity.bytes_available.to_string(),
            &RawPropertySource::Native,
        ));
        lines.push(line(
            USED_PROPERTY,
            &capacity.bytes_used.to_string(),
            &RawPropertySource::Native,
        ));
    }
    for value in node.properties() {
        let source = match node.property_source(value.name()) {
            Ok(PropertySource::Local) => RawPropertySource::Local,
            Ok(PropertySource::InheritedFrom(ancestor)) => RawPropertySource::Inherited(ancestor),
            _ => RawPropertySource::Default,
        };
        lines.push(line(value.name().as_str(), &value.to_wire(), &source));
    }
    lines
}
