//! Error types for the snapkeep core.
//!
//! Two families are kept apart. [`CoreError`] signals a caller defect or a
//! schema-integrity problem and is returned to the caller. [`IngestError`]
//! describes bad external data; it is scoped to a single object, logged, and
//! collected into the ingestion report instead of aborting the tree build.

use thiserror::Error;

use crate::property::PropertyName;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Structural and consistency errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A node name does not match the naming grammar for its kind.
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Which grammar rule was violated.
        reason: &'static str,
    },

    /// A node was attached to a parent it does not reference.
    #[error("'{child}' does not reference '{parent}' as its parent")]
    ParentMismatch {
        /// Name of the node being attached.
        child: String,
        /// Name of the node it was attached to.
        parent: String,
    },

    /// The operation is not valid for this node.
    #[error("invalid operation on '{object}': {reason}")]
    InvalidOperation {
        /// Name of the node.
        object: String,
        /// Description of the violation.
        reason: String,
    },

    /// A property name is not part of the schema, or not defined for the node kind.
    #[error("unknown property: {0}")]
    UnknownProperty(String),

    /// A property was read or written with the wrong value type.
    #[error("property {name} holds a {expected} value")]
    PropertyTypeMismatch {
        /// The property.
        name: PropertyName,
        /// The type the schema declares.
        expected: &'static str,
    },

    /// A value the property cannot hold.
    #[error("invalid value for {name}: {reason}")]
    InvalidPropertyValue {
        /// The property.
        name: PropertyName,
        /// Why the value was rejected.
        reason: &'static str,
    },

    /// A pool root lacks a local definition of a required property.
    #[error("schema integrity violation: {object} has no local value for {property}")]
    SchemaIntegrity {
        /// The root object.
        object: String,
        /// The property that could not be resolved.
        property: PropertyName,
    },

    /// A naming/timing template is unusable.
    #[error("invalid template '{template}': {reason}")]
    InvalidTemplate {
        /// Template name.
        template: String,
        /// Description of the problem.
        reason: String,
    },
}

/// Object-scoped, non-fatal ingestion errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// A raw line did not have exactly four tab-separated fields.
    #[error("malformed line (expected 4 fields, got {fields}): {line:?}")]
    MalformedLine {
        /// The offending line.
        line: String,
        /// Number of fields found.
        fields: usize,
    },

    /// The `type` pseudo-property carried a value that is not a known kind.
    #[error("{object}: unknown object type '{value}'")]
    UnknownKind {
        /// Object name.
        object: String,
        /// The raw type value.
        value: String,
    },

    /// A required property was absent or unset.
    #[error("{object}: missing required property {property}")]
    MissingProperty {
        /// Object name.
        object: String,
        /// Property name as it appears on the wire.
        property: String,
    },

    /// A property value failed to parse.
    #[error("{object}: invalid value '{value}' for {property}")]
    InvalidValue {
        /// Object name.
        object: String,
        /// Property name as it appears on the wire.
        property: String,
        /// The raw value.
        value: String,
    },

    /// The parent object was not present in the tree.
    #[error("{object}: parent '{parent}' is not present")]
    MissingParent {
        /// Object name.
        object: String,
        /// Expected parent name.
        parent: String,
    },

    /// The parent exists but cannot own this object.
    #[error("{object}: {reason}")]
    InvalidParent {
        /// Object name.
        object: String,
        /// Why the parent was rejected.
        reason: String,
    },

    /// The object name does not satisfy the naming grammar.
    #[error("{object}: {reason}")]
    InvalidName {
        /// Object name.
        object: String,
        /// Grammar violation.
        reason: String,
    },
}

impl IngestError {
    /// Name of the object this error is scoped to, if any.
    pub fn object(&self) -> Option<&str> {
        match self {
            IngestError::MalformedLine { .. } => None,
            IngestError::UnknownKind { object, .. }
            | IngestError::MissingProperty { object, .. }
            | IngestError::InvalidValue { object, .. }
            | IngestError::MissingParent { object, .. }
            | IngestError::InvalidParent { object, .. }
            | IngestError::InvalidName { object, .. } => Some(object),
        }
    }
}
