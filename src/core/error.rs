use thiserror::Error;

/// Failures raised while turning a declared type into a [`SchemaDescriptor`].
///
/// A schema error is fatal for the type it names: the registry never caches
/// a descriptor for a type whose resolution failed.
///
/// [`SchemaDescriptor`]: crate::schema::SchemaDescriptor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Type '{0}' is not registered")]
    UnknownType(String),

    #[error("Property '{property}' is declared more than once on '{type_name}'")]
    DuplicateProperty { type_name: String, property: String },

    #[error("Ignored property '{property}' on '{type_name}' cannot also be {conflict}")]
    IgnoredConflict {
        type_name: String,
        property: String,
        conflict: &'static str,
    },

    #[error("'{type_name}' lists unknown property '{property}' as {list}")]
    UnknownOverride {
        type_name: String,
        property: String,
        list: &'static str,
    },

    #[error("Linking objects property '{property}' on '{type_name}': {reason}")]
    InvalidLinkingObjects {
        type_name: String,
        property: String,
        reason: String,
    },

    #[error("Generic property metadata for '{type_name}' is out of order: {detail}")]
    GenericMetadataOrder { type_name: String, detail: String },

    #[error("Generic property '{property}' on '{type_name}': {reason}")]
    InvalidGenericProperty {
        type_name: String,
        property: String,
        reason: String,
    },

    #[error("Property '{property}' on '{type_name}' of type {property_type} cannot be indexed")]
    Unindexable {
        type_name: String,
        property: String,
        property_type: String,
    },

    #[error("Link property '{property}' on '{type_name}' cannot be required")]
    RequiredLink { type_name: String, property: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObjectError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Row {row} in table '{table}' no longer exists")]
    StaleRow { table: String, row: u64 },

    #[error("Object accessor is detached: {0}")]
    DetachedAccessor(String),

    #[error("Property '{property}' is not defined on '{type_name}'")]
    UnknownProperty { type_name: String, property: String },

    #[error("Cannot modify managed objects outside of a write transaction: {0}")]
    ReadOnlySession(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("A write transaction is already in progress")]
    TransactionInProgress,

    #[error("Lock error: {0}")]
    LockError(String),
}

impl ObjectError {
    /// Whether the caller can retry after correcting input or re-fetching.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::StaleRow { .. }
                | Self::DetachedAccessor(_)
                | Self::ReadOnlySession(_)
                | Self::TransactionInProgress
        )
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, Self::StaleRow { .. } | Self::DetachedAccessor(_))
    }
}

pub type Result<T> = std::result::Result<T, ObjectError>;

impl<T> From<std::sync::PoisonError<T>> for ObjectError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
