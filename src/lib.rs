// ============================================================================
// livemodel Library
// ============================================================================
//
// Managed-object accessors for an embedded object store: declared types are
// resolved into cached schemas, instances live either unmanaged or as live
// views of a session's rows, and per-object change notifications report
// property-level diffs after each commit.
//
// ============================================================================

pub mod config;
pub mod core;
pub mod notify;
pub mod object;
pub mod prelude;
pub mod schema;
pub mod session;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use config::SessionConfig;
pub use core::{
    CollectionKind, ObjectError, ObjectLink, PropertyType, Result, RowId, SchemaError, Value,
};
pub use notify::{
    NotificationToken, ObjectChange, ObjectChangeStream, PropertyChange, subscribe, unsubscribe,
};
pub use object::{
    Backlinks, ObjectAccessor, WeakObjectHandle, objects_are_equal, validated_value_for_property,
};
pub use schema::{
    DeclaredProperty, DeclaredType, GenericPropertyKind, GenericPropertyMetadata,
    GenericPropertyResolver, Link, LinkingObjects, List, ObjectModel, PropertyDescriptor,
    SchemaDescriptor, SchemaRegistry, StaticPropertyResolver, TypeDeclaration, TypeProbe,
};
pub use session::{Generation, HookId, Session, SessionId};
pub use storage::{InMemoryStorage, StorageEngine};

pub use livemodel_derive::ObjectModel;
