// ============================================================================
// Schema Module
// ============================================================================
//
// Declarations -> resolved descriptors:
// - declaration: what a type states about itself
// - generic:     resolver hook completing erased properties
// - registry:    resolution, validation and caching
//
// ============================================================================

pub mod declaration;
pub mod generic;
pub mod property;
pub mod registry;

pub use declaration::{
    DeclaredProperty, DeclaredType, Link, LinkingObjects, List, ObjectModel, TypeDeclaration,
    TypeProbe,
};
pub use generic::{
    GenericPropertyKind, GenericPropertyMetadata, GenericPropertyResolver, StaticPropertyResolver,
};
pub use property::{PropertyDescriptor, SchemaDescriptor, table_name_for};
pub use registry::SchemaRegistry;
