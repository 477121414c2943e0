use crate::core::PropertyType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericPropertyKind {
    List,
    LinkingObjects,
    Optional,
    /// An optional that reflects as absent; its type comes from the
    /// declaration's [`TypeProbe`](super::TypeProbe), not from a value.
    NilLiteralOptional,
}

/// Metadata completing one erased property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericPropertyMetadata {
    pub property_name: String,
    pub kind: GenericPropertyKind,
    /// Declaration index of the property this record describes
    pub index: usize,
    /// Element type for lists, value type for optionals
    pub property_type: Option<PropertyType>,
    pub object_type: Option<String>,
    pub linked_property: Option<String>,
}

impl GenericPropertyMetadata {
    fn new(property_name: impl Into<String>, kind: GenericPropertyKind, index: usize) -> Self {
        Self {
            property_name: property_name.into(),
            kind,
            index,
            property_type: None,
            object_type: None,
            linked_property: None,
        }
    }

    pub fn list(property_name: impl Into<String>, element: PropertyType, index: usize) -> Self {
        let mut metadata = Self::new(property_name, GenericPropertyKind::List, index);
        metadata.property_type = Some(element);
        metadata
    }

    pub fn object_list(
        property_name: impl Into<String>,
        object_type: impl Into<String>,
        index: usize,
    ) -> Self {
        let mut metadata = Self::list(property_name, PropertyType::Object, index);
        metadata.object_type = Some(object_type.into());
        metadata
    }

    pub fn linking_objects(
        property_name: impl Into<String>,
        object_type: impl Into<String>,
        linked_property: impl Into<String>,
        index: usize,
    ) -> Self {
        let mut metadata = Self::new(property_name, GenericPropertyKind::LinkingObjects, index);
        metadata.property_type = Some(PropertyType::Object);
        metadata.object_type = Some(object_type.into());
        metadata.linked_property = Some(linked_property.into());
        metadata
    }

    pub fn optional(
        property_name: impl Into<String>,
        property_type: PropertyType,
        index: usize,
    ) -> Self {
        let mut metadata = Self::new(property_name, GenericPropertyKind::Optional, index);
        metadata.property_type = Some(property_type);
        metadata
    }

    pub fn nil_literal_optional(property_name: impl Into<String>, index: usize) -> Self {
        Self::new(property_name, GenericPropertyKind::NilLiteralOptional, index)
    }
}

/// Per-type hook supplying what reflection cannot see.
///
/// Consulted once, when the registry first resolves the type.
pub trait GenericPropertyResolver: Send + Sync {
    /// Declared but never persisted
    fn ignored_properties(&self) -> Vec<String> {
        Vec::new()
    }

    fn indexed_properties(&self) -> Vec<String> {
        Vec::new()
    }

    /// Forced non-optional
    fn required_properties(&self) -> Vec<String> {
        Vec::new()
    }

    /// One record per erased property. Must be in ascending declaration order.
    fn generic_properties(&self) -> Vec<GenericPropertyMetadata> {
        Vec::new()
    }
}

/// Resolver backed by fixed lists; what `#[derive(ObjectModel)]` emits.
#[derive(Debug, Clone, Default)]
pub struct StaticPropertyResolver {
    ignored: Vec<String>,
    indexed: Vec<String>,
    required: Vec<String>,
    generic: Vec<GenericPropertyMetadata>,
}

impl StaticPropertyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignore(mut self, name: impl Into<String>) -> Self {
        self.ignored.push(name.into());
        self
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.indexed.push(name.into());
        self
    }

    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    pub fn generic(mut self, metadata: GenericPropertyMetadata) -> Self {
        self.generic.push(metadata);
        self
    }
}

impl GenericPropertyResolver for StaticPropertyResolver {
    fn ignored_properties(&self) -> Vec<String> {
        self.ignored.clone()
    }

    fn indexed_properties(&self) -> Vec<String> {
        self.indexed.clone()
    }

    fn required_properties(&self) -> Vec<String> {
        self.required.clone()
    }

    fn generic_properties(&self) -> Vec<GenericPropertyMetadata> {
        self.generic.clone()
    }
}
