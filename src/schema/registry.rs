use super::declaration::{DeclaredType, ObjectModel, TypeDeclaration};
use super::generic::{GenericPropertyKind, GenericPropertyMetadata, GenericPropertyResolver};
use super::property::{PropertyDescriptor, SchemaDescriptor};
use crate::core::{CollectionKind, PropertyType, Result, SchemaError};
use lazy_static::lazy_static;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, debug_span, warn};

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<SchemaRegistry> = Arc::new(SchemaRegistry::new());
}

#[derive(Clone)]
struct Registration {
    declaration: TypeDeclaration,
    resolver: Option<Arc<dyn GenericPropertyResolver>>,
}

/// Host-supplied overrides, fetched from the resolver once per resolution.
#[derive(Default)]
struct Overrides {
    ignored: Vec<String>,
    indexed: Vec<String>,
    required: Vec<String>,
    generic: Vec<GenericPropertyMetadata>,
}

impl Overrides {
    fn from_resolver(resolver: Option<&Arc<dyn GenericPropertyResolver>>) -> Self {
        match resolver {
            Some(resolver) => Self {
                ignored: resolver.ignored_properties(),
                indexed: resolver.indexed_properties(),
                required: resolver.required_properties(),
                generic: resolver.generic_properties(),
            },
            None => Self::default(),
        }
    }
}

/// Registry of declared types and their resolved, cached descriptors.
///
/// Declarations are registered up front; [`resolve`](Self::resolve) builds a
/// type's descriptor on first use and caches it until the type is
/// re-registered, [`invalidate`](Self::invalidate)d or the registry is
/// [`reset`](Self::reset). A failed resolution is never cached.
pub struct SchemaRegistry {
    registrations: RwLock<HashMap<String, Registration>>,
    cache: RwLock<HashMap<String, Arc<SchemaDescriptor>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide registry shared by sessions opened without their own.
    pub fn global() -> &'static Arc<SchemaRegistry> {
        &GLOBAL_REGISTRY
    }

    /// Register (or re-register) a declaration with its resolver hook.
    pub fn register(
        &self,
        declaration: TypeDeclaration,
        resolver: Option<Arc<dyn GenericPropertyResolver>>,
    ) -> Result<()> {
        let type_name = declaration.type_name.clone();
        let replaced = {
            let mut registrations = self.registrations.write()?;
            registrations
                .insert(
                    type_name.clone(),
                    Registration {
                        declaration,
                        resolver,
                    },
                )
                .is_some()
        };
        if replaced {
            warn!(type_name = %type_name, "re-registering type, cached schema dropped");
            self.cache.write()?.remove(&type_name);
        }
        Ok(())
    }

    pub fn register_model<T: ObjectModel>(&self) -> Result<()> {
        self.register(T::declaration(), T::property_resolver())
    }

    pub fn is_registered(&self, type_name: &str) -> Result<bool> {
        Ok(self.registrations.read()?.contains_key(type_name))
    }

    pub fn registered_types(&self) -> Result<Vec<String>> {
        let mut names = self
            .registrations
            .read()?
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    /// Resolve the descriptor for `type_name`, building it on first use.
    pub fn resolve(&self, type_name: &str) -> Result<Arc<SchemaDescriptor>> {
        if let Some(descriptor) = self.cache.read()?.get(type_name) {
            return Ok(descriptor.clone());
        }

        let span = debug_span!("schema.resolve", type_name = %type_name);
        let _enter = span.enter();

        // held until the descriptor is cached, so a concurrent re-register or
        // reset cannot be overtaken by a descriptor built from the old shape
        let registrations = self.registrations.read()?;
        let registration = registrations
            .get(type_name)
            .ok_or_else(|| SchemaError::UnknownType(type_name.to_string()))?;
        let descriptor = Arc::new(build_descriptor(registration, &registrations)?);

        debug!(
            type_name = %type_name,
            properties = descriptor.properties().len(),
            "resolved schema"
        );

        let mut cache = self.cache.write()?;
        let descriptor = cache
            .entry(type_name.to_string())
            .or_insert(descriptor)
            .clone();
        drop(cache);
        drop(registrations);
        Ok(descriptor)
    }

    /// Register `T` if needed and resolve its descriptor.
    pub fn resolve_model<T: ObjectModel>(&self) -> Result<Arc<SchemaDescriptor>> {
        if !self.is_registered(T::TYPE_NAME)? {
            self.register_model::<T>()?;
        }
        self.resolve(T::TYPE_NAME)
    }

    pub fn invalidate(&self, type_name: &str) -> Result<()> {
        self.cache.write()?.remove(type_name);
        Ok(())
    }

    /// Drop every registration and cached descriptor.
    pub fn reset(&self) -> Result<()> {
        self.registrations.write()?.clear();
        self.cache.write()?.clear();
        Ok(())
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_descriptor(
    registration: &Registration,
    registrations: &HashMap<String, Registration>,
) -> Result<SchemaDescriptor> {
    let declaration = &registration.declaration;
    let type_name = declaration.type_name.as_str();
    let overrides = Overrides::from_resolver(registration.resolver.as_ref());

    let mut seen = HashSet::new();
    for property in &declaration.properties {
        if !seen.insert(property.name.as_str()) {
            return Err(SchemaError::DuplicateProperty {
                type_name: type_name.to_string(),
                property: property.name.clone(),
            }
            .into());
        }
    }

    let ignored: BTreeSet<String> = overrides.ignored.iter().cloned().collect();
    check_override_names(type_name, &seen, &overrides.ignored, "ignored")?;
    check_override_names(type_name, &seen, &overrides.indexed, "indexed")?;
    check_override_names(type_name, &seen, &overrides.required, "required")?;
    for (list, conflict) in [(&overrides.indexed, "indexed"), (&overrides.required, "required")] {
        if let Some(name) = list.iter().find(|name| ignored.contains(*name)) {
            return Err(SchemaError::IgnoredConflict {
                type_name: type_name.to_string(),
                property: name.clone(),
                conflict,
            }
            .into());
        }
    }

    check_generic_order(type_name, &overrides.generic)?;

    let mut metadata = overrides.generic.iter().peekable();
    let mut properties = Vec::with_capacity(declaration.properties.len());
    for (index, declared) in declaration.properties.iter().enumerate() {
        let next_is_ours = metadata.peek().is_some_and(|m| m.index == index);
        let mut property = match &declared.declared {
            DeclaredType::Erased { probe } => {
                let record = metadata.next().filter(|_| next_is_ours).ok_or_else(|| {
                    SchemaError::GenericMetadataOrder {
                        type_name: type_name.to_string(),
                        detail: format!(
                            "no metadata for generic property '{}' at index {}",
                            declared.name, index
                        ),
                    }
                })?;
                if record.property_name != declared.name {
                    return Err(SchemaError::GenericMetadataOrder {
                        type_name: type_name.to_string(),
                        detail: format!(
                            "metadata '{}' at index {} does not match declared property '{}'",
                            record.property_name, index, declared.name
                        ),
                    }
                    .into());
                }
                from_generic(type_name, &declared.name, record, probe.as_ref())?
            }
            _ if next_is_ours => {
                return Err(SchemaError::InvalidGenericProperty {
                    type_name: type_name.to_string(),
                    property: declared.name.clone(),
                    reason: "metadata supplied for a non-generic property".to_string(),
                }
                .into());
            }
            DeclaredType::Scalar {
                property_type,
                optional,
            } => {
                let mut property = PropertyDescriptor::new(&declared.name, *property_type);
                property.optional = *optional;
                property
            }
            DeclaredType::Object { target } => {
                let mut property = PropertyDescriptor::new(&declared.name, PropertyType::Object);
                property.optional = true;
                property.object_type = Some(target.clone());
                property
            }
            DeclaredType::Opaque => {
                if !ignored.contains(&declared.name) {
                    return Err(SchemaError::InvalidGenericProperty {
                        type_name: type_name.to_string(),
                        property: declared.name.clone(),
                        reason: "type has no storage representation; mark it ignored".to_string(),
                    }
                    .into());
                }
                continue;
            }
        };

        if ignored.contains(&declared.name) {
            continue;
        }
        property.has_default = declared.has_default;
        properties.push(property);
    }

    if let Some(extra) = metadata.next() {
        return Err(SchemaError::GenericMetadataOrder {
            type_name: type_name.to_string(),
            detail: format!(
                "metadata '{}' at index {} matches no generic property",
                extra.property_name, extra.index
            ),
        }
        .into());
    }

    for name in &overrides.required {
        if let Some(property) = properties.iter_mut().find(|p| &p.name == name) {
            if property.is_link() {
                return Err(SchemaError::RequiredLink {
                    type_name: type_name.to_string(),
                    property: name.clone(),
                }
                .into());
            }
            if property.collection == CollectionKind::None {
                property.optional = false;
            }
        }
    }

    for name in &overrides.indexed {
        if let Some(property) = properties.iter_mut().find(|p| &p.name == name) {
            if property.collection != CollectionKind::None
                || !property.property_type.is_indexable()
            {
                let property_type = match property.collection {
                    CollectionKind::None => property.property_type.to_string(),
                    _ => format!("list<{}>", property.property_type),
                };
                return Err(SchemaError::Unindexable {
                    type_name: type_name.to_string(),
                    property: name.clone(),
                    property_type,
                }
                .into());
            }
            property.indexed = true;
        }
    }

    for property in properties.iter().filter(|p| p.is_computed()) {
        check_linking_objects(type_name, property, registrations)?;
    }

    let mut column = 0;
    for property in properties.iter_mut().filter(|p| !p.is_computed()) {
        property.column = Some(column);
        column += 1;
    }

    Ok(SchemaDescriptor::new(
        type_name.to_string(),
        properties,
        ignored,
    ))
}

fn check_override_names(
    type_name: &str,
    declared: &HashSet<&str>,
    names: &[String],
    list: &'static str,
) -> Result<()> {
    match names.iter().find(|name| !declared.contains(name.as_str())) {
        Some(name) => Err(SchemaError::UnknownOverride {
            type_name: type_name.to_string(),
            property: name.clone(),
            list,
        }
        .into()),
        None => Ok(()),
    }
}

/// Records must be strictly ascending by declaration index.
fn check_generic_order(type_name: &str, metadata: &[GenericPropertyMetadata]) -> Result<()> {
    for pair in metadata.windows(2) {
        if pair[1].index <= pair[0].index {
            return Err(SchemaError::GenericMetadataOrder {
                type_name: type_name.to_string(),
                detail: format!(
                    "'{}' at index {} follows '{}' at index {}",
                    pair[1].property_name, pair[1].index, pair[0].property_name, pair[0].index
                ),
            }
            .into());
        }
    }
    Ok(())
}

fn from_generic(
    type_name: &str,
    name: &str,
    record: &GenericPropertyMetadata,
    probe: Option<&super::TypeProbe>,
) -> Result<PropertyDescriptor> {
    let invalid = |reason: &str| SchemaError::InvalidGenericProperty {
        type_name: type_name.to_string(),
        property: name.to_string(),
        reason: reason.to_string(),
    };

    match record.kind {
        GenericPropertyKind::List => {
            let element = record
                .property_type
                .ok_or_else(|| invalid("list metadata has no element type"))?;
            if element == PropertyType::Object && record.object_type.is_none() {
                return Err(invalid("object list metadata has no target type").into());
            }
            let mut property = PropertyDescriptor::new(name, element);
            property.collection = CollectionKind::List;
            property.object_type = record.object_type.clone();
            Ok(property)
        }
        GenericPropertyKind::LinkingObjects => {
            let (Some(target), Some(linked)) = (&record.object_type, &record.linked_property)
            else {
                return Err(SchemaError::InvalidLinkingObjects {
                    type_name: type_name.to_string(),
                    property: name.to_string(),
                    reason: "metadata must name a target type and linked property".to_string(),
                }
                .into());
            };
            let mut property = PropertyDescriptor::new(name, PropertyType::Object);
            property.collection = CollectionKind::LinkingObjects;
            property.object_type = Some(target.clone());
            property.linked_property = Some(linked.clone());
            Ok(property)
        }
        GenericPropertyKind::Optional => {
            let property_type = record
                .property_type
                .ok_or_else(|| invalid("optional metadata has no value type"))?;
            if property_type == PropertyType::Object {
                return Err(invalid("object optionals are declared as links").into());
            }
            let mut property = PropertyDescriptor::new(name, property_type);
            property.optional = true;
            Ok(property)
        }
        GenericPropertyKind::NilLiteralOptional => {
            let probe = probe.ok_or_else(|| invalid("nil-literal optional has no type probe"))?;
            if probe.property_type == PropertyType::Object && probe.object_type.is_none() {
                return Err(invalid("nil-literal optional link has no target type").into());
            }
            let mut property = PropertyDescriptor::new(name, probe.property_type);
            property.optional = true;
            property.object_type = probe.object_type.clone();
            Ok(property)
        }
    }
}

/// The target type must be registered and its linked property must be a
/// link (single or list) back to `type_name`.
fn check_linking_objects(
    type_name: &str,
    property: &PropertyDescriptor,
    registrations: &HashMap<String, Registration>,
) -> Result<()> {
    let fail = |reason: String| -> Result<()> {
        Err(SchemaError::InvalidLinkingObjects {
            type_name: type_name.to_string(),
            property: property.name.clone(),
            reason,
        }
        .into())
    };

    let target = property.object_type.as_deref().unwrap_or_default();
    let linked = property.linked_property.as_deref().unwrap_or_default();
    let Some(registration) = registrations.get(target) else {
        return fail(format!("target type '{}' is not registered", target));
    };
    let Some((index, declared)) = registration.declaration.find(linked) else {
        return fail(format!("'{}' has no property '{}'", target, linked));
    };

    let link_target = match &declared.declared {
        DeclaredType::Object { target } => Some(target.clone()),
        DeclaredType::Erased { probe } => registration
            .resolver
            .as_ref()
            .and_then(|resolver| {
                resolver
                    .generic_properties()
                    .into_iter()
                    .find(|m| m.index == index && m.property_name == linked)
            })
            .and_then(|m| match m.kind {
                GenericPropertyKind::List => m.object_type,
                GenericPropertyKind::NilLiteralOptional => {
                    probe.as_ref().and_then(|p| p.object_type.clone())
                }
                _ => None,
            }),
        _ => None,
    };

    match link_target {
        Some(link_target) if link_target == type_name => Ok(()),
        Some(link_target) => fail(format!(
            "'{}.{}' links to '{}', not '{}'",
            target, linked, link_target, type_name
        )),
        None => fail(format!("'{}.{}' is not a link property", target, linked)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ObjectError;
    use crate::schema::{DeclaredProperty, StaticPropertyResolver, TypeProbe};

    fn person() -> TypeDeclaration {
        TypeDeclaration::new("Person")
            .property(DeclaredProperty::scalar("name", PropertyType::Text))
            .property(DeclaredProperty::erased("dogs"))
            .property(DeclaredProperty::erased("age"))
    }

    fn person_resolver() -> Arc<dyn GenericPropertyResolver> {
        Arc::new(
            StaticPropertyResolver::new()
                .generic(GenericPropertyMetadata::object_list("dogs", "Dog", 1))
                .generic(GenericPropertyMetadata::optional("age", PropertyType::Integer, 2)),
        )
    }

    fn dog() -> TypeDeclaration {
        TypeDeclaration::new("Dog")
            .property(DeclaredProperty::scalar("name", PropertyType::Text))
            .property(DeclaredProperty::probed("owner", TypeProbe::object("Person")))
            .property(DeclaredProperty::erased("walkers"))
    }

    fn dog_resolver() -> Arc<dyn GenericPropertyResolver> {
        Arc::new(
            StaticPropertyResolver::new()
                .index("name")
                .generic(GenericPropertyMetadata::nil_literal_optional("owner", 1))
                .generic(GenericPropertyMetadata::linking_objects(
                    "walkers", "Person", "dogs", 2,
                )),
        )
    }

    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry.register(person(), Some(person_resolver())).unwrap();
        registry.register(dog(), Some(dog_resolver())).unwrap();
        registry
    }

    fn schema_error(result: Result<Arc<SchemaDescriptor>>) -> SchemaError {
        match result {
            Err(ObjectError::Schema(err)) => err,
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_zips_generic_metadata() {
        let registry = registry();
        let dog = registry.resolve("Dog").unwrap();

        let owner = dog.property("owner").unwrap();
        assert!(owner.is_link());
        assert!(owner.optional);
        assert_eq!(owner.object_type.as_deref(), Some("Person"));

        let walkers = dog.property("walkers").unwrap();
        assert!(walkers.is_computed());
        assert_eq!(walkers.column, None);
        assert_eq!(walkers.linked_property.as_deref(), Some("dogs"));

        assert!(dog.property("name").unwrap().indexed);
        assert_eq!(dog.column_count(), 2);
    }

    #[test]
    fn test_resolve_is_cached() {
        let registry = registry();
        let first = registry.resolve("Person").unwrap();
        let second = registry.resolve("Person").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        registry.invalidate("Person").unwrap();
        let third = registry.resolve("Person").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(first, third);
    }

    #[test]
    fn test_out_of_order_metadata_rejected() {
        let registry = SchemaRegistry::new();
        let resolver = StaticPropertyResolver::new()
            .generic(GenericPropertyMetadata::optional("age", PropertyType::Integer, 2))
            .generic(GenericPropertyMetadata::object_list("dogs", "Dog", 1));
        registry.register(person(), Some(Arc::new(resolver))).unwrap();

        assert!(matches!(
            schema_error(registry.resolve("Person")),
            SchemaError::GenericMetadataOrder { .. }
        ));
        // a failed resolution leaves nothing behind
        registry.register(person(), Some(person_resolver())).unwrap();
        registry.register(dog(), Some(dog_resolver())).unwrap();
        assert!(registry.resolve("Person").is_ok());
    }

    #[test]
    fn test_missing_metadata_rejected() {
        let registry = SchemaRegistry::new();
        registry.register(person(), None).unwrap();
        assert!(matches!(
            schema_error(registry.resolve("Person")),
            SchemaError::GenericMetadataOrder { .. }
        ));
    }

    #[test]
    fn test_duplicate_property_rejected() {
        let registry = SchemaRegistry::new();
        let declaration = TypeDeclaration::new("Cat")
            .property(DeclaredProperty::scalar("name", PropertyType::Text))
            .property(DeclaredProperty::optional("name", PropertyType::Text));
        registry.register(declaration, None).unwrap();
        assert!(matches!(
            schema_error(registry.resolve("Cat")),
            SchemaError::DuplicateProperty { .. }
        ));
    }

    #[test]
    fn test_ignored_and_indexed_conflict() {
        let registry = SchemaRegistry::new();
        let declaration = TypeDeclaration::new("Cat")
            .property(DeclaredProperty::scalar("name", PropertyType::Text))
            .property(DeclaredProperty::opaque("cache"));
        let resolver = StaticPropertyResolver::new().ignore("name").index("name");
        registry.register(declaration, Some(Arc::new(resolver))).unwrap();
        assert!(matches!(
            schema_error(registry.resolve("Cat")),
            SchemaError::IgnoredConflict { conflict: "indexed", .. }
        ));
    }

    #[test]
    fn test_opaque_property_must_be_ignored() {
        let registry = SchemaRegistry::new();
        let declaration = TypeDeclaration::new("Cat")
            .property(DeclaredProperty::scalar("name", PropertyType::Text))
            .property(DeclaredProperty::opaque("cache"));
        registry.register(declaration.clone(), None).unwrap();
        assert!(registry.resolve("Cat").is_err());

        let resolver = StaticPropertyResolver::new().ignore("cache");
        registry.register(declaration, Some(Arc::new(resolver))).unwrap();
        let cat = registry.resolve("Cat").unwrap();
        assert!(cat.property("cache").is_none());
        assert!(cat.is_ignored("cache"));
    }

    #[test]
    fn test_linking_objects_target_checked() {
        let registry = SchemaRegistry::new();
        registry.register(dog(), Some(dog_resolver())).unwrap();
        assert!(matches!(
            schema_error(registry.resolve("Dog")),
            SchemaError::InvalidLinkingObjects { .. }
        ));

        let wrong_property = StaticPropertyResolver::new()
            .generic(GenericPropertyMetadata::nil_literal_optional("owner", 1))
            .generic(GenericPropertyMetadata::linking_objects(
                "walkers", "Person", "name", 2,
            ));
        registry.register(person(), Some(person_resolver())).unwrap();
        registry.register(dog(), Some(Arc::new(wrong_property))).unwrap();
        assert!(matches!(
            schema_error(registry.resolve("Dog")),
            SchemaError::InvalidLinkingObjects { .. }
        ));
    }

    #[test]
    fn test_required_override() {
        let registry = SchemaRegistry::new();
        let declaration = TypeDeclaration::new("Cat")
            .property(DeclaredProperty::optional("name", PropertyType::Text))
            .property(DeclaredProperty::object("owner", "Person"));
        registry
            .register(
                declaration.clone(),
                Some(Arc::new(StaticPropertyResolver::new().require("name"))),
            )
            .unwrap();
        let cat = registry.resolve("Cat").unwrap();
        assert!(!cat.property("name").unwrap().optional);
        assert!(cat.is_required("name"));

        registry
            .register(
                declaration,
                Some(Arc::new(StaticPropertyResolver::new().require("owner"))),
            )
            .unwrap();
        assert!(matches!(
            schema_error(registry.resolve("Cat")),
            SchemaError::RequiredLink { .. }
        ));
    }

    #[test]
    fn test_unindexable_property() {
        let registry = SchemaRegistry::new();
        let declaration = TypeDeclaration::new("Cat")
            .property(DeclaredProperty::scalar("weight", PropertyType::Float));
        registry
            .register(
                declaration,
                Some(Arc::new(StaticPropertyResolver::new().index("weight"))),
            )
            .unwrap();
        assert!(matches!(
            schema_error(registry.resolve("Cat")),
            SchemaError::Unindexable { .. }
        ));
    }

    #[test]
    fn test_unknown_type() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            schema_error(registry.resolve("Ghost")),
            SchemaError::UnknownType(_)
        ));
    }

    #[test]
    fn test_reset_clears_everything() {
        let registry = registry();
        registry.resolve("Person").unwrap();
        registry.reset().unwrap();
        assert!(registry.registered_types().unwrap().is_empty());
        assert!(registry.resolve("Person").is_err());
    }

    #[test]
    fn test_reregister_racing_resolve_leaves_latest_shape() {
        fn shape(width: usize) -> TypeDeclaration {
            (0..width).fold(TypeDeclaration::new("Cat"), |declaration, i| {
                declaration.property(DeclaredProperty::scalar(format!("p{i}"), PropertyType::Text))
            })
        }

        let registry = Arc::new(SchemaRegistry::new());
        registry.register(shape(1), None).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        registry.resolve("Cat").unwrap();
                    }
                })
            })
            .collect();
        for round in 0..500 {
            registry.register(shape(1 + round % 2), None).unwrap();
        }
        registry.register(shape(3), None).unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(registry.resolve("Cat").unwrap().properties().len(), 3);
    }
}
