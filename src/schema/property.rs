use crate::core::{CollectionKind, ObjectError, PropertyType, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Table name used to persist objects of `type_name`.
pub fn table_name_for(type_name: &str) -> String {
    format!("class_{}", type_name)
}

/// Resolved description of one persisted (or computed) property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    /// Storage type, or the element type for lists
    pub property_type: PropertyType,
    pub optional: bool,
    pub collection: CollectionKind,
    pub indexed: bool,
    pub has_default: bool,
    /// Target type for links, object lists and linking objects
    pub object_type: Option<String>,
    /// Forward link property on `object_type` that a linking-objects property mirrors
    pub linked_property: Option<String>,
    /// Column position in the row; `None` for computed properties
    pub column: Option<usize>,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            optional: false,
            collection: CollectionKind::None,
            indexed: false,
            has_default: false,
            object_type: None,
            linked_property: None,
            column: None,
        }
    }

    pub fn is_computed(&self) -> bool {
        self.collection == CollectionKind::LinkingObjects
    }

    pub fn is_list(&self) -> bool {
        self.collection == CollectionKind::List
    }

    /// A single forward link to another object
    pub fn is_link(&self) -> bool {
        self.collection == CollectionKind::None && self.property_type == PropertyType::Object
    }

    pub fn default_value(&self) -> Value {
        match self.collection {
            CollectionKind::List | CollectionKind::LinkingObjects => Value::List(Vec::new()),
            CollectionKind::None if self.optional => Value::Null,
            CollectionKind::None => self.property_type.zero_value(),
        }
    }

    /// Check `value` against this property and convert it to its stored form.
    pub fn validate(&self, type_name: &str, value: Value) -> Result<Value> {
        match self.collection {
            CollectionKind::LinkingObjects => Err(ObjectError::Validation(format!(
                "Property '{}.{}' is a read-only linking objects property",
                type_name, self.name
            ))),
            CollectionKind::List => match value {
                Value::Null => Ok(Value::List(Vec::new())),
                Value::List(items) => {
                    let items = items
                        .into_iter()
                        .map(|item| {
                            if item.is_null() {
                                return Err(ObjectError::Validation(format!(
                                    "List property '{}.{}' cannot contain null",
                                    type_name, self.name
                                )));
                            }
                            self.validate_scalar(type_name, item)
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Value::List(items))
                }
                other => Err(self.mismatch(type_name, &other)),
            },
            CollectionKind::None => {
                if value.is_null() {
                    if !self.optional && self.property_type != PropertyType::Object {
                        return Err(ObjectError::Validation(format!(
                            "Property '{}.{}' cannot be null",
                            type_name, self.name
                        )));
                    }
                    return Ok(Value::Null);
                }
                self.validate_scalar(type_name, value)
            }
        }
    }

    fn validate_scalar(&self, type_name: &str, value: Value) -> Result<Value> {
        if !self.property_type.is_compatible(&value) {
            return Err(self.mismatch(type_name, &value));
        }
        if let (Value::Link(link), Some(target)) = (&value, &self.object_type)
            && link.table != table_name_for(target)
        {
            return Err(ObjectError::Validation(format!(
                "Property '{}.{}' links to '{}', got a link into '{}'",
                type_name, self.name, target, link.table
            )));
        }
        Ok(self.property_type.coerce(value))
    }

    fn mismatch(&self, type_name: &str, value: &Value) -> ObjectError {
        let expected = match self.collection {
            CollectionKind::None => self.property_type.to_string(),
            _ => format!("list<{}>", self.property_type),
        };
        ObjectError::Validation(format!(
            "Property '{}.{}' expects {}, got {}",
            type_name,
            self.name,
            expected,
            value.type_name()
        ))
    }
}

/// Resolved, immutable schema of one declared type.
///
/// Shared read-only (behind an `Arc`) by every accessor of the type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    type_name: String,
    table_name: String,
    properties: Vec<PropertyDescriptor>,
    ignored: BTreeSet<String>,
    required: BTreeSet<String>,
}

impl SchemaDescriptor {
    pub(crate) fn new(
        type_name: String,
        properties: Vec<PropertyDescriptor>,
        ignored: BTreeSet<String>,
    ) -> Self {
        let required = properties
            .iter()
            .filter(|p| {
                p.collection == CollectionKind::None
                    && !p.optional
                    && !p.has_default
                    && p.property_type != PropertyType::Object
            })
            .map(|p| p.name.clone())
            .collect();

        Self {
            table_name: table_name_for(&type_name),
            type_name,
            properties,
            ignored,
            required,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Properties in declaration order, ignored ones excluded
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Properties backed by a column
    pub fn persisted_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.column.is_some())
    }

    pub fn column_count(&self) -> usize {
        self.persisted_properties().count()
    }

    pub fn ignored_properties(&self) -> &BTreeSet<String> {
        &self.ignored
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.contains(name)
    }

    /// Non-optional, non-defaulted scalar properties
    pub fn required_properties(&self) -> &BTreeSet<String> {
        &self.required
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.contains(name)
    }

    pub fn indexed_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter().filter(|p| p.indexed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ObjectLink;

    fn name_property() -> PropertyDescriptor {
        PropertyDescriptor::new("name", PropertyType::Text)
    }

    #[test]
    fn test_required_scalar_rejects_null() {
        let prop = name_property();
        assert!(matches!(
            prop.validate("Dog", Value::Null),
            Err(ObjectError::Validation(_))
        ));
        assert_eq!(
            prop.validate("Dog", Value::from("Rex")).unwrap(),
            Value::from("Rex")
        );
    }

    #[test]
    fn test_link_target_is_checked() {
        let mut prop = PropertyDescriptor::new("owner", PropertyType::Object);
        prop.object_type = Some("Person".into());

        assert!(prop.validate("Dog", Value::Null).is_ok());
        assert!(
            prop.validate("Dog", Value::Link(ObjectLink::new("class_Person", 1)))
                .is_ok()
        );
        assert!(
            prop.validate("Dog", Value::Link(ObjectLink::new("class_Cat", 1)))
                .is_err()
        );
    }

    #[test]
    fn test_list_elements_are_coerced() {
        let mut prop = PropertyDescriptor::new("weights", PropertyType::Float);
        prop.collection = CollectionKind::List;

        let stored = prop
            .validate("Dog", Value::List(vec![Value::Integer(3), Value::Float(4.5)]))
            .unwrap();
        assert!(matches!(stored.as_list().unwrap()[0], Value::Float(_)));
        assert!(prop.validate("Dog", Value::List(vec![Value::Null])).is_err());
        assert_eq!(prop.validate("Dog", Value::Null).unwrap(), Value::List(vec![]));
    }

    #[test]
    fn test_required_set() {
        let mut age = PropertyDescriptor::new("age", PropertyType::Integer);
        age.has_default = true;
        let mut nickname = PropertyDescriptor::new("nickname", PropertyType::Text);
        nickname.optional = true;

        let schema = SchemaDescriptor::new(
            "Dog".into(),
            vec![name_property(), age, nickname],
            BTreeSet::new(),
        );
        assert_eq!(schema.table_name(), "class_Dog");
        assert!(schema.is_required("name"));
        assert!(!schema.is_required("age"));
        assert!(!schema.is_required("nickname"));
    }
}
