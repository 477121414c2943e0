use crate::core::{ObjectError, Value};
use crate::schema::SchemaDescriptor;

/// What a subscriber is told after a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectChange {
    /// One or more properties differ from what the subscriber last saw.
    /// The three sequences are aligned by position.
    Changed {
        property_names: Vec<String>,
        old_values: Vec<Value>,
        new_values: Vec<Value>,
    },
    /// The row was deleted. Always the last delivery for a subscription.
    Deleted(ObjectError),
}

/// One changed property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub name: String,
    pub old_value: Value,
    pub new_value: Value,
}

impl ObjectChange {
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted(_))
    }

    pub fn error(&self) -> Option<&ObjectError> {
        match self {
            Self::Deleted(err) => Some(err),
            Self::Changed { .. } => None,
        }
    }

    pub fn property_names(&self) -> &[String] {
        match self {
            Self::Changed { property_names, .. } => property_names,
            Self::Deleted(_) => &[],
        }
    }

    /// Per-property view of a `Changed` notification.
    pub fn properties(&self) -> Vec<PropertyChange> {
        match self {
            Self::Changed {
                property_names,
                old_values,
                new_values,
            } => property_names
                .iter()
                .zip(old_values)
                .zip(new_values)
                .map(|((name, old_value), new_value)| PropertyChange {
                    name: name.clone(),
                    old_value: old_value.clone(),
                    new_value: new_value.clone(),
                })
                .collect(),
            Self::Deleted(_) => Vec::new(),
        }
    }
}

/// Compare two snapshots taken in `schema` property order. Lists compare
/// element-wise.
pub(crate) fn diff(schema: &SchemaDescriptor, old: &[Value], new: &[Value]) -> Option<ObjectChange> {
    let mut property_names = Vec::new();
    let mut old_values = Vec::new();
    let mut new_values = Vec::new();

    for ((property, before), after) in schema.properties().iter().zip(old).zip(new) {
        if before != after {
            property_names.push(property.name.clone());
            old_values.push(before.clone());
            new_values.push(after.clone());
        }
    }

    if property_names.is_empty() {
        None
    } else {
        Some(ObjectChange::Changed {
            property_names,
            old_values,
            new_values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PropertyType;
    use crate::schema::{DeclaredProperty, SchemaRegistry, TypeDeclaration};

    fn schema() -> std::sync::Arc<SchemaDescriptor> {
        let registry = SchemaRegistry::new();
        registry
            .register(
                TypeDeclaration::new("Dog")
                    .property(DeclaredProperty::scalar("name", PropertyType::Text))
                    .property(DeclaredProperty::scalar("age", PropertyType::Integer)),
                None,
            )
            .unwrap();
        registry.resolve("Dog").unwrap()
    }

    #[test]
    fn test_diff_reports_only_changed() {
        let schema = schema();
        let old = vec![Value::from("Rex"), Value::from(3)];
        let new = vec![Value::from("Rex"), Value::from(4)];

        let change = diff(&schema, &old, &new).unwrap();
        assert_eq!(change.property_names(), ["age".to_string()]);
        assert_eq!(
            change.properties(),
            vec![PropertyChange {
                name: "age".into(),
                old_value: Value::from(3),
                new_value: Value::from(4),
            }]
        );
        assert!(diff(&schema, &old, &old).is_none());
    }

    #[test]
    fn test_list_diff_is_element_wise() {
        let registry = SchemaRegistry::new();
        registry
            .register(
                TypeDeclaration::new("Bag")
                    .property(DeclaredProperty::scalar("label", PropertyType::Text)),
                None,
            )
            .unwrap();
        let schema = registry.resolve("Bag").unwrap();

        let a = vec![Value::List(vec![Value::from(1), Value::from(2)])];
        let same = vec![Value::List(vec![Value::from(1), Value::from(2)])];
        let reordered = vec![Value::List(vec![Value::from(2), Value::from(1)])];
        assert!(diff(&schema, &a, &same).is_none());
        assert!(diff(&schema, &a, &reordered).is_some());
    }
}
