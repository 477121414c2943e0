//! Statically declared object types.
//!
//! A [`TypeDeclaration`] is what reflection over a user type can see on its
//! own: property names in declaration order and, where visible, their storage
//! types. Generic containers (`List<T>`, `LinkingObjects<T>`, optional
//! numerics) are declared [`DeclaredType::Erased`] and completed by a
//! [`GenericPropertyResolver`](super::GenericPropertyResolver).

use crate::core::{ObjectLink, PropertyType, RowId, Value};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use super::property::table_name_for;
use super::GenericPropertyResolver;

/// Static type information available for an erased property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeProbe {
    pub property_type: PropertyType,
    pub object_type: Option<String>,
}

impl TypeProbe {
    pub fn scalar(property_type: PropertyType) -> Self {
        Self {
            property_type,
            object_type: None,
        }
    }

    pub fn object(target: impl Into<String>) -> Self {
        Self {
            property_type: PropertyType::Object,
            object_type: Some(target.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    Scalar {
        property_type: PropertyType,
        optional: bool,
    },
    /// Forward link; always nullable
    Object { target: String },
    /// Generic container whose parameters reflection cannot see
    Erased { probe: Option<TypeProbe> },
    /// Visible but not storable; only valid on ignored properties
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredProperty {
    pub name: String,
    pub declared: DeclaredType,
    pub has_default: bool,
}

impl DeclaredProperty {
    pub fn scalar(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self::with_type(
            name,
            DeclaredType::Scalar {
                property_type,
                optional: false,
            },
        )
    }

    pub fn optional(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self::with_type(
            name,
            DeclaredType::Scalar {
                property_type,
                optional: true,
            },
        )
    }

    pub fn object(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_type(
            name,
            DeclaredType::Object {
                target: target.into(),
            },
        )
    }

    pub fn erased(name: impl Into<String>) -> Self {
        Self::with_type(name, DeclaredType::Erased { probe: None })
    }

    pub fn probed(name: impl Into<String>, probe: TypeProbe) -> Self {
        Self::with_type(name, DeclaredType::Erased { probe: Some(probe) })
    }

    pub fn opaque(name: impl Into<String>) -> Self {
        Self::with_type(name, DeclaredType::Opaque)
    }

    pub fn with_type(name: impl Into<String>, declared: DeclaredType) -> Self {
        Self {
            name: name.into(),
            declared,
            has_default: false,
        }
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }

    pub fn is_erased(&self) -> bool {
        matches!(self.declared, DeclaredType::Erased { .. })
    }
}

/// Ordered property declarations of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDeclaration {
    pub type_name: String,
    pub properties: Vec<DeclaredProperty>,
}

impl TypeDeclaration {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: Vec::new(),
        }
    }

    pub fn property(mut self, property: DeclaredProperty) -> Self {
        self.properties.push(property);
        self
    }

    pub fn find(&self, name: &str) -> Option<(usize, &DeclaredProperty)> {
        self.properties
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }
}

/// A user type usable as an object schema.
///
/// Normally produced by `#[derive(ObjectModel)]`.
pub trait ObjectModel: Sized + 'static {
    const TYPE_NAME: &'static str;

    fn declaration() -> TypeDeclaration;

    fn property_resolver() -> Option<Arc<dyn GenericPropertyResolver>> {
        None
    }

    /// Field values of a free-standing instance, ignored and computed
    /// properties excluded.
    fn into_values(self) -> BTreeMap<String, Value>;
}

/// Ordered list property.
#[derive(Debug, Clone, PartialEq)]
pub struct List<T>(pub Vec<T>);

impl<T> Default for List<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> From<Vec<T>> for List<T> {
    fn from(items: Vec<T>) -> Self {
        Self(items)
    }
}

impl<T: Into<Value>> From<List<T>> for Value {
    fn from(list: List<T>) -> Self {
        Value::List(list.0.into_iter().map(Into::into).collect())
    }
}

/// Forward link to an object of type `T`.
pub struct Link<T> {
    target: Option<ObjectLink>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ObjectModel> Link<T> {
    pub fn to_row(row: RowId) -> Self {
        Self {
            target: Some(ObjectLink::new(table_name_for(T::TYPE_NAME), row)),
            _marker: PhantomData,
        }
    }
}

impl<T> Link<T> {
    pub fn none() -> Self {
        Self {
            target: None,
            _marker: PhantomData,
        }
    }

    pub fn target(&self) -> Option<&ObjectLink> {
        self.target.as_ref()
    }
}

impl<T> Default for Link<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Link").field(&self.target).finish()
    }
}

impl<T> From<Link<T>> for Value {
    fn from(link: Link<T>) -> Self {
        link.target.map(Value::Link).unwrap_or(Value::Null)
    }
}

/// Declares a computed reverse-link property; carries no data.
pub struct LinkingObjects<T>(PhantomData<fn() -> T>);

impl<T> Default for LinkingObjects<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> Clone for LinkingObjects<T> {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl<T> std::fmt::Debug for LinkingObjects<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LinkingObjects")
    }
}
