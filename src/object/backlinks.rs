use crate::core::{ObjectError, Result, Value};

use super::accessor::lookup;
use super::{ObjectAccessor, WeakObjectHandle};

/// Reverse links of one managed object, evaluated on each access.
///
/// Refers to its owner through a [`WeakObjectHandle`], so holding a
/// `Backlinks` never keeps the owner or its session alive.
#[derive(Debug, Clone)]
pub struct Backlinks {
    owner: WeakObjectHandle,
    property: String,
    source_type: String,
}

impl Backlinks {
    pub(crate) fn new(owner: &ObjectAccessor, property: &str) -> Result<Self> {
        let descriptor = lookup(owner.schema(), property)?;
        let source_type = match (&descriptor.object_type, descriptor.is_computed()) {
            (Some(source_type), true) => source_type.clone(),
            _ => {
                return Err(ObjectError::InvalidState(format!(
                    "'{}.{}' is not a linking objects property",
                    owner.type_name(),
                    property
                )));
            }
        };

        Ok(Self {
            owner: WeakObjectHandle::capture(owner)?,
            property: property.to_string(),
            source_type,
        })
    }

    pub fn owner(&self) -> &WeakObjectHandle {
        &self.owner
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    /// Type whose forward links are collected
    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    /// Linking objects, in row order.
    pub fn objects(&self) -> Result<Vec<ObjectAccessor>> {
        self.owner.resolve()?.links(&self.property)
    }

    pub fn len(&self) -> Result<usize> {
        match self.owner.resolve()?.read_property(&self.property)? {
            Value::List(items) => Ok(items.len()),
            _ => Ok(0),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
