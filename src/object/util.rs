use crate::core::{ObjectError, Result, Value};

use super::ObjectAccessor;

/// Read `key`, reporting an undefined property against `type_name`.
///
/// Meant for key-path access from dynamic callers, where the name comes from
/// outside the program and a missing property is an ordinary failure.
pub fn validated_value_for_property(
    object: &ObjectAccessor,
    key: &str,
    type_name: &str,
) -> Result<Value> {
    if object.schema().property(key).is_none() && !object.schema().is_ignored(key) {
        return Err(ObjectError::UnknownProperty {
            type_name: type_name.to_string(),
            property: key.to_string(),
        });
    }
    object.read_property(key)
}

/// Equality over optional objects; two absent objects are equal.
pub fn objects_are_equal(a: Option<&ObjectAccessor>, b: Option<&ObjectAccessor>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.equals(b),
        _ => false,
    }
}
