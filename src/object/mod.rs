// ============================================================================
// Object Accessors
// ============================================================================
//
// Unmanaged values and live row views of declared types, weak row handles,
// reverse-link views and the key-based access helpers.
//
// ============================================================================

pub mod accessor;
pub mod backlinks;
pub mod describe;
pub mod util;
pub mod weak;

pub use accessor::ObjectAccessor;
pub use backlinks::Backlinks;
pub use util::{objects_are_equal, validated_value_for_property};
pub use weak::WeakObjectHandle;
