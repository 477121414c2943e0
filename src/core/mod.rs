pub mod error;
pub mod types;
pub mod value;

pub use error::{ObjectError, Result, SchemaError};
pub use types::{CollectionKind, PropertyType, Row, RowId};
pub use value::{ObjectLink, Value};
