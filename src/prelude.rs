//! Everything needed to declare, store and observe objects.
//!
//! ```
//! use livemodel::prelude::*;
//! ```

pub use crate::{
    Link, LinkingObjects, List, NotificationToken, ObjectAccessor, ObjectChange, ObjectError,
    ObjectModel, Result, Session, SessionConfig, Value, WeakObjectHandle,
};
