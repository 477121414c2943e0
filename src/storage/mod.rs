pub mod engine;
pub mod memory;
pub mod table;

pub use engine::StorageEngine;
pub use memory::InMemoryStorage;
pub use table::Table;
