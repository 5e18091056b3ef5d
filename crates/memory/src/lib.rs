//! Chat history stores for Talk2SQL.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::JsonFileHistory;
pub use in_memory::InMemoryHistory;
