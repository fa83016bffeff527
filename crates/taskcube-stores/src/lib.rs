//! RecordStore implementations.

mod memory;

pub use memory::InMemoryRecordStore;
