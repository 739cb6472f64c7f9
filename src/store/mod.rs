pub mod records;
pub mod store;

pub use records::StoreRecord;
pub use store::{Store, spawn_eviction_task};
