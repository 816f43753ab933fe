//! Entity handles and storage.

mod entity_type;
mod handle;
mod links;
mod store;
mod working_set;

pub use entity_type::EntityType;
pub use handle::Entity;
pub use store::RecordStore;

pub(crate) use store::Counter;
pub(crate) use working_set::WorkingSet;
