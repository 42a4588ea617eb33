mod handler;
mod model;

pub use handler::{get_active_locations, location_changes, set_location_active, upsert_location};
pub(crate) use model::invalidate_active_cache;
