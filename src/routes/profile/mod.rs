mod handler;
mod model;

pub use handler::{get_me, get_sharing, update_me, update_sharing};
