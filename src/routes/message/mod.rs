mod handler;
mod model;

pub use handler::{get_conversation, message_changes, send_message};
