pub mod location;
pub mod message;
pub mod profile;
