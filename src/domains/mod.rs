pub mod message;
pub mod transition;
pub mod wire;
