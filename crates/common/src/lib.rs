//! Small utilities shared across the chatgate crates.

pub mod error;
pub mod time;

pub use error::FromMessage;
