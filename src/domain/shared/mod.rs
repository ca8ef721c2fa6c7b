//! Shared kernel - Common types used across the session components

pub mod error;
pub mod events;
pub mod result;
pub mod value_objects;

pub use error::{CallError, ErrorKind};
pub use result::Result;
pub use value_objects::*;
