//! Interface layer - What the UI collaborator sees
//!
//! This layer handles:
//! - Commands from the user (join, hangup, renegotiate)
//! - The ordered stream of state changes
//! - Console presentation for the command line client

pub mod call;
pub mod console;

pub use call::{start_call, CallHandle, StateChanges};
