//! Room service protocol

pub mod registrar;

#[cfg(test)]
pub use registrar::MockRoomRegistrar;
pub use registrar::{parse_join_response, HttpRoomRegistrar, RoomRegistrar};
