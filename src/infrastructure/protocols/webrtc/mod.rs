//! WebRTC media engine adapter
pub mod engine;

pub use engine::WebRtcMediaEngine;
