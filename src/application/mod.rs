//! Application layer - Call use cases
//!
//! This layer composes the domain ports into a running call:
//! - Candidate staging
//! - Offer/answer negotiation
//! - The session lifecycle actor

pub mod candidate_buffer;
pub mod negotiation;
pub mod session;

pub use candidate_buffer::{BufferedCandidate, CandidateBuffer, Direction};
pub use negotiation::{NegotiationEngine, NegotiationPhase, Progress};
pub use session::{SessionCommand, SessionConfig, SessionStateMachine};
