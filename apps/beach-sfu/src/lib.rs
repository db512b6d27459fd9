//! Publisher-side signaling for a WebRTC selective forwarding unit.
//!
//! A [`SignalingSession`] speaks JSON-RPC 2.0 (`join`, `answer`, `offer`,
//! `trickle`) over a [`transport::DuplexChannel`] and drives a
//! [`negotiation::PeerConnection`] through offer/answer and ICE trickle.

pub mod config;
pub mod correlation;
pub mod error;
pub mod negotiation;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use config::ClientConfig;
pub use error::{PeerError, SignalingError};
pub use negotiation::{NegotiationState, PeerConnection};
pub use session::{SessionHandle, SessionOptions, SessionStatus, SignalingSession};
