pub mod auth;
pub mod capability;

pub use auth::{session_middleware, CurrentIdentity, OptionalIdentity, PresentedToken};
pub use capability::{capability_gate, CapabilityGate};
