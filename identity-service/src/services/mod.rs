//! Services layer for the identity core.
//!
//! Sessions, capability checks, passkey ceremonies and the verification
//! pipeline, over the `IdentityStore` and `ChallengeStore` seams.

pub mod agents;
mod audit;
mod challenge;
mod database;
pub mod error;
mod guard;
mod members;
mod memory;
mod orchestrator;
pub mod passkey;
pub mod redis;
pub mod registry;
mod sessions;
mod step_plan;
mod store;

pub use agents::{AgentKind, AgentRegistry, AgentRequest, AgentVerdict, VerificationAgent};
pub use audit::{AuditService, AuditSink, MemoryAuditSink};
pub use challenge::{check_counter, ChallengeService};
pub use database::Database;
pub use error::{CoreError, StoreError};
pub use guard::{authorize, AuthorizationGuard, Decision, DenialReason, MatchMode, Requirement};
pub use members::MemberService;
pub use memory::MemoryStore;
pub use orchestrator::{
    AdminSeedReport, DevBypass, OrchestratorSettings, RoleGrant, VerificationOrchestrator,
};
pub use passkey::{Ed25519PasskeyVerifier, PasskeyService, PasskeyVerifier};
pub use redis::{ChallengeStore, MockChallengeStore, RedisChallengeStore};
pub use sessions::{IssuedSession, ResolvedIdentity, SessionService};
pub use step_plan::{StepDescriptor, StepPlan};
pub use store::{CommitOutcome, IdentityStore};
