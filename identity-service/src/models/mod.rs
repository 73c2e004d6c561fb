pub mod audit_event;
pub mod capability;
pub mod challenge;
pub mod credential;
pub mod member;
pub mod role;
pub mod session;
pub mod verification;

pub use audit_event::{AuditAction, AuditEvent, ANONYMOUS_ACTOR};
pub use capability::Capability;
pub use challenge::{Challenge, ChallengePurpose};
pub use credential::{CredentialInfo, PasskeyCredential};
pub use member::{EmailAddress, Member, MemberState};
pub use role::{Role, RoleSet};
pub use session::{Session, SessionInfo};
pub use verification::{
    RecordOrigin, RejectionReason, StepResult, VerificationRecord, VerificationStatus,
};
