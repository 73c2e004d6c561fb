use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::SessionInfo;
use crate::services::passkey::{Assertion, NewCredential};

#[derive(Debug, Deserialize, Validate)]
pub struct BeginCeremonyRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FinishRegistrationRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, max = 256, message = "Challenge is required"))]
    pub challenge: String,

    #[validate(length(min = 1, max = 1024, message = "Credential id is required"))]
    pub credential_id: String,

    #[validate(length(min = 1, max = 1024, message = "Public key is required"))]
    pub public_key: String,

    #[validate(length(min = 1, max = 1024, message = "Signature is required"))]
    pub signature: String,

    #[validate(length(min = 1, max = 256, message = "Invalid enrolment token"))]
    #[serde(default)]
    pub enrolment_token: Option<String>,
}

impl From<FinishRegistrationRequest> for NewCredential {
    fn from(req: FinishRegistrationRequest) -> Self {
        Self {
            challenge: req.challenge,
            credential_id: req.credential_id,
            public_key: req.public_key,
            signature: req.signature,
            enrolment_token: req.enrolment_token,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct FinishAuthenticationRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, max = 256, message = "Challenge is required"))]
    pub challenge: String,

    #[validate(length(min = 1, max = 1024, message = "Credential id is required"))]
    pub credential_id: String,

    pub counter: u32,

    #[validate(length(min = 1, max = 1024, message = "Signature is required"))]
    pub signature: String,
}

impl From<FinishAuthenticationRequest> for Assertion {
    fn from(req: FinishAuthenticationRequest) -> Self {
        Self {
            challenge: req.challenge,
            credential_id: req.credential_id,
            counter: req.counter,
            signature: req.signature,
        }
    }
}

/// Issued on a successful ceremony. The token is also set as a cookie.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub session: SessionInfo,
}
