pub mod admin;
pub mod health;
pub mod passkey;
pub mod session;
pub mod verification;

use service_core::error::AppError;

use crate::models::EmailAddress;

pub(crate) fn parse_email(raw: &str) -> Result<EmailAddress, AppError> {
    EmailAddress::parse(raw).map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))
}
