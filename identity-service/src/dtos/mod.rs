pub mod admin;
pub mod passkey;
pub mod session;
pub mod verification;
