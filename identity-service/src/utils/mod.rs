pub mod token;
pub mod validation;

pub use token::{generate_token, hash_token, is_well_formed};
pub use validation::ValidatedJson;
