pub mod domain;
pub mod password;
pub mod validation;

pub use domain::normalize_domain;
pub use password::{hash_password, verify_password};
pub use validation::ValidatedJson;
