//! Tower layers wrapped around every protocol call: credentials and validation

pub mod auth;
pub mod validation;

pub use auth::{AuthCredentials, AuthLayer, AuthService};
pub use validation::{A2AValidationLayer, A2AValidationService};
