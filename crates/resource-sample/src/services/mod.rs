//! Business logic over the user repository.

pub mod user_service;

pub use user_service::{UserError, UserService};
