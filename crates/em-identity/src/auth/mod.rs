//! Authentication Module
//!
//! Account creation, credential checks and the refresh/access token lifecycle.

pub mod service;

pub use service::{is_valid_email, AuthService, AuthServiceDeps};
