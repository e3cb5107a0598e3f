//! # Authentication Module
//!
//! Server half of the auth core: credential storage and verification, token
//! issuance and validation, and the bearer middleware securing API endpoints.

pub mod credentials;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;

pub use credentials::CredentialStore;
pub use error::{AuthError, ErrorBody};
pub use jwt::{TokenError, TokenIssuer};
pub use models::AuthUser;
