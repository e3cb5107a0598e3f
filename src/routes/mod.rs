// # Routes Module
//
// HTTP route handlers, grouped by functionality.
//
// - `health`: Health check endpoint
// - `auth`: Registration, login, token refresh and the protected user endpoint

/// Health check and monitoring endpoints
pub mod health;

/// Authentication endpoints
pub mod auth;
