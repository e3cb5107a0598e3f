//! # Todo Auth
//!
//! Authentication and session core of the to-do application.
//!
//! ## Architecture
//! - `config`: Environment variable configuration
//! - `database`: User persistence (in-memory or PostgreSQL)
//! - `auth`: Credential store, token issuer and bearer middleware
//! - `routes`: HTTP handlers for `/api/register`, `/api/login`,
//!   `/api/refresh-token` and `/api/me`
//! - `server`: Router construction and server startup
//! - `client`: Session state, refresh coordination and the authenticated
//!   request gateway used by the application front end

pub mod auth;
pub mod client;
pub mod config;
pub mod database;
pub mod routes;
pub mod server;
