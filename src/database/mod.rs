//! # Database Module
//!
//! User persistence behind the `UserRepository` trait: an in-memory store and
//! a PostgreSQL store with connection pooling and embedded migrations.

pub mod connection;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod repository;

pub use connection::{DatabaseConfig, DatabaseConnection, PostgresUserStore};
pub use memory::MemoryUserStore;
pub use models::User;
pub use repository::{RepositoryError, UserRepository};
