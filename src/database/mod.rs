//! # Database Operations
//!
//! Postgres pool construction and schema migration.
//!
//! - [`connection`]: pool creation from [`crate::config::DatabaseConfig`]
//! - [`migrations`]: versioned SQL files applied under an advisory lock
//!
//! ```rust,no_run
//! use hostflow_core::config::DatabaseConfig;
//! use hostflow_core::database::{DatabaseConnection, DatabaseMigrations};
//!
//! # async fn example() -> Result<(), sqlx::Error> {
//! let db = DatabaseConnection::connect(&DatabaseConfig::default()).await?;
//! DatabaseMigrations::run_all(db.pool()).await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::DatabaseMigrations;
