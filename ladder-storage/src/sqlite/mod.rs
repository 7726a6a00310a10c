//! SQLite backend built on sqlx

pub mod config;
pub mod connection;

pub use config::SqliteConfig;
pub use connection::{SqliteConnection, SqliteProvider, SqliteTransaction};
