//! Data layer module
//!
//! Owns the SQLite connection pool and every entity model.

mod database;
mod models;

pub use database::Database;
pub use models::*;
