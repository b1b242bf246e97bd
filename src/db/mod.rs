//! Database module for SQLite operations.
//!
//! This module provides:
//! - Store initialization, pragmas and schema
//! - Repository layer with conditional-update primitives for rides and drivers

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::Repository;
