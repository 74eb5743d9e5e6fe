//! Mailcast Storage - Database and in-memory storage abstraction
//!
//! This crate provides the campaign, sender, recipient and analytics
//! repositories, backed by PostgreSQL or by an in-process store.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
