//! Common library for the platform services
//!
//! This crate provides the storage plumbing shared by the services: the
//! PostgreSQL pool, the Redis client and the storage error type.

pub mod cache;
pub mod database;
pub mod error;

pub use error::{StoreError, StoreResult};
