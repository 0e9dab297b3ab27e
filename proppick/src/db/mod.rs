//! Database layer for data persistence and access.
//!
//! This module implements the data access layer using SQLx with SQLite.
//! It follows the Repository pattern: each table gets a small struct wrapping a borrowed
//! `SqliteConnection`, so the same repository works on a pooled connection or inside a
//! transaction opened by the caller.
//!
//! ```text
//! ┌─────────────┐
//! │  Services   │  (auth::*, api handlers)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - rows and write requests)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │   SQLite    │
//! └─────────────┘
//! ```
//!
//! Timestamps are always bound from Rust (`Utc::now()` or a caller-supplied instant) rather than
//! taken from column defaults, so expiry decisions and tests share one clock.
//!
//! # Modules
//!
//! - [`handlers`]: Repository implementations
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Database-specific error types

pub mod errors;
pub mod handlers;
pub mod models;
