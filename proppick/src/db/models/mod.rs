//! Database record structures.
//!
//! `*DBResponse` types are rows as read back from SQLite; `*CreateDBRequest` and
//! `*UpdateDBRequest` types are what repositories accept for writes.

pub mod blogs;
pub mod email_outbox;
pub mod listings;
pub mod otp_codes;
pub mod password_reset_tokens;
pub mod permissions;
pub mod reference_data;
pub mod users;
