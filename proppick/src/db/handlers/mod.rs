//! Repository implementations for database access.
//!
//! Each repository wraps a borrowed SQLx connection or transaction and returns models from
//! [`crate::db::models`]. CRUD-shaped tables implement [`Repository`]; tables with a lifecycle
//! rather than CRUD semantics ([`OtpCodes`], [`PasswordResetTokens`], [`EmailOutbox`]) expose
//! purpose-built methods instead.
//!
//! # Available Repositories
//!
//! - [`Users`]: User accounts and role lookups
//! - [`Permissions`]: The per-user route permission row
//! - [`OtpCodes`]: One-time codes for verification and password reset
//! - [`PasswordResetTokens`]: Opaque reset-link tokens
//! - [`Listings`]: Property listings
//! - [`ReferenceData`]: Amenities, categories and statuses
//! - [`EmailOutbox`]: Durable outbound email intents
//!
//! ```ignore
//! use proppick::db::handlers::{Users, Repository};
//!
//! let mut tx = pool.begin().await?;
//! let mut repo = Users::new(&mut tx);
//! let user = repo.create(&create_request).await?;
//! tx.commit().await?;
//! ```

pub mod blogs;
pub mod email_outbox;
pub mod listings;
pub mod otp_codes;
pub mod password_reset_tokens;
pub mod permissions;
pub mod reference_data;
pub mod repository;
pub mod users;

pub use blogs::Blogs;
pub use email_outbox::EmailOutbox;
pub use listings::Listings;
pub use otp_codes::OtpCodes;
pub use password_reset_tokens::PasswordResetTokens;
pub use permissions::Permissions;
pub use reference_data::ReferenceData;
pub use repository::Repository;
pub use users::Users;
