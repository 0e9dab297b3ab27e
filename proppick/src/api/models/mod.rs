//! API request and response data models.
//!
//! API models are kept separate from the database models in [`crate::db::models`]. Request bodies
//! use camelCase field names and are annotated with `utoipa` for the generated docs.
//!
//! - [`auth`]: Sign-up, sign-in, verification and password reset bodies
//! - [`users`]: User profiles and the authenticated [`users::CurrentUser`]
//! - [`permissions`]: Per-user route permission lists
//! - [`listings`]: Property listings, including create-time validation
//! - [`reference_data`]: Amenities, categories and statuses
//! - [`blogs`]: Blog posts made of headed sections
//! - [`pagination`]: `skip` / `limit` query parameters

pub mod auth;
pub mod blogs;
pub mod listings;
pub mod pagination;
pub mod permissions;
pub mod reference_data;
pub mod users;
