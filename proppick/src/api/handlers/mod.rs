//! HTTP request handlers for all API endpoints.
//!
//! Each handler validates its input, authenticates and authorizes the caller, and works through
//! the repositories in [`crate::db::handlers`].
//!
//! # Handler Modules
//!
//! - [`auth`]: Sign-up, sign-in, email verification and password reset
//! - [`users`]: Profiles, role changes and account deletion
//! - [`permissions`]: Reading and replacing a user's route permissions
//! - [`listings`]: Property listings with image upload and approval
//! - [`reference_data`]: Amenities, categories and statuses
//! - [`blogs`]: Blog posts, gated on their route flags alone
//!
//! # Authorization
//!
//! Route-level checks use [`crate::auth::permissions::RequiresPermission`]; handlers that mutate
//! an owned resource also apply [`crate::auth::permissions::check_resource_mutation`].

pub mod auth;
pub mod blogs;
pub mod listings;
pub mod permissions;
pub mod reference_data;
pub mod uploads;
pub mod users;
