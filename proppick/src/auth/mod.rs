//! Identity, verification and authorization.
//!
//! # Identity
//!
//! Callers authenticate with `Authorization: Bearer <jwt>`. The token is issued by `/auth/sign-in`
//! and only identifies the user; [`current_user`] re-reads the user row on every request.
//!
//! # Verification
//!
//! - [`otp`]: six-digit codes for registration and password reset
//! - [`password_reset`]: link tokens and code-based resets
//! - [`provisioning`]: sign-up as one transaction (user, code, default permissions, outbox email)
//!
//! # Authorization
//!
//! [`permissions`] holds the route-permission evaluator. Admins bypass the permission table;
//! everyone else gets exactly the flag stored for the route. Updates and deletes of user-owned
//! resources additionally go through the resource-owner rule.
//!
//! ```ignore
//! use proppick::auth::permissions::{operation, resource, RequiresPermission};
//!
//! async fn create_amenity(
//!     perm: RequiresPermission<resource::Amenities, operation::Create>,
//!     State(state): State<AppState>,
//! ) -> Result<Json<ReferenceEntryResponse>> {
//!     // perm.user is the authenticated caller
//! }
//! ```

pub mod current_user;
pub mod otp;
pub mod password;
pub mod password_reset;
pub mod permissions;
pub mod provisioning;
pub mod session;
