//! HTTP API: axum handlers and their request/response models.
//!
//! - **Accounts** (`/auth/*`): sign-up, sign-in, OTP verification, password reset
//! - **Users** (`/users/*`): profile and role administration, per-user permissions
//! - **Listings** (`/listings/*`): property listings with image upload and approval
//! - **Reference data** (`/amenities`, `/categories`, `/statuses`)
//!
//! The OpenAPI document is served at `/api-docs/openapi.json` and rendered at `/docs`.

pub mod handlers;
pub mod models;
