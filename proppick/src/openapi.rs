//! OpenAPI document for the HTTP API.
//!
//! Served as JSON at `/api-docs/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api::handlers::{
    auth, blogs, listings, permissions,
    reference_data::{amenities, categories, statuses},
    users,
};
use crate::api::models::{
    auth::{
        AuthResponse, EmailRequest, MessageResponse, ResetPasswordOtpRequest, ResetPasswordRequest, SignInRequest, SignUpRequest,
        VerifyOtpRequest,
    },
    blogs::{BlogCreate, BlogResponse, BlogUpdate},
    listings::{ListingApproval, ListingCreate, ListingResponse, ListingUpdate},
    permissions::{PermissionsResponse, PermissionsUpdate},
    reference_data::{ReferenceEntryCreate, ReferenceEntryResponse, ReferenceEntryUpdate},
    users::{CurrentUser, RoleUpdate, UserResponse, UserUpdate},
};
use crate::db::models::{
    blogs::BlogSection,
    permissions::{RoutePermission, RoutePermissionSet},
    users::Role,
};
use crate::errors::ErrorResponse;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "bearer".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("Session token from `POST /auth/sign-in`"))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::sign_up,
        auth::sign_in,
        auth::verify_otp,
        auth::resend_otp,
        auth::forgot_password,
        auth::reset_password,
        auth::forgot_password_otp,
        auth::reset_password_otp,
        auth::me,
        users::list_users,
        users::get_user,
        users::update_user,
        users::update_role,
        users::delete_user,
        permissions::get_user_permissions,
        permissions::replace_user_permissions,
        listings::create_listing,
        listings::list_listings,
        listings::get_listing,
        listings::update_listing,
        listings::set_listing_approval,
        listings::delete_listing,
        amenities::list,
        amenities::get,
        amenities::create,
        amenities::update,
        amenities::delete,
        categories::list,
        categories::get,
        categories::create,
        categories::update,
        categories::delete,
        statuses::list,
        statuses::get,
        statuses::create,
        statuses::update,
        statuses::delete,
        blogs::create_blog,
        blogs::list_blogs,
        blogs::get_blog,
        blogs::update_blog,
        blogs::delete_blog,
    ),
    components(schemas(
        SignUpRequest,
        SignInRequest,
        AuthResponse,
        VerifyOtpRequest,
        EmailRequest,
        ResetPasswordRequest,
        ResetPasswordOtpRequest,
        MessageResponse,
        CurrentUser,
        UserResponse,
        UserUpdate,
        RoleUpdate,
        Role,
        RoutePermission,
        RoutePermissionSet,
        PermissionsResponse,
        PermissionsUpdate,
        ListingCreate,
        ListingUpdate,
        ListingApproval,
        ListingResponse,
        ReferenceEntryCreate,
        ReferenceEntryUpdate,
        ReferenceEntryResponse,
        BlogSection,
        BlogCreate,
        BlogUpdate,
        BlogResponse,
        ErrorResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration, sign-in, email verification and password reset"),
        (name = "users", description = "User profiles and role administration"),
        (name = "permissions", description = "Per-user route permissions. Administrators bypass them."),
        (name = "listings", description = "Property listings, guarded by the `/listproperty` route"),
        (name = "amenities", description = "Amenities, guarded by the `/amenities` route"),
        (name = "categories", description = "Property categories, guarded by the `/categories` route"),
        (name = "statuses", description = "Property statuses, guarded by the `/status` route"),
        (name = "blogs", description = "Blog posts, guarded by the `/blogs` route"),
    ),
    info(
        title = "Proppick API",
        description = "Property listing backend. Errors are returned as `{\"error\": <kind>, \"message\": <text>}`.",
    ),
)]
pub struct ApiDoc;
