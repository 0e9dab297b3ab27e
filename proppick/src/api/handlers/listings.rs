use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
};
use tracing::{debug, info, instrument};

use super::uploads::{ImageUpload, bad_form, discard_images, read_image, store_images};
use crate::{
    AppState,
    api::models::{
        listings::{ListingApproval, ListingCreate, ListingResponse, ListingUpdate, ListingsQuery},
        pagination::Pagination,
        users::CurrentUser,
    },
    auth::{
        current_user::require_admin,
        permissions::{RequiresPermission, check_resource_mutation, operation, resource},
    },
    config::UploadsConfig,
    db::{
        errors::DbError,
        handlers::{Listings, Repository},
        models::listings::{ListingCreateDBRequest, ListingFilter, ListingUpdateDBRequest, ListingVisibility},
    },
    errors::Error,
    types::{Action, ListingId, ReferenceEntryId, abbrev_uuid, route},
};

const LISTING_PART: &str = "listing";
const IMAGES_PART: &str = "images";

fn listing_not_found(id: ListingId) -> Error {
    Error::NotFound {
        resource: "Listing".to_string(),
        id: id.to_string(),
    }
}

/// Pull the `listing` JSON part and the `images` file parts out of the form.
async fn read_create_form(multipart: &mut Multipart, uploads: &UploadsConfig) -> Result<(ListingCreate, Vec<ImageUpload>), Error> {
    let mut listing = None;
    let mut images = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        match field.name() {
            Some(LISTING_PART) => {
                let text = field.text().await.map_err(bad_form)?;
                let parsed: ListingCreate = serde_json::from_str(&text).map_err(|e| Error::BadRequest {
                    message: format!("Invalid listing: {e}"),
                })?;
                listing = Some(parsed);
            }
            Some(IMAGES_PART) => {
                if images.len() == uploads.max_images {
                    return Err(Error::BadRequest {
                        message: format!("At most {} images are allowed", uploads.max_images),
                    });
                }
                images.push(read_image(field, uploads).await?);
            }
            other => {
                return Err(Error::BadRequest {
                    message: format!("Unexpected form field {:?}", other.unwrap_or_default()),
                });
            }
        }
    }

    let listing = listing.ok_or_else(|| Error::BadRequest {
        message: "The listing part is required".to_string(),
    })?;
    if images.is_empty() {
        return Err(Error::BadRequest {
            message: "At least one image is required".to_string(),
        });
    }
    Ok((listing, images))
}

async fn check_amenities(listings: &mut Listings<'_>, ids: &[ReferenceEntryId]) -> Result<(), Error> {
    let found = listings.existing_amenities(ids).await?;
    if let Some(missing) = ids.iter().find(|id| !found.contains(id)) {
        return Err(Error::BadRequest {
            message: format!("Unknown amenity {missing}"),
        });
    }
    Ok(())
}

/// Create a listing
///
/// Multipart form with a `listing` part holding the JSON fields and one or more `images` parts.
/// Listings by non-administrators start out unapproved.
#[utoipa::path(
    post,
    path = "/listings",
    tag = "listings",
    request_body(content = ListingCreate, content_type = "multipart/form-data", description = "`listing` JSON part plus `images` file parts"),
    responses(
        (status = 201, description = "Listing created", body = ListingResponse),
        (status = 400, description = "Invalid listing or images"),
        (status = 403, description = "No create permission on /listproperty"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn create_listing(
    State(state): State<AppState>,
    permission: RequiresPermission<resource::ListProperty, operation::Create>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ListingResponse>), Error> {
    let current_user = permission.user;
    let (listing, images) = read_create_form(&mut multipart, &state.config.uploads).await?;
    listing.validate()?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    check_amenities(&mut Listings::new(&mut conn), &listing.amenities).await?;

    let urls = store_images(state.storage.as_ref(), images).await?;

    let request = ListingCreateDBRequest {
        title: listing.title.trim().to_string(),
        description: listing.description,
        category_id: listing.category_id,
        status_id: listing.status_id,
        price: listing.price,
        yearly_tax: listing.yearly_tax,
        images: urls.clone(),
        address: listing.address,
        country: listing.country,
        state: listing.state,
        city: listing.city,
        zipcode: listing.zipcode,
        area: listing.area,
        rooms: listing.rooms,
        bathrooms: listing.bathrooms,
        garages: listing.garages,
        floors: listing.floors,
        built_year: listing.built_year,
        structure_type: listing.structure_type,
        extra_details: listing.extra_details,
        membership_status: listing.membership_status,
        contact_email: listing.contact_email.trim().to_string(),
        amenities: listing.amenities,
        is_approved: current_user.is_admin(),
        added_by: current_user.id,
    };

    let created = match Listings::new(&mut conn).create(&request).await {
        Ok(created) => created,
        Err(e) => {
            discard_images(state.storage.as_ref(), &urls).await;
            return Err(e.into());
        }
    };

    info!(
        listing_id = %abbrev_uuid(&created.id),
        added_by = %abbrev_uuid(&current_user.id),
        images = urls.len(),
        "Listing created"
    );
    Ok((StatusCode::CREATED, Json(ListingResponse::from(created))))
}

/// List listings
///
/// Administrators see every listing; everyone else sees approved listings and their own.
#[utoipa::path(
    get,
    path = "/listings",
    tag = "listings",
    params(Pagination, ListingsQuery),
    responses(
        (status = 200, description = "Listings", body = [ListingResponse]),
        (status = 403, description = "No read permission on /listproperty"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn list_listings(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    Query(query): Query<ListingsQuery>,
    permission: RequiresPermission<resource::ListProperty, operation::Read>,
) -> Result<Json<Vec<ListingResponse>>, Error> {
    let current_user = permission.user;
    let (skip, limit) = pagination.params();
    let visibility = if current_user.is_admin() {
        ListingVisibility::All
    } else {
        ListingVisibility::ApprovedOrOwnedBy(current_user.id)
    };

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let listings = Listings::new(&mut conn)
        .list(&ListingFilter {
            skip,
            limit,
            visibility,
            added_by: query.added_by,
        })
        .await?;

    Ok(Json(listings.into_iter().map(ListingResponse::from).collect()))
}

/// Get a listing
#[utoipa::path(
    get,
    path = "/listings/{listing_id}",
    tag = "listings",
    params(("listing_id" = String, Path, description = "Listing ID")),
    responses(
        (status = 200, description = "Listing", body = ListingResponse),
        (status = 403, description = "No read permission on /listproperty"),
        (status = 404, description = "Listing not found or not visible"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn get_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<ListingId>,
    permission: RequiresPermission<resource::ListProperty, operation::Read>,
) -> Result<Json<ListingResponse>, Error> {
    let current_user = permission.user;
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let listing = Listings::new(&mut conn)
        .get_by_id(listing_id)
        .await?
        .filter(|l| l.is_visible_to(current_user.id, current_user.is_admin()))
        .ok_or_else(|| listing_not_found(listing_id))?;

    Ok(Json(ListingResponse::from(listing)))
}

/// Update a listing
///
/// Owner or administrator. Edits by anyone other than an administrator send the listing back for
/// approval.
#[utoipa::path(
    patch,
    path = "/listings/{listing_id}",
    tag = "listings",
    request_body = ListingUpdate,
    params(("listing_id" = String, Path, description = "Listing ID")),
    responses(
        (status = 200, description = "Updated listing", body = ListingResponse),
        (status = 400, description = "Invalid input"),
        (status = 403, description = "Neither the owner nor an administrator"),
        (status = 404, description = "Listing not found"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn update_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<ListingId>,
    current_user: CurrentUser,
    Json(update): Json<ListingUpdate>,
) -> Result<Json<ListingResponse>, Error> {
    update.validate()?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let owner = Listings::new(&mut conn)
        .get_owner(listing_id)
        .await?
        .ok_or_else(|| listing_not_found(listing_id))?;
    check_resource_mutation(
        &mut conn,
        current_user.id,
        owner,
        route::LIST_PROPERTY,
        Action::Update,
        state.config.auth.resource_mutation,
    )
    .await?;

    if let Some(amenities) = &update.amenities {
        check_amenities(&mut Listings::new(&mut conn), amenities).await?;
    }

    let mut request = update.into_db_request();
    if !current_user.is_admin() {
        request.is_approved = Some(false);
    }

    let listing = Listings::new(&mut conn).update(listing_id, &request).await.map_err(|e| match e {
        DbError::NotFound => listing_not_found(listing_id),
        other => other.into(),
    })?;

    info!(listing_id = %abbrev_uuid(&listing_id), "Listing updated");
    Ok(Json(ListingResponse::from(listing)))
}

/// Approve or withdraw a listing
#[utoipa::path(
    patch,
    path = "/listings/{listing_id}/approval",
    tag = "listings",
    request_body = ListingApproval,
    params(("listing_id" = String, Path, description = "Listing ID")),
    responses(
        (status = 200, description = "Updated listing", body = ListingResponse),
        (status = 403, description = "Not an administrator"),
        (status = 404, description = "Listing not found"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn set_listing_approval(
    State(state): State<AppState>,
    Path(listing_id): Path<ListingId>,
    current_user: CurrentUser,
    Json(approval): Json<ListingApproval>,
) -> Result<Json<ListingResponse>, Error> {
    require_admin(&current_user, "approve listings")?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let listing = Listings::new(&mut conn)
        .update(
            listing_id,
            &ListingUpdateDBRequest {
                is_approved: Some(approval.approved),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| match e {
            DbError::NotFound => listing_not_found(listing_id),
            other => other.into(),
        })?;

    info!(listing_id = %abbrev_uuid(&listing_id), approved = approval.approved, "Listing approval changed");
    Ok(Json(ListingResponse::from(listing)))
}

/// Delete a listing
#[utoipa::path(
    delete,
    path = "/listings/{listing_id}",
    tag = "listings",
    params(("listing_id" = String, Path, description = "Listing ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Neither the owner nor an administrator"),
        (status = 404, description = "Listing not found"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn delete_listing(
    State(state): State<AppState>,
    Path(listing_id): Path<ListingId>,
    current_user: CurrentUser,
) -> Result<StatusCode, Error> {
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let listing = Listings::new(&mut conn)
        .get_by_id(listing_id)
        .await?
        .ok_or_else(|| listing_not_found(listing_id))?;
    check_resource_mutation(
        &mut conn,
        current_user.id,
        listing.added_by,
        route::LIST_PROPERTY,
        Action::Delete,
        state.config.auth.resource_mutation,
    )
    .await?;

    if !Listings::new(&mut conn).delete(listing_id).await? {
        return Err(listing_not_found(listing_id));
    }
    drop(conn);

    debug!(images = listing.images.0.len(), "Removing listing images");
    discard_images(state.storage.as_ref(), &listing.images.0).await;

    info!(listing_id = %abbrev_uuid(&listing_id), "Listing deleted");
    Ok(StatusCode::NO_CONTENT)
}
