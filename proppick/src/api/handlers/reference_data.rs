//! Handlers for amenities, categories and statuses.
//!
//! The three collections behave identically apart from their table and the permission route that
//! guards them, so the handlers are shared and [`reference_routes!`] stamps out one annotated
//! module per kind.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;

use crate::{
    AppState,
    api::models::{
        pagination::Pagination,
        reference_data::{ReferenceEntryCreate, ReferenceEntryResponse, ReferenceEntryUpdate, normalize_name},
        users::CurrentUser,
    },
    db::{
        errors::DbError,
        handlers::{ReferenceData, Repository},
        models::reference_data::{ReferenceEntryCreateDBRequest, ReferenceEntryFilter, ReferenceEntryUpdateDBRequest, ReferenceKind},
    },
    errors::Error,
    types::{ReferenceEntryId, abbrev_uuid},
};

fn entry_not_found(kind: ReferenceKind, id: ReferenceEntryId) -> Error {
    Error::NotFound {
        resource: kind.label().to_string(),
        id: id.to_string(),
    }
}

async fn list_entries(state: &AppState, kind: ReferenceKind, pagination: &Pagination) -> Result<Json<Vec<ReferenceEntryResponse>>, Error> {
    let (skip, limit) = pagination.params();
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let entries = ReferenceData::new(&mut conn, kind)
        .list(&ReferenceEntryFilter { skip, limit })
        .await?;

    Ok(Json(entries.into_iter().map(ReferenceEntryResponse::from).collect()))
}

async fn get_entry(state: &AppState, kind: ReferenceKind, id: ReferenceEntryId) -> Result<Json<ReferenceEntryResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let entry = ReferenceData::new(&mut conn, kind)
        .get_by_id(id)
        .await?
        .ok_or_else(|| entry_not_found(kind, id))?;

    Ok(Json(ReferenceEntryResponse::from(entry)))
}

async fn create_entry(
    state: &AppState,
    kind: ReferenceKind,
    current_user: &CurrentUser,
    create: ReferenceEntryCreate,
) -> Result<(StatusCode, Json<ReferenceEntryResponse>), Error> {
    let name = normalize_name(&create.name)?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let entry = ReferenceData::new(&mut conn, kind)
        .create(&ReferenceEntryCreateDBRequest {
            name,
            added_by: current_user.id,
        })
        .await?;

    info!(kind = kind.table(), id = %abbrev_uuid(&entry.id), "Reference entry created");
    Ok((StatusCode::CREATED, Json(ReferenceEntryResponse::from(entry))))
}

async fn update_entry(
    state: &AppState,
    kind: ReferenceKind,
    id: ReferenceEntryId,
    update: ReferenceEntryUpdate,
) -> Result<Json<ReferenceEntryResponse>, Error> {
    let name = update.name.as_deref().map(normalize_name).transpose()?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let entry = ReferenceData::new(&mut conn, kind)
        .update(id, &ReferenceEntryUpdateDBRequest { name })
        .await
        .map_err(|e| match e {
            DbError::NotFound => entry_not_found(kind, id),
            other => other.into(),
        })?;

    Ok(Json(ReferenceEntryResponse::from(entry)))
}

async fn delete_entry(state: &AppState, kind: ReferenceKind, id: ReferenceEntryId) -> Result<StatusCode, Error> {
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    if !ReferenceData::new(&mut conn, kind).delete(id).await? {
        return Err(entry_not_found(kind, id));
    }

    info!(kind = kind.table(), id = %abbrev_uuid(&id), "Reference entry deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// One module of annotated handlers per reference kind.
macro_rules! reference_routes {
    ($module:ident, $marker:ty, $kind:expr, $collection:tt, $item:tt, $tag:tt) => {
        pub mod $module {
            use super::*;
            use crate::auth::permissions::{RequiresPermission, operation};

            #[utoipa::path(
                get,
                path = $collection,
                tag = $tag,
                operation_id = concat!("list_", $tag),
                params(Pagination),
                responses(
                    (status = 200, description = "Entries", body = [ReferenceEntryResponse]),
                    (status = 403, description = "No read permission"),
                ),
                security(("bearer" = []))
            )]
            #[tracing::instrument(skip_all)]
            pub async fn list(
                State(state): State<AppState>,
                Query(pagination): Query<Pagination>,
                _permission: RequiresPermission<$marker, operation::Read>,
            ) -> Result<Json<Vec<ReferenceEntryResponse>>, Error> {
                list_entries(&state, $kind, &pagination).await
            }

            #[utoipa::path(
                get,
                path = $item,
                tag = $tag,
                operation_id = concat!("get_", $tag),
                params(("id" = String, Path, description = "Entry ID")),
                responses(
                    (status = 200, description = "Entry", body = ReferenceEntryResponse),
                    (status = 403, description = "No read permission"),
                    (status = 404, description = "Not found"),
                ),
                security(("bearer" = []))
            )]
            #[tracing::instrument(skip_all)]
            pub async fn get(
                State(state): State<AppState>,
                Path(id): Path<ReferenceEntryId>,
                _permission: RequiresPermission<$marker, operation::Read>,
            ) -> Result<Json<ReferenceEntryResponse>, Error> {
                get_entry(&state, $kind, id).await
            }

            #[utoipa::path(
                post,
                path = $collection,
                tag = $tag,
                operation_id = concat!("create_", $tag),
                request_body = ReferenceEntryCreate,
                responses(
                    (status = 201, description = "Created", body = ReferenceEntryResponse),
                    (status = 400, description = "Invalid name"),
                    (status = 403, description = "No create permission"),
                    (status = 409, description = "Name already exists"),
                ),
                security(("bearer" = []))
            )]
            #[tracing::instrument(skip_all)]
            pub async fn create(
                State(state): State<AppState>,
                permission: RequiresPermission<$marker, operation::Create>,
                Json(create): Json<ReferenceEntryCreate>,
            ) -> Result<(StatusCode, Json<ReferenceEntryResponse>), Error> {
                create_entry(&state, $kind, &permission.user, create).await
            }

            #[utoipa::path(
                patch,
                path = $item,
                tag = $tag,
                operation_id = concat!("update_", $tag),
                request_body = ReferenceEntryUpdate,
                params(("id" = String, Path, description = "Entry ID")),
                responses(
                    (status = 200, description = "Updated", body = ReferenceEntryResponse),
                    (status = 400, description = "Invalid name"),
                    (status = 403, description = "No update permission"),
                    (status = 404, description = "Not found"),
                    (status = 409, description = "Name already exists"),
                ),
                security(("bearer" = []))
            )]
            #[tracing::instrument(skip_all)]
            pub async fn update(
                State(state): State<AppState>,
                Path(id): Path<ReferenceEntryId>,
                _permission: RequiresPermission<$marker, operation::Update>,
                Json(update): Json<ReferenceEntryUpdate>,
            ) -> Result<Json<ReferenceEntryResponse>, Error> {
                update_entry(&state, $kind, id, update).await
            }

            #[utoipa::path(
                delete,
                path = $item,
                tag = $tag,
                operation_id = concat!("delete_", $tag),
                params(("id" = String, Path, description = "Entry ID")),
                responses(
                    (status = 204, description = "Deleted"),
                    (status = 403, description = "No delete permission"),
                    (status = 404, description = "Not found"),
                ),
                security(("bearer" = []))
            )]
            #[tracing::instrument(skip_all)]
            pub async fn delete(
                State(state): State<AppState>,
                Path(id): Path<ReferenceEntryId>,
                _permission: RequiresPermission<$marker, operation::Delete>,
            ) -> Result<StatusCode, Error> {
                delete_entry(&state, $kind, id).await
            }
        }
    };
}

reference_routes!(
    amenities,
    crate::auth::permissions::resource::Amenities,
    ReferenceKind::Amenity,
    "/amenities",
    "/amenities/{id}",
    "amenities"
);
reference_routes!(
    categories,
    crate::auth::permissions::resource::Categories,
    ReferenceKind::Category,
    "/categories",
    "/categories/{id}",
    "categories"
);
reference_routes!(
    statuses,
    crate::auth::permissions::resource::Status,
    ReferenceKind::Status,
    "/statuses",
    "/statuses/{id}",
    "statuses"
);
