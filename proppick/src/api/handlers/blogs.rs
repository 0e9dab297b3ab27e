//! Handlers for blog posts.
//!
//! Every operation is gated on the `/blogs` route flag alone. Unlike listings there is no owner
//! rule: anyone granted update or delete may edit or remove any post.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
};
use serde::de::DeserializeOwned;
use tracing::{info, instrument};

use super::uploads::{ImageUpload, bad_form, discard_images, read_image};
use crate::{
    AppState,
    api::models::{
        blogs::{BlogCreate, BlogResponse, BlogUpdate, normalize_sections},
        pagination::Pagination,
    },
    auth::permissions::{RequiresPermission, operation, resource},
    config::UploadsConfig,
    db::{
        errors::DbError,
        handlers::{Blogs, Repository},
        models::blogs::{BlogCreateDBRequest, BlogFilter, BlogUpdateDBRequest},
    },
    errors::Error,
    types::{BlogId, abbrev_uuid},
};

const BLOG_PART: &str = "blog";
const IMAGE_PART: &str = "image";

fn blog_not_found(id: BlogId) -> Error {
    Error::NotFound {
        resource: "Blog".to_string(),
        id: id.to_string(),
    }
}

/// Pull the optional `blog` JSON part and at most one `image` part out of the form.
async fn read_form<T: DeserializeOwned>(multipart: &mut Multipart, uploads: &UploadsConfig) -> Result<(Option<T>, Option<ImageUpload>), Error> {
    let mut blog = None;
    let mut image = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        match field.name() {
            Some(BLOG_PART) => {
                let text = field.text().await.map_err(bad_form)?;
                let parsed: T = serde_json::from_str(&text).map_err(|e| Error::BadRequest {
                    message: format!("Invalid blog: {e}"),
                })?;
                blog = Some(parsed);
            }
            Some(IMAGE_PART) => {
                if image.is_some() {
                    return Err(Error::BadRequest {
                        message: "A blog has a single image".to_string(),
                    });
                }
                image = Some(read_image(field, uploads).await?);
            }
            other => {
                return Err(Error::BadRequest {
                    message: format!("Unexpected form field {:?}", other.unwrap_or_default()),
                });
            }
        }
    }
    Ok((blog, image))
}

/// Create a blog post
///
/// Multipart form with a `blog` part holding `{"description": [{"heading", "text"}]}` and one
/// `image` part.
#[utoipa::path(
    post,
    path = "/blogs",
    tag = "blogs",
    request_body(content = BlogCreate, content_type = "multipart/form-data", description = "`blog` JSON part plus one `image` file part"),
    responses(
        (status = 201, description = "Blog created", body = BlogResponse),
        (status = 400, description = "Invalid blog or image"),
        (status = 403, description = "No create permission on /blogs"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn create_blog(
    State(state): State<AppState>,
    permission: RequiresPermission<resource::Blogs, operation::Create>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<BlogResponse>), Error> {
    let (blog, image) = read_form::<BlogCreate>(&mut multipart, &state.config.uploads).await?;
    let blog = blog.ok_or_else(|| Error::BadRequest {
        message: "The blog part is required".to_string(),
    })?;
    let image = image.ok_or_else(|| Error::BadRequest {
        message: "An image is required".to_string(),
    })?;
    let description = normalize_sections(blog.description)?;

    let image_url = state.storage.store(&image.content_type, image.bytes).await?.to_string();
    let request = BlogCreateDBRequest {
        description,
        image: image_url.clone(),
        added_by: permission.user.id,
    };

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let created = match Blogs::new(&mut conn).create(&request).await {
        Ok(created) => created,
        Err(e) => {
            discard_images(state.storage.as_ref(), &[image_url]).await;
            return Err(e.into());
        }
    };

    info!(blog_id = %abbrev_uuid(&created.id), added_by = %abbrev_uuid(&permission.user.id), "Blog created");
    Ok((StatusCode::CREATED, Json(BlogResponse::from(created))))
}

/// List blog posts, newest first
#[utoipa::path(
    get,
    path = "/blogs",
    tag = "blogs",
    params(Pagination),
    responses(
        (status = 200, description = "Blogs", body = [BlogResponse]),
        (status = 403, description = "No read permission on /blogs"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn list_blogs(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    _permission: RequiresPermission<resource::Blogs, operation::Read>,
) -> Result<Json<Vec<BlogResponse>>, Error> {
    let (skip, limit) = pagination.params();
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let blogs = Blogs::new(&mut conn).list(&BlogFilter { skip, limit }).await?;

    Ok(Json(blogs.into_iter().map(BlogResponse::from).collect()))
}

/// Get a blog post
#[utoipa::path(
    get,
    path = "/blogs/{blog_id}",
    tag = "blogs",
    params(("blog_id" = String, Path, description = "Blog ID")),
    responses(
        (status = 200, description = "Blog", body = BlogResponse),
        (status = 403, description = "No read permission on /blogs"),
        (status = 404, description = "Blog not found"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn get_blog(
    State(state): State<AppState>,
    Path(blog_id): Path<BlogId>,
    _permission: RequiresPermission<resource::Blogs, operation::Read>,
) -> Result<Json<BlogResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let blog = Blogs::new(&mut conn).get_by_id(blog_id).await?.ok_or_else(|| blog_not_found(blog_id))?;

    Ok(Json(BlogResponse::from(blog)))
}

/// Update a blog post
///
/// Multipart form with an optional `blog` part holding a new `description` and an optional
/// `image` part replacing the current image.
#[utoipa::path(
    patch,
    path = "/blogs/{blog_id}",
    tag = "blogs",
    request_body(content = BlogUpdate, content_type = "multipart/form-data", description = "Optional `blog` JSON part and optional `image` file part"),
    params(("blog_id" = String, Path, description = "Blog ID")),
    responses(
        (status = 200, description = "Updated blog", body = BlogResponse),
        (status = 400, description = "Invalid blog or image"),
        (status = 403, description = "No update permission on /blogs"),
        (status = 404, description = "Blog not found"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn update_blog(
    State(state): State<AppState>,
    Path(blog_id): Path<BlogId>,
    _permission: RequiresPermission<resource::Blogs, operation::Update>,
    mut multipart: Multipart,
) -> Result<Json<BlogResponse>, Error> {
    let (update, image) = read_form::<BlogUpdate>(&mut multipart, &state.config.uploads).await?;
    let description = update.and_then(|u| u.description).map(normalize_sections).transpose()?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let previous = Blogs::new(&mut conn).get_by_id(blog_id).await?.ok_or_else(|| blog_not_found(blog_id))?;

    let new_image = match image {
        Some(image) => Some(state.storage.store(&image.content_type, image.bytes).await?.to_string()),
        None => None,
    };
    let request = BlogUpdateDBRequest {
        description,
        image: new_image.clone(),
    };

    let blog = match Blogs::new(&mut conn).update(blog_id, &request).await {
        Ok(blog) => blog,
        Err(e) => {
            if let Some(url) = new_image {
                discard_images(state.storage.as_ref(), &[url]).await;
            }
            return Err(match e {
                DbError::NotFound => blog_not_found(blog_id),
                other => other.into(),
            });
        }
    };
    drop(conn);

    if new_image.is_some() {
        discard_images(state.storage.as_ref(), &[previous.image]).await;
    }

    info!(blog_id = %abbrev_uuid(&blog_id), "Blog updated");
    Ok(Json(BlogResponse::from(blog)))
}

/// Delete a blog post
#[utoipa::path(
    delete,
    path = "/blogs/{blog_id}",
    tag = "blogs",
    params(("blog_id" = String, Path, description = "Blog ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "No delete permission on /blogs"),
        (status = 404, description = "Blog not found"),
    ),
    security(("bearer" = []))
)]
#[instrument(skip_all)]
pub async fn delete_blog(
    State(state): State<AppState>,
    Path(blog_id): Path<BlogId>,
    _permission: RequiresPermission<resource::Blogs, operation::Delete>,
) -> Result<StatusCode, Error> {
    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let blog = Blogs::new(&mut conn).get_by_id(blog_id).await?.ok_or_else(|| blog_not_found(blog_id))?;
    if !Blogs::new(&mut conn).delete(blog_id).await? {
        return Err(blog_not_found(blog_id));
    }
    drop(conn);

    discard_images(state.storage.as_ref(), &[blog.image]).await;

    info!(blog_id = %abbrev_uuid(&blog_id), "Blog deleted");
    Ok(StatusCode::NO_CONTENT)
}
