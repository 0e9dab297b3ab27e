//! Image parts of multipart forms and the files they end up as.

use axum::extract::multipart::{Field, MultipartError};
use bytes::Bytes;
use tracing::warn;

use crate::{config::UploadsConfig, errors::Error, storage::FileStorage};

pub(crate) struct ImageUpload {
    pub content_type: String,
    pub bytes: Bytes,
}

pub(crate) fn bad_form(e: MultipartError) -> Error {
    Error::BadRequest { message: e.body_text() }
}

/// Read an image field, enforcing the content type and size limits.
pub(crate) async fn read_image(field: Field<'_>, uploads: &UploadsConfig) -> Result<ImageUpload, Error> {
    let content_type = field.content_type().unwrap_or_default().to_string();
    if !content_type.starts_with("image/") {
        return Err(Error::BadRequest {
            message: "Only image uploads are allowed".to_string(),
        });
    }
    let bytes = field.bytes().await.map_err(bad_form)?;
    if bytes.len() > uploads.max_image_bytes {
        return Err(Error::BadRequest {
            message: format!("Images must be at most {} bytes", uploads.max_image_bytes),
        });
    }
    Ok(ImageUpload { content_type, bytes })
}

/// Store every image and return their URLs. Nothing is left behind if one of them fails.
pub(crate) async fn store_images(storage: &dyn FileStorage, images: Vec<ImageUpload>) -> Result<Vec<String>, Error> {
    let mut urls = Vec::with_capacity(images.len());
    for image in images {
        match storage.store(&image.content_type, image.bytes).await {
            Ok(url) => urls.push(url.to_string()),
            Err(e) => {
                discard_images(storage, &urls).await;
                return Err(e);
            }
        }
    }
    Ok(urls)
}

/// Best effort; a leftover file is harmless.
pub(crate) async fn discard_images(storage: &dyn FileStorage, urls: &[String]) {
    for url in urls {
        if let Err(e) = storage.remove(url).await {
            warn!(url = %url, error = %e, "Failed to remove stored image");
        }
    }
}
