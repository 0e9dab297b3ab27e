//! Listing image storage.
//!
//! Storage hands back a stable public URL for each stored file; listings persist only those URLs.
//! The local implementation writes to `uploads.dir`, which the router serves under `/uploads`.

use std::path::PathBuf;

use bytes::Bytes;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use crate::{config::UploadsConfig, errors::Error};

#[async_trait::async_trait]
pub trait FileStorage: Send + Sync {
    /// Store the bytes and return the URL they can be fetched from.
    async fn store(&self, content_type: &str, bytes: Bytes) -> Result<Url, Error>;

    /// Remove a previously stored file. Unknown URLs are ignored.
    async fn remove(&self, url: &str) -> Result<(), Error>;
}

pub struct LocalFileStorage {
    dir: PathBuf,
    public_base_url: Url,
}

impl LocalFileStorage {
    pub fn new(config: &UploadsConfig) -> Result<Self, Error> {
        std::fs::create_dir_all(&config.dir).map_err(|e| Error::Internal {
            operation: format!("create uploads directory {}: {e}", config.dir.display()),
        })?;

        // Url::join drops the last path segment unless the base ends with '/'
        let mut public_base_url = config.public_base_url.clone();
        if !public_base_url.path().ends_with('/') {
            let path = format!("{}/", public_base_url.path());
            public_base_url.set_path(&path);
        }

        Ok(Self {
            dir: config.dir.clone(),
            public_base_url,
        })
    }

    /// File name under `dir` for a URL we issued, if it is one.
    fn file_name_for(&self, url: &str) -> Option<String> {
        let name = url.strip_prefix(self.public_base_url.as_str())?;
        let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
        valid.then(|| name.to_string())
    }
}

fn extension_for(content_type: &str) -> &'static str {
    mime_guess::get_mime_extensions_str(content_type)
        .and_then(|exts| exts.first().copied())
        .unwrap_or("bin")
}

#[async_trait::async_trait]
impl FileStorage for LocalFileStorage {
    #[instrument(skip(self, bytes), fields(size = bytes.len()), err)]
    async fn store(&self, content_type: &str, bytes: Bytes) -> Result<Url, Error> {
        let name = format!("{}.{}", Uuid::new_v4(), extension_for(content_type));
        tokio::fs::write(self.dir.join(&name), &bytes).await.map_err(|e| Error::Internal {
            operation: format!("write upload {name}: {e}"),
        })?;

        self.public_base_url.join(&name).map_err(|e| Error::Internal {
            operation: format!("build upload URL: {e}"),
        })
    }

    #[instrument(skip(self), err)]
    async fn remove(&self, url: &str) -> Result<(), Error> {
        let Some(name) = self.file_name_for(url) else {
            debug!("Not a locally stored upload, skipping");
            return Ok(());
        };

        match tokio::fs::remove_file(self.dir.join(&name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Internal {
                operation: format!("remove upload {name}: {e}"),
            }),
        }
    }
}
