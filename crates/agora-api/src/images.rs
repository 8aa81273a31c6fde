use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use axum::body::Bytes;
use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use md5::{Digest, Md5};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};

/// Sub-directory of the static root that holds uploaded images.
pub const IMAGES_DIR: &str = "images";

/// Hashing chunk size.
const BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// Path relative to the static root, e.g. `images/<md5>.png`.
    pub path: String,
    /// `false` when identical content was already on disk.
    pub written: bool,
}

/// Content-addressed image storage.
///
/// Each image is stored once at `{root}/images/{md5}.{ext}`, so uploading the
/// same bytes twice (under any filename with the same extension) lands on the
/// same file.
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute location of a path returned by [`ImageStore::store`].
    pub fn file_path(&self, stored: &str) -> PathBuf {
        self.root.join(stored)
    }

    /// Stores an uploaded image. Returns `None` when there is nothing to
    /// store: no filename, a blank one, or an empty body.
    pub async fn store(&self, filename: Option<&str>, data: &[u8]) -> std::io::Result<Option<StoredImage>> {
        let Some(filename) = filename.filter(|f| !f.trim().is_empty()) else {
            return Ok(None);
        };
        if data.is_empty() {
            return Ok(None);
        }

        let digest = content_digest(data);
        let ext = extension_from_filename(filename);
        let name = if ext.is_empty() {
            digest
        } else {
            format!("{}.{}", digest, ext)
        };

        let dir = self.root.join(IMAGES_DIR);
        fs::create_dir_all(&dir).await?;
        let target = dir.join(&name);

        // create_new makes the existence check and the create a single step,
        // so two concurrent uploads of the same bytes write the file once.
        let written = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(mut file) => {
                if let Err(e) = write_all(&mut file, data).await {
                    // A truncated file would be reused by every later upload.
                    drop(file);
                    fs::remove_file(&target).await.ok();
                    return Err(e);
                }
                info!("Stored image {} ({} bytes)", name, data.len());
                true
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("Image {} already stored", name);
                false
            }
            Err(e) => return Err(e),
        };

        Ok(Some(StoredImage {
            path: format!("{}/{}", IMAGES_DIR, name),
            written,
        }))
    }
}

async fn write_all(file: &mut fs::File, data: &[u8]) -> std::io::Result<()> {
    file.write_all(data).await?;
    file.flush().await
}

/// Hex MD5 of `data`, fed to the hasher in `BUF_SIZE` chunks.
pub fn content_digest(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    for chunk in data.chunks(BUF_SIZE) {
        hasher.update(chunk);
    }
    hex::encode(hasher.finalize())
}

/// Everything after the first dot of the base name, with each segment
/// reduced to ASCII alphanumerics and lowercased: `../x/Photo.Tar.GZ` gives
/// `tar.gz`. Empty when the name has no usable extension.
pub fn extension_from_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let base = base.trim_start_matches(['.', '_']);

    base.split('.')
        .skip(1)
        .map(|segment| {
            segment
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

// -- Multipart forms --

pub struct Upload {
    pub filename: Option<String>,
    pub data: Bytes,
}

/// A multipart form split into its text fields and at most one file.
#[derive(Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    pub file: Option<Upload>,
}

impl MultipartForm {
    /// Required, non-blank text field.
    pub fn take_text(&mut self, name: &str) -> ApiResult<String> {
        self.fields
            .remove(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ApiError::BadRequest(format!("missing field: {}", name)))
    }
}

/// Reads every part of `multipart`. The part named `file_field` is kept as
/// raw bytes, everything else as text.
pub async fn read_multipart(mut multipart: Multipart, file_field: &str) -> ApiResult<MultipartForm> {
    let mut form = MultipartForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == file_field {
            let filename = field.file_name().map(str::to_string);
            let data = field.bytes().await.map_err(multipart_error)?;
            form.file = Some(Upload { filename, data });
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            form.fields.insert(name, value);
        }
    }

    Ok(form)
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::PayloadTooLarge;
    }
    warn!("Malformed multipart body: {}", e);
    ApiError::BadRequest(e.body_text())
}
