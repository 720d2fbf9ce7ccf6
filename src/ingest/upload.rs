//! Validation and storage of uploaded ingest files.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use serde_json::Value;
use uuid::Uuid;

use crate::error::AppError;
use crate::model::ingest::{FileType, ALLOWED_ZIP_UPLOAD_TYPES, MEDIA_TYPE_JSON};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Content type must be application/json or application/zip")]
    UnsupportedContentType,
    #[error("file is not valid json")]
    InvalidJson,
    #[error("file is missing required tags: meta, data")]
    MissingTags,
    #[error("file is not a valid zip archive")]
    InvalidZip,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Io(e) => e.into(),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

/// Media type of a `Content-Type` value, lowercased and without parameters.
pub fn media_type(content_type: &str) -> String {
    content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

pub fn file_type_for(content_type: &str) -> Result<FileType, UploadError> {
    let media = media_type(content_type);
    if media == MEDIA_TYPE_JSON {
        Ok(FileType::Json)
    } else if ALLOWED_ZIP_UPLOAD_TYPES.contains(&media.as_str()) {
        Ok(FileType::Zip)
    } else {
        Err(UploadError::UnsupportedContentType)
    }
}

pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// An ingest document is a JSON object carrying both `meta` and `data`.
pub fn validate_json(bytes: &[u8]) -> Result<Value, UploadError> {
    let doc: Value = serde_json::from_slice(strip_bom(bytes)).map_err(|_| UploadError::InvalidJson)?;
    let obj = doc.as_object().ok_or(UploadError::MissingTags)?;
    if !obj.contains_key("meta") || !obj.contains_key("data") {
        return Err(UploadError::MissingTags);
    }
    Ok(doc)
}

pub fn validate_zip(bytes: &[u8]) -> Result<usize, UploadError> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|_| UploadError::InvalidZip)?;
    if archive.is_empty() {
        return Err(UploadError::InvalidZip);
    }
    Ok(archive.len())
}

pub fn validate(file_type: FileType, bytes: &[u8]) -> Result<(), UploadError> {
    match file_type {
        FileType::Json => validate_json(bytes).map(|_| ()),
        FileType::Zip => validate_zip(bytes).map(|_| ()),
    }
}

/// Writes `bytes` under `dir` with a generated name and returns the stored path.
pub async fn save(dir: &Path, file_type: FileType, bytes: &[u8]) -> Result<PathBuf, UploadError> {
    tokio::fs::create_dir_all(dir).await?;
    let extension = match file_type {
        FileType::Json => "json",
        FileType::Zip => "zip",
    };
    let path = dir.join(format!("{}.{}", Uuid::new_v4(), extension));
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

/// Removes a stored upload; a file that is already gone is not an error.
pub async fn remove(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove stored upload {}: {}", path.display(), e),
    }
}
