//! Image registry: room photos stored as blobs and listed per project.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;

use crate::backend::{BlobStore, Query, RecordStore, Session, Table};
use crate::error::{AppError, AppResult};
use crate::models::{from_record, Image};

/// A file picked in the upload form.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl Upload {
    /// Browsers submit an empty part when no file was chosen.
    pub fn is_empty(&self) -> bool {
        self.file_name.is_empty() || self.data.is_empty()
    }

    fn content_type(&self) -> String {
        self.content_type
            .clone()
            .filter(|ct| !ct.is_empty() && ct != "application/octet-stream")
            .unwrap_or_else(|| {
                mime_guess::from_path(&self.file_name)
                    .first_or_octet_stream()
                    .to_string()
            })
    }
}

/// Text after the last dot of a file name, if there is any.
pub fn file_extension(file_name: &str) -> Option<&str> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// Bucket path for an upload: `{project_id}/{random}.{ext}`. The random
/// part keeps repeated uploads of the same file from colliding.
pub fn storage_path(project_id: &str, file_name: &str) -> String {
    let stem = uuid::Uuid::new_v4().simple().to_string();
    match file_extension(file_name) {
        Some(ext) => format!("{}/{}.{}", project_id, stem, ext),
        None => format!("{}/{}", project_id, stem),
    }
}

#[derive(Clone)]
pub struct ImageRegistry {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
}

impl ImageRegistry {
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { records, blobs }
    }

    /// Store the file, then record it. Returns `Ok(None)` when nothing was
    /// selected.
    ///
    /// The two steps are independent calls: if the blob upload succeeds and
    /// the insert fails, the blob stays behind with no image row pointing
    /// at it.
    pub async fn upload_image(
        &self,
        session: &Session,
        project_id: &str,
        upload: Option<Upload>,
    ) -> AppResult<Option<Image>> {
        let Some(upload) = upload.filter(|u| !u.is_empty()) else {
            return Ok(None);
        };

        let path = storage_path(project_id, &upload.file_name);
        let content_type = upload.content_type();
        self.blobs
            .upload(session, &path, upload.data, &content_type)
            .await?;

        let url = self.blobs.public_url(&path);
        let stored = match self
            .records
            .insert(
                session,
                Table::Images,
                json!({ "project_id": project_id, "url": url }),
            )
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(
                    bucket = self.blobs.bucket(),
                    path = %path,
                    "Blob stored but image row not created: {}",
                    e
                );
                return Err(e.into());
            }
        };

        let image: Image = from_record(stored)?;
        tracing::info!(image_id = %image.id, project_id, path = %path, "Uploaded image");
        Ok(Some(image))
    }

    /// A project's images, newest first.
    pub async fn list_images(&self, session: &Session, project_id: &str) -> AppResult<Vec<Image>> {
        let rows = self
            .records
            .select(
                session,
                Table::Images,
                &Query::new().eq("project_id", project_id).newest_first(),
            )
            .await?;
        rows.into_iter().map(from_record).collect()
    }

    pub async fn get_image(&self, session: &Session, id: &str) -> AppResult<Image> {
        let rows = self
            .records
            .select(session, Table::Images, &Query::new().eq("id", id))
            .await?;
        let row = rows.into_iter().next().ok_or(AppError::NotFound)?;
        from_record(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_path_keeps_extension_and_project_prefix() {
        let path = storage_path("p1", "kitchen.jpg");
        assert!(path.starts_with("p1/"));
        assert!(path.ends_with(".jpg"));
        assert!(!path.contains("kitchen"));
    }

    #[test]
    fn storage_path_is_unique_per_upload() {
        let paths: std::collections::HashSet<String> =
            (0..100).map(|_| storage_path("p1", "kitchen.jpg")).collect();
        assert_eq!(paths.len(), 100);
    }

    #[test]
    fn extension_is_taken_after_last_dot() {
        assert_eq!(file_extension("living.room.PNG"), Some("PNG"));
        assert_eq!(file_extension("photo.heic"), Some("heic"));
        assert_eq!(file_extension("README"), None);
        assert_eq!(file_extension(".hidden"), None);
        assert_eq!(file_extension("trailing."), None);
    }

    #[test]
    fn file_without_extension_gets_bare_name() {
        let path = storage_path("p1", "scan");
        let name = path.strip_prefix("p1/").unwrap();
        assert!(!name.contains('.'));
        assert_eq!(name.len(), 32);
    }

    #[test]
    fn empty_part_counts_as_no_selection() {
        let upload = Upload {
            file_name: String::new(),
            content_type: Some("application/octet-stream".into()),
            data: Bytes::new(),
        };
        assert!(upload.is_empty());
    }

    #[test]
    fn content_type_falls_back_to_extension_guess() {
        let upload = Upload {
            file_name: "kitchen.jpg".into(),
            content_type: Some("application/octet-stream".into()),
            data: Bytes::from_static(b"x"),
        };
        assert_eq!(upload.content_type(), "image/jpeg");
    }
}
