//! Local filesystem blob store.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use super::{BackendError, BackendResult, BlobStore, Session};

/// Stores blobs under `{root}/{bucket}/{path}` and hands out URLs under
/// `{public_base}/{bucket}/{path}`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    bucket: String,
    public_base: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, bucket: &str, public_base: &str) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.to_string(),
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve a bucket-relative path, refusing anything that would escape
    /// the bucket directory.
    fn resolve(&self, path: &str) -> BackendResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || relative.as_os_str().is_empty() {
            return Err(BackendError::remote(format!("Invalid object path: {}", path)));
        }
        Ok(self.root.join(&self.bucket).join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload(
        &self,
        _session: &Session,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> BackendResult<()> {
        let full_path = self.resolve(path)?;
        if fs::try_exists(&full_path).await? {
            return Err(BackendError::remote("The resource already exists"));
        }
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full_path, &data).await?;

        tracing::debug!(path, bytes = data.len(), content_type, "Stored blob");
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.public_base,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    async fn download(&self, path: &str) -> BackendResult<Option<Bytes>> {
        let full_path = self.resolve(path)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
