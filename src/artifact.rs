//! Stages the deployable artifact in object storage.

use std::path::Path;

use md5::{Digest, Md5};
use tracing::info;

use crate::error::{DeployResult, RemoteContext};
use crate::provider::{NotFoundExt, ObjectStorage};

/// Where function code is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub bucket: String,
    pub key: String,
}

pub struct ArtifactPublisher<'a> {
    storage: &'a dyn ObjectStorage,
    bucket: &'a str,
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

impl<'a> ArtifactPublisher<'a> {
    pub fn new(storage: &'a dyn ObjectStorage, bucket: &'a str) -> Self {
        ArtifactPublisher { storage, bucket }
    }

    /// Uploads `path` unless the stored object already has the same MD5.
    /// The object key is the artifact's file name.
    pub async fn ensure_uploaded(&self, path: &Path, key: &str) -> DeployResult<ArtifactLocation> {
        let target = format!("{}/{}", self.bucket, key);
        let data = tokio::fs::read(path).await?;
        let local_md5 = md5_hex(&data);

        let buckets = self
            .storage
            .list_buckets()
            .await
            .remote(&target, "ListBuckets")?;
        if !buckets.iter().any(|b| b.name == self.bucket) {
            info!(bucket = self.bucket, "creating bucket");
            self.storage
                .create_bucket(self.bucket)
                .await
                .remote(&target, "CreateBucket")?;
        }

        let existing = self
            .storage
            .head_object(self.bucket, key)
            .await
            .found()
            .remote(&target, "HeadObject")?;
        match existing {
            Some(meta) if meta.e_tag.trim_matches('"') == local_md5 => {
                info!(artifact = %target, "artifact unchanged, skipping upload");
            }
            _ => {
                info!(artifact = %target, bytes = data.len(), "uploading artifact");
                self.storage
                    .put_object(self.bucket, key, data)
                    .await
                    .remote(&target, "PutObject")?;
            }
        }

        Ok(ArtifactLocation {
            bucket: self.bucket.to_string(),
            key: key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalCloud;

    #[tokio::test]
    async fn uploads_once_and_creates_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.zip");
        std::fs::write(&path, b"first build").unwrap();

        let cloud = LocalCloud::new("000000000000", "us-east-1");
        let clients = cloud.clients();
        let publisher = ArtifactPublisher::new(clients.s3.as_ref(), "code");

        let location = publisher.ensure_uploaded(&path, "app.zip").await.unwrap();
        assert_eq!(location.bucket, "code");
        assert_eq!(location.key, "app.zip");
        publisher.ensure_uploaded(&path, "app.zip").await.unwrap();

        assert_eq!(cloud.journal().count("s3:CreateBucket").await, 1);
        assert_eq!(cloud.journal().count("s3:PutObject").await, 1);

        std::fs::write(&path, b"second build").unwrap();
        publisher.ensure_uploaded(&path, "app.zip").await.unwrap();
        assert_eq!(cloud.journal().count("s3:PutObject").await, 2);
    }

    #[tokio::test]
    async fn missing_artifact_is_an_io_error() {
        let cloud = LocalCloud::new("000000000000", "us-east-1");
        let clients = cloud.clients();
        let publisher = ArtifactPublisher::new(clients.s3.as_ref(), "code");
        let err = publisher
            .ensure_uploaded(Path::new("/nonexistent/app.zip"), "app.zip")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::DeployError::Io(_)));
    }
}
