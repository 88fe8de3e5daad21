use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{base64_bytes, now_iso, Journal};
use crate::provider::types::{BucketEntry, ObjectMetadata};
use crate::provider::{ObjectStorage, ServiceError, ServiceResult};

const SERVICE: &str = "s3";

pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn etag_quoted(data: &[u8]) -> String {
    format!("\"{}\"", md5_hex(data))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub etag: String,
    pub last_modified: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketData {
    pub creation_date: String,
    #[serde(default)]
    pub objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Data {
    #[serde(default)]
    pub buckets: BTreeMap<String, BucketData>,
}

#[derive(Clone)]
pub struct S3State {
    inner: Arc<Mutex<S3Data>>,
    journal: Journal,
}

fn no_such_bucket(bucket: &str) -> ServiceError {
    ServiceError::ResourceNotFoundException(format!(
        "NoSuchBucket: The specified bucket does not exist: {}",
        bucket
    ))
}

fn no_such_key(key: &str) -> ServiceError {
    ServiceError::ResourceNotFoundException(format!(
        "NoSuchKey: The specified key does not exist: {}",
        key
    ))
}

impl S3State {
    pub fn new(data: S3Data, journal: Journal) -> Self {
        S3State {
            inner: Arc::new(Mutex::new(data)),
            journal,
        }
    }

    pub async fn data(&self) -> S3Data {
        self.inner.lock().await.clone()
    }

    /// Object body, for services that read deployment packages.
    pub(crate) async fn object_bytes(&self, bucket: &str, key: &str) -> ServiceResult<Vec<u8>> {
        let inner = self.inner.lock().await;
        let b = inner.buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;
        let obj = b.objects.get(key).ok_or_else(|| no_such_key(key))?;
        Ok(obj.data.clone())
    }
}

#[async_trait]
impl ObjectStorage for S3State {
    async fn list_buckets(&self) -> ServiceResult<Vec<BucketEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .buckets
            .iter()
            .map(|(name, b)| BucketEntry {
                name: name.clone(),
                creation_date: b.creation_date.clone(),
            })
            .collect())
    }

    async fn create_bucket(&self, name: &str) -> ServiceResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.buckets.contains_key(name) {
            return Err(ServiceError::ResourceConflictException(format!(
                "BucketAlreadyOwnedByYou: {}",
                name
            )));
        }
        inner.buckets.insert(
            name.to_string(),
            BucketData {
                creation_date: now_iso(),
                objects: BTreeMap::new(),
            },
        );
        drop(inner);
        self.journal.record(SERVICE, "CreateBucket", name).await;
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> ServiceResult<ObjectMetadata> {
        let inner = self.inner.lock().await;
        let b = inner.buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;
        let obj = b.objects.get(key).ok_or_else(|| no_such_key(key))?;
        Ok(ObjectMetadata {
            e_tag: obj.etag.clone(),
            content_length: obj.data.len() as i64,
            last_modified: obj.last_modified.clone(),
        })
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> ServiceResult<String> {
        let mut inner = self.inner.lock().await;
        let b = inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?;
        let etag = etag_quoted(&data);
        b.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                etag: etag.clone(),
                last_modified: now_iso(),
            },
        );
        drop(inner);
        self.journal
            .record(SERVICE, "PutObject", format!("{}/{}", bucket, key))
            .await;
        Ok(etag)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ServiceResult<()> {
        let mut inner = self.inner.lock().await;
        let b = inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?;
        // Deleting an absent key succeeds, as it does remotely.
        b.objects.remove(key);
        drop(inner);
        self.journal
            .record(SERVICE, "DeleteObject", format!("{}/{}", bucket, key))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn etag_is_quoted_md5() {
        let s3 = S3State::new(S3Data::default(), Journal::default());
        s3.create_bucket("b").await.unwrap();
        let etag = s3.put_object("b", "k", b"hello".to_vec()).await.unwrap();
        assert_eq!(etag, "\"5d41402abc4b2a76b9719d911017c592\"");
        assert_eq!(s3.head_object("b", "k").await.unwrap().e_tag, etag);
    }

    #[tokio::test]
    async fn missing_bucket_is_not_found() {
        let s3 = S3State::new(S3Data::default(), Journal::default());
        let err = s3.put_object("nope", "k", vec![]).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
