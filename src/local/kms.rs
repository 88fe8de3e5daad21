use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::provider::{KeyService, ServiceError, ServiceResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyData {
    pub arn: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KmsData {
    /// Keyed by key id.
    #[serde(default)]
    pub keys: BTreeMap<String, KeyData>,
}

#[derive(Clone)]
pub struct KmsState {
    inner: Arc<Mutex<KmsData>>,
    account_id: String,
    region: String,
}

impl KmsState {
    pub fn new(data: KmsData, account_id: &str, region: &str) -> Self {
        KmsState {
            inner: Arc::new(Mutex::new(data)),
            account_id: account_id.to_string(),
            region: region.to_string(),
        }
    }

    pub async fn data(&self) -> KmsData {
        self.inner.lock().await.clone()
    }

    pub async fn create_key(&self) -> String {
        let key_id = Uuid::new_v4().to_string();
        let arn = format!("arn:aws:kms:{}:{}:key/{}", self.region, self.account_id, key_id);
        self.inner.lock().await.keys.insert(
            key_id,
            KeyData {
                arn: arn.clone(),
                enabled: true,
            },
        );
        arn
    }

    fn resolve_key_id<'a>(data: &'a KmsData, key_id: &'a str) -> Option<&'a KeyData> {
        if let Some(key) = data.keys.get(key_id) {
            return Some(key);
        }
        // arn:aws:kms:region:account:key/key-id
        key_id
            .rsplit_once(":key/")
            .and_then(|(_, id)| data.keys.get(id))
    }
}

#[async_trait]
impl KeyService for KmsState {
    async fn encrypt(&self, key_id: &str, plaintext: &str) -> ServiceResult<String> {
        let inner = self.inner.lock().await;
        let key = Self::resolve_key_id(&inner, key_id).ok_or_else(|| {
            ServiceError::ResourceNotFoundException(format!("Invalid keyId {}", key_id))
        })?;
        if !key.enabled {
            return Err(ServiceError::AccessDeniedException(format!(
                "KMS key {} is disabled",
                key.arn
            )));
        }
        // Simulated ciphertext: key arn and base64 plaintext, base64 encoded.
        let simulated = format!("{}:{}", key.arn, BASE64.encode(plaintext.as_bytes()));
        Ok(BASE64.encode(simulated.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encrypts_under_key_arn() {
        let kms = KmsState::new(KmsData::default(), "000000000000", "us-east-1");
        let arn = kms.create_key().await;
        let blob = kms.encrypt(&arn, "s3cret").await.unwrap();
        let decoded = String::from_utf8(BASE64.decode(blob).unwrap()).unwrap();
        assert!(decoded.starts_with(&arn));
        assert!(decoded.ends_with(&BASE64.encode("s3cret")));
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let kms = KmsState::new(KmsData::default(), "000000000000", "us-east-1");
        assert!(kms.encrypt("missing", "x").await.unwrap_err().is_not_found());
    }
}
