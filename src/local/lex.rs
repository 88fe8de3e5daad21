use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::provider::types::BotSummary;
use crate::provider::{BotService, ServiceError, ServiceResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LexData {
    #[serde(default)]
    pub bots: BTreeMap<String, BotSummary>,
}

#[derive(Clone)]
pub struct LexState {
    inner: Arc<Mutex<LexData>>,
}

impl LexState {
    pub fn new(data: LexData) -> Self {
        LexState {
            inner: Arc::new(Mutex::new(data)),
        }
    }

    pub async fn data(&self) -> LexData {
        self.inner.lock().await.clone()
    }

    pub async fn create_bot(&self, name: &str) {
        self.inner.lock().await.bots.insert(
            name.to_string(),
            BotSummary {
                name: name.to_string(),
                status: "READY".to_string(),
                version: "$LATEST".to_string(),
            },
        );
    }
}

#[async_trait]
impl BotService for LexState {
    async fn get_bot(&self, name: &str) -> ServiceResult<BotSummary> {
        self.inner.lock().await.bots.get(name).cloned().ok_or_else(|| {
            ServiceError::ResourceNotFoundException(format!(
                "The bot {} does not exist. Choose another resource.",
                name
            ))
        })
    }
}
