use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::provider::{QueueService, ServiceError, ServiceResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueData {
    pub url: String,
    pub arn: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqsData {
    /// Keyed by queue name.
    #[serde(default)]
    pub queues: BTreeMap<String, QueueData>,
}

/// Queue name to URL to ARN resolution. Messages are not modelled.
#[derive(Clone)]
pub struct SqsState {
    inner: Arc<Mutex<SqsData>>,
    account_id: String,
    region: String,
}

fn non_existent_queue() -> ServiceError {
    ServiceError::ResourceNotFoundException(
        "AWS.SimpleQueueService.NonExistentQueue: The specified queue does not exist."
            .to_string(),
    )
}

impl SqsState {
    pub fn new(data: SqsData, account_id: &str, region: &str) -> Self {
        SqsState {
            inner: Arc::new(Mutex::new(data)),
            account_id: account_id.to_string(),
            region: region.to_string(),
        }
    }

    pub async fn data(&self) -> SqsData {
        self.inner.lock().await.clone()
    }

    /// Creates the queue if needed and returns its URL.
    pub async fn create_queue(&self, name: &str) -> String {
        let mut inner = self.inner.lock().await;
        let queue = inner
            .queues
            .entry(name.to_string())
            .or_insert_with(|| QueueData {
                url: format!(
                    "https://sqs.{}.amazonaws.com/{}/{}",
                    self.region, self.account_id, name
                ),
                arn: format!("arn:aws:sqs:{}:{}:{}", self.region, self.account_id, name),
            });
        queue.url.clone()
    }
}

#[async_trait]
impl QueueService for SqsState {
    async fn get_queue_url(&self, queue_name: &str) -> ServiceResult<String> {
        let inner = self.inner.lock().await;
        inner
            .queues
            .get(queue_name)
            .map(|q| q.url.clone())
            .ok_or_else(non_existent_queue)
    }

    async fn get_queue_arn(&self, queue_url: &str) -> ServiceResult<String> {
        let inner = self.inner.lock().await;
        inner
            .queues
            .values()
            .find(|q| q.url == queue_url)
            .map(|q| q.arn.clone())
            .ok_or_else(non_existent_queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn name_resolves_through_url_to_arn() {
        let sqs = SqsState::new(SqsData::default(), "000000000000", "us-east-1");
        let url = sqs.create_queue("jobs").await;
        assert_eq!(sqs.get_queue_url("jobs").await.unwrap(), url);
        assert_eq!(
            sqs.get_queue_arn(&url).await.unwrap(),
            "arn:aws:sqs:us-east-1:000000000000:jobs"
        );
        assert!(sqs.get_queue_url("other").await.unwrap_err().is_not_found());
    }
}
