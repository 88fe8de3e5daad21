use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Journal;
use crate::provider::types::{SubscribeRequest, SubscriptionEntry};
use crate::provider::{ServiceError, ServiceResult, TopicService};

const SERVICE: &str = "sns";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicData {
    /// Keyed by subscription ARN.
    #[serde(default)]
    pub subscriptions: BTreeMap<String, SubscriptionEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnsData {
    /// Keyed by topic ARN.
    #[serde(default)]
    pub topics: BTreeMap<String, TopicData>,
}

#[derive(Clone)]
pub struct SnsState {
    inner: Arc<Mutex<SnsData>>,
    account_id: String,
    region: String,
    journal: Journal,
}

fn topic_not_found() -> ServiceError {
    ServiceError::ResourceNotFoundException("Topic does not exist".to_string())
}

impl SnsState {
    pub fn new(data: SnsData, account_id: &str, region: &str, journal: Journal) -> Self {
        SnsState {
            inner: Arc::new(Mutex::new(data)),
            account_id: account_id.to_string(),
            region: region.to_string(),
            journal,
        }
    }

    pub async fn data(&self) -> SnsData {
        self.inner.lock().await.clone()
    }
}

#[async_trait]
impl TopicService for SnsState {
    async fn create_topic(&self, name: &str) -> ServiceResult<String> {
        if name.is_empty() || name.len() > 256 {
            return Err(ServiceError::InvalidParameterValueException(
                "Topic name must be between 1 and 256 characters".into(),
            ));
        }
        let arn = format!("arn:aws:sns:{}:{}:{}", self.region, self.account_id, name);
        let mut inner = self.inner.lock().await;
        if inner.topics.contains_key(&arn) {
            return Ok(arn);
        }
        inner.topics.insert(arn.clone(), TopicData::default());
        drop(inner);

        self.journal.record(SERVICE, "CreateTopic", name).await;
        Ok(arn)
    }

    async fn subscribe(&self, req: SubscribeRequest) -> ServiceResult<String> {
        let mut inner = self.inner.lock().await;
        let topic = inner
            .topics
            .get_mut(&req.topic_arn)
            .ok_or_else(topic_not_found)?;

        // Same protocol and endpoint on a topic yields the existing subscription.
        if let Some(existing) = topic
            .subscriptions
            .values()
            .find(|s| s.protocol == req.protocol && s.endpoint == req.endpoint)
        {
            return Ok(existing.subscription_arn.clone());
        }

        let arn = format!("{}:{}", req.topic_arn, Uuid::new_v4());
        topic.subscriptions.insert(
            arn.clone(),
            SubscriptionEntry {
                subscription_arn: arn.clone(),
                owner: self.account_id.clone(),
                protocol: req.protocol,
                endpoint: req.endpoint,
                topic_arn: req.topic_arn,
            },
        );
        drop(inner);

        self.journal.record(SERVICE, "Subscribe", arn.clone()).await;
        Ok(arn)
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> ServiceResult<()> {
        let mut inner = self.inner.lock().await;
        let removed = inner
            .topics
            .values_mut()
            .any(|topic| topic.subscriptions.remove(subscription_arn).is_some());
        drop(inner);

        if !removed {
            return Err(ServiceError::ResourceNotFoundException(
                "Subscription does not exist".into(),
            ));
        }
        self.journal
            .record(SERVICE, "Unsubscribe", subscription_arn)
            .await;
        Ok(())
    }

    async fn list_subscriptions(&self) -> ServiceResult<Vec<SubscriptionEntry>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<SubscriptionEntry> = inner
            .topics
            .values()
            .flat_map(|t| t.subscriptions.values().cloned())
            .collect();
        entries.sort_by(|a, b| a.subscription_arn.cmp(&b.subscription_arn));
        Ok(entries)
    }

    async fn list_subscriptions_by_topic(
        &self,
        topic_arn: &str,
    ) -> ServiceResult<Vec<SubscriptionEntry>> {
        let inner = self.inner.lock().await;
        let topic = inner.topics.get(topic_arn).ok_or_else(topic_not_found)?;
        Ok(topic.subscriptions.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_is_idempotent_per_endpoint() {
        let journal = Journal::default();
        let sns = SnsState::new(SnsData::default(), "000000000000", "us-east-1", journal.clone());
        let topic = sns.create_topic("alerts").await.unwrap();
        assert_eq!(sns.create_topic("alerts").await.unwrap(), topic);

        let req = || SubscribeRequest {
            topic_arn: topic.clone(),
            protocol: "lambda".into(),
            endpoint: "arn:aws:lambda:us-east-1:000000000000:function:f".into(),
        };
        let first = sns.subscribe(req()).await.unwrap();
        let second = sns.subscribe(req()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(sns.list_subscriptions().await.unwrap().len(), 1);
        assert_eq!(journal.count("sns:Subscribe").await, 1);
        assert_eq!(journal.count("sns:CreateTopic").await, 1);
    }

    #[tokio::test]
    async fn unsubscribing_unknown_arn_is_not_found() {
        let sns = SnsState::new(SnsData::default(), "000000000000", "us-east-1", Journal::default());
        assert!(sns.unsubscribe("arn:aws:sns:us-east-1:000000000000:t:x").await.unwrap_err().is_not_found());
    }
}
