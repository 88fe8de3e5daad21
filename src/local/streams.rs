use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::now_iso;
use crate::provider::types::{StreamDescription, StreamSummary};
use crate::provider::{ServiceError, ServiceResult, StreamService};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStream {
    pub stream_arn: String,
    pub stream_label: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamsData {
    /// Table name to its change stream.
    #[serde(default)]
    pub tables: BTreeMap<String, TableStream>,
    /// Kinesis stream name to ARN.
    #[serde(default)]
    pub kinesis: BTreeMap<String, String>,
}

/// Table change streams and Kinesis data streams.
#[derive(Clone)]
pub struct StreamsState {
    inner: Arc<Mutex<StreamsData>>,
    account_id: String,
    region: String,
}

impl StreamsState {
    pub fn new(data: StreamsData, account_id: &str, region: &str) -> Self {
        StreamsState {
            inner: Arc::new(Mutex::new(data)),
            account_id: account_id.to_string(),
            region: region.to_string(),
        }
    }

    pub async fn data(&self) -> StreamsData {
        self.inner.lock().await.clone()
    }

    /// Creates a table with streams enabled and returns the stream ARN.
    pub async fn create_table(&self, name: &str) -> String {
        let mut inner = self.inner.lock().await;
        let stream = inner.tables.entry(name.to_string()).or_insert_with(|| {
            let label = now_iso();
            TableStream {
                stream_arn: format!(
                    "arn:aws:dynamodb:{}:{}:table/{}/stream/{}",
                    self.region, self.account_id, name, label
                ),
                stream_label: label,
            }
        });
        stream.stream_arn.clone()
    }

    pub async fn create_kinesis_stream(&self, name: &str) -> String {
        let mut inner = self.inner.lock().await;
        inner
            .kinesis
            .entry(name.to_string())
            .or_insert_with(|| {
                format!(
                    "arn:aws:kinesis:{}:{}:stream/{}",
                    self.region, self.account_id, name
                )
            })
            .clone()
    }
}

#[async_trait]
impl StreamService for StreamsState {
    async fn list_streams(&self, table_name: &str) -> ServiceResult<Vec<StreamSummary>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tables
            .get(table_name)
            .map(|s| StreamSummary {
                stream_arn: s.stream_arn.clone(),
                table_name: table_name.to_string(),
                stream_label: s.stream_label.clone(),
            })
            .into_iter()
            .collect())
    }

    async fn describe_stream(&self, stream_name: &str) -> ServiceResult<StreamDescription> {
        let inner = self.inner.lock().await;
        let arn = inner.kinesis.get(stream_name).ok_or_else(|| {
            ServiceError::ResourceNotFoundException(format!(
                "Stream {} under account {} not found.",
                stream_name, self.account_id
            ))
        })?;
        Ok(StreamDescription {
            stream_name: stream_name.to_string(),
            stream_arn: arn.clone(),
            stream_status: "ACTIVE".to_string(),
        })
    }
}
