//! In-memory implementation of every collaborator service.
//!
//! Each service keeps its data behind `Arc<Mutex<..>>` and builds ARNs from
//! the configured account and region. The whole cloud can be captured as a
//! [`Snapshot`] and written to disk between runs, and every mutating call that
//! succeeds is appended to a shared [`Journal`].

pub mod events;
pub mod kms;
pub mod lambda;
pub mod lex;
pub mod s3;
pub mod sns;
pub mod sqs;
pub mod streams;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{DeployError, DeployResult};
use crate::provider::Clients;

pub use events::{EventsData, EventsState};
pub use kms::{KmsData, KmsState};
pub use lambda::{LambdaData, LambdaState};
pub use lex::{LexData, LexState};
pub use s3::{S3Data, S3State};
pub use sns::{SnsData, SnsState};
pub use sqs::{SqsData, SqsState};
pub use streams::{StreamsData, StreamsState};

pub const DEFAULT_ACCOUNT_ID: &str = "000000000000";

pub(crate) fn now_iso() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3f+0000")
        .to_string()
}

// --- Journal ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Call {
    pub service: &'static str,
    pub operation: &'static str,
    pub target: String,
}

impl Call {
    /// `service:Operation`, e.g. `lambda:CreateFunction`.
    pub fn name(&self) -> String {
        format!("{}:{}", self.service, self.operation)
    }
}

/// Ordered record of applied mutations.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Journal {
    pub(crate) async fn record(
        &self,
        service: &'static str,
        operation: &'static str,
        target: impl Into<String>,
    ) {
        let call = Call {
            service,
            operation,
            target: target.into(),
        };
        debug!(service, operation, target = %call.target, "local call");
        self.calls.lock().await.push(call);
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    /// Operation names in call order.
    pub async fn operations(&self) -> Vec<String> {
        self.calls.lock().await.iter().map(Call::name).collect()
    }

    pub async fn count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.name() == name)
            .count()
    }

    pub async fn clear(&self) {
        self.calls.lock().await.clear();
    }
}

// --- Snapshot ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub account_id: String,
    pub region: String,
    #[serde(default)]
    pub lambda: LambdaData,
    #[serde(default)]
    pub events: EventsData,
    #[serde(default)]
    pub sns: SnsData,
    #[serde(default)]
    pub sqs: SqsData,
    #[serde(default)]
    pub streams: StreamsData,
    #[serde(default)]
    pub lex: LexData,
    #[serde(default)]
    pub s3: S3Data,
    #[serde(default)]
    pub kms: KmsData,
}

impl Snapshot {
    pub fn empty(account_id: &str, region: &str) -> Self {
        Snapshot {
            account_id: account_id.to_string(),
            region: region.to_string(),
            lambda: LambdaData::default(),
            events: EventsData::default(),
            sns: SnsData::default(),
            sqs: SqsData::default(),
            streams: StreamsData::default(),
            lex: LexData::default(),
            s3: S3Data::default(),
            kms: KmsData::default(),
        }
    }
}

/// Serializes object bodies as base64 strings inside the snapshot.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// --- Seeding ---

/// External resources that triggers resolve by name. None of them are
/// created by a deploy, so they are put in place ahead of it.
#[derive(Debug, Clone, Default)]
pub struct Seed {
    pub tables: Vec<String>,
    pub kinesis_streams: Vec<String>,
    pub queues: Vec<String>,
    pub bots: Vec<String>,
    pub kms_keys: usize,
}

// --- Cloud ---

#[derive(Clone)]
pub struct LocalCloud {
    pub lambda: LambdaState,
    pub events: EventsState,
    pub sns: SnsState,
    pub sqs: SqsState,
    pub streams: StreamsState,
    pub lex: LexState,
    pub s3: S3State,
    pub kms: KmsState,
    journal: Journal,
    account_id: String,
    region: String,
}

impl LocalCloud {
    pub fn new(account_id: &str, region: &str) -> Self {
        Self::from_snapshot(Snapshot::empty(account_id, region))
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let journal = Journal::default();
        let account_id = snapshot.account_id;
        let region = snapshot.region;
        let s3 = S3State::new(snapshot.s3, journal.clone());
        LocalCloud {
            lambda: LambdaState::new(
                snapshot.lambda,
                &account_id,
                &region,
                s3.clone(),
                journal.clone(),
            ),
            events: EventsState::new(snapshot.events, &account_id, &region, journal.clone()),
            sns: SnsState::new(snapshot.sns, &account_id, &region, journal.clone()),
            sqs: SqsState::new(snapshot.sqs, &account_id, &region),
            streams: StreamsState::new(snapshot.streams, &account_id, &region),
            lex: LexState::new(snapshot.lex),
            kms: KmsState::new(snapshot.kms, &account_id, &region),
            s3,
            journal,
            account_id,
            region,
        }
    }

    /// Restores the cloud from `path`, or starts empty when the file is absent.
    ///
    /// A state file recorded under a different account or region is refused.
    pub fn load(path: &Path, account_id: &str, region: &str) -> DeployResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no state file, starting empty");
            return Ok(Self::new(account_id, region));
        }
        let raw = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        if snapshot.account_id != account_id || snapshot.region != region {
            return Err(DeployError::StateMismatch {
                path: path.display().to_string(),
                account: account_id.to_string(),
                region: region.to_string(),
                found_account: snapshot.account_id,
                found_region: snapshot.region,
            });
        }
        Ok(Self::from_snapshot(snapshot))
    }

    pub async fn save(&self, path: &Path) -> DeployResult<()> {
        let snapshot = self.snapshot().await;
        std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
        Ok(())
    }

    pub async fn snapshot(&self) -> Snapshot {
        Snapshot {
            account_id: self.account_id.clone(),
            region: self.region.clone(),
            lambda: self.lambda.data().await,
            events: self.events.data().await,
            sns: self.sns.data().await,
            sqs: self.sqs.data().await,
            streams: self.streams.data().await,
            lex: self.lex.data().await,
            s3: self.s3.data().await,
            kms: self.kms.data().await,
        }
    }

    pub fn clients(&self) -> Clients {
        Clients {
            lambda: Arc::new(self.lambda.clone()),
            mappings: Arc::new(self.lambda.clone()),
            events: Arc::new(self.events.clone()),
            sns: Arc::new(self.sns.clone()),
            sqs: Arc::new(self.sqs.clone()),
            streams: Arc::new(self.streams.clone()),
            lex: Arc::new(self.lex.clone()),
            s3: Arc::new(self.s3.clone()),
            kms: Arc::new(self.kms.clone()),
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    // --- Seeding ---

    /// Creates a table with a change stream and returns the stream ARN.
    pub async fn create_table(&self, name: &str) -> String {
        self.streams.create_table(name).await
    }

    pub async fn create_kinesis_stream(&self, name: &str) -> String {
        self.streams.create_kinesis_stream(name).await
    }

    /// Creates a standard queue and returns its URL.
    pub async fn create_queue(&self, name: &str) -> String {
        self.sqs.create_queue(name).await
    }

    pub async fn create_bot(&self, name: &str) {
        self.lex.create_bot(name).await
    }

    /// Creates an enabled key and returns its ARN.
    pub async fn create_key(&self) -> String {
        self.kms.create_key().await
    }

    /// Creates every resource in `seed`, returning one `kind name: id` line
    /// each. Tables, streams and queues that already exist are kept.
    pub async fn seed(&self, seed: &Seed) -> Vec<String> {
        let mut created = Vec::new();
        for name in &seed.tables {
            let arn = self.create_table(name).await;
            created.push(format!("table {}: {}", name, arn));
        }
        for name in &seed.kinesis_streams {
            let arn = self.create_kinesis_stream(name).await;
            created.push(format!("kinesis stream {}: {}", name, arn));
        }
        for name in &seed.queues {
            let url = self.create_queue(name).await;
            created.push(format!("queue {}: {}", name, url));
        }
        for name in &seed.bots {
            self.create_bot(name).await;
            created.push(format!("bot {}: READY", name));
        }
        for _ in 0..seed.kms_keys {
            let arn = self.create_key().await;
            created.push(format!("kms key: {}", arn));
        }
        debug!(count = created.len(), "seeded local resources");
        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{BotService, ObjectStorage, QueueService, StreamService};

    #[tokio::test]
    async fn snapshot_survives_a_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let cloud = LocalCloud::new(DEFAULT_ACCOUNT_ID, "us-east-1");
        cloud.create_queue("jobs").await;
        let clients = cloud.clients();
        clients.s3.create_bucket("code").await.unwrap();
        clients
            .s3
            .put_object("code", "app.zip", b"PK\x03\x04".to_vec())
            .await
            .unwrap();
        cloud.save(&path).await.unwrap();

        let restored = LocalCloud::load(&path, DEFAULT_ACCOUNT_ID, "us-east-1").unwrap();
        assert_eq!(restored.region(), "us-east-1");
        let clients = restored.clients();
        let url = clients.sqs.get_queue_url("jobs").await.unwrap();
        assert!(url.ends_with("/000000000000/jobs"));
        let head = clients.s3.head_object("code", "app.zip").await.unwrap();
        assert_eq!(head.content_length, 4);
        assert!(restored.journal().calls().await.is_empty());
    }

    #[tokio::test]
    async fn state_from_another_region_or_account_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let cloud = LocalCloud::new(DEFAULT_ACCOUNT_ID, "us-east-1");
        cloud.create_queue("jobs").await;
        cloud.save(&path).await.unwrap();

        let err = match LocalCloud::load(&path, DEFAULT_ACCOUNT_ID, "eu-west-1") {
            Err(e) => e,
            Ok(_) => panic!("state from us-east-1 loaded for eu-west-1"),
        };
        match &err {
            DeployError::StateMismatch {
                region,
                found_region,
                ..
            } => {
                assert_eq!(region, "eu-west-1");
                assert_eq!(found_region, "us-east-1");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("not 000000000000 in eu-west-1"));

        assert!(matches!(
            LocalCloud::load(&path, "111111111111", "us-east-1"),
            Err(DeployError::StateMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn seeded_resources_resolve_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let cloud = LocalCloud::load(&path, DEFAULT_ACCOUNT_ID, "us-east-1").unwrap();
        let seed = Seed {
            tables: vec!["orders".into()],
            kinesis_streams: vec!["clicks".into()],
            queues: vec!["jobs".into()],
            bots: vec!["OrderBot".into()],
            kms_keys: 1,
        };
        let lines = cloud.seed(&seed).await;
        assert_eq!(lines.len(), 5);
        assert_eq!(
            lines[2],
            "queue jobs: https://sqs.us-east-1.amazonaws.com/000000000000/jobs"
        );
        assert!(lines[4].starts_with("kms key: arn:aws:kms:us-east-1:000000000000:key/"));

        let first_table = lines[0].clone();
        assert_eq!(cloud.seed(&seed).await[0], first_table);
        cloud.save(&path).await.unwrap();

        let restored = LocalCloud::load(&path, DEFAULT_ACCOUNT_ID, "us-east-1").unwrap();
        let clients = restored.clients();
        assert_eq!(
            clients.streams.describe_stream("clicks").await.unwrap().stream_arn,
            "arn:aws:kinesis:us-east-1:000000000000:stream/clicks"
        );
        let tables = clients.streams.list_streams("orders").await.unwrap();
        assert_eq!(first_table, format!("table orders: {}", tables[0].stream_arn));
        assert!(clients.sqs.get_queue_url("jobs").await.is_ok());
        assert!(clients.lex.get_bot("OrderBot").await.is_ok());
        assert_eq!(restored.kms.data().await.keys.len(), 2);
    }

    #[tokio::test]
    async fn missing_state_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = LocalCloud::load(&dir.path().join("none.json"), "123456789012", "eu-west-1")
            .unwrap();
        assert_eq!(cloud.account_id(), "123456789012");
        assert!(cloud.clients().s3.list_buckets().await.unwrap().is_empty());
    }
}
