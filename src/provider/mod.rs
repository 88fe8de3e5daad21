//! Collaborator interfaces consumed by the reconciler.
//!
//! Each trait covers one remote service. The reconciler only ever talks to a
//! [`Clients`] bundle, so the transport behind it (the in-memory provider in
//! [`crate::local`], or anything else) is interchangeable.

pub mod error;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

pub use error::{NotFoundExt, ServiceError};
use types::*;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[async_trait]
pub trait FunctionService: Send + Sync {
    async fn get_function(&self, function_name: &str) -> ServiceResult<GetFunctionResponse>;
    async fn create_function(
        &self,
        req: CreateFunctionRequest,
    ) -> ServiceResult<FunctionConfiguration>;
    async fn update_function_code(
        &self,
        function_name: &str,
        req: UpdateFunctionCodeRequest,
    ) -> ServiceResult<FunctionConfiguration>;
    async fn update_function_configuration(
        &self,
        function_name: &str,
        req: UpdateFunctionConfigurationRequest,
    ) -> ServiceResult<FunctionConfiguration>;
    async fn delete_function(&self, function_name: &str) -> ServiceResult<()>;

    async fn list_aliases(&self, function_name: &str) -> ServiceResult<Vec<AliasConfiguration>>;
    async fn create_alias(
        &self,
        function_name: &str,
        req: CreateAliasRequest,
    ) -> ServiceResult<AliasConfiguration>;
    async fn update_alias(
        &self,
        function_name: &str,
        alias_name: &str,
        req: UpdateAliasRequest,
    ) -> ServiceResult<AliasConfiguration>;

    async fn add_permission(
        &self,
        function_name: &str,
        req: AddPermissionRequest,
    ) -> ServiceResult<AddPermissionResponse>;
    async fn remove_permission(&self, function_name: &str, statement_id: &str)
        -> ServiceResult<()>;
    async fn get_policy(&self, function_name: &str) -> ServiceResult<GetPolicyResponse>;
}

#[async_trait]
pub trait MappingService: Send + Sync {
    async fn list_event_source_mappings(
        &self,
        req: ListEventSourceMappingsRequest,
    ) -> ServiceResult<Vec<EventSourceMappingConfiguration>>;
    async fn create_event_source_mapping(
        &self,
        req: CreateEventSourceMappingRequest,
    ) -> ServiceResult<EventSourceMappingConfiguration>;
    async fn update_event_source_mapping(
        &self,
        uuid: &str,
        req: UpdateEventSourceMappingRequest,
    ) -> ServiceResult<EventSourceMappingConfiguration>;
    async fn delete_event_source_mapping(
        &self,
        uuid: &str,
    ) -> ServiceResult<EventSourceMappingConfiguration>;
}

#[async_trait]
pub trait SchedulerService: Send + Sync {
    async fn put_rule(&self, req: PutRuleRequest) -> ServiceResult<PutRuleResponse>;
    async fn describe_rule(&self, name: &str) -> ServiceResult<DescribeRuleResponse>;
    async fn delete_rule(&self, name: &str) -> ServiceResult<()>;
    async fn put_targets(&self, req: PutTargetsRequest) -> ServiceResult<()>;
    async fn remove_targets(&self, req: RemoveTargetsRequest) -> ServiceResult<()>;
    async fn list_rule_names_by_target(&self, target_arn: &str) -> ServiceResult<Vec<String>>;
    async fn list_targets_by_rule(&self, rule: &str) -> ServiceResult<Vec<EventTarget>>;
}

#[async_trait]
pub trait TopicService: Send + Sync {
    /// Creates the topic if absent and returns its ARN either way.
    async fn create_topic(&self, name: &str) -> ServiceResult<String>;
    async fn subscribe(&self, req: SubscribeRequest) -> ServiceResult<String>;
    async fn unsubscribe(&self, subscription_arn: &str) -> ServiceResult<()>;
    async fn list_subscriptions(&self) -> ServiceResult<Vec<SubscriptionEntry>>;
    async fn list_subscriptions_by_topic(
        &self,
        topic_arn: &str,
    ) -> ServiceResult<Vec<SubscriptionEntry>>;
}

#[async_trait]
pub trait QueueService: Send + Sync {
    async fn get_queue_url(&self, queue_name: &str) -> ServiceResult<String>;
    async fn get_queue_arn(&self, queue_url: &str) -> ServiceResult<String>;
}

#[async_trait]
pub trait StreamService: Send + Sync {
    /// Table-backed change streams for `table_name`.
    async fn list_streams(&self, table_name: &str) -> ServiceResult<Vec<StreamSummary>>;
    /// Shard-backed stream by name.
    async fn describe_stream(&self, stream_name: &str) -> ServiceResult<StreamDescription>;
}

#[async_trait]
pub trait BotService: Send + Sync {
    async fn get_bot(&self, name: &str) -> ServiceResult<BotSummary>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn list_buckets(&self) -> ServiceResult<Vec<BucketEntry>>;
    async fn create_bucket(&self, name: &str) -> ServiceResult<()>;
    async fn head_object(&self, bucket: &str, key: &str) -> ServiceResult<ObjectMetadata>;
    /// Stores `data` and returns the quoted ETag.
    async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) -> ServiceResult<String>;
    async fn delete_object(&self, bucket: &str, key: &str) -> ServiceResult<()>;
}

#[async_trait]
pub trait KeyService: Send + Sync {
    /// Encrypts `plaintext` under `key_id` and returns the base64 ciphertext.
    async fn encrypt(&self, key_id: &str, plaintext: &str) -> ServiceResult<String>;
}

/// One handle per collaborator, shared for a whole run.
#[derive(Clone)]
pub struct Clients {
    pub lambda: Arc<dyn FunctionService>,
    pub mappings: Arc<dyn MappingService>,
    pub events: Arc<dyn SchedulerService>,
    pub sns: Arc<dyn TopicService>,
    pub sqs: Arc<dyn QueueService>,
    pub streams: Arc<dyn StreamService>,
    pub lex: Arc<dyn BotService>,
    pub s3: Arc<dyn ObjectStorage>,
    pub kms: Arc<dyn KeyService>,
}
