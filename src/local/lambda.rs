use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::s3::S3State;
use super::{now_iso, Journal};
use crate::provider::types::*;
use crate::provider::{FunctionService, MappingService, ServiceError, ServiceResult};

const SERVICE: &str = "lambda";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatement {
    pub sid: String,
    pub principal: String,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub source_arn: Option<String>,
}

impl PolicyStatement {
    fn to_json(&self) -> serde_json::Value {
        let mut statement = serde_json::json!({
            "Sid": self.sid,
            "Effect": "Allow",
            "Principal": { "Service": self.principal },
            "Action": self.action,
            "Resource": self.resource,
        });
        if let Some(source) = &self.source_arn {
            statement["Condition"] = serde_json::json!({
                "ArnLike": { "AWS:SourceArn": source }
            });
        }
        statement
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFunction {
    pub latest: FunctionConfiguration,
    pub code: FunctionCode,
    #[serde(default)]
    pub versions: Vec<FunctionConfiguration>,
    #[serde(default)]
    pub aliases: BTreeMap<String, AliasConfiguration>,
    #[serde(default)]
    pub policy: Vec<PolicyStatement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LambdaData {
    #[serde(default)]
    pub functions: BTreeMap<String, StoredFunction>,
    #[serde(default)]
    pub mappings: BTreeMap<String, EventSourceMappingConfiguration>,
}

#[derive(Clone)]
pub struct LambdaState {
    inner: Arc<Mutex<LambdaData>>,
    account_id: String,
    region: String,
    objects: S3State,
    journal: Journal,
}

fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Accepts a bare name or a (possibly qualified) function ARN.
fn function_name_of(name_or_arn: &str) -> &str {
    if name_or_arn.starts_with("arn:") {
        name_or_arn.split(':').nth(6).unwrap_or(name_or_arn)
    } else {
        name_or_arn
    }
}

fn source_kind(event_source_arn: &str) -> Option<&'static str> {
    match event_source_arn.split(':').nth(2) {
        Some("dynamodb") | Some("kinesis") => Some("stream"),
        Some("sqs") => Some("queue"),
        _ => None,
    }
}

fn state_label(enabled: bool) -> String {
    let label = if enabled { "Enabled" } else { "Disabled" };
    label.to_string()
}

impl LambdaState {
    pub fn new(
        data: LambdaData,
        account_id: &str,
        region: &str,
        objects: S3State,
        journal: Journal,
    ) -> Self {
        LambdaState {
            inner: Arc::new(Mutex::new(data)),
            account_id: account_id.to_string(),
            region: region.to_string(),
            objects,
            journal,
        }
    }

    pub async fn data(&self) -> LambdaData {
        self.inner.lock().await.clone()
    }

    fn make_arn(&self, function_name: &str) -> String {
        format!(
            "arn:aws:lambda:{}:{}:function:{}",
            self.region, self.account_id, function_name
        )
    }

    fn not_found(&self, function_name: &str) -> ServiceError {
        ServiceError::ResourceNotFoundException(format!(
            "Function not found: {}",
            self.make_arn(function_name)
        ))
    }

    async fn fetch_code(&self, bucket: &str, key: &str) -> ServiceResult<Vec<u8>> {
        self.objects.object_bytes(bucket, key).await.map_err(|_| {
            ServiceError::InvalidParameterValueException(format!(
                "Error occurred while GetObject. S3 Error Code: NoSuchKey. S3 Error Message: {}/{}",
                bucket, key
            ))
        })
    }

    fn publish(func: &mut StoredFunction) -> FunctionConfiguration {
        let version = (func.versions.len() + 1).to_string();
        let mut published = func.latest.clone();
        published.function_arn = format!("{}:{}", func.latest.function_arn, version);
        published.version = version;
        func.versions.push(published.clone());
        published
    }
}

#[async_trait]
impl FunctionService for LambdaState {
    async fn get_function(&self, function_name: &str) -> ServiceResult<GetFunctionResponse> {
        let name = function_name_of(function_name);
        let inner = self.inner.lock().await;
        let func = inner.functions.get(name).ok_or_else(|| self.not_found(name))?;
        Ok(GetFunctionResponse {
            configuration: func.latest.clone(),
            code: FunctionCodeLocation {
                location: format!("s3://{}/{}", func.code.s3_bucket, func.code.s3_key),
                repository_type: "S3".to_string(),
            },
        })
    }

    async fn create_function(
        &self,
        req: CreateFunctionRequest,
    ) -> ServiceResult<FunctionConfiguration> {
        if self
            .inner
            .lock()
            .await
            .functions
            .contains_key(&req.function_name)
        {
            return Err(ServiceError::ResourceConflictException(format!(
                "Function already exist: {}",
                req.function_name
            )));
        }
        let code = self.fetch_code(&req.code.s3_bucket, &req.code.s3_key).await?;

        let latest = FunctionConfiguration {
            function_arn: self.make_arn(&req.function_name),
            function_name: req.function_name.clone(),
            runtime: req.runtime,
            role: req.role,
            handler: req.handler,
            code_size: code.len() as i64,
            description: req.description,
            timeout: req.timeout,
            memory_size: req.memory_size,
            last_modified: now_iso(),
            code_sha256: compute_sha256(&code),
            version: "$LATEST".to_string(),
            state: "Active".to_string(),
            vpc_config: req.vpc_config,
            environment: req.environment.filter(|e| !e.variables.is_empty()),
        };
        let mut func = StoredFunction {
            latest: latest.clone(),
            code: req.code,
            versions: Vec::new(),
            aliases: BTreeMap::new(),
            policy: Vec::new(),
        };
        let config = if req.publish {
            Self::publish(&mut func)
        } else {
            latest
        };

        self.inner
            .lock()
            .await
            .functions
            .insert(req.function_name.clone(), func);
        self.journal
            .record(SERVICE, "CreateFunction", req.function_name)
            .await;
        Ok(config)
    }

    async fn update_function_code(
        &self,
        function_name: &str,
        req: UpdateFunctionCodeRequest,
    ) -> ServiceResult<FunctionConfiguration> {
        let name = function_name_of(function_name);
        if !self.inner.lock().await.functions.contains_key(name) {
            return Err(self.not_found(name));
        }
        let code = self.fetch_code(&req.s3_bucket, &req.s3_key).await?;

        let mut inner = self.inner.lock().await;
        let func = inner
            .functions
            .get_mut(name)
            .ok_or_else(|| self.not_found(name))?;
        func.latest.code_sha256 = compute_sha256(&code);
        func.latest.code_size = code.len() as i64;
        func.latest.last_modified = now_iso();
        func.code = FunctionCode {
            s3_bucket: req.s3_bucket,
            s3_key: req.s3_key,
        };
        let config = if req.publish {
            Self::publish(func)
        } else {
            func.latest.clone()
        };
        drop(inner);

        self.journal.record(SERVICE, "UpdateFunctionCode", name).await;
        Ok(config)
    }

    async fn update_function_configuration(
        &self,
        function_name: &str,
        req: UpdateFunctionConfigurationRequest,
    ) -> ServiceResult<FunctionConfiguration> {
        let name = function_name_of(function_name);
        let mut inner = self.inner.lock().await;
        let func = inner
            .functions
            .get_mut(name)
            .ok_or_else(|| self.not_found(name))?;
        let latest = &mut func.latest;

        if let Some(runtime) = req.runtime {
            latest.runtime = runtime;
        }
        if let Some(role) = req.role {
            latest.role = role;
        }
        if let Some(handler) = req.handler {
            latest.handler = handler;
        }
        if let Some(description) = req.description {
            latest.description = description;
        }
        if let Some(timeout) = req.timeout {
            latest.timeout = timeout;
        }
        if let Some(memory_size) = req.memory_size {
            latest.memory_size = memory_size;
        }
        if let Some(vpc_config) = req.vpc_config {
            latest.vpc_config = vpc_config;
        }
        if let Some(environment) = req.environment {
            latest.environment = Some(environment).filter(|e| !e.variables.is_empty());
        }
        latest.last_modified = now_iso();
        let config = latest.clone();
        drop(inner);

        self.journal
            .record(SERVICE, "UpdateFunctionConfiguration", name)
            .await;
        Ok(config)
    }

    async fn delete_function(&self, function_name: &str) -> ServiceResult<()> {
        let name = function_name_of(function_name);
        self.inner
            .lock()
            .await
            .functions
            .remove(name)
            .ok_or_else(|| self.not_found(name))?;
        self.journal.record(SERVICE, "DeleteFunction", name).await;
        Ok(())
    }

    async fn list_aliases(&self, function_name: &str) -> ServiceResult<Vec<AliasConfiguration>> {
        let name = function_name_of(function_name);
        let inner = self.inner.lock().await;
        let func = inner.functions.get(name).ok_or_else(|| self.not_found(name))?;
        Ok(func.aliases.values().cloned().collect())
    }

    async fn create_alias(
        &self,
        function_name: &str,
        req: CreateAliasRequest,
    ) -> ServiceResult<AliasConfiguration> {
        let name = function_name_of(function_name);
        let mut inner = self.inner.lock().await;
        let func = inner
            .functions
            .get_mut(name)
            .ok_or_else(|| self.not_found(name))?;

        if func.aliases.contains_key(&req.name) {
            return Err(ServiceError::ResourceConflictException(format!(
                "Alias already exists: {}",
                req.name
            )));
        }
        if req.function_version != "$LATEST"
            && !func.versions.iter().any(|v| v.version == req.function_version)
        {
            return Err(ServiceError::ResourceNotFoundException(format!(
                "Function not found: {}:{}",
                func.latest.function_arn, req.function_version
            )));
        }

        let alias = AliasConfiguration {
            alias_arn: format!("{}:{}", func.latest.function_arn, req.name),
            name: req.name.clone(),
            function_version: req.function_version,
            description: req.description.unwrap_or_default(),
        };
        func.aliases.insert(req.name.clone(), alias.clone());
        drop(inner);

        self.journal
            .record(SERVICE, "CreateAlias", format!("{}:{}", name, req.name))
            .await;
        Ok(alias)
    }

    async fn update_alias(
        &self,
        function_name: &str,
        alias_name: &str,
        req: UpdateAliasRequest,
    ) -> ServiceResult<AliasConfiguration> {
        let name = function_name_of(function_name);
        let mut inner = self.inner.lock().await;
        let func = inner
            .functions
            .get_mut(name)
            .ok_or_else(|| self.not_found(name))?;
        let alias = func.aliases.get_mut(alias_name).ok_or_else(|| {
            ServiceError::ResourceNotFoundException(format!("Alias not found: {}", alias_name))
        })?;

        alias.function_version = req.function_version;
        if let Some(description) = req.description {
            alias.description = description;
        }
        let alias = alias.clone();
        drop(inner);

        self.journal
            .record(SERVICE, "UpdateAlias", format!("{}:{}", name, alias_name))
            .await;
        Ok(alias)
    }

    async fn add_permission(
        &self,
        function_name: &str,
        req: AddPermissionRequest,
    ) -> ServiceResult<AddPermissionResponse> {
        let name = function_name_of(function_name);
        let mut inner = self.inner.lock().await;
        let func = inner
            .functions
            .get_mut(name)
            .ok_or_else(|| self.not_found(name))?;

        if func.policy.iter().any(|s| s.sid == req.statement_id) {
            return Err(ServiceError::ResourceConflictException(format!(
                "The statement id ({}) provided already exists. Please provide a new statement id, or remove the existing statement.",
                req.statement_id
            )));
        }

        let statement = PolicyStatement {
            sid: req.statement_id,
            principal: req.principal,
            action: req.action,
            resource: func.latest.function_arn.clone(),
            source_arn: req.source_arn,
        };
        let rendered = serde_json::to_string(&statement.to_json())
            .map_err(|e| ServiceError::ServiceException(e.to_string()))?;
        let sid = statement.sid.clone();
        func.policy.push(statement);
        drop(inner);

        self.journal
            .record(SERVICE, "AddPermission", format!("{}:{}", name, sid))
            .await;
        Ok(AddPermissionResponse {
            statement: rendered,
        })
    }

    async fn remove_permission(&self, function_name: &str, statement_id: &str) -> ServiceResult<()> {
        let name = function_name_of(function_name);
        let mut inner = self.inner.lock().await;
        let func = inner
            .functions
            .get_mut(name)
            .ok_or_else(|| self.not_found(name))?;

        let len_before = func.policy.len();
        func.policy.retain(|s| s.sid != statement_id);
        if func.policy.len() == len_before {
            return Err(ServiceError::ResourceNotFoundException(format!(
                "Statement {} is not found in resource policy.",
                statement_id
            )));
        }
        drop(inner);

        self.journal
            .record(SERVICE, "RemovePermission", format!("{}:{}", name, statement_id))
            .await;
        Ok(())
    }

    async fn get_policy(&self, function_name: &str) -> ServiceResult<GetPolicyResponse> {
        let name = function_name_of(function_name);
        let inner = self.inner.lock().await;
        let func = inner.functions.get(name).ok_or_else(|| self.not_found(name))?;

        if func.policy.is_empty() {
            return Err(ServiceError::ResourceNotFoundException(
                "The resource you requested does not exist.".to_string(),
            ));
        }

        let policy = serde_json::json!({
            "Version": "2012-10-17",
            "Id": "default",
            "Statement": func.policy.iter().map(PolicyStatement::to_json).collect::<Vec<_>>(),
        });
        Ok(GetPolicyResponse {
            policy: serde_json::to_string(&policy)
                .map_err(|e| ServiceError::ServiceException(e.to_string()))?,
            revision_id: Uuid::new_v4().to_string(),
        })
    }
}

#[async_trait]
impl MappingService for LambdaState {
    async fn list_event_source_mappings(
        &self,
        req: ListEventSourceMappingsRequest,
    ) -> ServiceResult<Vec<EventSourceMappingConfiguration>> {
        let function_arn = req
            .function_name
            .as_deref()
            .map(|f| self.make_arn(function_name_of(f)));
        let inner = self.inner.lock().await;
        Ok(inner
            .mappings
            .values()
            .filter(|m| function_arn.as_ref().map_or(true, |arn| &m.function_arn == arn))
            .filter(|m| {
                req.event_source_arn
                    .as_ref()
                    .map_or(true, |src| &m.event_source_arn == src)
            })
            .cloned()
            .collect())
    }

    async fn create_event_source_mapping(
        &self,
        req: CreateEventSourceMappingRequest,
    ) -> ServiceResult<EventSourceMappingConfiguration> {
        let name = function_name_of(&req.function_name);
        let mut inner = self.inner.lock().await;
        let function_arn = inner
            .functions
            .get(name)
            .map(|f| f.latest.function_arn.clone())
            .ok_or_else(|| self.not_found(name))?;

        match (source_kind(&req.event_source_arn), &req.starting_position) {
            (None, _) => {
                return Err(ServiceError::InvalidParameterValueException(format!(
                    "Unsupported event source: {}",
                    req.event_source_arn
                )))
            }
            (Some("stream"), None) => {
                return Err(ServiceError::InvalidParameterValueException(
                    "StartingPosition is required for stream event sources".to_string(),
                ))
            }
            (Some("queue"), Some(_)) => {
                return Err(ServiceError::InvalidParameterValueException(
                    "StartingPosition is not valid for SQS event sources".to_string(),
                ))
            }
            _ => {}
        }

        if let Some(existing) = inner
            .mappings
            .values()
            .find(|m| m.function_arn == function_arn && m.event_source_arn == req.event_source_arn)
        {
            return Err(ServiceError::ResourceConflictException(format!(
                "The event source arn ({}) and function ({}) provided mapping already exists. Please update or delete the existing mapping with UUID {}",
                req.event_source_arn, name, existing.uuid
            )));
        }

        let mapping = EventSourceMappingConfiguration {
            uuid: Uuid::new_v4().to_string(),
            event_source_arn: req.event_source_arn,
            function_arn,
            state: state_label(req.enabled.unwrap_or(true)),
            batch_size: req.batch_size.unwrap_or(10),
            starting_position: req.starting_position,
            last_modified: now_iso(),
        };
        inner.mappings.insert(mapping.uuid.clone(), mapping.clone());
        drop(inner);

        self.journal
            .record(SERVICE, "CreateEventSourceMapping", mapping.event_source_arn.clone())
            .await;
        Ok(mapping)
    }

    async fn update_event_source_mapping(
        &self,
        uuid: &str,
        req: UpdateEventSourceMappingRequest,
    ) -> ServiceResult<EventSourceMappingConfiguration> {
        let function_arn = req
            .function_name
            .as_deref()
            .map(|f| self.make_arn(function_name_of(f)));
        let mut inner = self.inner.lock().await;
        let mapping = inner.mappings.get_mut(uuid).ok_or_else(|| {
            ServiceError::ResourceNotFoundException(format!(
                "The resource you requested does not exist. (Event source mapping {})",
                uuid
            ))
        })?;

        if let Some(arn) = function_arn {
            mapping.function_arn = arn;
        }
        if let Some(batch_size) = req.batch_size {
            mapping.batch_size = batch_size;
        }
        if let Some(enabled) = req.enabled {
            mapping.state = state_label(enabled);
        }
        mapping.last_modified = now_iso();
        let mapping = mapping.clone();
        drop(inner);

        self.journal
            .record(SERVICE, "UpdateEventSourceMapping", mapping.event_source_arn.clone())
            .await;
        Ok(mapping)
    }

    async fn delete_event_source_mapping(
        &self,
        uuid: &str,
    ) -> ServiceResult<EventSourceMappingConfiguration> {
        let mut mapping = self.inner.lock().await.mappings.remove(uuid).ok_or_else(|| {
            ServiceError::ResourceNotFoundException(format!(
                "The resource you requested does not exist. (Event source mapping {})",
                uuid
            ))
        })?;
        mapping.state = "Deleting".to_string();

        self.journal
            .record(SERVICE, "DeleteEventSourceMapping", mapping.event_source_arn.clone())
            .await;
        Ok(mapping)
    }
}
