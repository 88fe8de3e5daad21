use serde::Deserialize;
use std::collections::BTreeMap;

pub const DEFAULT_REGION: &str = "us-east-1";

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_bucket() -> String {
    "lambda-function-code".to_string()
}

fn default_runtime() -> String {
    "java8".to_string()
}

fn default_timeout() -> i32 {
    30
}

fn default_memory_size() -> i32 {
    1024
}

fn default_true() -> bool {
    true
}

// --- Deploy descriptor ---

/// Plugin-wide settings plus the declared functions, as written in the
/// deploy descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployConfig {
    #[serde(default)]
    pub function_code: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_bucket")]
    pub s3_bucket: String,
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default)]
    pub lambda_role_arn: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: i32,
    #[serde(default = "default_memory_size")]
    pub memory_size: i32,
    #[serde(default)]
    pub vpc_security_group_ids: Vec<String>,
    #[serde(default)]
    pub vpc_subnet_ids: Vec<String>,
    #[serde(default = "default_true")]
    pub publish: bool,
    #[serde(default)]
    pub function_name_suffix: Option<String>,
    #[serde(default)]
    pub force_update: bool,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub latest_alias: Option<String>,
    #[serde(default)]
    pub kms_encryption_key_arn: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub lambda_functions: Vec<FunctionDeclaration>,
    #[serde(default, rename = "lambdaFunctionsJSON")]
    pub lambda_functions_json: Option<String>,
}

// --- Function declaration ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub timeout: Option<i32>,
    #[serde(default)]
    pub memory_size: Option<i32>,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub security_group_ids: Option<Vec<String>>,
    #[serde(default)]
    pub subnet_ids: Option<Vec<String>>,
    #[serde(default)]
    pub publish: Option<bool>,
    #[serde(default)]
    pub keep_alive: Option<u32>,
    #[serde(default)]
    pub environment_variables: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub triggers: Option<Vec<TriggerDeclaration>>,
    #[serde(default)]
    pub qualifier: Option<String>,
}

// --- Trigger declaration ---

/// One trigger as declared. Which fields matter depends on `integration`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDeclaration {
    #[serde(default)]
    pub integration: Option<String>,
    #[serde(default)]
    pub rule_name: Option<String>,
    #[serde(default)]
    pub rule_description: Option<String>,
    #[serde(default)]
    pub schedule_expression: Option<String>,
    #[serde(default, rename = "dynamoDBTable")]
    pub dynamo_db_table: Option<String>,
    #[serde(default)]
    pub kinesis_stream: Option<String>,
    #[serde(default, alias = "SNSTopic")]
    pub sns_topic: Option<String>,
    #[serde(default)]
    pub standard_queue: Option<String>,
    #[serde(default)]
    pub lex_bot_name: Option<String>,
    #[serde(default)]
    pub batch_size: Option<i32>,
    #[serde(default)]
    pub starting_position: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_descriptor() {
        let config: DeployConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.s3_bucket, "lambda-function-code");
        assert_eq!(config.runtime, "java8");
        assert_eq!(config.timeout, 30);
        assert_eq!(config.memory_size, 1024);
        assert!(config.publish);
        assert!(!config.force_update);
        assert!(config.lambda_functions.is_empty());
    }

    #[test]
    fn trigger_fields_use_declared_names() {
        let trigger: TriggerDeclaration = serde_json::from_str(
            r#"{"integration":"DynamoDB","dynamoDBTable":"orders","batchSize":50,"startingPosition":"TRIM_HORIZON"}"#,
        )
        .unwrap();
        assert_eq!(trigger.dynamo_db_table.as_deref(), Some("orders"));
        assert_eq!(trigger.batch_size, Some(50));

        let legacy: TriggerDeclaration =
            serde_json::from_str(r#"{"integration":"SNS","SNSTopic":"alerts"}"#).unwrap();
        assert_eq!(legacy.sns_topic.as_deref(), Some("alerts"));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let decl: FunctionDeclaration = serde_json::from_str(
            r#"{"functionName":"a","handler":"h","somethingElse":true}"#,
        )
        .unwrap();
        assert_eq!(decl.function_name.as_deref(), Some("a"));
    }
}
