use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::error::ConfigError;
use super::types::{FunctionDeclaration, TriggerDeclaration};
use crate::provider::types::VpcConfig;

pub const SCHEDULE: &str = "CloudWatch Events - Schedule";
pub const DYNAMO_DB: &str = "DynamoDB";
pub const KINESIS: &str = "Kinesis";
pub const SNS: &str = "SNS";
pub const SQS: &str = "SQS";
pub const ALEXA_SKILLS_KIT: &str = "Alexa Skills Kit";
pub const LEX: &str = "Lex";

const DEFAULT_BATCH_SIZE: i32 = 10;

// --- Triggers ---

/// Where a stream mapping starts reading. Descriptors have no timestamp
/// field, so `AT_TIMESTAMP` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartingPosition {
    TrimHorizon,
    Latest,
}

impl StartingPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartingPosition::TrimHorizon => "TRIM_HORIZON",
            StartingPosition::Latest => "LATEST",
        }
    }
}

impl FromStr for StartingPosition {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRIM_HORIZON" => Ok(StartingPosition::TrimHorizon),
            "LATEST" => Ok(StartingPosition::Latest),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRule {
    pub name: String,
    pub description: String,
    pub schedule_expression: String,
}

/// A table-backed or shard-backed stream source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSource {
    pub name: String,
    pub batch_size: i32,
    pub starting_position: StartingPosition,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSource {
    pub queue: String,
    pub batch_size: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSpec {
    Schedule(ScheduleRule),
    DynamoDb(StreamSource),
    Kinesis(StreamSource),
    Sns { topic: String },
    Sqs(QueueSource),
    AlexaSkillsKit,
    Lex { bot_name: String },
}

impl TriggerSpec {
    pub fn integration(&self) -> &'static str {
        match self {
            TriggerSpec::Schedule(_) => SCHEDULE,
            TriggerSpec::DynamoDb(_) => DYNAMO_DB,
            TriggerSpec::Kinesis(_) => KINESIS,
            TriggerSpec::Sns { .. } => SNS,
            TriggerSpec::Sqs(_) => SQS,
            TriggerSpec::AlexaSkillsKit => ALEXA_SKILLS_KIT,
            TriggerSpec::Lex { .. } => LEX,
        }
    }

    /// The kind-specific name this trigger points at.
    pub fn target(&self) -> &str {
        match self {
            TriggerSpec::Schedule(rule) => &rule.name,
            TriggerSpec::DynamoDb(source) | TriggerSpec::Kinesis(source) => &source.name,
            TriggerSpec::Sns { topic } => topic,
            TriggerSpec::Sqs(source) => &source.queue,
            TriggerSpec::AlexaSkillsKit => "alexa-appkit",
            TriggerSpec::Lex { bot_name } => bot_name,
        }
    }

    /// Reconciliation order: rules, then mapped sources, then topics, then
    /// permission-only integrations.
    fn rank(&self) -> u8 {
        match self {
            TriggerSpec::Schedule(_) => 0,
            TriggerSpec::DynamoDb(_) | TriggerSpec::Kinesis(_) | TriggerSpec::Sqs(_) => 1,
            TriggerSpec::Sns { .. } => 2,
            TriggerSpec::AlexaSkillsKit | TriggerSpec::Lex { .. } => 3,
        }
    }

    fn from_declaration(
        decl: &TriggerDeclaration,
        function: &str,
        suffix: &dyn Fn(&str) -> String,
    ) -> Result<TriggerSpec, ConfigError> {
        let integration = decl.integration.as_deref().unwrap_or_default();
        let required = |value: &Option<String>,
                        integration: &'static str,
                        field: &'static str|
         -> Result<String, ConfigError> {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ConfigError::MissingTriggerField {
                    function: function.to_string(),
                    integration,
                    field,
                })
        };
        let starting_position = || -> Result<StartingPosition, ConfigError> {
            match decl.starting_position.as_deref() {
                None => Ok(StartingPosition::Latest),
                Some(value) => value.parse().map_err(|_| ConfigError::InvalidStartingPosition {
                    function: function.to_string(),
                    value: value.to_string(),
                }),
            }
        };

        match integration {
            SCHEDULE => Ok(TriggerSpec::Schedule(ScheduleRule {
                name: suffix(&required(&decl.rule_name, SCHEDULE, "ruleName")?),
                description: decl.rule_description.clone().unwrap_or_default(),
                schedule_expression: required(
                    &decl.schedule_expression,
                    SCHEDULE,
                    "scheduleExpression",
                )?,
            })),
            DYNAMO_DB => Ok(TriggerSpec::DynamoDb(StreamSource {
                name: suffix(&required(&decl.dynamo_db_table, DYNAMO_DB, "dynamoDBTable")?),
                batch_size: decl.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
                starting_position: starting_position()?,
                enabled: decl.enabled.unwrap_or(true),
            })),
            KINESIS => Ok(TriggerSpec::Kinesis(StreamSource {
                name: suffix(&required(&decl.kinesis_stream, KINESIS, "kinesisStream")?),
                batch_size: decl.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
                starting_position: starting_position()?,
                enabled: decl.enabled.unwrap_or(true),
            })),
            SNS => Ok(TriggerSpec::Sns {
                topic: suffix(&required(&decl.sns_topic, SNS, "snsTopic")?),
            }),
            SQS => Ok(TriggerSpec::Sqs(QueueSource {
                queue: suffix(&required(&decl.standard_queue, SQS, "standardQueue")?),
                batch_size: decl.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
                enabled: decl.enabled.unwrap_or(true),
            })),
            ALEXA_SKILLS_KIT => Ok(TriggerSpec::AlexaSkillsKit),
            LEX => Ok(TriggerSpec::Lex {
                bot_name: required(&decl.lex_bot_name, LEX, "lexBotName")?,
            }),
            other => Err(ConfigError::UnknownIntegration {
                function: function.to_string(),
                integration: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.integration(), self.target())
    }
}

// --- Aliases ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasTarget {
    PublishedVersion,
    Latest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasSpec {
    pub name: String,
    pub target: AliasTarget,
}

// --- Functions ---

/// Plugin-wide values a declaration falls back to.
#[derive(Debug, Clone, Default)]
pub struct FunctionDefaults {
    pub suffix: Option<String>,
    pub version: Option<String>,
    pub runtime: String,
    pub role: String,
    pub timeout: i32,
    pub memory_size: i32,
    pub security_group_ids: Vec<String>,
    pub subnet_ids: Vec<String>,
    pub publish: bool,
    pub latest_alias: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub pass_through: BTreeMap<String, String>,
    pub encrypted_pass_through: BTreeMap<String, String>,
}

impl FunctionDefaults {
    pub fn add_suffix(&self, name: &str) -> String {
        match &self.suffix {
            Some(suffix) => format!("{}{}", name, suffix),
            None => name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub handler: String,
    pub description: String,
    pub runtime: String,
    pub role: String,
    pub timeout: i32,
    pub memory_size: i32,
    pub security_group_ids: Vec<String>,
    pub subnet_ids: Vec<String>,
    pub publish: bool,
    pub keep_alive: Option<u32>,
    /// Plain variables, already layered: plugin < function < pass-through.
    pub environment: BTreeMap<String, String>,
    /// Pass-through variables that are encrypted before they are sent.
    pub encrypted_environment: BTreeMap<String, String>,
    pub triggers: Vec<TriggerSpec>,
    pub aliases: Vec<AliasSpec>,
    pub qualifier: Option<String>,
}

impl FunctionSpec {
    pub fn from_declaration(
        decl: &FunctionDeclaration,
        defaults: &FunctionDefaults,
    ) -> Result<FunctionSpec, ConfigError> {
        let declared_name = decl
            .function_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ConfigError::MissingField {
                function: "<unnamed>".to_string(),
                field: "functionName",
            })?;
        let name = defaults.add_suffix(declared_name);

        let handler = decl
            .handler
            .clone()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::MissingField {
                function: name.clone(),
                field: "handler",
            })?;

        if decl.keep_alive == Some(0) {
            return Err(ConfigError::InvalidKeepAlive { function: name });
        }

        let suffix = |n: &str| defaults.add_suffix(n);
        let mut triggers = decl
            .triggers
            .iter()
            .flatten()
            .map(|t| TriggerSpec::from_declaration(t, &name, &suffix))
            .collect::<Result<Vec<_>, _>>()?;
        triggers.sort_by_key(TriggerSpec::rank);

        let publish = decl.publish.unwrap_or(defaults.publish);
        let mut aliases = Vec::new();
        if publish {
            let version = defaults
                .version
                .as_deref()
                .ok_or_else(|| ConfigError::MissingField {
                    function: name.clone(),
                    field: "version",
                })?;
            aliases.push(AliasSpec {
                name: version.replace('.', "-"),
                target: AliasTarget::PublishedVersion,
            });
        }
        if let Some(latest) = &defaults.latest_alias {
            aliases.push(AliasSpec {
                name: latest.clone(),
                target: AliasTarget::Latest,
            });
        }

        let mut environment = defaults.environment.clone();
        environment.extend(decl.environment_variables.clone().unwrap_or_default());
        environment.extend(defaults.pass_through.clone());

        Ok(FunctionSpec {
            handler,
            description: decl.description.clone().unwrap_or_default(),
            runtime: decl.runtime.clone().unwrap_or_else(|| defaults.runtime.clone()),
            role: defaults.role.clone(),
            timeout: decl.timeout.unwrap_or(defaults.timeout),
            memory_size: decl.memory_size.unwrap_or(defaults.memory_size),
            security_group_ids: decl
                .security_group_ids
                .clone()
                .unwrap_or_else(|| defaults.security_group_ids.clone()),
            subnet_ids: decl
                .subnet_ids
                .clone()
                .unwrap_or_else(|| defaults.subnet_ids.clone()),
            publish,
            keep_alive: decl.keep_alive,
            environment,
            encrypted_environment: defaults.encrypted_pass_through.clone(),
            triggers,
            aliases,
            qualifier: decl.qualifier.clone(),
            name,
        })
    }

    pub fn vpc_config(&self) -> VpcConfig {
        VpcConfig {
            security_group_ids: self.security_group_ids.clone(),
            subnet_ids: self.subnet_ids.clone(),
        }
    }

    /// The synthetic rule that keeps the function warm, if configured.
    pub fn keep_alive_rule(&self) -> Option<ScheduleRule> {
        self.keep_alive.map(|minutes| ScheduleRule {
            name: format!("KEEP-ALIVE-{}", self.name),
            description: format!("Keep-alive for {}", self.name),
            schedule_expression: format!(
                "rate({} {})",
                minutes,
                if minutes > 1 { "minutes" } else { "minute" }
            ),
        })
    }

    /// Declared scheduled rules followed by the keep-alive rule.
    pub fn scheduled_rules(&self) -> Vec<ScheduleRule> {
        self.triggers
            .iter()
            .filter_map(|t| match t {
                TriggerSpec::Schedule(rule) => Some(rule.clone()),
                _ => None,
            })
            .chain(self.keep_alive_rule())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> FunctionDefaults {
        FunctionDefaults {
            suffix: Some("-dev".into()),
            version: Some("1.2.0".into()),
            runtime: "java8".into(),
            role: "arn:aws:iam::000000000000:role/lambda".into(),
            timeout: 30,
            memory_size: 1024,
            publish: true,
            ..Default::default()
        }
    }

    fn declaration(json: &str) -> FunctionDeclaration {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn applies_defaults_and_suffix() {
        let spec = FunctionSpec::from_declaration(
            &declaration(r#"{"functionName":"orders","handler":"com.example.Orders"}"#),
            &defaults(),
        )
        .unwrap();
        assert_eq!(spec.name, "orders-dev");
        assert_eq!(spec.description, "");
        assert_eq!(spec.timeout, 30);
        assert_eq!(spec.memory_size, 1024);
        assert_eq!(
            spec.aliases,
            vec![AliasSpec {
                name: "1-2-0".into(),
                target: AliasTarget::PublishedVersion
            }]
        );
    }

    #[test]
    fn missing_handler_is_a_config_error() {
        let err = FunctionSpec::from_declaration(
            &declaration(r#"{"functionName":"orders"}"#),
            &defaults(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingField {
                function: "orders-dev".into(),
                field: "handler"
            }
        );
    }

    #[test]
    fn unknown_integration_is_rejected() {
        let err = FunctionSpec::from_declaration(
            &declaration(
                r#"{"functionName":"orders","handler":"h","triggers":[{"integration":"Foo"}]}"#,
            ),
            &defaults(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownIntegration { ref integration, .. } if integration == "Foo"));
    }

    #[test]
    fn triggers_are_suffixed_and_ordered() {
        let spec = FunctionSpec::from_declaration(
            &declaration(
                r#"{"functionName":"orders","handler":"h","triggers":[
                    {"integration":"Lex","lexBotName":"OrderBot"},
                    {"integration":"SNS","snsTopic":"alerts"},
                    {"integration":"SQS","standardQueue":"jobs","batchSize":5},
                    {"integration":"CloudWatch Events - Schedule","ruleName":"nightly","scheduleExpression":"rate(1 day)"}
                ]}"#,
            ),
            &defaults(),
        )
        .unwrap();
        let targets: Vec<&str> = spec.triggers.iter().map(TriggerSpec::target).collect();
        assert_eq!(targets, vec!["nightly-dev", "jobs-dev", "alerts-dev", "OrderBot"]);
    }

    #[test]
    fn not_publishing_means_no_aliases() {
        let spec = FunctionSpec::from_declaration(
            &declaration(r#"{"functionName":"orders","handler":"h","publish":false}"#),
            &FunctionDefaults {
                version: None,
                ..defaults()
            },
        )
        .unwrap();
        assert!(spec.aliases.is_empty());
    }

    #[test]
    fn environment_layers_in_order() {
        let mut d = defaults();
        d.environment.insert("A".into(), "plugin".into());
        d.environment.insert("B".into(), "plugin".into());
        d.pass_through.insert("C".into(), "cli".into());
        let spec = FunctionSpec::from_declaration(
            &declaration(
                r#"{"functionName":"o","handler":"h","environmentVariables":{"B":"function","C":"function"}}"#,
            ),
            &d,
        )
        .unwrap();
        assert_eq!(spec.environment["A"], "plugin");
        assert_eq!(spec.environment["B"], "function");
        assert_eq!(spec.environment["C"], "cli");
    }

    #[test]
    fn keep_alive_rule_uses_rate_expression() {
        let spec = FunctionSpec::from_declaration(
            &declaration(r#"{"functionName":"o","handler":"h","keepAlive":1}"#),
            &defaults(),
        )
        .unwrap();
        let rule = spec.keep_alive_rule().unwrap();
        assert_eq!(rule.name, "KEEP-ALIVE-o-dev");
        assert_eq!(rule.schedule_expression, "rate(1 minute)");
    }

    #[test]
    fn invalid_starting_position_is_rejected() {
        let err = FunctionSpec::from_declaration(
            &declaration(
                r#"{"functionName":"o","handler":"h","triggers":[{"integration":"Kinesis","kinesisStream":"s","startingPosition":"EARLIEST"}]}"#,
            ),
            &defaults(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStartingPosition { .. }));
    }

    #[test]
    fn at_timestamp_without_a_timestamp_is_rejected() {
        let err = FunctionSpec::from_declaration(
            &declaration(
                r#"{"functionName":"o","handler":"h","triggers":[{"integration":"DynamoDB","dynamoDBTable":"t","startingPosition":"AT_TIMESTAMP"}]}"#,
            ),
            &defaults(),
        )
        .unwrap_err();
        match err {
            ConfigError::InvalidStartingPosition { value, .. } => assert_eq!(value, "AT_TIMESTAMP"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
