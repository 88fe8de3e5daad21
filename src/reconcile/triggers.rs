//! Brings each declared trigger of a function in line with its declaration.
//!
//! Triggers are handled in a fixed order: scheduled rules, stream and queue
//! sources, topics, permission-only integrations, then the keep-alive rule.
//! Every trigger is its own failure boundary.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, error, info};
use uuid::Uuid;

use super::drift::{Drift, RuleStatus};
use super::orphans::{Declared, ResourceKind};
use super::policy::{
    ensure_grant, grant_identity, PermissionSet, ALEXA_PRINCIPAL, EVENTS_PRINCIPAL,
    LEX_PRINCIPAL, SNS_PRINCIPAL,
};
use crate::arn;
use crate::config::function::{ScheduleRule, StartingPosition};
use crate::config::{FunctionSpec, TriggerSpec};
use crate::error::{DeployError, DeployResult, RemoteContext};
use crate::provider::types::*;
use crate::provider::{Clients, NotFoundExt};

pub const LAMBDA_PROTOCOL: &str = "lambda";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for TriggerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerAction::Created => write!(f, "created"),
            TriggerAction::Updated => write!(f, "updated"),
            TriggerAction::Unchanged => write!(f, "unchanged"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub trigger: String,
    pub action: TriggerAction,
    /// ARN the provider assigned to the rule, topic or event source.
    pub trigger_arn: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TriggerFailure {
    pub trigger: String,
    pub error: String,
}

/// Result of reconciling all triggers of one function.
#[derive(Debug, Clone)]
pub struct TriggerRun {
    pub outcomes: Vec<TriggerOutcome>,
    pub failures: Vec<TriggerFailure>,
    pub declared: Declared,
    /// Permission set including grants made during the run.
    pub permissions: PermissionSet,
}

fn affected_kinds(trigger: &TriggerSpec) -> &'static [ResourceKind] {
    match trigger {
        TriggerSpec::Schedule(_) => &[ResourceKind::RuleBindings, ResourceKind::Permissions],
        TriggerSpec::DynamoDb(_) | TriggerSpec::Kinesis(_) | TriggerSpec::Sqs(_) => {
            &[ResourceKind::Mappings]
        }
        TriggerSpec::Sns { .. } => &[ResourceKind::Subscriptions, ResourceKind::Permissions],
        TriggerSpec::AlexaSkillsKit | TriggerSpec::Lex { .. } => &[ResourceKind::Permissions],
    }
}

pub fn alexa_statement_id(region: &str) -> String {
    format!("alexa-skills-kit-{}", region)
}

pub fn lex_statement_id(region: &str, bot: &str) -> String {
    format!("lex-{}-{}", region, bot)
}

pub fn lex_source_arn(region: &str, account: &str, bot: &str) -> String {
    format!("arn:aws:lex:{}:{}:intent:{}:*", region, account, bot)
}

// --- Source resolution ---

pub async fn table_stream_arn(clients: &Clients, function: &str, table: &str) -> DeployResult<String> {
    clients
        .streams
        .list_streams(table)
        .await
        .remote(function, "ListStreams")?
        .into_iter()
        .find(|s| s.table_name == table)
        .map(|s| s.stream_arn)
        .ok_or_else(|| DeployError::Unresolvable {
            kind: "table stream",
            name: table.to_string(),
        })
}

pub async fn kinesis_stream_arn(clients: &Clients, function: &str, stream: &str) -> DeployResult<String> {
    clients
        .streams
        .describe_stream(stream)
        .await
        .found()
        .remote(function, "DescribeStream")?
        .map(|d| d.stream_arn)
        .ok_or_else(|| DeployError::Unresolvable {
            kind: "kinesis stream",
            name: stream.to_string(),
        })
}

pub async fn queue_arn(clients: &Clients, function: &str, queue: &str) -> DeployResult<String> {
    let url = clients
        .sqs
        .get_queue_url(queue)
        .await
        .found()
        .remote(function, "GetQueueUrl")?
        .ok_or_else(|| DeployError::Unresolvable {
            kind: "queue",
            name: queue.to_string(),
        })?;
    clients
        .sqs
        .get_queue_arn(&url)
        .await
        .remote(function, "GetQueueAttributes")
}

/// Resolves the event source ARN of a mapped trigger.
pub async fn event_source_arn(
    clients: &Clients,
    function: &str,
    trigger: &TriggerSpec,
) -> DeployResult<Option<String>> {
    Ok(match trigger {
        TriggerSpec::DynamoDb(source) => Some(table_stream_arn(clients, function, &source.name).await?),
        TriggerSpec::Kinesis(source) => Some(kinesis_stream_arn(clients, function, &source.name).await?),
        TriggerSpec::Sqs(source) => Some(queue_arn(clients, function, &source.queue).await?),
        TriggerSpec::Schedule(_)
        | TriggerSpec::Sns { .. }
        | TriggerSpec::AlexaSkillsKit
        | TriggerSpec::Lex { .. } => None,
    })
}

// --- Reconciler ---

pub struct TriggerReconciler<'a> {
    clients: &'a Clients,
    function: &'a str,
    function_arn: &'a str,
    region: String,
    account: String,
    drift: &'a Drift,
    bound_rules: &'a BTreeSet<String>,
    permissions: PermissionSet,
    declared: Declared,
}

impl<'a> TriggerReconciler<'a> {
    pub fn new(
        clients: &'a Clients,
        function: &'a str,
        function_arn: &'a str,
        drift: &'a Drift,
        bound_rules: &'a BTreeSet<String>,
        permissions: PermissionSet,
    ) -> Self {
        TriggerReconciler {
            clients,
            function,
            function_arn,
            region: arn::region(function_arn).unwrap_or_default().to_string(),
            account: arn::account(function_arn).unwrap_or_default().to_string(),
            drift,
            bound_rules,
            permissions,
            declared: Declared::default(),
        }
    }

    pub async fn run(mut self, spec: &FunctionSpec) -> TriggerRun {
        let mut outcomes = Vec::new();
        let mut failures = Vec::new();

        let keep_alive = spec.keep_alive_rule().map(TriggerSpec::Schedule);
        for trigger in spec.triggers.iter().chain(keep_alive.iter()) {
            let label = trigger.to_string();
            match self.reconcile(trigger).await {
                Ok(outcome) => {
                    info!(function = self.function, trigger = %label, action = %outcome.action, "trigger reconciled");
                    outcomes.push(outcome);
                }
                Err(e) => {
                    error!(function = self.function, trigger = %label, error = %e, "trigger failed");
                    self.declared
                        .incomplete
                        .extend(affected_kinds(trigger).iter().copied());
                    failures.push(TriggerFailure {
                        trigger: label,
                        error: e.to_string(),
                    });
                }
            }
        }

        TriggerRun {
            outcomes,
            failures,
            declared: self.declared,
            permissions: self.permissions,
        }
    }

    async fn reconcile(&mut self, trigger: &TriggerSpec) -> DeployResult<TriggerOutcome> {
        let label = trigger.to_string();
        let (action, trigger_arn) = match trigger {
            TriggerSpec::Schedule(rule) => self.schedule(rule).await?,
            TriggerSpec::DynamoDb(source) => {
                let arn = table_stream_arn(self.clients, self.function, &source.name).await?;
                self.mapping(arn, source.batch_size, Some(source.starting_position), source.enabled)
                    .await?
            }
            TriggerSpec::Kinesis(source) => {
                let arn = kinesis_stream_arn(self.clients, self.function, &source.name).await?;
                self.mapping(arn, source.batch_size, Some(source.starting_position), source.enabled)
                    .await?
            }
            TriggerSpec::Sqs(source) => {
                let arn = queue_arn(self.clients, self.function, &source.queue).await?;
                self.mapping(arn, source.batch_size, None, source.enabled).await?
            }
            TriggerSpec::Sns { topic } => self.topic(topic).await?,
            TriggerSpec::AlexaSkillsKit => {
                let sid = alexa_statement_id(&self.region);
                (self.grant(ALEXA_PRINCIPAL, None, sid).await?, None)
            }
            TriggerSpec::Lex { bot_name } => self.lex(bot_name).await?,
        };
        Ok(TriggerOutcome {
            trigger: label,
            action,
            trigger_arn,
        })
    }

    async fn grant(
        &mut self,
        principal: &str,
        source_arn: Option<&str>,
        statement_id: String,
    ) -> DeployResult<TriggerAction> {
        self.declared
            .grants
            .insert(grant_identity(principal, source_arn));
        let granted = ensure_grant(
            self.clients,
            self.function,
            &mut self.permissions,
            principal,
            source_arn,
            statement_id,
        )
        .await?;
        Ok(if granted {
            TriggerAction::Created
        } else {
            TriggerAction::Unchanged
        })
    }

    /// Put rule, grant the scheduler, bind the function as target.
    async fn schedule(&mut self, rule: &ScheduleRule) -> DeployResult<(TriggerAction, Option<String>)> {
        self.declared.rules.insert(rule.name.clone());

        if let RuleStatus::Current { arn } = self.drift.rule(&rule.name) {
            debug!(function = self.function, rule = %rule.name, "rule is current");
            self.declared
                .grants
                .insert(grant_identity(EVENTS_PRINCIPAL, Some(arn)));
            return Ok((TriggerAction::Unchanged, Some(arn.clone())));
        }

        let rule_arn = self
            .clients
            .events
            .put_rule(PutRuleRequest {
                name: rule.name.clone(),
                schedule_expression: Some(rule.schedule_expression.clone()),
                description: Some(rule.description.clone()),
                state: Some("ENABLED".to_string()),
            })
            .await
            .remote(self.function, "PutRule")?
            .rule_arn;

        self.grant(EVENTS_PRINCIPAL, Some(&rule_arn), Uuid::new_v4().to_string())
            .await?;

        self.clients
            .events
            .put_targets(PutTargetsRequest {
                rule: rule.name.clone(),
                targets: vec![EventTarget {
                    id: self.function.to_string(),
                    arn: self.function_arn.to_string(),
                }],
            })
            .await
            .remote(self.function, "PutTargets")?;

        let action = if self.bound_rules.contains(&rule.name) {
            TriggerAction::Updated
        } else {
            TriggerAction::Created
        };
        Ok((action, Some(rule_arn)))
    }

    /// Finds the mapping for (function, source) and creates or updates it.
    async fn mapping(
        &mut self,
        source_arn: String,
        batch_size: i32,
        starting_position: Option<StartingPosition>,
        enabled: bool,
    ) -> DeployResult<(TriggerAction, Option<String>)> {
        self.declared.sources.insert(source_arn.clone());

        let existing = self
            .clients
            .mappings
            .list_event_source_mappings(ListEventSourceMappingsRequest {
                function_name: Some(self.function_arn.to_string()),
                event_source_arn: Some(source_arn.clone()),
            })
            .await
            .remote(self.function, "ListEventSourceMappings")?
            .into_iter()
            .next();

        let action = match existing {
            Some(mapping) if mapping.batch_size == batch_size && mapping.is_enabled() == enabled => {
                TriggerAction::Unchanged
            }
            Some(mapping) => {
                self.clients
                    .mappings
                    .update_event_source_mapping(
                        &mapping.uuid,
                        UpdateEventSourceMappingRequest {
                            function_name: None,
                            batch_size: Some(batch_size),
                            enabled: Some(enabled),
                        },
                    )
                    .await
                    .remote(self.function, "UpdateEventSourceMapping")?;
                TriggerAction::Updated
            }
            None => {
                self.clients
                    .mappings
                    .create_event_source_mapping(CreateEventSourceMappingRequest {
                        event_source_arn: source_arn.clone(),
                        function_name: self.function_arn.to_string(),
                        batch_size: Some(batch_size),
                        starting_position: starting_position.map(|p| p.as_str().to_string()),
                        enabled: Some(enabled),
                    })
                    .await
                    .remote(self.function, "CreateEventSourceMapping")?;
                TriggerAction::Created
            }
        };
        Ok((action, Some(source_arn)))
    }

    async fn topic(&mut self, topic: &str) -> DeployResult<(TriggerAction, Option<String>)> {
        let topic_arn = self
            .clients
            .sns
            .create_topic(topic)
            .await
            .remote(self.function, "CreateTopic")?;
        self.declared.topics.insert(topic_arn.clone());

        let subscribed = self
            .clients
            .sns
            .list_subscriptions_by_topic(&topic_arn)
            .await
            .remote(self.function, "ListSubscriptionsByTopic")?
            .iter()
            .any(|s| s.protocol == LAMBDA_PROTOCOL && s.endpoint == self.function_arn);
        if !subscribed {
            self.clients
                .sns
                .subscribe(SubscribeRequest {
                    topic_arn: topic_arn.clone(),
                    protocol: LAMBDA_PROTOCOL.to_string(),
                    endpoint: self.function_arn.to_string(),
                })
                .await
                .remote(self.function, "Subscribe")?;
        }

        let granted = self
            .grant(SNS_PRINCIPAL, Some(&topic_arn), Uuid::new_v4().to_string())
            .await?;
        let action = match (subscribed, granted) {
            (false, _) => TriggerAction::Created,
            (true, TriggerAction::Created) => TriggerAction::Updated,
            (true, _) => TriggerAction::Unchanged,
        };
        Ok((action, Some(topic_arn)))
    }

    async fn lex(&mut self, bot: &str) -> DeployResult<(TriggerAction, Option<String>)> {
        self.clients
            .lex
            .get_bot(bot)
            .await
            .found()
            .remote(self.function, "GetBot")?
            .ok_or_else(|| DeployError::Unresolvable {
                kind: "bot",
                name: bot.to_string(),
            })?;

        let source = lex_source_arn(&self.region, &self.account, bot);
        let sid = lex_statement_id(&self.region, bot);
        let action = self.grant(LEX_PRINCIPAL, Some(&source), sid).await?;
        Ok((action, Some(source)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_statement_ids() {
        assert_eq!(alexa_statement_id("us-east-1"), "alexa-skills-kit-us-east-1");
        assert_eq!(lex_statement_id("eu-west-1", "OrderBot"), "lex-eu-west-1-OrderBot");
        assert_eq!(
            lex_source_arn("eu-west-1", "123456789012", "OrderBot"),
            "arn:aws:lex:eu-west-1:123456789012:intent:OrderBot:*"
        );
    }

    #[test]
    fn failed_sns_trigger_blocks_subscription_and_permission_sweeps() {
        let kinds = affected_kinds(&TriggerSpec::Sns {
            topic: "alerts".into(),
        });
        assert_eq!(kinds, &[ResourceKind::Subscriptions, ResourceKind::Permissions]);
    }
}
