use tracing::{info, warn};

use super::orphans::unbind_rule;
use super::policy::PermissionSet;
use super::remote;
use super::triggers::{alexa_statement_id, event_source_arn, lex_statement_id, LAMBDA_PROTOCOL};
use crate::arn;
use crate::config::{FunctionSpec, TriggerSpec};
use crate::error::{DeployResult, RemoteContext};
use crate::provider::types::ListEventSourceMappingsRequest;
use crate::provider::Clients;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteAction {
    Deleted,
    Absent,
}

#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub action: DeleteAction,
    /// Triggers whose teardown failed; the function is deleted regardless.
    pub failures: Vec<String>,
}

/// Tears down the declared triggers of `spec`, then the function itself.
pub async fn delete_function(clients: &Clients, spec: &FunctionSpec) -> DeployResult<DeleteOutcome> {
    let Some(state) = remote::fetch(clients, &spec.name).await? else {
        info!(function = %spec.name, "function does not exist, nothing to delete");
        return Ok(DeleteOutcome {
            action: DeleteAction::Absent,
            failures: Vec::new(),
        });
    };
    let function_arn = state.function_arn().to_string();
    let region = arn::region(&function_arn).unwrap_or_default().to_string();

    let keep_alive = spec.keep_alive_rule().map(TriggerSpec::Schedule);
    let mut failures = Vec::new();
    for trigger in spec.triggers.iter().chain(keep_alive.iter()) {
        let result = teardown(
            clients,
            &spec.name,
            &function_arn,
            &region,
            &state.permissions,
            trigger,
        )
        .await;
        if let Err(e) = result {
            warn!(function = %spec.name, trigger = %trigger, error = %e, "trigger teardown failed");
            failures.push(format!("{}: {}", trigger, e));
        }
    }

    clients
        .lambda
        .delete_function(&spec.name)
        .await
        .remote(&spec.name, "DeleteFunction")?;
    info!(function = %spec.name, "deleted function");

    Ok(DeleteOutcome {
        action: DeleteAction::Deleted,
        failures,
    })
}

async fn teardown(
    clients: &Clients,
    function: &str,
    function_arn: &str,
    region: &str,
    permissions: &PermissionSet,
    trigger: &TriggerSpec,
) -> DeployResult<()> {
    match trigger {
        TriggerSpec::Schedule(rule) => unbind_rule(clients, function, function_arn, &rule.name).await,
        TriggerSpec::DynamoDb(_) | TriggerSpec::Kinesis(_) | TriggerSpec::Sqs(_) => {
            let Some(source) = event_source_arn(clients, function, trigger).await? else {
                return Ok(());
            };
            let mappings = clients
                .mappings
                .list_event_source_mappings(ListEventSourceMappingsRequest {
                    function_name: Some(function_arn.to_string()),
                    event_source_arn: Some(source),
                })
                .await
                .remote(function, "ListEventSourceMappings")?;
            for mapping in mappings {
                clients
                    .mappings
                    .delete_event_source_mapping(&mapping.uuid)
                    .await
                    .remote(function, "DeleteEventSourceMapping")?;
            }
            Ok(())
        }
        TriggerSpec::Sns { topic } => {
            let subscriptions = clients
                .sns
                .list_subscriptions()
                .await
                .remote(function, "ListSubscriptions")?;
            for subscription in subscriptions.iter().filter(|s| {
                s.protocol == LAMBDA_PROTOCOL
                    && s.endpoint == function_arn
                    && arn::resource_name(&s.topic_arn) == topic.as_str()
            }) {
                clients
                    .sns
                    .unsubscribe(&subscription.subscription_arn)
                    .await
                    .remote(function, "Unsubscribe")?;
            }
            Ok(())
        }
        TriggerSpec::AlexaSkillsKit => {
            remove_statement(clients, function, permissions, &alexa_statement_id(region)).await
        }
        TriggerSpec::Lex { bot_name } => {
            remove_statement(clients, function, permissions, &lex_statement_id(region, bot_name))
                .await
        }
    }
}

async fn remove_statement(
    clients: &Clients,
    function: &str,
    permissions: &PermissionSet,
    statement_id: &str,
) -> DeployResult<()> {
    if !permissions.has_statement(statement_id) {
        return Ok(());
    }
    clients
        .lambda
        .remove_permission(function, statement_id)
        .await
        .remote(function, "RemovePermission")
}
