//! Parsed view of a function's resource policy.
//!
//! Idempotence checks are set-membership queries on [`Grant`] tuples instead
//! of scans over the raw policy document.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{DeployResult, RemoteContext};
use crate::provider::types::AddPermissionRequest;
use crate::provider::{Clients, NotFoundExt};

pub const INVOKE_ACTION: &str = "lambda:InvokeFunction";
pub const EVENTS_PRINCIPAL: &str = "events.amazonaws.com";
pub const SNS_PRINCIPAL: &str = "sns.amazonaws.com";
pub const ALEXA_PRINCIPAL: &str = "alexa-appkit.amazon.com";
pub const LEX_PRINCIPAL: &str = "lex.amazonaws.com";

/// Principals whose statements this tool creates and may remove.
pub const MANAGED_PRINCIPALS: [&str; 4] =
    [EVENTS_PRINCIPAL, SNS_PRINCIPAL, ALEXA_PRINCIPAL, LEX_PRINCIPAL];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Grant {
    pub principal: String,
    pub action: String,
    pub source_arn: Option<String>,
    pub statement_id: String,
}

impl Grant {
    /// Identity used when comparing live grants with declared ones.
    pub fn identity(&self) -> String {
        grant_identity(&self.principal, self.source_arn.as_deref())
    }

    pub fn is_managed(&self) -> bool {
        MANAGED_PRINCIPALS.contains(&self.principal.as_str())
    }
}

pub fn grant_identity(principal: &str, source_arn: Option<&str>) -> String {
    format!("{}|{}", principal, source_arn.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    grants: BTreeSet<Grant>,
}

fn principal_of(statement: &Value) -> Option<String> {
    match statement.get("Principal")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("Service")
            .or_else(|| map.get("AWS"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn actions_of(statement: &Value) -> Vec<String> {
    match statement.get("Action") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn source_arn_of(statement: &Value) -> Option<String> {
    let condition = statement.get("Condition")?;
    ["ArnLike", "ArnEquals", "StringEquals"]
        .iter()
        .find_map(|op| condition.get(*op)?.get("AWS:SourceArn")?.as_str())
        .map(str::to_string)
}

impl PermissionSet {
    /// Parses the JSON policy document returned by the function service.
    pub fn parse(policy: &str) -> DeployResult<Self> {
        let document: Value = serde_json::from_str(policy)?;
        let statements = match document.get("Statement") {
            Some(Value::Array(items)) => items.clone(),
            Some(single @ Value::Object(_)) => vec![single.clone()],
            _ => Vec::new(),
        };

        let mut grants = BTreeSet::new();
        for statement in &statements {
            let (Some(principal), Some(sid)) = (
                principal_of(statement),
                statement.get("Sid").and_then(Value::as_str),
            ) else {
                continue;
            };
            let source_arn = source_arn_of(statement);
            for action in actions_of(statement) {
                grants.insert(Grant {
                    principal: principal.clone(),
                    action,
                    source_arn: source_arn.clone(),
                    statement_id: sid.to_string(),
                });
            }
        }
        Ok(PermissionSet { grants })
    }

    /// Current policy of `function`; an absent policy is an empty set.
    pub async fn fetch(clients: &Clients, function: &str) -> DeployResult<Self> {
        match clients.lambda.get_policy(function).await.found().remote(function, "GetPolicy")? {
            Some(response) => Self::parse(&response.policy),
            None => Ok(PermissionSet::default()),
        }
    }

    pub fn grants_invoke(&self, principal: &str, source_arn: Option<&str>) -> bool {
        self.grants.iter().any(|g| {
            g.principal == principal
                && g.action == INVOKE_ACTION
                && g.source_arn.as_deref() == source_arn
        })
    }

    pub fn has_statement(&self, statement_id: &str) -> bool {
        self.grants.iter().any(|g| g.statement_id == statement_id)
    }

    pub fn insert(&mut self, grant: Grant) {
        self.grants.insert(grant);
    }

    pub fn remove_statement(&mut self, statement_id: &str) {
        self.grants.retain(|g| g.statement_id != statement_id);
    }

    pub fn managed(&self) -> impl Iterator<Item = &Grant> {
        self.grants.iter().filter(|g| g.is_managed())
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

/// Grants `principal` invoke rights on `function` unless an equivalent
/// statement exists. Returns whether a statement was added.
pub async fn ensure_grant(
    clients: &Clients,
    function: &str,
    permissions: &mut PermissionSet,
    principal: &str,
    source_arn: Option<&str>,
    statement_id: String,
) -> DeployResult<bool> {
    if permissions.grants_invoke(principal, source_arn) {
        debug!(function, principal, source_arn, "permission already granted");
        return Ok(false);
    }
    if permissions.has_statement(&statement_id) {
        // Same id, different scope: replace the stale statement.
        clients
            .lambda
            .remove_permission(function, &statement_id)
            .await
            .found()
            .remote(function, "RemovePermission")?;
        permissions.remove_statement(&statement_id);
    }

    clients
        .lambda
        .add_permission(
            function,
            AddPermissionRequest {
                statement_id: statement_id.clone(),
                action: INVOKE_ACTION.to_string(),
                principal: principal.to_string(),
                source_arn: source_arn.map(str::to_string),
            },
        )
        .await
        .remote(function, "AddPermission")?;
    info!(function, principal, source_arn, statement_id = %statement_id, "granted invoke permission");

    permissions.insert(Grant {
        principal: principal.to_string(),
        action: INVOKE_ACTION.to_string(),
        source_arn: source_arn.map(str::to_string),
        statement_id,
    });
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"{
        "Version": "2012-10-17",
        "Id": "default",
        "Statement": [
            {
                "Sid": "a1",
                "Effect": "Allow",
                "Principal": {"Service": "sns.amazonaws.com"},
                "Action": "lambda:InvokeFunction",
                "Resource": "arn:aws:lambda:us-east-1:000000000000:function:f",
                "Condition": {"ArnLike": {"AWS:SourceArn": "arn:aws:sns:us-east-1:000000000000:alerts"}}
            },
            {
                "Sid": "alexa-skills-kit-us-east-1",
                "Effect": "Allow",
                "Principal": {"Service": "alexa-appkit.amazon.com"},
                "Action": "lambda:InvokeFunction",
                "Resource": "arn:aws:lambda:us-east-1:000000000000:function:f"
            },
            {
                "Sid": "console",
                "Effect": "Allow",
                "Principal": {"Service": "apigateway.amazonaws.com"},
                "Action": "lambda:InvokeFunction",
                "Resource": "arn:aws:lambda:us-east-1:000000000000:function:f"
            }
        ]
    }"#;

    #[test]
    fn parses_statements_into_grants() {
        let set = PermissionSet::parse(POLICY).unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.grants_invoke(
            SNS_PRINCIPAL,
            Some("arn:aws:sns:us-east-1:000000000000:alerts")
        ));
        assert!(!set.grants_invoke(SNS_PRINCIPAL, Some("arn:aws:sns:us-east-1:000000000000:other")));
        assert!(set.grants_invoke(ALEXA_PRINCIPAL, None));
        assert!(set.has_statement("console"));
    }

    #[test]
    fn only_managed_principals_are_candidates() {
        let set = PermissionSet::parse(POLICY).unwrap();
        let managed: Vec<&str> = set.managed().map(|g| g.statement_id.as_str()).collect();
        assert_eq!(managed.len(), 2);
        assert!(!managed.contains(&"console"));
    }

    #[test]
    fn identity_ignores_statement_id() {
        let a = Grant {
            principal: SNS_PRINCIPAL.into(),
            action: INVOKE_ACTION.into(),
            source_arn: Some("arn:x".into()),
            statement_id: "one".into(),
        };
        let b = Grant {
            statement_id: "two".into(),
            ..a.clone()
        };
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity(), grant_identity(SNS_PRINCIPAL, Some("arn:x")));
    }
}
