//! Removes remote bindings that are no longer declared.
//!
//! One generic [`sweep`] drives every resource kind; each kind only says how
//! to list its live items, how to identify them, and how to delete one.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use tracing::{info, warn};

use super::policy::{Grant, PermissionSet};
use super::triggers::LAMBDA_PROTOCOL;
use crate::error::{DeployResult, RemoteContext};
use crate::provider::types::{
    EventSourceMappingConfiguration, ListEventSourceMappingsRequest, RemoveTargetsRequest,
    SubscriptionEntry,
};
use crate::provider::{Clients, NotFoundExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceKind {
    RuleBindings,
    Mappings,
    Subscriptions,
    Permissions,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceKind::RuleBindings => "rule binding",
            ResourceKind::Mappings => "event source mapping",
            ResourceKind::Subscriptions => "subscription",
            ResourceKind::Permissions => "permission",
        };
        f.write_str(label)
    }
}

/// Identities of everything the current declaration produced.
#[derive(Debug, Clone, Default)]
pub struct Declared {
    pub rules: BTreeSet<String>,
    pub sources: BTreeSet<String>,
    pub topics: BTreeSet<String>,
    pub grants: BTreeSet<String>,
    /// Kinds whose declared set is unknown because a trigger failed.
    pub incomplete: BTreeSet<ResourceKind>,
}

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

impl SweepReport {
    fn merge(&mut self, other: SweepReport) {
        self.removed.extend(other.removed);
        self.failed.extend(other.failed);
    }
}

#[async_trait]
pub trait OrphanKind: Send + Sync {
    type Live: Send + Sync;

    fn kind(&self) -> ResourceKind;
    async fn list_live(&self) -> DeployResult<Vec<Self::Live>>;
    fn identity(&self, live: &Self::Live) -> String;
    async fn delete_one(&self, live: &Self::Live) -> DeployResult<()>;
}

/// Deletes every live item of `kind` whose identity is not in `declared`.
/// Individual failures are logged and do not stop the sweep.
pub async fn sweep<K: OrphanKind>(
    function: &str,
    kind: &K,
    declared: &BTreeSet<String>,
) -> SweepReport {
    let mut report = SweepReport::default();
    let live = match kind.list_live().await {
        Ok(live) => live,
        Err(e) => {
            warn!(function, kind = %kind.kind(), error = %e, "unable to list live resources");
            report.failed.push(format!("{}: {}", kind.kind(), e));
            return report;
        }
    };

    for item in live {
        let identity = kind.identity(&item);
        if declared.contains(&identity) {
            continue;
        }
        match kind.delete_one(&item).await {
            Ok(()) => {
                info!(function, kind = %kind.kind(), resource = %identity, "removed orphan");
                report.removed.push(format!("{} {}", kind.kind(), identity));
            }
            Err(e) => {
                warn!(function, kind = %kind.kind(), resource = %identity, error = %e, "failed to remove orphan");
                report
                    .failed
                    .push(format!("{} {}: {}", kind.kind(), identity, e));
            }
        }
    }
    report
}

// --- Kinds ---

pub struct RuleBindings<'a> {
    pub clients: &'a Clients,
    pub function: &'a str,
    pub function_arn: &'a str,
}

#[async_trait]
impl OrphanKind for RuleBindings<'_> {
    type Live = String;

    fn kind(&self) -> ResourceKind {
        ResourceKind::RuleBindings
    }

    async fn list_live(&self) -> DeployResult<Vec<String>> {
        self.clients
            .events
            .list_rule_names_by_target(self.function_arn)
            .await
            .remote(self.function, "ListRuleNamesByTarget")
    }

    fn identity(&self, rule: &String) -> String {
        rule.clone()
    }

    async fn delete_one(&self, rule: &String) -> DeployResult<()> {
        unbind_rule(self.clients, self.function, self.function_arn, rule).await
    }
}

/// Removes the function from `rule`'s targets and deletes the rule once it
/// has none left.
pub async fn unbind_rule(
    clients: &Clients,
    function: &str,
    function_arn: &str,
    rule: &str,
) -> DeployResult<()> {
    let Some(targets) = clients
        .events
        .list_targets_by_rule(rule)
        .await
        .found()
        .remote(function, "ListTargetsByRule")?
    else {
        return Ok(());
    };
    let ids: Vec<String> = targets
        .iter()
        .filter(|t| t.arn == function_arn)
        .map(|t| t.id.clone())
        .collect();
    if !ids.is_empty() {
        clients
            .events
            .remove_targets(RemoveTargetsRequest {
                rule: rule.to_string(),
                ids: ids.clone(),
            })
            .await
            .remote(function, "RemoveTargets")?;
    }
    if targets.len() == ids.len() {
        clients
            .events
            .delete_rule(rule)
            .await
            .remote(function, "DeleteRule")?;
    }
    Ok(())
}

pub struct Mappings<'a> {
    pub clients: &'a Clients,
    pub function: &'a str,
    pub function_arn: &'a str,
}

#[async_trait]
impl OrphanKind for Mappings<'_> {
    type Live = EventSourceMappingConfiguration;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Mappings
    }

    async fn list_live(&self) -> DeployResult<Vec<EventSourceMappingConfiguration>> {
        self.clients
            .mappings
            .list_event_source_mappings(ListEventSourceMappingsRequest {
                function_name: Some(self.function_arn.to_string()),
                event_source_arn: None,
            })
            .await
            .remote(self.function, "ListEventSourceMappings")
    }

    fn identity(&self, mapping: &EventSourceMappingConfiguration) -> String {
        mapping.event_source_arn.clone()
    }

    async fn delete_one(&self, mapping: &EventSourceMappingConfiguration) -> DeployResult<()> {
        self.clients
            .mappings
            .delete_event_source_mapping(&mapping.uuid)
            .await
            .remote(self.function, "DeleteEventSourceMapping")?;
        Ok(())
    }
}

pub struct Subscriptions<'a> {
    pub clients: &'a Clients,
    pub function: &'a str,
    pub function_arn: &'a str,
}

#[async_trait]
impl OrphanKind for Subscriptions<'_> {
    type Live = SubscriptionEntry;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Subscriptions
    }

    async fn list_live(&self) -> DeployResult<Vec<SubscriptionEntry>> {
        Ok(self
            .clients
            .sns
            .list_subscriptions()
            .await
            .remote(self.function, "ListSubscriptions")?
            .into_iter()
            .filter(|s| s.protocol == LAMBDA_PROTOCOL && s.endpoint == self.function_arn)
            .collect())
    }

    fn identity(&self, subscription: &SubscriptionEntry) -> String {
        subscription.topic_arn.clone()
    }

    async fn delete_one(&self, subscription: &SubscriptionEntry) -> DeployResult<()> {
        self.clients
            .sns
            .unsubscribe(&subscription.subscription_arn)
            .await
            .remote(self.function, "Unsubscribe")
    }
}

/// Statements for managed principals only; anything else in the policy was
/// granted by someone else and is left alone.
pub struct Permissions<'a> {
    pub clients: &'a Clients,
    pub function: &'a str,
    pub permissions: &'a PermissionSet,
}

#[async_trait]
impl OrphanKind for Permissions<'_> {
    type Live = Grant;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Permissions
    }

    /// One grant per statement; removal works on whole statements.
    async fn list_live(&self) -> DeployResult<Vec<Grant>> {
        let mut statements = BTreeSet::new();
        Ok(self
            .permissions
            .managed()
            .filter(|g| statements.insert(g.statement_id.clone()))
            .cloned()
            .collect())
    }

    fn identity(&self, grant: &Grant) -> String {
        grant.identity()
    }

    async fn delete_one(&self, grant: &Grant) -> DeployResult<()> {
        self.clients
            .lambda
            .remove_permission(self.function, &grant.statement_id)
            .await
            .remote(self.function, "RemovePermission")
    }
}

/// Sweeps every kind whose declared set is complete.
pub async fn cleanup_orphans(
    clients: &Clients,
    function: &str,
    function_arn: &str,
    declared: &Declared,
    permissions: &PermissionSet,
) -> SweepReport {
    let mut report = SweepReport::default();
    let skip = |kind: ResourceKind| {
        let incomplete = declared.incomplete.contains(&kind);
        if incomplete {
            warn!(function, kind = %kind, "declared triggers failed, not sweeping");
        }
        incomplete
    };

    if !skip(ResourceKind::RuleBindings) {
        let kind = RuleBindings {
            clients,
            function,
            function_arn,
        };
        report.merge(sweep(function, &kind, &declared.rules).await);
    }
    if !skip(ResourceKind::Mappings) {
        let kind = Mappings {
            clients,
            function,
            function_arn,
        };
        report.merge(sweep(function, &kind, &declared.sources).await);
    }
    if !skip(ResourceKind::Subscriptions) {
        let kind = Subscriptions {
            clients,
            function,
            function_arn,
        };
        report.merge(sweep(function, &kind, &declared.topics).await);
    }
    if !skip(ResourceKind::Permissions) {
        let kind = Permissions {
            clients,
            function,
            permissions,
        };
        report.merge(sweep(function, &kind, &declared.grants).await);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::local::LocalCloud;
    use crate::provider::ServiceError;

    struct Fake {
        live: Vec<&'static str>,
        fail_on: Option<&'static str>,
        deleted: AtomicUsize,
    }

    #[async_trait]
    impl OrphanKind for Fake {
        type Live = &'static str;

        fn kind(&self) -> ResourceKind {
            ResourceKind::Mappings
        }

        async fn list_live(&self) -> DeployResult<Vec<&'static str>> {
            Ok(self.live.clone())
        }

        fn identity(&self, live: &&'static str) -> String {
            live.to_string()
        }

        async fn delete_one(&self, live: &&'static str) -> DeployResult<()> {
            if Some(*live) == self.fail_on {
                return Err::<(), _>(ServiceError::ServiceException("boom".into()))
                    .remote("f", "DeleteEventSourceMapping");
            }
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn removes_only_undeclared_items() {
        let kind = Fake {
            live: vec!["a", "b", "c"],
            fail_on: None,
            deleted: AtomicUsize::new(0),
        };
        let declared: BTreeSet<String> = ["b".to_string()].into_iter().collect();
        let report = sweep("f", &kind, &declared).await;
        assert_eq!(report.removed.len(), 2);
        assert_eq!(kind.deleted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_rest() {
        let kind = Fake {
            live: vec!["a", "b", "c"],
            fail_on: Some("a"),
            deleted: AtomicUsize::new(0),
        };
        let report = sweep("f", &kind, &BTreeSet::new()).await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.removed.len(), 2);
        assert!(
            report.failed[0].contains("DeleteEventSourceMapping failed for f: ServiceException: boom"),
            "{}",
            report.failed[0]
        );
    }

    #[tokio::test]
    async fn multi_action_statement_is_listed_once() {
        let policy = r#"{
            "Version": "2012-10-17",
            "Statement": [{
                "Sid": "sns-alerts",
                "Effect": "Allow",
                "Principal": {"Service": "sns.amazonaws.com"},
                "Action": ["lambda:InvokeFunction", "lambda:GetFunction"],
                "Resource": "arn:aws:lambda:us-east-1:000000000000:function:orders",
                "Condition": {"ArnLike": {"AWS:SourceArn": "arn:aws:sns:us-east-1:000000000000:alerts"}}
            }]
        }"#;
        let permissions = PermissionSet::parse(policy).unwrap();
        assert_eq!(permissions.len(), 2);

        let cloud = LocalCloud::new("000000000000", "us-east-1");
        let clients = cloud.clients();
        let kind = Permissions {
            clients: &clients,
            function: "orders",
            permissions: &permissions,
        };
        let live = kind.list_live().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].statement_id, "sns-alerts");
    }
}
