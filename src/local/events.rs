use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::Journal;
use crate::provider::types::*;
use crate::provider::{SchedulerService, ServiceError, ServiceResult};

const SERVICE: &str = "events";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleData {
    pub arn: String,
    #[serde(default)]
    pub schedule_expression: Option<String>,
    pub state: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub targets: BTreeMap<String, EventTarget>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsData {
    #[serde(default)]
    pub rules: BTreeMap<String, RuleData>,
}

/// Scheduled rules on the default event bus.
#[derive(Clone)]
pub struct EventsState {
    inner: Arc<Mutex<EventsData>>,
    account_id: String,
    region: String,
    journal: Journal,
}

fn rule_not_found(name: &str) -> ServiceError {
    ServiceError::ResourceNotFoundException(format!(
        "Rule {} does not exist on EventBus default.",
        name
    ))
}

impl EventsState {
    pub fn new(data: EventsData, account_id: &str, region: &str, journal: Journal) -> Self {
        EventsState {
            inner: Arc::new(Mutex::new(data)),
            account_id: account_id.to_string(),
            region: region.to_string(),
            journal,
        }
    }

    pub async fn data(&self) -> EventsData {
        self.inner.lock().await.clone()
    }
}

#[async_trait]
impl SchedulerService for EventsState {
    async fn put_rule(&self, req: PutRuleRequest) -> ServiceResult<PutRuleResponse> {
        if req.name.is_empty() || req.name.len() > 64 {
            return Err(ServiceError::InvalidParameterValueException(
                "Rule name must be between 1 and 64 characters".to_string(),
            ));
        }
        let arn = format!(
            "arn:aws:events:{}:{}:rule/{}",
            self.region, self.account_id, req.name
        );
        let mut inner = self.inner.lock().await;
        let rule = inner.rules.entry(req.name.clone()).or_insert_with(|| RuleData {
            arn: arn.clone(),
            schedule_expression: None,
            state: "ENABLED".to_string(),
            description: None,
            targets: BTreeMap::new(),
        });
        rule.schedule_expression = req.schedule_expression;
        rule.description = req.description;
        if let Some(state) = req.state {
            rule.state = state;
        }
        drop(inner);

        self.journal.record(SERVICE, "PutRule", req.name).await;
        Ok(PutRuleResponse { rule_arn: arn })
    }

    async fn describe_rule(&self, name: &str) -> ServiceResult<DescribeRuleResponse> {
        let inner = self.inner.lock().await;
        let rule = inner.rules.get(name).ok_or_else(|| rule_not_found(name))?;
        Ok(DescribeRuleResponse {
            name: name.to_string(),
            arn: rule.arn.clone(),
            schedule_expression: rule.schedule_expression.clone(),
            state: rule.state.clone(),
            description: rule.description.clone(),
        })
    }

    async fn delete_rule(&self, name: &str) -> ServiceResult<()> {
        let mut inner = self.inner.lock().await;
        let rule = inner.rules.get(name).ok_or_else(|| rule_not_found(name))?;
        if !rule.targets.is_empty() {
            return Err(ServiceError::InvalidParameterValueException(
                "Rule can't be deleted since it has targets.".to_string(),
            ));
        }
        inner.rules.remove(name);
        drop(inner);

        self.journal.record(SERVICE, "DeleteRule", name).await;
        Ok(())
    }

    async fn put_targets(&self, req: PutTargetsRequest) -> ServiceResult<()> {
        let mut inner = self.inner.lock().await;
        let rule = inner
            .rules
            .get_mut(&req.rule)
            .ok_or_else(|| rule_not_found(&req.rule))?;
        for target in req.targets {
            rule.targets.insert(target.id.clone(), target);
        }
        drop(inner);

        self.journal.record(SERVICE, "PutTargets", req.rule).await;
        Ok(())
    }

    async fn remove_targets(&self, req: RemoveTargetsRequest) -> ServiceResult<()> {
        let mut inner = self.inner.lock().await;
        let rule = inner
            .rules
            .get_mut(&req.rule)
            .ok_or_else(|| rule_not_found(&req.rule))?;
        for id in &req.ids {
            rule.targets.remove(id);
        }
        drop(inner);

        self.journal.record(SERVICE, "RemoveTargets", req.rule).await;
        Ok(())
    }

    async fn list_rule_names_by_target(&self, target_arn: &str) -> ServiceResult<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rules
            .iter()
            .filter(|(_, rule)| rule.targets.values().any(|t| t.arn == target_arn))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn list_targets_by_rule(&self, rule: &str) -> ServiceResult<Vec<EventTarget>> {
        let inner = self.inner.lock().await;
        let rule = inner.rules.get(rule).ok_or_else(|| rule_not_found(rule))?;
        Ok(rule.targets.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> EventsState {
        EventsState::new(EventsData::default(), "000000000000", "us-east-1", Journal::default())
    }

    #[tokio::test]
    async fn rules_with_targets_cannot_be_deleted() {
        let events = state();
        events
            .put_rule(PutRuleRequest {
                name: "nightly".into(),
                schedule_expression: Some("rate(1 day)".into()),
                description: None,
                state: None,
            })
            .await
            .unwrap();
        events
            .put_targets(PutTargetsRequest {
                rule: "nightly".into(),
                targets: vec![EventTarget {
                    id: "f".into(),
                    arn: "arn:aws:lambda:us-east-1:000000000000:function:f".into(),
                }],
            })
            .await
            .unwrap();
        assert!(events.delete_rule("nightly").await.is_err());

        let names = events
            .list_rule_names_by_target("arn:aws:lambda:us-east-1:000000000000:function:f")
            .await
            .unwrap();
        assert_eq!(names, vec!["nightly".to_string()]);

        events
            .remove_targets(RemoveTargetsRequest {
                rule: "nightly".into(),
                ids: vec!["f".into()],
            })
            .await
            .unwrap();
        events.delete_rule("nightly").await.unwrap();
        assert!(events.describe_rule("nightly").await.unwrap_err().is_not_found());
    }
}
