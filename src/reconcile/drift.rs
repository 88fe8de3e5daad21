//! Desired-versus-live comparison for a single function.
//!
//! The scheduled-rule check happens here and nowhere else: the trigger
//! reconciler reads [`Drift::rule`] instead of describing rules again.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::remote::RemoteFunctionState;
use crate::config::function::ScheduleRule;
use crate::config::FunctionSpec;
use crate::provider::types::{DescribeRuleResponse, FunctionConfiguration};
use crate::provider::Clients;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleStatus {
    /// Rule exists with the declared schedule and targets the function.
    Current { arn: String },
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drift {
    pub config_changed: bool,
    pub rules: BTreeMap<String, RuleStatus>,
}

impl Drift {
    /// Drift for a function that must be fully (re)applied.
    pub fn everything(spec: &FunctionSpec) -> Drift {
        Drift {
            config_changed: true,
            rules: spec
                .scheduled_rules()
                .into_iter()
                .map(|r| (r.name, RuleStatus::Stale))
                .collect(),
        }
    }

    pub fn is_changed(&self) -> bool {
        self.config_changed || self.rules.values().any(|s| *s == RuleStatus::Stale)
    }

    pub fn rule(&self, name: &str) -> &RuleStatus {
        static STALE: RuleStatus = RuleStatus::Stale;
        self.rules.get(name).unwrap_or(&STALE)
    }
}

/// Order-insensitive list comparison.
pub fn same_members(declared: &[String], live: &[String]) -> bool {
    let declared: BTreeSet<&String> = declared.iter().collect();
    let live: BTreeSet<&String> = live.iter().collect();
    declared == live
}

/// Compares the scalar and network settings of the function.
pub fn config_differs(spec: &FunctionSpec, live: &FunctionConfiguration) -> bool {
    spec.description != live.description
        || spec.handler != live.handler
        || spec.role != live.role
        || spec.timeout != live.timeout
        || spec.memory_size != live.memory_size
        || !same_members(&spec.security_group_ids, &live.vpc_config.security_group_ids)
        || !same_members(&spec.subnet_ids, &live.vpc_config.subnet_ids)
}

fn rule_matches(rule: &ScheduleRule, live: &DescribeRuleResponse) -> bool {
    live.schedule_expression.as_deref() == Some(rule.schedule_expression.as_str())
        && live.description.as_deref().unwrap_or_default() == rule.description
}

pub async fn detect(
    clients: &Clients,
    spec: &FunctionSpec,
    remote: &RemoteFunctionState,
    force: bool,
) -> Drift {
    if force {
        debug!(function = %spec.name, "forced update");
        return Drift::everything(spec);
    }

    let mut config_changed = config_differs(spec, &remote.configuration);
    if let Some(missing) = spec.aliases.iter().find(|a| !remote.has_alias(&a.name)) {
        debug!(function = %spec.name, alias = %missing.name, "alias missing remotely");
        config_changed = true;
    }

    let mut rules = BTreeMap::new();
    for rule in spec.scheduled_rules() {
        let status = if !remote.rule_bindings.contains(&rule.name) {
            RuleStatus::Stale
        } else {
            match clients.events.describe_rule(&rule.name).await {
                Ok(live) if rule_matches(&rule, &live) => RuleStatus::Current { arn: live.arn },
                Ok(_) => RuleStatus::Stale,
                Err(e) if e.is_not_found() => RuleStatus::Stale,
                Err(e) => {
                    warn!(function = %spec.name, rule = %rule.name, error = %e, "describe rule failed, treating as stale");
                    RuleStatus::Stale
                }
            }
        };
        debug!(function = %spec.name, rule = %rule.name, ?status, "rule checked");
        rules.insert(rule.name, status);
    }

    debug!(function = %spec.name, config_changed, "drift detected");
    Drift {
        config_changed,
        rules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::function::FunctionDefaults;
    use crate::config::FunctionDeclaration;
    use crate::provider::types::VpcConfig;
    use proptest::prelude::*;

    fn spec(security_groups: Vec<String>) -> FunctionSpec {
        let decl: FunctionDeclaration = serde_json::from_str(
            r#"{"functionName":"orders","handler":"com.example.Orders","description":"Orders"}"#,
        )
        .unwrap();
        FunctionSpec::from_declaration(
            &decl,
            &FunctionDefaults {
                runtime: "java8".into(),
                role: "role".into(),
                timeout: 30,
                memory_size: 1024,
                security_group_ids: security_groups,
                subnet_ids: vec!["subnet-1".into()],
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn live(spec: &FunctionSpec, security_groups: Vec<String>) -> FunctionConfiguration {
        FunctionConfiguration {
            function_name: spec.name.clone(),
            function_arn: format!("arn:aws:lambda:us-east-1:000000000000:function:{}", spec.name),
            runtime: spec.runtime.clone(),
            role: spec.role.clone(),
            handler: spec.handler.clone(),
            code_size: 3,
            description: spec.description.clone(),
            timeout: spec.timeout,
            memory_size: spec.memory_size,
            last_modified: String::new(),
            code_sha256: String::new(),
            version: "$LATEST".into(),
            state: "Active".into(),
            vpc_config: VpcConfig {
                security_group_ids: security_groups,
                subnet_ids: spec.subnet_ids.clone(),
            },
            environment: None,
        }
    }

    #[test]
    fn security_group_order_is_ignored() {
        let spec = spec(vec!["a".into(), "b".into()]);
        assert!(!config_differs(&spec, &live(&spec, vec!["b".into(), "a".into()])));
        assert!(config_differs(&spec, &live(&spec, vec!["a".into()])));
    }

    #[test]
    fn timeout_change_is_drift() {
        let spec = spec(vec![]);
        let mut remote = live(&spec, vec![]);
        remote.timeout = 60;
        assert!(config_differs(&spec, &remote));
    }

    #[test]
    fn unknown_rules_are_stale() {
        let drift = Drift {
            config_changed: false,
            rules: BTreeMap::new(),
        };
        assert_eq!(drift.rule("nightly"), &RuleStatus::Stale);
        assert!(!drift.is_changed());
    }

    proptest! {
        #[test]
        fn list_comparison_is_order_independent(
            groups in proptest::collection::btree_set("sg-[a-f0-9]{4}", 0..6),
            seed in any::<u64>(),
        ) {
            let declared: Vec<String> = groups.iter().cloned().collect();
            let mut shuffled = declared.clone();
            let len = shuffled.len();
            if len > 1 {
                shuffled.rotate_left((seed as usize) % len);
            }
            if seed % 2 == 0 {
                shuffled.reverse();
            }
            let spec = spec(declared);
            prop_assert!(!config_differs(&spec, &live(&spec, shuffled)));
        }
    }
}
