use std::collections::BTreeSet;

use tracing::debug;

use super::policy::PermissionSet;
use crate::arn;
use crate::error::{DeployResult, RemoteContext};
use crate::provider::types::{
    AliasConfiguration, EventSourceMappingConfiguration, FunctionConfiguration,
    ListEventSourceMappingsRequest,
};
use crate::provider::{Clients, NotFoundExt};

/// Everything the provider currently holds for one function.
#[derive(Debug, Clone)]
pub struct RemoteFunctionState {
    pub configuration: FunctionConfiguration,
    pub aliases: Vec<AliasConfiguration>,
    pub permissions: PermissionSet,
    pub mappings: Vec<EventSourceMappingConfiguration>,
    /// Names of scheduled rules that target the function.
    pub rule_bindings: BTreeSet<String>,
}

impl RemoteFunctionState {
    pub fn function_arn(&self) -> &str {
        arn::unqualified(&self.configuration.function_arn)
    }

    pub fn has_alias(&self, name: &str) -> bool {
        self.aliases.iter().any(|a| a.name == name)
    }
}

/// Fetches the live state of `function`, or `None` when it does not exist.
pub async fn fetch(clients: &Clients, function: &str) -> DeployResult<Option<RemoteFunctionState>> {
    let Some(response) = clients
        .lambda
        .get_function(function)
        .await
        .found()
        .remote(function, "GetFunction")?
    else {
        debug!(function, "function does not exist");
        return Ok(None);
    };
    let configuration = response.configuration;
    let function_arn = arn::unqualified(&configuration.function_arn).to_string();

    let aliases = clients
        .lambda
        .list_aliases(function)
        .await
        .remote(function, "ListAliases")?;
    let permissions = PermissionSet::fetch(clients, function).await?;
    let mappings = clients
        .mappings
        .list_event_source_mappings(ListEventSourceMappingsRequest {
            function_name: Some(function_arn.clone()),
            event_source_arn: None,
        })
        .await
        .remote(function, "ListEventSourceMappings")?;
    let rule_bindings = clients
        .events
        .list_rule_names_by_target(&function_arn)
        .await
        .remote(function, "ListRuleNamesByTarget")?
        .into_iter()
        .collect();

    Ok(Some(RemoteFunctionState {
        configuration,
        aliases,
        permissions,
        mappings,
        rule_bindings,
    }))
}
