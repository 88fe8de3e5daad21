use std::collections::BTreeMap;

use tracing::debug;

use crate::config::{ConfigError, FunctionSpec};
use crate::error::{DeployResult, RemoteContext};
use crate::provider::types::FunctionConfiguration;
use crate::provider::Clients;

/// Variables to send for `spec`, layered lowest to highest:
/// live variables, declared variables, encrypted pass-through variables.
pub async fn layered(
    clients: &Clients,
    spec: &FunctionSpec,
    live: Option<&FunctionConfiguration>,
    kms_key: Option<&str>,
) -> DeployResult<BTreeMap<String, String>> {
    let mut variables = live
        .and_then(|c| c.environment.as_ref())
        .map(|e| e.variables.clone())
        .unwrap_or_default();
    variables.extend(spec.environment.clone());

    if spec.encrypted_environment.is_empty() {
        return Ok(variables);
    }
    let key = kms_key.ok_or(ConfigError::MissingEncryptionKey)?;
    for (name, value) in &spec.encrypted_environment {
        let ciphertext = clients
            .kms
            .encrypt(key, value)
            .await
            .remote(&spec.name, "Encrypt")?;
        debug!(function = %spec.name, variable = %name, "encrypted variable");
        variables.insert(name.clone(), ciphertext);
    }
    Ok(variables)
}
