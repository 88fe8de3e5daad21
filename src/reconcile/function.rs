use tracing::{debug, info};

use super::drift::{self, Drift};
use super::environment;
use super::remote::RemoteFunctionState;
use super::Settings;
use crate::arn;
use crate::config::{AliasSpec, AliasTarget, FunctionSpec};
use crate::error::{DeployResult, RemoteContext};
use crate::provider::types::*;
use crate::provider::Clients;

pub const LATEST_VERSION: &str = "$LATEST";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionAction {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct FunctionOutcome {
    pub action: FunctionAction,
    /// Unqualified function ARN.
    pub function_arn: String,
    /// Version produced by this run, `$LATEST` when nothing was published.
    pub version: String,
    pub drift: Drift,
}

/// Creates the function when absent, updates it when drifted, and otherwise
/// leaves it alone.
pub async fn reconcile_function(
    clients: &Clients,
    settings: &Settings,
    spec: &FunctionSpec,
    remote: Option<&RemoteFunctionState>,
) -> DeployResult<FunctionOutcome> {
    match remote {
        None => create(clients, settings, spec).await,
        Some(remote) => {
            let drift = drift::detect(clients, spec, remote, settings.force_update).await;
            if drift.is_changed() {
                update(clients, settings, spec, remote, drift).await
            } else {
                info!(function = %spec.name, "function is up to date");
                Ok(FunctionOutcome {
                    action: FunctionAction::Unchanged,
                    function_arn: remote.function_arn().to_string(),
                    version: remote.configuration.version.clone(),
                    drift,
                })
            }
        }
    }
}

async fn create(
    clients: &Clients,
    settings: &Settings,
    spec: &FunctionSpec,
) -> DeployResult<FunctionOutcome> {
    let variables =
        environment::layered(clients, spec, None, settings.kms_key.as_deref()).await?;
    let created = clients
        .lambda
        .create_function(CreateFunctionRequest {
            function_name: spec.name.clone(),
            runtime: spec.runtime.clone(),
            role: spec.role.clone(),
            handler: spec.handler.clone(),
            code: FunctionCode {
                s3_bucket: settings.artifact.bucket.clone(),
                s3_key: settings.artifact.key.clone(),
            },
            description: spec.description.clone(),
            timeout: spec.timeout,
            memory_size: spec.memory_size,
            vpc_config: spec.vpc_config(),
            environment: Some(Environment { variables }),
            publish: spec.publish,
        })
        .await
        .remote(&spec.name, "CreateFunction")?;
    info!(function = %spec.name, version = %created.version, "created function");

    for alias in &spec.aliases {
        ensure_alias(clients, spec, alias, &created.version, false).await?;
    }

    Ok(FunctionOutcome {
        action: FunctionAction::Created,
        function_arn: arn::unqualified(&created.function_arn).to_string(),
        version: created.version,
        drift: Drift::everything(spec),
    })
}

async fn update(
    clients: &Clients,
    settings: &Settings,
    spec: &FunctionSpec,
    remote: &RemoteFunctionState,
    drift: Drift,
) -> DeployResult<FunctionOutcome> {
    let code = clients
        .lambda
        .update_function_code(
            &spec.name,
            UpdateFunctionCodeRequest {
                s3_bucket: settings.artifact.bucket.clone(),
                s3_key: settings.artifact.key.clone(),
                publish: spec.publish,
            },
        )
        .await
        .remote(&spec.name, "UpdateFunctionCode")?;
    debug!(function = %spec.name, version = %code.version, "updated function code");

    let variables = environment::layered(
        clients,
        spec,
        Some(&remote.configuration),
        settings.kms_key.as_deref(),
    )
    .await?;
    clients
        .lambda
        .update_function_configuration(
            &spec.name,
            UpdateFunctionConfigurationRequest {
                runtime: Some(spec.runtime.clone()),
                role: Some(spec.role.clone()),
                handler: Some(spec.handler.clone()),
                description: Some(spec.description.clone()),
                timeout: Some(spec.timeout),
                memory_size: Some(spec.memory_size),
                vpc_config: Some(spec.vpc_config()),
                environment: Some(Environment { variables }),
            },
        )
        .await
        .remote(&spec.name, "UpdateFunctionConfiguration")?;
    info!(function = %spec.name, version = %code.version, "updated function");

    ensure_aliases(clients, spec, remote, &code.version).await?;

    Ok(FunctionOutcome {
        action: FunctionAction::Updated,
        function_arn: remote.function_arn().to_string(),
        version: code.version,
        drift,
    })
}

/// Code-only path: uploads new code and repoints aliases, leaving the
/// configuration and triggers untouched. Returns the resulting version.
pub async fn push_code(
    clients: &Clients,
    settings: &Settings,
    spec: &FunctionSpec,
    remote: &RemoteFunctionState,
) -> DeployResult<String> {
    let code = clients
        .lambda
        .update_function_code(
            &spec.name,
            UpdateFunctionCodeRequest {
                s3_bucket: settings.artifact.bucket.clone(),
                s3_key: settings.artifact.key.clone(),
                publish: spec.publish,
            },
        )
        .await
        .remote(&spec.name, "UpdateFunctionCode")?;
    info!(function = %spec.name, version = %code.version, "updated function code");
    ensure_aliases(clients, spec, remote, &code.version).await?;
    Ok(code.version)
}

async fn ensure_aliases(
    clients: &Clients,
    spec: &FunctionSpec,
    remote: &RemoteFunctionState,
    version: &str,
) -> DeployResult<()> {
    for alias in &spec.aliases {
        ensure_alias(clients, spec, alias, version, remote.has_alias(&alias.name)).await?;
    }
    Ok(())
}

/// Points `alias` at its target. Known aliases are updated in place, falling
/// back to creation when the update reports the alias missing.
async fn ensure_alias(
    clients: &Clients,
    spec: &FunctionSpec,
    alias: &AliasSpec,
    published_version: &str,
    known: bool,
) -> DeployResult<()> {
    let version = match alias.target {
        AliasTarget::PublishedVersion => published_version,
        AliasTarget::Latest => LATEST_VERSION,
    };

    if known {
        let updated = clients
            .lambda
            .update_alias(
                &spec.name,
                &alias.name,
                UpdateAliasRequest {
                    function_version: version.to_string(),
                    description: None,
                },
            )
            .await;
        match updated {
            Ok(_) => {
                info!(function = %spec.name, alias = %alias.name, version, "updated alias");
                return Ok(());
            }
            Err(e) if e.is_not_found() => {
                debug!(function = %spec.name, alias = %alias.name, "alias vanished, creating");
            }
            Err(e) => return Err::<(), _>(e).remote(&spec.name, "UpdateAlias"),
        }
    }

    clients
        .lambda
        .create_alias(
            &spec.name,
            CreateAliasRequest {
                name: alias.name.clone(),
                function_version: version.to_string(),
                description: None,
            },
        )
        .await
        .remote(&spec.name, "CreateAlias")?;
    info!(function = %spec.name, alias = %alias.name, version, "created alias");
    Ok(())
}
