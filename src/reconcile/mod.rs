//! Convergence of declared functions against the live provider.
//!
//! [`Deployer`] walks the declared functions in order. Each function is its
//! own failure boundary: an error is logged, recorded in the [`RunReport`],
//! and the run moves on to the next function.

pub mod delete;
pub mod drift;
pub mod environment;
pub mod function;
pub mod orphans;
pub mod policy;
pub mod remote;
pub mod report;
pub mod triggers;

use std::collections::BTreeSet;

use tracing::{error, info, warn};

pub use report::{FunctionReport, FunctionStatus, RunReport};

use crate::artifact::ArtifactLocation;
use crate::config::{FunctionEntry, FunctionSpec};
use crate::error::{DeployResult, RemoteContext};
use crate::provider::Clients;
use function::FunctionAction;
use policy::PermissionSet;
use triggers::TriggerReconciler;

/// Run-wide settings shared by every function.
#[derive(Debug, Clone)]
pub struct Settings {
    pub artifact: ArtifactLocation,
    pub force_update: bool,
    pub kms_key: Option<String>,
}

pub struct Deployer {
    clients: Clients,
    settings: Settings,
}

impl Deployer {
    pub fn new(clients: Clients, settings: Settings) -> Self {
        Deployer { clients, settings }
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    /// Creates or updates every function, reconciles its triggers and sweeps
    /// its orphans.
    pub async fn deploy(&self, functions: &[FunctionEntry]) -> RunReport {
        let mut report = RunReport::new("deploy");
        for entry in functions {
            let result = match &entry.spec {
                Ok(spec) => self.deploy_one(spec).await,
                Err(e) => Err(e.clone().into()),
            };
            report.functions.push(match result {
                Ok(function) => function,
                Err(e) => {
                    error!(function = %entry.name, error = %e, "deploy failed");
                    FunctionReport::failed(&entry.name, e)
                }
            });
        }
        report
    }

    async fn deploy_one(&self, spec: &FunctionSpec) -> DeployResult<FunctionReport> {
        info!(function = %spec.name, triggers = spec.triggers.len(), "deploying function");
        let remote = remote::fetch(&self.clients, &spec.name).await?;
        let outcome =
            function::reconcile_function(&self.clients, &self.settings, spec, remote.as_ref())
                .await?;

        let (bound_rules, permissions) = match &remote {
            Some(r) => (r.rule_bindings.clone(), r.permissions.clone()),
            None => (BTreeSet::new(), PermissionSet::default()),
        };
        let run = TriggerReconciler::new(
            &self.clients,
            &spec.name,
            &outcome.function_arn,
            &outcome.drift,
            &bound_rules,
            permissions,
        )
        .run(spec)
        .await;

        let orphans = orphans::cleanup_orphans(
            &self.clients,
            &spec.name,
            &outcome.function_arn,
            &run.declared,
            &run.permissions,
        )
        .await;

        let status = match outcome.action {
            FunctionAction::Created => FunctionStatus::Created {
                version: outcome.version,
            },
            FunctionAction::Updated => FunctionStatus::Updated {
                version: outcome.version,
            },
            FunctionAction::Unchanged => FunctionStatus::Unchanged,
        };
        let mut function = FunctionReport::new(&spec.name, status);
        function.triggers = run.outcomes;
        function.trigger_failures = run.failures;
        function.orphans = orphans;
        Ok(function)
    }

    /// Tears down every function and its triggers, then the staged artifact.
    pub async fn delete(&self, functions: &[FunctionEntry]) -> RunReport {
        let mut report = RunReport::new("delete");
        for entry in functions {
            let result = match &entry.spec {
                Ok(spec) => delete::delete_function(&self.clients, spec).await,
                Err(e) => Err(e.clone().into()),
            };
            report.functions.push(match result {
                Ok(outcome) => {
                    let status = match outcome.action {
                        delete::DeleteAction::Deleted => FunctionStatus::Deleted,
                        delete::DeleteAction::Absent => FunctionStatus::Absent,
                    };
                    let mut function = FunctionReport::new(&entry.name, status);
                    function.warnings = outcome.failures;
                    function
                }
                Err(e) => {
                    error!(function = %entry.name, error = %e, "delete failed");
                    FunctionReport::failed(&entry.name, e)
                }
            });
        }

        let artifact = &self.settings.artifact;
        let target = format!("{}/{}", artifact.bucket, artifact.key);
        match self
            .clients
            .s3
            .delete_object(&artifact.bucket, &artifact.key)
            .await
            .remote(&target, "DeleteObject")
        {
            Ok(()) => info!(artifact = %target, "deleted staged artifact"),
            Err(e) => {
                error!(artifact = %target, error = %e, "failed to delete staged artifact");
                report.errors.push(e.to_string());
            }
        }
        report
    }

    /// Pushes new code to functions that already exist. Configuration and
    /// triggers are left alone; missing functions are skipped.
    pub async fn update_code(&self, functions: &[FunctionEntry]) -> RunReport {
        let mut report = RunReport::new("update-code");
        for entry in functions {
            let result = match &entry.spec {
                Ok(spec) => self.update_code_one(spec).await,
                Err(e) => Err(e.clone().into()),
            };
            report.functions.push(match result {
                Ok(status) => FunctionReport::new(&entry.name, status),
                Err(e) => {
                    error!(function = %entry.name, error = %e, "code update failed");
                    FunctionReport::failed(&entry.name, e)
                }
            });
        }
        report
    }

    async fn update_code_one(&self, spec: &FunctionSpec) -> DeployResult<FunctionStatus> {
        let Some(remote) = remote::fetch(&self.clients, &spec.name).await? else {
            warn!(function = %spec.name, "function does not exist, skipping code update");
            return Ok(FunctionStatus::Absent);
        };
        let version = function::push_code(&self.clients, &self.settings, spec, &remote).await?;
        Ok(FunctionStatus::CodeUpdated { version })
    }
}
