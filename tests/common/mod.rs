#![allow(dead_code)]

use serde_json::{json, Value};
use tempfile::TempDir;

use lambda_deploy::artifact::ArtifactPublisher;
use lambda_deploy::config::{DeployConfig, Deployment, Overrides};
use lambda_deploy::local::LocalCloud;
use lambda_deploy::reconcile::{Deployer, Settings};

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "us-east-1";
pub const ROLE: &str = "arn:aws:iam::123456789012:role/lambda-exec";
pub const BUCKET: &str = "lambda-function-code";

pub struct Harness {
    pub cloud: LocalCloud,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new() -> Harness {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();

        let harness = Harness {
            cloud: LocalCloud::new(ACCOUNT, REGION),
            dir: tempfile::tempdir().unwrap(),
        };
        harness.build_artifact(b"build 1").await;
        harness
    }

    pub fn function_arn(name: &str) -> String {
        format!("arn:aws:lambda:{}:{}:function:{}", REGION, ACCOUNT, name)
    }

    /// Writes and stages a new artifact, then forgets the staging calls.
    pub async fn build_artifact(&self, contents: &[u8]) {
        let path = self.dir.path().join("app.zip");
        std::fs::write(&path, contents).unwrap();
        let clients = self.cloud.clients();
        ArtifactPublisher::new(clients.s3.as_ref(), BUCKET)
            .ensure_uploaded(&path, "app.zip")
            .await
            .unwrap();
        self.cloud.journal().clear().await;
    }

    pub fn deployer(&self, deployment: &Deployment) -> Deployer {
        Deployer::new(
            self.cloud.clients(),
            Settings {
                artifact: lambda_deploy::artifact::ArtifactLocation {
                    bucket: BUCKET.to_string(),
                    key: deployment.artifact_key(),
                },
                force_update: deployment.force_update,
                kms_key: deployment.kms_key.clone(),
            },
        )
    }

    pub async fn operations(&self) -> Vec<String> {
        self.cloud.journal().operations().await
    }

    pub async fn count(&self, name: &str) -> usize {
        self.cloud.journal().count(name).await
    }
}

/// Descriptor with the required plugin settings and the given functions.
pub fn descriptor(functions: Value) -> Value {
    json!({
        "functionCode": "app.zip",
        "lambdaRoleArn": ROLE,
        "version": "1.0.0",
        "lambdaFunctions": functions,
    })
}

pub fn deployment(descriptor: Value) -> Deployment {
    deployment_with(descriptor, &Overrides::default())
}

pub fn deployment_with(descriptor: Value, overrides: &Overrides) -> Deployment {
    let config: DeployConfig = serde_json::from_value(descriptor).unwrap();
    config.resolve(overrides).unwrap()
}

pub fn function(name: &str, triggers: Value) -> Value {
    json!({
        "functionName": name,
        "handler": "com.example.Handler::handle",
        "triggers": triggers,
    })
}
