mod common;

use serde_json::json;

use common::{deployment, descriptor, function, Harness, BUCKET};
use lambda_deploy::provider::types::ListEventSourceMappingsRequest;
use lambda_deploy::provider::{FunctionService, MappingService, ObjectStorage, TopicService};
use lambda_deploy::artifact::ArtifactLocation;
use lambda_deploy::reconcile::{Deployer, FunctionStatus, Settings};

fn all_triggers() -> serde_json::Value {
    json!([
        {
            "integration": "CloudWatch Events - Schedule",
            "ruleName": "orders-nightly",
            "scheduleExpression": "rate(1 day)"
        },
        {"integration": "DynamoDB", "dynamoDBTable": "orders", "startingPosition": "TRIM_HORIZON"},
        {"integration": "SQS", "standardQueue": "jobs", "batchSize": 5},
        {"integration": "SNS", "snsTopic": "order-events"},
        {"integration": "Alexa Skills Kit"}
    ])
}

#[tokio::test]
async fn delete_tears_down_triggers_function_and_artifact() {
    let h = Harness::new().await;
    h.cloud.create_table("orders").await;
    h.cloud.create_queue("jobs").await;
    let mut f = function("orders", all_triggers());
    f["keepAlive"] = json!(10);
    let deployment = deployment(descriptor(json!([f])));
    let deployer = h.deployer(&deployment);
    let report = deployer.deploy(&deployment.functions).await;
    assert!(!report.has_failures(), "{}", report);
    h.cloud.journal().clear().await;

    let report = deployer.delete(&deployment.functions).await;
    assert!(!report.has_failures(), "{}", report);
    let orders = report.function("orders").unwrap();
    assert_eq!(orders.status, FunctionStatus::Deleted);
    assert!(orders.warnings.is_empty(), "{:?}", orders.warnings);

    let clients = h.cloud.clients();
    assert!(h.cloud.events.data().await.rules.is_empty());
    let mappings = clients
        .mappings
        .list_event_source_mappings(ListEventSourceMappingsRequest::default())
        .await
        .unwrap();
    assert!(mappings.is_empty());
    assert!(clients.sns.list_subscriptions().await.unwrap().is_empty());
    assert!(clients
        .lambda
        .get_function("orders")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(clients
        .s3
        .head_object(BUCKET, "app.zip")
        .await
        .unwrap_err()
        .is_not_found());

    let ops = h.operations().await;
    let function_deleted = ops.iter().position(|o| o == "lambda:DeleteFunction").unwrap();
    assert!(ops[..function_deleted].contains(&"lambda:RemovePermission".to_string()));
    assert_eq!(ops.last().map(String::as_str), Some("s3:DeleteObject"));
}

#[tokio::test]
async fn deleting_an_absent_function_is_skipped() {
    let h = Harness::new().await;
    let deployment = deployment(descriptor(json!([function("ghost", json!([]))])));
    let report = h.deployer(&deployment).delete(&deployment.functions).await;
    assert_eq!(report.function("ghost").unwrap().status, FunctionStatus::Absent);
    assert!(!report.has_failures());
    assert_eq!(h.operations().await, vec!["s3:DeleteObject"]);
}

#[tokio::test]
async fn artifact_delete_failure_fails_the_run() {
    let h = Harness::new().await;
    let deployment = deployment(descriptor(json!([function("orders", json!([]))])));
    h.deployer(&deployment).deploy(&deployment.functions).await;
    h.cloud.journal().clear().await;

    let deployer = Deployer::new(
        h.cloud.clients(),
        Settings {
            artifact: ArtifactLocation {
                bucket: "missing-bucket".into(),
                key: deployment.artifact_key(),
            },
            force_update: false,
            kms_key: None,
        },
    );
    let report = deployer.delete(&deployment.functions).await;
    assert_eq!(report.function("orders").unwrap().status, FunctionStatus::Deleted);
    assert!(report.has_failures());
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("DeleteObject failed for missing-bucket/app.zip"));
    assert!(report.to_string().contains("FAILED: DeleteObject failed"));
    assert_eq!(h.count("s3:DeleteObject").await, 0);
}

#[tokio::test]
async fn update_code_touches_only_code_and_aliases() {
    let h = Harness::new().await;
    let deployment = deployment(descriptor(json!([function(
        "orders",
        json!([{"integration": "SNS", "snsTopic": "order-events"}])
    )])));
    let deployer = h.deployer(&deployment);
    deployer.deploy(&deployment.functions).await;

    h.build_artifact(b"build 2").await;
    let report = deployer.update_code(&deployment.functions).await;
    assert_eq!(
        report.function("orders").unwrap().status,
        FunctionStatus::CodeUpdated {
            version: "2".into()
        }
    );
    assert_eq!(
        h.operations().await,
        vec!["lambda:UpdateFunctionCode", "lambda:UpdateAlias"]
    );

    let aliases = h.cloud.clients().lambda.list_aliases("orders").await.unwrap();
    assert_eq!(aliases[0].function_version, "2");
}

#[tokio::test]
async fn update_code_skips_missing_functions() {
    let h = Harness::new().await;
    let deployment = deployment(descriptor(json!([function("ghost", json!([]))])));
    let report = h.deployer(&deployment).update_code(&deployment.functions).await;
    assert_eq!(report.function("ghost").unwrap().status, FunctionStatus::Absent);
    assert!(h.operations().await.is_empty());
}
