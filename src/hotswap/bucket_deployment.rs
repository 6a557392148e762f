//! Hotswapping of bucket content deployments.
//!
//! A bucket deployment is a custom resource backed by a function that
//! copies assets into a bucket. Hotswapping it means invoking that function
//! directly with the event the deployment engine would have sent.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{HotswapError, Result};
use crate::services::HotswapServices;
use crate::template::{ResourceChange, TemplateEvaluator, stringify_scalar};

use super::common::{HotswapAction, HotswapOutcome, HotswappableChange, ResourceClassifier};
use super::lambda::LAMBDA_FUNCTION;

/// Resource type of a bucket deployment.
pub const BUCKET_DEPLOYMENT: &str = "Custom::CDKBucketDeployment";
/// Resource type of an access policy.
pub const IAM_POLICY: &str = "AWS::IAM::Policy";

/// Placeholder for event fields the handler requires but ignores.
pub const REQUIRED_BY_CFN: &str = "required-to-be-present-by-cfn";

const SERVICE: &str = "custom-s3-deployment";
const SERVICE_TOKEN: &str = "ServiceToken";

/// Classifies bucket deployment changes. Every property is hotswappable.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketDeploymentClassifier;

#[async_trait]
impl ResourceClassifier for BucketDeploymentClassifier {
    fn name(&self) -> &'static str {
        "bucket-deployment"
    }

    async fn classify(
        &self,
        _logical_id: &str,
        change: &ResourceChange,
        evaluator: &Arc<TemplateEvaluator>,
    ) -> Result<Vec<HotswapOutcome>> {
        if change.new_type() != Some(BUCKET_DEPLOYMENT) {
            return Ok(Vec::new());
        }

        let mut properties = change.new_properties().clone();
        let service_token = properties.remove(SERVICE_TOKEN);
        let resource_properties = evaluator.evaluate(&Value::Object(properties)).await?;
        let bucket = resource_properties
            .get("DestinationBucketName")
            .map(|name| stringify_scalar("DestinationBucketName", name))
            .transpose()?
            .unwrap_or_default();

        info!("Contents of bucket {} are hotswappable", bucket);
        Ok(vec![HotswapOutcome::Hotswappable(HotswappableChange {
            resource_type: BUCKET_DEPLOYMENT.to_string(),
            props_changed: vec![String::from("*")],
            service: SERVICE,
            resource_names: vec![format!("Contents of S3 Bucket '{bucket}'")],
            action: Box::new(BucketDeploymentAction {
                service_token: service_token.unwrap_or(Value::Null),
                resource_properties,
                evaluator: Arc::clone(evaluator),
            }),
        })])
    }
}

#[derive(Debug)]
struct BucketDeploymentAction {
    service_token: Value,
    resource_properties: Value,
    evaluator: Arc<TemplateEvaluator>,
}

#[async_trait]
impl HotswapAction for BucketDeploymentAction {
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()> {
        let function_name = self
            .evaluator
            .evaluate_to_string(&self.service_token, SERVICE_TOKEN)
            .await?;
        if function_name.is_empty() {
            warn!("Bucket deployment has no service token, skipping");
            return Ok(());
        }

        let payload = json!({
            "RequestType": "Update",
            "ResponseURL": REQUIRED_BY_CFN,
            "PhysicalResourceId": REQUIRED_BY_CFN,
            "StackId": REQUIRED_BY_CFN,
            "RequestId": REQUIRED_BY_CFN,
            "LogicalResourceId": REQUIRED_BY_CFN,
            "ResourceProperties": stringify_values(&self.resource_properties),
        });
        let payload = serde_json::to_vec(&payload)
            .map_err(|e| HotswapError::internal(format!("failed to encode payload: {e}")))?;

        info!("Invoking bucket deployment handler {}", function_name);
        services.invoke_function(&function_name, &payload).await
    }
}

/// The handler expects every scalar as a string.
fn stringify_values(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(_) => value.clone(),
        Value::Bool(b) => Value::String(b.to_string()),
        Value::Number(n) => Value::String(n.to_string()),
        Value::Array(items) => Value::Array(items.iter().map(stringify_values).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), stringify_values(v)))
                .collect(),
        ),
    }
}

/// Returns true if a policy change can be skipped because every role it
/// attaches to is used only by functions backing bucket deployments.
///
/// # Errors
///
/// Returns an error if a role expression cannot be evaluated or the
/// inventory cannot be fetched.
pub async fn skip_change_for_bucket_deployment_policy(
    policy_logical_id: &str,
    change: &ResourceChange,
    evaluator: &TemplateEvaluator,
) -> Result<bool> {
    if change.new_type() != Some(IAM_POLICY) {
        return Ok(false);
    }

    let Some(roles) = change
        .new_properties()
        .get("Roles")
        .and_then(Value::as_array)
        .filter(|roles| !roles.is_empty())
    else {
        return Ok(false);
    };

    for role in roles {
        let role_name = evaluator.evaluate_to_string(role, "Roles").await?;
        let Some(role_logical_id) = evaluator.find_logical_id_for_physical_name(&role_name).await?
        else {
            debug!("Role {} is not part of the stack", role_name);
            return Ok(false);
        };

        let role_references: Vec<_> = evaluator
            .find_references_to(&role_logical_id)
            .into_iter()
            .filter(|r| !(r.definition.resource_type == IAM_POLICY && r.logical_id == policy_logical_id))
            .collect();

        let only_for_deployments = !role_references.is_empty()
            && role_references.iter().all(|reference| {
                if reference.definition.resource_type != LAMBDA_FUNCTION {
                    return false;
                }
                let function_references = evaluator.find_references_to(reference.logical_id);
                !function_references.is_empty()
                    && function_references
                        .iter()
                        .all(|r| r.definition.resource_type == BUCKET_DEPLOYMENT)
            });

        if !only_for_deployments {
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotswap::test_support::{change, evaluator, hotswappable};
    use crate::services::{MockHotswapServices, StackResource};

    fn deployment_template() -> Value {
        json!({
            "Resources": {
                "Role": { "Type": "AWS::IAM::Role" },
                "Policy": {
                    "Type": IAM_POLICY,
                    "Properties": { "Roles": [{ "Ref": "Role" }] }
                },
                "Handler": {
                    "Type": LAMBDA_FUNCTION,
                    "Properties": { "Role": { "Fn::GetAtt": ["Role", "Arn"] } }
                },
                "Deployment": {
                    "Type": BUCKET_DEPLOYMENT,
                    "Properties": { "ServiceToken": { "Fn::GetAtt": ["Handler", "Arn"] } }
                }
            }
        })
    }

    fn inventory() -> Vec<StackResource> {
        vec![
            StackResource::new("Role", "app-Role-ABC", "AWS::IAM::Role"),
            StackResource::new("Handler", "app-Handler-DEF", LAMBDA_FUNCTION),
        ]
    }

    fn policy_change() -> ResourceChange {
        change(
            "Policy",
            IAM_POLICY,
            json!({ "Roles": [{ "Ref": "Role" }], "PolicyDocument": { "Version": "1" } }),
            json!({ "Roles": [{ "Ref": "Role" }], "PolicyDocument": { "Version": "2" } }),
        )
    }

    #[test]
    fn test_stringify_values() {
        assert_eq!(
            stringify_values(&json!({ "Prune": true, "Keys": [1, "a"], "Empty": null })),
            json!({ "Prune": "true", "Keys": ["1", "a"], "Empty": null })
        );
    }

    #[tokio::test]
    async fn test_other_types_are_ignored() {
        let evaluator = evaluator(deployment_template(), inventory());
        let change = change("Other", "Custom::Other", json!({ "A": 1 }), json!({ "A": 2 }));

        let outcomes = BucketDeploymentClassifier
            .classify("Other", &change, &evaluator)
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_invokes_handler_with_update_event() {
        let evaluator = evaluator(deployment_template(), inventory());
        let change = change(
            "Deployment",
            BUCKET_DEPLOYMENT,
            json!({
                "ServiceToken": { "Fn::GetAtt": ["Handler", "Arn"] },
                "DestinationBucketName": "site",
                "SourceObjectKeys": ["old.zip"]
            }),
            json!({
                "ServiceToken": { "Fn::GetAtt": ["Handler", "Arn"] },
                "DestinationBucketName": "site",
                "SourceObjectKeys": ["new.zip"],
                "Prune": true
            }),
        );

        let outcomes = BucketDeploymentClassifier
            .classify("Deployment", &change, &evaluator)
            .await
            .unwrap();
        let accepted = hotswappable(&outcomes);
        assert_eq!(accepted[0].props_changed, vec!["*"]);
        assert_eq!(accepted[0].resource_names, vec!["Contents of S3 Bucket 'site'"]);

        let mut services = MockHotswapServices::new();
        services
            .expect_invoke_function()
            .withf(|name, payload| {
                let event: Value = serde_json::from_slice(payload).unwrap();
                name == "arn:aws:lambda:us-east-1:123456789012:function:app-Handler-DEF"
                    && event["RequestType"] == "Update"
                    && event["RequestId"] == REQUIRED_BY_CFN
                    && event["ResourceProperties"]["Prune"] == "true"
                    && event["ResourceProperties"]["SourceObjectKeys"][0] == "new.zip"
                    && event["ResourceProperties"].get(SERVICE_TOKEN).is_none()
            })
            .times(1)
            .returning(|_, _| Ok(()));

        accepted[0].action.apply(&services).await.unwrap();
    }

    #[tokio::test]
    async fn test_policy_used_only_by_deployment_is_skipped() {
        let evaluator = evaluator(deployment_template(), inventory());
        assert!(
            skip_change_for_bucket_deployment_policy("Policy", &policy_change(), &evaluator)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_policy_with_other_role_user_is_kept() {
        let mut template = deployment_template();
        template["Resources"]["Worker"] = json!({
            "Type": LAMBDA_FUNCTION,
            "Properties": { "Role": { "Fn::GetAtt": ["Role", "Arn"] } }
        });
        let evaluator = evaluator(template, inventory());

        assert!(
            !skip_change_for_bucket_deployment_policy("Policy", &policy_change(), &evaluator)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_policy_without_roles_is_kept() {
        let evaluator = evaluator(deployment_template(), inventory());
        let change = change("Policy", IAM_POLICY, json!({ "A": 1 }), json!({ "A": 2 }));

        assert!(
            !skip_change_for_bucket_deployment_policy("Policy", &change, &evaluator)
                .await
                .unwrap()
        );
    }
}
