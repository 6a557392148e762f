//! Hotswapping of container task definitions and the services running them.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::config::{EcsHotswapProperties, WaitSettings};
use crate::error::Result;
use crate::services::{HotswapServices, ServiceUpdate};
use crate::template::{ResourceChange, TemplateEvaluator};

use super::common::{
    ClassifiedChanges, HotswapAction, HotswapOutcome, HotswappableChange, KeyExclusion,
    ResourceClassifier, lower_case_first_character, report_non_hotswappable_change,
    transform_object_keys,
};

/// Resource type of a task definition.
pub const TASK_DEFINITION: &str = "AWS::ECS::TaskDefinition";
/// Resource type of a service.
pub const ECS_SERVICE: &str = "AWS::ECS::Service";

const SERVICE: &str = "ecs-service";
const TASK_DEFINITION_PROPERTIES: &[&str] = &["ContainerDefinitions"];

/// Properties whose values are free-form string maps and keep their keys.
const TASK_DEFINITION_KEY_EXCLUSIONS: &[(&str, KeyExclusion)] = &[
    (
        "ContainerDefinitions",
        KeyExclusion::Nested(&[
            ("DockerLabels", KeyExclusion::Verbatim),
            (
                "FirelensConfiguration",
                KeyExclusion::Nested(&[("Options", KeyExclusion::Verbatim)]),
            ),
            (
                "LogConfiguration",
                KeyExclusion::Nested(&[("Options", KeyExclusion::Verbatim)]),
            ),
        ]),
    ),
    (
        "Volumes",
        KeyExclusion::Nested(&[(
            "DockerVolumeConfiguration",
            KeyExclusion::Nested(&[
                ("DriverOpts", KeyExclusion::Verbatim),
                ("Labels", KeyExclusion::Verbatim),
            ]),
        )]),
    ),
];

/// Classifies task definition changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EcsServiceClassifier {
    overrides: EcsHotswapProperties,
    waits: WaitSettings,
}

impl EcsServiceClassifier {
    /// Creates a classifier with rollout overrides and poll pacing.
    #[must_use]
    pub const fn new(overrides: EcsHotswapProperties, waits: WaitSettings) -> Self {
        Self { overrides, waits }
    }
}

#[async_trait]
impl ResourceClassifier for EcsServiceClassifier {
    fn name(&self) -> &'static str {
        "ecs"
    }

    async fn classify(
        &self,
        logical_id: &str,
        change: &ResourceChange,
        evaluator: &Arc<TemplateEvaluator>,
    ) -> Result<Vec<HotswapOutcome>> {
        if change.new_type() != Some(TASK_DEFINITION) {
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::new();
        let classified = ClassifiedChanges::new(change, TASK_DEFINITION_PROPERTIES);
        classified.report_non_hotswappable_property_changes(&mut outcomes);

        let references = evaluator.find_references_to(logical_id);
        let mut service_arns = Vec::new();
        for reference in references.iter().filter(|r| r.definition.resource_type == ECS_SERVICE) {
            if let Some(arn) = evaluator.find_physical_name_for(reference.logical_id).await? {
                service_arns.push(arn);
            }
        }

        for other in references.iter().filter(|r| r.definition.resource_type != ECS_SERVICE) {
            report_non_hotswappable_change(
                &mut outcomes,
                change,
                Vec::new(),
                Some(format!(
                    "A resource '{}' with Type '{}' that is not an ECS Service was found referencing the changed TaskDefinition '{}'",
                    other.logical_id, other.definition.resource_type, logical_id
                )),
                true,
            );
        }

        if service_arns.is_empty() {
            debug!("No deployed service references task definition {}", logical_id);
            report_non_hotswappable_change(
                &mut outcomes,
                change,
                Vec::new(),
                Some(String::from("No ECS services reference the changed task definition")),
                false,
            );
            return Ok(outcomes);
        }

        if !classified.has_hotswappable_changes() {
            return Ok(outcomes);
        }

        let Some((family, task_definition)) =
            prepare_task_definition(logical_id, change, evaluator).await?
        else {
            report_non_hotswappable_change(
                &mut outcomes,
                change,
                vec![String::from("Family")],
                Some(format!(
                    "the family of task definition '{logical_id}' could not be determined"
                )),
                true,
            );
            return Ok(outcomes);
        };

        let mut resource_names = vec![format!("ECS Task Definition '{family}'")];
        resource_names.extend(
            service_arns
                .iter()
                .map(|arn| format!("ECS Service '{}'", arn_segment(arn, 2))),
        );

        info!("Task definition {} is hotswappable", family);
        outcomes.push(HotswapOutcome::Hotswappable(HotswappableChange {
            resource_type: TASK_DEFINITION.to_string(),
            props_changed: classified.hotswappable_names(),
            service: SERVICE,
            resource_names,
            action: Box::new(EcsServiceAction {
                task_definition,
                service_arns,
                overrides: self.overrides,
                waits: self.waits,
            }),
        }));
        Ok(outcomes)
    }
}

/// Builds the evaluated task definition to register: every old property
/// verbatim, the new container definitions, and the family name.
async fn prepare_task_definition(
    logical_id: &str,
    change: &ResourceChange,
    evaluator: &TemplateEvaluator,
) -> Result<Option<(String, Value)>> {
    let mut properties = change
        .old_definition
        .as_ref()
        .map(|d| d.properties.clone())
        .unwrap_or_default();
    match change.new_properties().get("ContainerDefinitions") {
        Some(definitions) => {
            properties.insert(String::from("ContainerDefinitions"), definitions.clone());
        }
        None => {
            properties.remove("ContainerDefinitions");
        }
    }

    let family_expression = properties.remove("Family");
    let Some(name_or_arn) = evaluator
        .establish_resource_physical_name(logical_id, family_expression.as_ref())
        .await?
    else {
        return Ok(None);
    };
    let family = family_from_name_or_arn(&name_or_arn);

    let mut evaluated = match evaluator.evaluate(&Value::Object(properties)).await? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    evaluated.insert(String::from("Family"), Value::String(family.clone()));

    Ok(Some((family, Value::Object(evaluated))))
}

/// The deployed physical ID of a task definition is its revision ARN,
/// `arn:aws:ecs:region:account:task-definition/<family>:<revision>`.
fn family_from_name_or_arn(name_or_arn: &str) -> String {
    let parts: Vec<&str> = name_or_arn.split(':').collect();
    if parts.len() > 1 {
        parts
            .get(5)
            .and_then(|resource| resource.split('/').nth(1))
            .unwrap_or_default()
            .to_string()
    } else {
        name_or_arn.to_string()
    }
}

/// Service ARNs look like `arn:aws:ecs:region:account:service/<cluster>/<name>`.
fn arn_segment(arn: &str, index: usize) -> &str {
    arn.split('/').nth(index).unwrap_or_default()
}

#[derive(Debug)]
struct EcsServiceAction {
    task_definition: Value,
    service_arns: Vec<String>,
    overrides: EcsHotswapProperties,
    waits: WaitSettings,
}

impl EcsServiceAction {
    async fn roll_service(
        &self,
        services: &dyn HotswapServices,
        service_arn: &str,
        task_definition_arn: &str,
    ) -> Result<()> {
        let update = ServiceUpdate {
            service_arn: service_arn.to_string(),
            cluster: arn_segment(service_arn, 1).to_string(),
            task_definition_arn: task_definition_arn.to_string(),
            force_new_deployment: true,
            minimum_healthy_percent: self.overrides.minimum_healthy_percent.unwrap_or(0),
            maximum_percent: self.overrides.maximum_healthy_percent,
        };

        info!("Deploying {} to service {}", task_definition_arn, service_arn);
        let cluster_arn = services.update_service(&update).await?;

        loop {
            tokio::time::sleep(self.waits.ecs_poll_interval()).await;
            let status = services.describe_service(&cluster_arn, service_arn).await?;
            if status.is_stable() {
                info!("Service {} is stable", service_arn);
                return Ok(());
            }
            trace!(
                "Service {} has {} deployments, {}/{} tasks running",
                service_arn, status.deployments, status.running_count, status.desired_count
            );
        }
    }
}

#[async_trait]
impl HotswapAction for EcsServiceAction {
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()> {
        let request = transform_object_keys(
            &self.task_definition,
            lower_case_first_character,
            TASK_DEFINITION_KEY_EXCLUSIONS,
        );
        let task_definition_arn = services.register_task_definition(&request).await?;
        info!("Registered task definition {}", task_definition_arn);

        let results = join_all(
            self.service_arns
                .iter()
                .map(|arn| self.roll_service(services, arn, &task_definition_arn)),
        )
        .await;
        results.into_iter().collect::<Result<Vec<_>>>()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotswap::test_support::{change, evaluator, fast_waits, hotswappable, non_hotswappable};
    use crate::services::{MockHotswapServices, ServiceStatus, StackResource};
    use serde_json::json;

    const SERVICE_ARN: &str = "arn:aws:ecs:us-east-1:123456789012:service/my-cluster/web";

    fn task_definition_change() -> ResourceChange {
        change(
            "TaskDef",
            TASK_DEFINITION,
            json!({
                "Family": "web",
                "Cpu": "256",
                "ContainerDefinitions": [{ "Name": "app", "Image": "image:1" }]
            }),
            json!({
                "Family": "web",
                "Cpu": "256",
                "ContainerDefinitions": [{
                    "Name": "app",
                    "Image": "image:2",
                    "DockerLabels": { "Team": "Core" }
                }]
            }),
        )
    }

    fn template(with_service: bool) -> Value {
        let mut resources = json!({
            "TaskDef": { "Type": TASK_DEFINITION, "Properties": { "Family": "web" } }
        });
        if with_service {
            resources["Service"] = json!({
                "Type": ECS_SERVICE,
                "Properties": { "TaskDefinition": { "Ref": "TaskDef" } }
            });
        }
        json!({ "Resources": resources })
    }

    #[test]
    fn test_family_from_arn() {
        assert_eq!(
            family_from_name_or_arn("arn:aws:ecs:us-east-1:123456789012:task-definition/web:3"),
            "web"
        );
        assert_eq!(family_from_name_or_arn("web"), "web");
    }

    #[tokio::test]
    async fn test_no_services_is_hidden_non_hotswappable() {
        let evaluator = evaluator(template(false), Vec::new());

        let outcomes = EcsServiceClassifier::default()
            .classify("TaskDef", &task_definition_change(), &evaluator)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        let rejected = non_hotswappable(&outcomes);
        assert_eq!(rejected.len(), 1);
        assert!(!rejected[0].hotswap_only_visible);
    }

    #[tokio::test]
    async fn test_non_service_reference_is_reported() {
        let mut template = template(true);
        template["Resources"]["Rule"] = json!({
            "Type": "AWS::Events::Rule",
            "Properties": { "Targets": [{ "TaskDefinitionArn": { "Ref": "TaskDef" } }] }
        });
        let evaluator = evaluator(
            template,
            vec![StackResource::new("Service", SERVICE_ARN, ECS_SERVICE)],
        );

        let outcomes = EcsServiceClassifier::default()
            .classify("TaskDef", &task_definition_change(), &evaluator)
            .await
            .unwrap();
        let rejected = non_hotswappable(&outcomes);
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].reason.contains("'Rule'"));
        assert_eq!(hotswappable(&outcomes).len(), 1);
    }

    #[tokio::test]
    async fn test_mapping_key_named_like_task_definition_is_not_a_reference() {
        let mut template = template(true);
        template["Resources"]["Func"] = json!({
            "Type": "AWS::Lambda::Function",
            "Properties": { "Environment": { "Variables": { "TaskDef": "unrelated" } } }
        });
        let evaluator = evaluator(
            template,
            vec![StackResource::new("Service", SERVICE_ARN, ECS_SERVICE)],
        );

        let outcomes = EcsServiceClassifier::default()
            .classify("TaskDef", &task_definition_change(), &evaluator)
            .await
            .unwrap();
        assert!(non_hotswappable(&outcomes).is_empty());
        assert_eq!(hotswappable(&outcomes).len(), 1);
    }

    #[tokio::test]
    async fn test_registers_then_rolls_services() {
        let evaluator = evaluator(
            template(true),
            vec![StackResource::new("Service", SERVICE_ARN, ECS_SERVICE)],
        );
        let overrides = EcsHotswapProperties {
            minimum_healthy_percent: None,
            maximum_healthy_percent: Some(150),
        };

        let outcomes = EcsServiceClassifier::new(overrides, fast_waits())
            .classify("TaskDef", &task_definition_change(), &evaluator)
            .await
            .unwrap();
        let accepted = hotswappable(&outcomes);
        assert_eq!(accepted.len(), 1);
        assert_eq!(
            accepted[0].resource_names,
            vec!["ECS Task Definition 'web'", "ECS Service 'web'"]
        );

        let mut services = MockHotswapServices::new();
        services
            .expect_register_task_definition()
            .withf(|td| {
                td["family"] == "web"
                    && td["cpu"] == "256"
                    && td["containerDefinitions"][0]["image"] == "image:2"
                    && td["containerDefinitions"][0]["dockerLabels"]["Team"] == "Core"
            })
            .times(1)
            .returning(|_| Ok(String::from("arn:aws:ecs:us-east-1:123456789012:task-definition/web:4")));
        services
            .expect_update_service()
            .withf(|u| {
                u.cluster == "my-cluster"
                    && u.force_new_deployment
                    && u.minimum_healthy_percent == 0
                    && u.maximum_percent == Some(150)
                    && u.task_definition_arn.ends_with("web:4")
            })
            .times(1)
            .returning(|_| Ok(String::from("arn:aws:ecs:us-east-1:123456789012:cluster/my-cluster")));

        let mut polls = 0;
        services.expect_describe_service().times(2).returning(move |_, _| {
            polls += 1;
            Ok(ServiceStatus {
                deployments: if polls == 1 { 2 } else { 1 },
                running_count: 1,
                desired_count: 1,
            })
        });

        accepted[0].action.apply(&services).await.unwrap();
    }

    #[tokio::test]
    async fn test_family_falls_back_to_deployed_revision() {
        let evaluator = evaluator(
            template(true),
            vec![
                StackResource::new("Service", SERVICE_ARN, ECS_SERVICE),
                StackResource::new(
                    "TaskDef",
                    "arn:aws:ecs:us-east-1:123456789012:task-definition/app-TaskDef-1A2B:7",
                    TASK_DEFINITION,
                ),
            ],
        );
        let change = change(
            "TaskDef",
            TASK_DEFINITION,
            json!({ "ContainerDefinitions": [{ "Image": "image:1" }] }),
            json!({ "ContainerDefinitions": [{ "Image": "image:2" }] }),
        );

        let outcomes = EcsServiceClassifier::default()
            .classify("TaskDef", &change, &evaluator)
            .await
            .unwrap();
        assert_eq!(
            hotswappable(&outcomes)[0].resource_names[0],
            "ECS Task Definition 'app-TaskDef-1A2B'"
        );
    }
}
