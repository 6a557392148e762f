//! Hotswapping of state machine definitions.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::services::HotswapServices;
use crate::template::{ResourceChange, TemplateEvaluator};

use super::common::{
    ClassifiedChanges, HotswapAction, HotswapOutcome, HotswappableChange, ResourceClassifier,
};

/// Resource type of a state machine.
pub const STATE_MACHINE: &str = "AWS::StepFunctions::StateMachine";

const SERVICE: &str = "stepfunctions-service";
const STATE_MACHINE_PROPERTIES: &[&str] = &["DefinitionString"];

/// Classifies state machine changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateMachineClassifier;

#[async_trait]
impl ResourceClassifier for StateMachineClassifier {
    fn name(&self) -> &'static str {
        "stepfunctions"
    }

    async fn classify(
        &self,
        logical_id: &str,
        change: &ResourceChange,
        evaluator: &Arc<TemplateEvaluator>,
    ) -> Result<Vec<HotswapOutcome>> {
        if change.new_type() != Some(STATE_MACHINE) {
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::new();
        let classified = ClassifiedChanges::new(change, STATE_MACHINE_PROPERTIES);
        classified.report_non_hotswappable_property_changes(&mut outcomes);

        if !classified.has_hotswappable_changes() {
            return Ok(outcomes);
        }

        let state_machine_arn = match change.new_properties().get("StateMachineName") {
            Some(name) => {
                let name = evaluator.evaluate_to_string(name, "StateMachineName").await?;
                let context = evaluator.context();
                Some(format!(
                    "arn:{}:states:{}:{}:stateMachine:{}",
                    context.partition(),
                    context.region(),
                    context.account(),
                    name
                ))
            }
            None => evaluator.find_physical_name_for(logical_id).await?,
        };

        let display_name = state_machine_arn
            .as_deref()
            .and_then(|arn| arn.split(':').nth(6))
            .unwrap_or(logical_id);

        info!("State machine {} is hotswappable", display_name);
        outcomes.push(HotswapOutcome::Hotswappable(HotswappableChange {
            resource_type: STATE_MACHINE.to_string(),
            props_changed: classified.hotswappable_names(),
            service: SERVICE,
            resource_names: vec![format!("{STATE_MACHINE} '{display_name}'")],
            action: Box::new(StateMachineAction {
                logical_id: logical_id.to_string(),
                state_machine_arn,
                definition: classified
                    .hotswappable_new_values()
                    .remove("DefinitionString")
                    .unwrap_or(Value::Null),
                evaluator: Arc::clone(evaluator),
            }),
        }));
        Ok(outcomes)
    }
}

#[derive(Debug)]
struct StateMachineAction {
    logical_id: String,
    state_machine_arn: Option<String>,
    definition: Value,
    evaluator: Arc<TemplateEvaluator>,
}

#[async_trait]
impl HotswapAction for StateMachineAction {
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()> {
        let Some(arn) = self.state_machine_arn.as_deref() else {
            warn!("No deployed state machine found for {}, skipping", self.logical_id);
            return Ok(());
        };

        let definition = match self.evaluator.evaluate(&self.definition).await? {
            Value::String(definition) => definition,
            other => other.to_string(),
        };

        info!("Updating definition of state machine {}", arn);
        services.update_state_machine(arn, &definition).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotswap::test_support::{change, evaluator, hotswappable, non_hotswappable};
    use crate::services::{MockHotswapServices, StackResource};
    use serde_json::json;

    const DEPLOYED_ARN: &str = "arn:aws:states:us-east-1:123456789012:stateMachine:app-Machine-XYZ";

    #[tokio::test]
    async fn test_arn_formatted_from_name() {
        let evaluator = evaluator(json!({ "Resources": {} }), Vec::new());
        let change = change(
            "Machine",
            STATE_MACHINE,
            json!({ "StateMachineName": "orders", "DefinitionString": "{}" }),
            json!({
                "StateMachineName": "orders",
                "DefinitionString": { "Fn::Join": ["", ["{\"StartAt\":", "\"A\"}"]] }
            }),
        );

        let outcomes = StateMachineClassifier
            .classify("Machine", &change, &evaluator)
            .await
            .unwrap();
        let accepted = hotswappable(&outcomes);
        assert_eq!(
            accepted[0].resource_names,
            vec![format!("{STATE_MACHINE} 'orders'")]
        );

        let mut services = MockHotswapServices::new();
        services
            .expect_update_state_machine()
            .withf(|arn, definition| {
                arn == "arn:aws:states:us-east-1:123456789012:stateMachine:orders"
                    && definition == "{\"StartAt\":\"A\"}"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        accepted[0].action.apply(&services).await.unwrap();
    }

    #[tokio::test]
    async fn test_arn_from_inventory() {
        let evaluator = evaluator(
            json!({ "Resources": {} }),
            vec![StackResource::new("Machine", DEPLOYED_ARN, STATE_MACHINE)],
        );
        let change = change(
            "Machine",
            STATE_MACHINE,
            json!({ "DefinitionString": "{}" }),
            json!({ "DefinitionString": "{\"StartAt\":\"B\"}" }),
        );

        let outcomes = StateMachineClassifier
            .classify("Machine", &change, &evaluator)
            .await
            .unwrap();

        let mut services = MockHotswapServices::new();
        services
            .expect_update_state_machine()
            .withf(|arn, _| arn == DEPLOYED_ARN)
            .times(1)
            .returning(|_, _| Ok(()));

        hotswappable(&outcomes)[0].action.apply(&services).await.unwrap();
    }

    #[tokio::test]
    async fn test_other_properties_are_rejected() {
        let evaluator = evaluator(json!({ "Resources": {} }), Vec::new());
        let change = change(
            "Machine",
            STATE_MACHINE,
            json!({ "RoleArn": "a" }),
            json!({ "RoleArn": "b" }),
        );

        let outcomes = StateMachineClassifier
            .classify("Machine", &change, &evaluator)
            .await
            .unwrap();
        assert!(hotswappable(&outcomes).is_empty());
        assert_eq!(non_hotswappable(&outcomes)[0].rejected_properties, vec!["RoleArn"]);
    }
}
