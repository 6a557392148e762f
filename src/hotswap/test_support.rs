//! Fixtures shared by the classifier tests.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::config::WaitSettings;
use crate::services::{ExportPage, MockEnvironmentQuery, StackResource};
use crate::template::{EnvironmentContext, ResourceChange, ResourceDefinition, Template, TemplateEvaluator};

use super::common::{HotswapOutcome, HotswappableChange, NonHotswappableChange};

pub fn evaluator(template: Value, resources: Vec<StackResource>) -> Arc<TemplateEvaluator> {
    let mut query = MockEnvironmentQuery::new();
    query
        .expect_list_stack_resources()
        .returning(move |_| Ok(resources.clone()));
    query
        .expect_url_suffix()
        .returning(|_| Ok(String::from("amazonaws.com")));
    query
        .expect_list_exports()
        .returning(|_| Ok(ExportPage::default()));

    let template: Template = serde_json::from_value(template).unwrap();
    let context = EnvironmentContext::new(Arc::new(query), "app", "123456789012", "us-east-1", "aws");
    Arc::new(TemplateEvaluator::new(template, context))
}

pub fn definition(resource_type: &str, properties: Value) -> ResourceDefinition {
    let properties: Map<String, Value> = serde_json::from_value(properties).unwrap();
    ResourceDefinition::new(resource_type, properties)
}

pub fn change(logical_id: &str, resource_type: &str, old: Value, new: Value) -> ResourceChange {
    ResourceChange::from_definitions(
        logical_id,
        Some(definition(resource_type, old)),
        Some(definition(resource_type, new)),
    )
}

pub const fn fast_waits() -> WaitSettings {
    WaitSettings {
        lambda_poll_interval_ms: 0,
        lambda_slow_poll_interval_ms: 0,
        ecs_poll_interval_ms: 0,
        appsync_poll_interval_ms: 0,
        appsync_retry_base_ms: 0,
    }
}

pub fn hotswappable(outcomes: &[HotswapOutcome]) -> Vec<&HotswappableChange> {
    outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            HotswapOutcome::Hotswappable(change) => Some(change),
            HotswapOutcome::NonHotswappable(_) => None,
        })
        .collect()
}

pub fn non_hotswappable(outcomes: &[HotswapOutcome]) -> Vec<&NonHotswappableChange> {
    outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            HotswapOutcome::NonHotswappable(change) => Some(change),
            HotswapOutcome::Hotswappable(_) => None,
        })
        .collect()
}
