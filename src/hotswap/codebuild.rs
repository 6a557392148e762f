//! Hotswapping of build projects.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::services::{HotswapServices, ProjectUpdate};
use crate::template::{ResourceChange, TemplateEvaluator, stringify_scalar};

use super::common::{
    ClassifiedChanges, HotswapAction, HotswapOutcome, HotswappableChange, ResourceClassifier,
    lower_case_first_character, transform_object_keys,
};

/// Resource type of a build project.
pub const CODEBUILD_PROJECT: &str = "AWS::CodeBuild::Project";

const SERVICE: &str = "codebuild";
const PROJECT_PROPERTIES: &[&str] = &["Source", "Environment", "SourceVersion"];

/// Classifies build project changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeBuildProjectClassifier;

#[async_trait]
impl ResourceClassifier for CodeBuildProjectClassifier {
    fn name(&self) -> &'static str {
        "codebuild"
    }

    async fn classify(
        &self,
        logical_id: &str,
        change: &ResourceChange,
        evaluator: &Arc<TemplateEvaluator>,
    ) -> Result<Vec<HotswapOutcome>> {
        if change.new_type() != Some(CODEBUILD_PROJECT) {
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::new();
        let classified = ClassifiedChanges::new(change, PROJECT_PROPERTIES);
        classified.report_non_hotswappable_property_changes(&mut outcomes);

        if !classified.has_hotswappable_changes() {
            return Ok(outcomes);
        }

        let project_name = evaluator
            .establish_resource_physical_name(logical_id, change.new_properties().get("Name"))
            .await?;
        let display_name = project_name.as_deref().unwrap_or(logical_id);

        info!("Build project {} is hotswappable", display_name);
        outcomes.push(HotswapOutcome::Hotswappable(HotswappableChange {
            resource_type: CODEBUILD_PROJECT.to_string(),
            props_changed: classified.hotswappable_names(),
            service: SERVICE,
            resource_names: vec![format!("CodeBuild Project '{display_name}'")],
            action: Box::new(CodeBuildProjectAction {
                logical_id: logical_id.to_string(),
                project_name,
                changed_properties: classified.hotswappable_new_values(),
                evaluator: Arc::clone(evaluator),
            }),
        }));
        Ok(outcomes)
    }
}

/// Source keys follow the API's lower camel case, except `buildspec`,
/// which the API spells in all lowercase.
fn source_key(key: &str) -> String {
    if key.eq_ignore_ascii_case("buildspec") {
        key.to_ascii_lowercase()
    } else {
        lower_case_first_character(key)
    }
}

#[derive(Debug)]
struct CodeBuildProjectAction {
    logical_id: String,
    project_name: Option<String>,
    changed_properties: Map<String, Value>,
    evaluator: Arc<TemplateEvaluator>,
}

#[async_trait]
impl HotswapAction for CodeBuildProjectAction {
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()> {
        let Some(name) = self.project_name.as_deref() else {
            warn!("No physical name found for build project {}, skipping", self.logical_id);
            return Ok(());
        };

        let mut update = ProjectUpdate {
            name: name.to_string(),
            ..ProjectUpdate::default()
        };
        for (property, expression) in &self.changed_properties {
            let value = self.evaluator.evaluate(expression).await?;
            match property.as_str() {
                "Source" => update.source = Some(transform_object_keys(&value, source_key, &[])),
                "Environment" => {
                    update.environment =
                        Some(transform_object_keys(&value, lower_case_first_character, &[]));
                }
                "SourceVersion" => {
                    update.source_version = Some(stringify_scalar(property, &value)?);
                }
                _ => {}
            }
        }

        info!("Updating build project {}", name);
        services.update_project(&update).await
    }
}
