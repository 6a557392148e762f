//! Hotswapping of functions, their published versions and aliases.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::io::{Cursor, Write};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::config::WaitSettings;
use crate::error::{EvaluationError, HotswapError, Result, ServiceError};
use crate::services::{
    FunctionCodeUpdate, FunctionConfiguration, FunctionConfigurationUpdate, HotswapServices,
};
use crate::template::{ResourceChange, TemplateEvaluator, stringify_scalar};

use super::common::{
    ClassifiedChanges, HotswapAction, HotswapOutcome, HotswappableChange, ResourceClassifier,
};

/// Resource type of a function.
pub const LAMBDA_FUNCTION: &str = "AWS::Lambda::Function";
/// Resource type of a published function version.
pub const LAMBDA_VERSION: &str = "AWS::Lambda::Version";
/// Resource type of a function alias.
pub const LAMBDA_ALIAS: &str = "AWS::Lambda::Alias";

const SERVICE: &str = "lambda";
const FUNCTION_PROPERTIES: &[&str] = &["Code", "Environment", "Description"];
const ALIAS_PROPERTIES: &[&str] = &["FunctionVersion"];

/// Classifies function, version and alias changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LambdaFunctionClassifier {
    waits: WaitSettings,
}

impl LambdaFunctionClassifier {
    /// Creates a classifier that paces update polling with `waits`.
    #[must_use]
    pub const fn new(waits: WaitSettings) -> Self {
        Self { waits }
    }

    async fn classify_function(
        &self,
        logical_id: &str,
        change: &ResourceChange,
        evaluator: &Arc<TemplateEvaluator>,
    ) -> Result<Vec<HotswapOutcome>> {
        let mut outcomes = Vec::new();
        let classified = ClassifiedChanges::new(change, FUNCTION_PROPERTIES);
        classified.report_non_hotswappable_property_changes(&mut outcomes);

        if !classified.has_hotswappable_changes() {
            return Ok(outcomes);
        }

        let function_name = evaluator
            .establish_resource_physical_name(logical_id, change.new_properties().get("FunctionName"))
            .await?;
        let display_name = function_name.as_deref().unwrap_or(logical_id);
        let targets = versions_and_aliases(logical_id, evaluator).await?;

        let mut resource_names = vec![format!("Lambda Function '{display_name}'")];
        if targets.has_versions {
            resource_names.push(format!("Lambda Version for Function '{display_name}'"));
        }
        resource_names.extend(
            targets
                .aliases
                .iter()
                .map(|alias| format!("Lambda Alias '{alias}' for Function '{display_name}'")),
        );

        info!("Function {} is hotswappable", display_name);
        outcomes.push(HotswapOutcome::Hotswappable(HotswappableChange {
            resource_type: LAMBDA_FUNCTION.to_string(),
            props_changed: classified.hotswappable_names(),
            service: SERVICE,
            resource_names,
            action: Box::new(LambdaFunctionAction {
                function_name,
                logical_id: logical_id.to_string(),
                changed_properties: classified.hotswappable_new_values(),
                runtime: change.new_properties().get("Runtime").cloned(),
                publish_version: targets.has_versions,
                aliases: targets.aliases,
                evaluator: Arc::clone(evaluator),
                waits: self.waits,
            }),
        }));
        Ok(outcomes)
    }
}

/// An alias change accepts only a new target version; publishing that
/// version is the function's job, so the patch itself does nothing.
fn classify_alias(change: &ResourceChange) -> Vec<HotswapOutcome> {
    let mut outcomes = Vec::new();
    let classified = ClassifiedChanges::new(change, ALIAS_PROPERTIES);
    classified.report_non_hotswappable_property_changes(&mut outcomes);

    if classified.has_hotswappable_changes() {
        outcomes.push(HotswapOutcome::Hotswappable(HotswappableChange::noop(
            LAMBDA_ALIAS,
            SERVICE,
        )));
    }
    outcomes
}

#[async_trait]
impl ResourceClassifier for LambdaFunctionClassifier {
    fn name(&self) -> &'static str {
        "lambda"
    }

    async fn classify(
        &self,
        logical_id: &str,
        change: &ResourceChange,
        evaluator: &Arc<TemplateEvaluator>,
    ) -> Result<Vec<HotswapOutcome>> {
        match change.new_type() {
            // Versions are immutable; a new one is published when the
            // function they point to is hotswapped.
            Some(LAMBDA_VERSION) => Ok(vec![HotswapOutcome::Hotswappable(HotswappableChange::noop(
                LAMBDA_VERSION,
                SERVICE,
            ))]),
            Some(LAMBDA_ALIAS) => Ok(classify_alias(change)),
            Some(LAMBDA_FUNCTION) => self.classify_function(logical_id, change, evaluator).await,
            _ => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Default)]
struct PublishTargets {
    has_versions: bool,
    aliases: Vec<String>,
}

/// Finds the versions of a function and the names of the aliases
/// pointing at those versions.
async fn versions_and_aliases(
    logical_id: &str,
    evaluator: &TemplateEvaluator,
) -> Result<PublishTargets> {
    let versions: Vec<&str> = evaluator
        .find_references_to(logical_id)
        .into_iter()
        .filter(|r| r.definition.resource_type == LAMBDA_VERSION)
        .map(|r| r.logical_id)
        .collect();

    let aliases: Vec<_> = versions
        .iter()
        .flat_map(|version| evaluator.find_references_to(version))
        .filter(|r| r.definition.resource_type == LAMBDA_ALIAS)
        .collect();

    let names = join_all(aliases.iter().map(|alias| async move {
        let name = alias.definition.property("Name").ok_or_else(|| {
            EvaluationError::MissingProperty {
                logical_id: alias.logical_id.to_string(),
                property: String::from("Name"),
            }
        })?;
        evaluator.evaluate_to_string(name, "Name").await
    }))
    .await;

    Ok(PublishTargets {
        has_versions: !versions.is_empty(),
        aliases: names.into_iter().collect::<Result<Vec<_>>>()?,
    })
}

/// Evaluated form of the changed function properties.
#[derive(Debug, Default)]
struct FunctionChange {
    code: Option<FunctionCodeUpdate>,
    description: Option<String>,
    environment: Option<Value>,
}

impl FunctionChange {
    fn has_configuration(&self) -> bool {
        self.description.is_some() || self.environment.is_some()
    }
}

#[derive(Debug)]
struct LambdaFunctionAction {
    function_name: Option<String>,
    logical_id: String,
    changed_properties: Map<String, Value>,
    runtime: Option<Value>,
    publish_version: bool,
    aliases: Vec<String>,
    evaluator: Arc<TemplateEvaluator>,
    waits: WaitSettings,
}

impl LambdaFunctionAction {
    async fn evaluate_changes(&self, function_name: &str) -> Result<FunctionChange> {
        let mut change = FunctionChange::default();

        for (name, value) in &self.changed_properties {
            match name.as_str() {
                "Code" => {
                    change.code = Some(self.evaluate_code(function_name, value).await?);
                }
                "Description" => {
                    let description = self.evaluator.evaluate(value).await?;
                    change.description = Some(stringify_scalar("Description", &description)?)
                        .filter(|d| !d.is_empty());
                }
                "Environment" => {
                    change.environment =
                        Some(self.evaluator.evaluate(value).await?).filter(|e| !e.is_null());
                }
                other => {
                    return Err(HotswapError::internal(format!(
                        "property {other} of function {function_name} cannot be hotswapped"
                    )));
                }
            }
        }

        Ok(change)
    }

    async fn evaluate_code(&self, function_name: &str, code: &Value) -> Result<FunctionCodeUpdate> {
        let mut update = FunctionCodeUpdate {
            function_name: function_name.to_string(),
            ..FunctionCodeUpdate::default()
        };
        let Some(fields) = code.as_object() else {
            return Ok(update);
        };

        for (name, expression) in fields {
            match name.as_str() {
                "S3Bucket" => update.s3_bucket = Some(self.evaluator.evaluate_to_string(expression, name).await?),
                "S3Key" => update.s3_key = Some(self.evaluator.evaluate_to_string(expression, name).await?),
                "S3ObjectVersion" => {
                    update.s3_object_version = Some(self.evaluator.evaluate_to_string(expression, name).await?);
                }
                "ImageUri" => update.image_uri = Some(self.evaluator.evaluate_to_string(expression, name).await?),
                "ZipFile" => {
                    let source = self.evaluator.evaluate_to_string(expression, name).await?;
                    let runtime_expression =
                        self.runtime.as_ref().ok_or_else(|| EvaluationError::MissingProperty {
                            logical_id: self.logical_id.clone(),
                            property: String::from("Runtime"),
                        })?;
                    let runtime = self.evaluator.evaluate_to_string(runtime_expression, "Runtime").await?;
                    let file_name = format!("index.{}", code_file_extension(&runtime)?);
                    update.zip_file = Some(zip_inline_code(&file_name, &source)?);
                }
                other => debug!("Ignoring code field {} of function {}", other, function_name),
            }
        }

        Ok(update)
    }

    async fn wait_for_update(
        &self,
        services: &dyn HotswapServices,
        function_name: &str,
        response: &FunctionConfiguration,
    ) -> Result<()> {
        let interval = if response.is_slow_to_update() {
            self.waits.lambda_slow_poll_interval()
        } else {
            self.waits.lambda_poll_interval()
        };

        loop {
            tokio::time::sleep(interval).await;
            let current = services.get_function_configuration(function_name).await?;
            if current.is_update_failed() {
                return Err(ServiceError::UpdateFailed {
                    resource: format!("Lambda Function '{function_name}'"),
                    reason: current
                        .last_update_status_reason
                        .unwrap_or_else(|| String::from("update failed")),
                }
                .into());
            }
            if current.is_update_complete() {
                return Ok(());
            }
            trace!("Function {} is still updating", function_name);
        }
    }
}

#[async_trait]
impl HotswapAction for LambdaFunctionAction {
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()> {
        let Some(function_name) = self.function_name.as_deref() else {
            warn!("No physical name found for function {}, skipping", self.logical_id);
            return Ok(());
        };

        let change = self.evaluate_changes(function_name).await?;
        if change.code.is_none() && !change.has_configuration() {
            return Ok(());
        }

        if let Some(code) = &change.code {
            info!("Updating code of function {}", function_name);
            let response = services.update_function_code(code).await?;
            self.wait_for_update(services, function_name, &response).await?;
        }

        if change.has_configuration() {
            info!("Updating configuration of function {}", function_name);
            let update = FunctionConfigurationUpdate {
                function_name: function_name.to_string(),
                description: change.description,
                environment: change.environment,
            };
            let response = services.update_function_configuration(&update).await?;
            self.wait_for_update(services, function_name, &response).await?;
        }

        if !self.publish_version {
            return Ok(());
        }

        info!("Publishing a new version of function {}", function_name);
        let version = services.publish_version(function_name).await?;

        let results = join_all(self.aliases.iter().map(|alias| {
            info!("Pointing alias {} of function {} at version {}", alias, function_name, version);
            services.update_alias(function_name, alias, &version)
        }))
        .await;
        results.into_iter().collect::<Result<Vec<_>>>()?;

        Ok(())
    }
}

/// File extension of the inline code file for a runtime.
fn code_file_extension(runtime: &str) -> std::result::Result<&'static str, EvaluationError> {
    if runtime.starts_with("node") {
        Ok("js")
    } else if runtime.starts_with("python") {
        Ok("py")
    } else {
        Err(EvaluationError::UnsupportedRuntime {
            runtime: runtime.to_string(),
        })
    }
}

/// Packs `source` into a single-file zip archive with a fixed timestamp.
fn zip_inline_code(file_name: &str, source: &str) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(file_name, options)
        .map_err(|e| HotswapError::internal(format!("failed to create {file_name}: {e}")))?;
    writer.write_all(source.as_bytes())?;
    let archive = writer
        .finish()
        .map_err(|e| HotswapError::internal(format!("failed to finish code archive: {e}")))?;

    Ok(archive.into_inner())
}
