//! Template expression evaluator.
//!
//! Reduces template expressions to concrete JSON values using the
//! template, the parameter values, and the deployed environment.

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{EvaluationError, Result};

use super::arn::{ArnEnvironment, format_resource_attribute};
use super::context::{EnvironmentContext, URL_SUFFIX};
use super::intrinsic::Intrinsic;
use super::model::{ResourceDefinition, Template, find_nested_stack};

/// Resource type of a nested stack.
pub const NESTED_STACK_TYPE: &str = "AWS::CloudFormation::Stack";

/// Pseudo logical ID addressing the template's own outputs in `Fn::GetAtt`.
const OUTPUTS: &str = "Outputs";
const NESTED_OUTPUT_PREFIX: &str = "Outputs.";

/// A resource that mentions another resource's logical ID.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceReference<'a> {
    /// Logical ID of the referencing resource.
    pub logical_id: &'a str,
    /// Its definition.
    pub definition: &'a ResourceDefinition,
}

/// Evaluates expressions of one template against one environment.
#[derive(Debug)]
pub struct TemplateEvaluator {
    template: Arc<Template>,
    context: EnvironmentContext,
}

impl TemplateEvaluator {
    /// Creates an evaluator.
    #[must_use]
    pub fn new(template: impl Into<Arc<Template>>, context: EnvironmentContext) -> Self {
        Self {
            template: template.into(),
            context,
        }
    }

    /// The template being evaluated.
    #[must_use]
    pub fn template(&self) -> &Template {
        &self.template
    }

    /// The evaluation context.
    #[must_use]
    pub const fn context(&self) -> &EnvironmentContext {
        &self.context
    }

    /// Evaluates an expression.
    ///
    /// Elements of lists and values of mappings are evaluated concurrently.
    /// Every element is awaited before the first error is reported.
    pub fn evaluate<'a>(&'a self, expression: &'a Value) -> BoxFuture<'a, Result<Value>> {
        self.evaluate_expression(expression).boxed()
    }

    async fn evaluate_expression(&self, expression: &Value) -> Result<Value> {
        match expression {
            Value::Array(items) => {
                let evaluated = join_all(items.iter().map(|item| self.evaluate(item))).await;
                evaluated
                    .into_iter()
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
            Value::Object(map) => {
                if let Some(intrinsic) = Intrinsic::parse(expression)? {
                    return self.evaluate_intrinsic(intrinsic).await;
                }
                let evaluated = join_all(map.values().map(|value| self.evaluate(value))).await;
                let mut result = Map::with_capacity(map.len());
                for (key, value) in map.keys().zip(evaluated) {
                    result.insert(key.clone(), value?);
                }
                Ok(Value::Object(result))
            }
            scalar => Ok(scalar.clone()),
        }
    }

    /// Evaluates an expression that must produce a string.
    ///
    /// Numbers and booleans are rendered as strings.
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails or yields a non-scalar.
    pub async fn evaluate_to_string(&self, expression: &Value, what: &str) -> Result<String> {
        let value = self.evaluate(expression).await?;
        Ok(stringify_scalar(what, &value)?)
    }

    async fn evaluate_intrinsic(&self, intrinsic: Intrinsic<'_>) -> Result<Value> {
        match intrinsic {
            Intrinsic::Ref(logical_id) => self.resolve_ref(logical_id).await,
            Intrinsic::GetAtt {
                logical_id,
                attribute,
            } => self.resolve_get_att(logical_id, attribute).await,
            Intrinsic::Join { separator, list } => {
                let items = self.evaluate_list(intrinsic.name(), list).await?;
                let parts = items
                    .iter()
                    .map(|item| stringify_scalar(intrinsic.name(), item))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Value::String(parts.join(separator)))
            }
            Intrinsic::Split { separator, source } => {
                match self.evaluate(source).await? {
                    Value::String(source) => Ok(Value::Array(
                        source
                            .split(separator)
                            .map(|part| Value::String(part.to_string()))
                            .collect(),
                    )),
                    other => Err(EvaluationError::type_mismatch(intrinsic.name(), "a string", &other).into()),
                }
            }
            Intrinsic::Select { index, list } => {
                let mut items = self.evaluate_list(intrinsic.name(), list).await?;
                if index >= items.len() {
                    return Err(EvaluationError::SelectOutOfRange {
                        index,
                        len: items.len(),
                    }
                    .into());
                }
                Ok(items.swap_remove(index))
            }
            Intrinsic::Sub {
                template,
                placeholders,
            } => self.evaluate_sub(template, placeholders).await,
            Intrinsic::ImportValue(name) => {
                let name = self.evaluate_to_string(name, intrinsic.name()).await?;
                self.import_value(&name).await
            }
        }
    }

    async fn evaluate_list(&self, name: &str, expression: &Value) -> Result<Vec<Value>> {
        match self.evaluate(expression).await? {
            Value::Array(items) => Ok(items),
            other => Err(EvaluationError::type_mismatch(name, "a list", &other).into()),
        }
    }

    async fn resolve_ref(&self, logical_id: &str) -> Result<Value> {
        self.find_ref_target(logical_id).await?.ok_or_else(|| {
            EvaluationError::UnresolvableReference {
                logical_id: logical_id.to_string(),
            }
            .into()
        })
    }

    async fn resolve_get_att(&self, logical_id: &str, attribute: &str) -> Result<Value> {
        self.find_get_att_target(logical_id, Some(attribute))
            .await?
            .ok_or_else(|| {
                EvaluationError::AttributeNotFound {
                    logical_id: logical_id.to_string(),
                    attribute: attribute.to_string(),
                }
                .into()
            })
    }

    async fn find_ref_target(&self, logical_id: &str) -> Result<Option<Value>> {
        if logical_id == URL_SUFFIX {
            let suffix = self.context.url_suffix().await?;
            return Ok(Some(Value::String(suffix.to_string())));
        }
        if let Some(value) = self.context.parameter(logical_id) {
            return Ok(Some(value.clone()));
        }
        if let Some(default) = self
            .template
            .parameters
            .get(logical_id)
            .and_then(|p| p.default.as_ref())
        {
            return Ok(Some(default.clone()));
        }
        self.find_get_att_target(logical_id, None).await
    }

    async fn find_get_att_target(
        &self,
        logical_id: &str,
        attribute: Option<&str>,
    ) -> Result<Option<Value>> {
        if logical_id == OUTPUTS {
            if let Some(name) = attribute {
                let Some(output) = self.template.outputs.get(name) else {
                    return Ok(None);
                };
                let value = self.evaluate(&output.value).await?;
                return Ok((!value.is_null()).then_some(value));
            }
        }

        let resources = self.context.stack_resources().await?;
        let Some(found) = resources.iter().find(|r| r.logical_id == logical_id) else {
            return Ok(None);
        };

        if found.resource_type == NESTED_STACK_TYPE {
            if let Some(output) = attribute.and_then(|a| a.strip_prefix(NESTED_OUTPUT_PREFIX)) {
                return self.find_nested_stack_output(logical_id, output).await;
            }
        }

        let Some(attribute) = attribute else {
            return Ok(Some(Value::String(found.physical_id.clone())));
        };

        let env = ArnEnvironment {
            partition: self.context.partition(),
            region: self.context.region(),
            account: self.context.account(),
        };
        let formatted =
            format_resource_attribute(&found.resource_type, attribute, &env, &found.physical_id)?;
        Ok(formatted.map(Value::String))
    }

    async fn find_nested_stack_output(&self, logical_id: &str, output: &str) -> Result<Option<Value>> {
        let Some(nested) = find_nested_stack(self.context.nested_stacks(), logical_id) else {
            debug!("Nested stack {} is not in the registry", logical_id);
            return Ok(None);
        };
        let Some(physical_name) = nested.physical_name.as_deref() else {
            debug!("Nested stack {} has not been deployed", logical_id);
            return Ok(None);
        };

        let parameters = match self
            .template
            .resources
            .get(logical_id)
            .and_then(|r| r.property("Parameters"))
        {
            Some(expression) => match self.evaluate(expression).await? {
                Value::Object(map) => map.into_iter().collect(),
                _ => HashMap::new(),
            },
            None => HashMap::new(),
        };

        let child = Self::new(
            nested.template.clone(),
            self.context.nested(physical_name, parameters),
        );
        let expression = serde_json::json!({ "Fn::GetAtt": [OUTPUTS, output] });
        child.evaluate(&expression).await.map(Some)
    }

    async fn evaluate_sub(&self, template: &str, placeholders: Option<&Value>) -> Result<Value> {
        let placeholders = match placeholders {
            Some(expression) => match self.evaluate(expression).await? {
                Value::Object(map) => map,
                Value::Null => Map::new(),
                other => {
                    return Err(EvaluationError::type_mismatch("Fn::Sub", "a mapping", &other).into());
                }
            },
            None => Map::new(),
        };

        let mut output = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            let key_start = start + 2;
            let Some(key_len) = rest[key_start..].find('}') else {
                break;
            };
            let key = &rest[key_start..key_start + key_len];

            let replacement = if let Some(value) = placeholders.get(key) {
                value.clone()
            } else if let Some((logical_id, attribute)) = key.split_once('.') {
                self.resolve_get_att(logical_id, attribute).await?
            } else {
                self.resolve_ref(key).await?
            };

            output.push_str(&rest[..start]);
            output.push_str(&stringify_scalar("Fn::Sub", &replacement)?);
            rest = &rest[key_start + key_len + 1..];
        }
        output.push_str(rest);

        Ok(Value::String(output))
    }

    async fn import_value(&self, name: &str) -> Result<Value> {
        let export = self
            .context
            .lookup_export(name)
            .await?
            .ok_or_else(|| EvaluationError::ExportNotFound {
                name: name.to_string(),
            })?;
        match export.value {
            Some(value) if !value.is_empty() => Ok(Value::String(value)),
            _ => Err(EvaluationError::ExportHasNoValue {
                name: name.to_string(),
            }
            .into()),
        }
    }

    /// Determines the physical name of a resource.
    ///
    /// The name expression is evaluated first. If it cannot be resolved
    /// against the template and environment, the deployed inventory is
    /// consulted instead. Any other evaluation error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error for evaluation failures other than unresolvable
    /// references, and for environment query failures.
    pub async fn establish_resource_physical_name(
        &self,
        logical_id: &str,
        name_expression: Option<&Value>,
    ) -> Result<Option<String>> {
        if let Some(expression) = name_expression {
            match self.evaluate(expression).await {
                Ok(Value::Null) => {}
                Ok(Value::String(name)) => return Ok(Some(name)),
                Ok(other) => return Ok(Some(other.to_string())),
                Err(e) if e.is_unresolvable() => {
                    debug!(
                        "Could not evaluate the name of {}, falling back to the deployed inventory: {}",
                        logical_id, e
                    );
                }
                Err(e) => return Err(e),
            }
        }
        self.find_physical_name_for(logical_id).await
    }

    /// Returns every other resource whose definition mentions `logical_id`.
    #[must_use]
    pub fn find_references_to(&self, logical_id: &str) -> Vec<ResourceReference<'_>> {
        self.template
            .resources
            .iter()
            .filter(|(id, _)| id.as_str() != logical_id)
            .filter(|(_, definition)| definition.mentions(logical_id))
            .map(|(id, definition)| ResourceReference {
                logical_id: id,
                definition,
            })
            .collect()
    }

    /// Physical ID of a deployed resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment query fails.
    pub async fn find_physical_name_for(&self, logical_id: &str) -> Result<Option<String>> {
        let resources = self.context.stack_resources().await?;
        Ok(resources
            .iter()
            .find(|r| r.logical_id == logical_id)
            .map(|r| r.physical_id.clone()))
    }

    /// Logical ID of the deployed resource with the given physical ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment query fails.
    pub async fn find_logical_id_for_physical_name(&self, physical_id: &str) -> Result<Option<String>> {
        let resources = self.context.stack_resources().await?;
        Ok(resources
            .iter()
            .find(|r| r.physical_id == physical_id)
            .map(|r| r.logical_id.clone()))
    }
}

/// Renders a scalar as a string; null renders as the empty string.
///
/// # Errors
///
/// Returns an error for lists and mappings.
pub fn stringify_scalar(name: &str, value: &Value) -> std::result::Result<String, EvaluationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(EvaluationError::type_mismatch(name, "a scalar", other)),
    }
}
