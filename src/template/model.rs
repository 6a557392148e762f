//! Template, resource, and change-set documents.
//!
//! These types mirror the shape of a deployment template and of the
//! resource-level diff produced before a deployment. They are loaded from
//! JSON or YAML and are read-only afterwards.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::{Result, TemplateError};

/// A deployment template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Declared parameters, in document order.
    #[serde(rename = "Parameters", default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, ParameterDeclaration>,

    /// Resource definitions keyed by logical ID, in document order.
    #[serde(rename = "Resources", default)]
    pub resources: IndexMap<String, ResourceDefinition>,

    /// Declared outputs, in document order.
    #[serde(rename = "Outputs", default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, OutputDeclaration>,

    /// Every other top-level section, kept verbatim.
    #[serde(flatten)]
    pub sections: Map<String, Value>,
}

/// A template parameter declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterDeclaration {
    /// Declared parameter type.
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub parameter_type: Option<String>,

    /// Default value used when no value is supplied.
    #[serde(rename = "Default", default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Remaining declaration keys.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// A template output declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputDeclaration {
    /// The output value expression.
    #[serde(rename = "Value", default)]
    pub value: Value,

    /// Remaining declaration keys (`Export`, `Description`, ...).
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// A single resource definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Resource type string, for example `AWS::Lambda::Function`.
    #[serde(rename = "Type")]
    pub resource_type: String,

    /// Resource properties.
    #[serde(rename = "Properties", default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,

    /// Other resource attributes (`DependsOn`, `Metadata`, ...).
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ResourceDefinition {
    /// Creates a definition with the given type and properties.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, properties: Map<String, Value>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties,
            attributes: Map::new(),
        }
    }

    /// Returns a property expression by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Returns true if some string value in the properties or attributes
    /// equals `logical_id`.
    ///
    /// Map keys and the type string are names, not references, and never
    /// count.
    #[must_use]
    pub fn mentions(&self, logical_id: &str) -> bool {
        self.properties.values().any(|v| value_mentions(v, logical_id))
            || self.attributes.values().any(|v| value_mentions(v, logical_id))
    }
}

fn value_mentions(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s == needle,
        Value::Array(items) => items.iter().any(|v| value_mentions(v, needle)),
        Value::Object(map) => map.values().any(|v| value_mentions(v, needle)),
        _ => false,
    }
}

/// Old and new value of one property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDiff {
    /// Value before the deployment, absent if the property is new.
    #[serde(default)]
    pub old_value: Option<Value>,

    /// Value after the deployment, absent if the property was removed.
    #[serde(default)]
    pub new_value: Option<Value>,
}

impl PropertyDiff {
    /// Returns true if the old and new values differ.
    #[must_use]
    pub fn is_different(&self) -> bool {
        self.old_value != self.new_value
    }
}

/// The change to a single resource between two template versions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChange {
    /// Logical ID of the changed resource.
    pub logical_id: String,

    /// Definition before the deployment, absent for additions.
    #[serde(default)]
    pub old_definition: Option<ResourceDefinition>,

    /// Definition after the deployment, absent for removals.
    #[serde(default)]
    pub new_definition: Option<ResourceDefinition>,

    /// Per-property diffs.
    #[serde(default)]
    pub property_diffs: BTreeMap<String, PropertyDiff>,
}

impl ResourceChange {
    /// Builds a change from two definitions, diffing top-level properties.
    #[must_use]
    pub fn from_definitions(
        logical_id: impl Into<String>,
        old_definition: Option<ResourceDefinition>,
        new_definition: Option<ResourceDefinition>,
    ) -> Self {
        let empty = Map::new();
        let old_props = old_definition.as_ref().map_or(&empty, |d| &d.properties);
        let new_props = new_definition.as_ref().map_or(&empty, |d| &d.properties);

        let mut property_diffs = BTreeMap::new();
        for name in old_props.keys().chain(new_props.keys()) {
            let diff = PropertyDiff {
                old_value: old_props.get(name).cloned(),
                new_value: new_props.get(name).cloned(),
            };
            if diff.is_different() {
                property_diffs.insert(name.clone(), diff);
            }
        }

        Self {
            logical_id: logical_id.into(),
            old_definition,
            new_definition,
            property_diffs,
        }
    }

    /// Type of the new definition, if any.
    #[must_use]
    pub fn new_type(&self) -> Option<&str> {
        self.new_definition.as_ref().map(|d| d.resource_type.as_str())
    }

    /// Type of the old definition, if any.
    #[must_use]
    pub fn old_type(&self) -> Option<&str> {
        self.old_definition.as_ref().map(|d| d.resource_type.as_str())
    }

    /// Properties of the new definition (empty if removed).
    #[must_use]
    pub fn new_properties(&self) -> &Map<String, Value> {
        static EMPTY: std::sync::LazyLock<Map<String, Value>> = std::sync::LazyLock::new(Map::new);
        self.new_definition
            .as_ref()
            .map_or(&*EMPTY, |d| &d.properties)
    }

    /// Diffs whose old and new values actually differ.
    pub fn changed_properties(&self) -> impl Iterator<Item = (&String, &PropertyDiff)> {
        self.property_diffs.iter().filter(|(_, d)| d.is_different())
    }

    /// Names of the properties whose values actually differ.
    #[must_use]
    pub fn changed_property_names(&self) -> Vec<String> {
        self.changed_properties().map(|(name, _)| name.clone()).collect()
    }
}

/// The resource-level diff of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    /// Changed resources.
    #[serde(default)]
    pub resource_changes: Vec<ResourceChange>,

    /// Names of changed non-resource sections (`Outputs`, `Conditions`, ...).
    #[serde(default)]
    pub non_resource_changes: Vec<String>,
}

/// A deployed nested stack and the template it was deployed with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedStack {
    /// Deployed name of the nested stack, absent if not yet deployed.
    #[serde(default)]
    pub physical_name: Option<String>,

    /// Template of the nested stack.
    #[serde(default)]
    pub template: Template,

    /// Stacks nested inside this one, keyed by logical ID.
    #[serde(default)]
    pub nested_stacks: NestedStacks,
}

/// Nested stacks keyed by the logical ID of their stack resource.
pub type NestedStacks = BTreeMap<String, NestedStack>;

/// Finds a nested stack by logical ID anywhere in the registry.
#[must_use]
pub fn find_nested_stack<'a>(stacks: &'a NestedStacks, logical_id: &str) -> Option<&'a NestedStack> {
    stacks.get(logical_id).or_else(|| {
        stacks
            .values()
            .find_map(|nested| find_nested_stack(&nested.nested_stacks, logical_id))
    })
}

/// Loads a JSON or YAML document from disk.
///
/// Files ending in `.yaml` or `.yml` are parsed as YAML, everything else
/// as JSON.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not match `T`.
pub fn load_document<T: DeserializeOwned>(path: impl AsRef<Path>, what: &str) -> Result<T> {
    let path = path.as_ref();
    debug!("Loading {} from {}", what, path.display());

    let content = std::fs::read_to_string(path).map_err(|e| TemplateError::ReadFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    if is_yaml {
        parse_yaml_document(&content, what)
    } else {
        parse_json_document(&content, what)
    }
}

/// Parses a JSON document.
///
/// # Errors
///
/// Returns an error if the content is not valid JSON of the right shape.
pub fn parse_json_document<T: DeserializeOwned>(content: &str, what: &str) -> Result<T> {
    serde_json::from_str(content).map_err(|e| {
        TemplateError::ParseError {
            what: what.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

/// Parses a YAML document.
///
/// # Errors
///
/// Returns an error if the content is not valid YAML of the right shape.
pub fn parse_yaml_document<T: DeserializeOwned>(content: &str, what: &str) -> Result<T> {
    serde_yaml::from_str(content).map_err(|e| {
        TemplateError::ParseError {
            what: what.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}
