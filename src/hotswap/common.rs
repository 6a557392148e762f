//! Outcomes, modes, and helpers shared by every resource classifier.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::Result;
use crate::services::HotswapServices;
use crate::template::{PropertyDiff, ResourceChange, TemplateEvaluator};

/// How a deployment treats changes that cannot be hotswapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HotswapMode {
    /// Apply hotswaps only if every change is hotswappable, otherwise
    /// leave the whole change to a full deployment.
    #[default]
    FallBack,
    /// Apply every hotswappable change and report the rest.
    HotswapOnly,
    /// Do not hotswap at all.
    FullDeployment,
}

impl HotswapMode {
    /// The mode's name as written in configuration.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FallBack => "fall-back",
            Self::HotswapOnly => "hotswap-only",
            Self::FullDeployment => "full-deployment",
        }
    }
}

impl fmt::Display for HotswapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HotswapMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fall-back" | "fallback" => Ok(Self::FallBack),
            "hotswap-only" => Ok(Self::HotswapOnly),
            "full-deployment" => Ok(Self::FullDeployment),
            other => Err(format!(
                "unknown hotswap mode '{other}', expected fall-back, hotswap-only or full-deployment"
            )),
        }
    }
}

/// A deferred patch produced by a classifier.
#[async_trait]
pub trait HotswapAction: fmt::Debug + Send + Sync {
    /// Applies the patch.
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()>;
}

/// An action that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAction;

#[async_trait]
impl HotswapAction for NoopAction {
    async fn apply(&self, _services: &dyn HotswapServices) -> Result<()> {
        Ok(())
    }
}

/// A change that can be applied directly.
#[derive(Debug)]
pub struct HotswappableChange {
    /// Resource type of the changed resource.
    pub resource_type: String,
    /// Properties the patch covers.
    pub props_changed: Vec<String>,
    /// Service the patch talks to.
    pub service: &'static str,
    /// Human-readable names of every resource the patch touches.
    pub resource_names: Vec<String>,
    /// The patch itself.
    pub action: Box<dyn HotswapAction>,
}

impl HotswappableChange {
    /// A hotswappable change whose patch does nothing.
    #[must_use]
    pub fn noop(resource_type: impl Into<String>, service: &'static str) -> Self {
        Self {
            resource_type: resource_type.into(),
            props_changed: Vec::new(),
            service,
            resource_names: Vec::new(),
            action: Box::new(NoopAction),
        }
    }
}

/// A change that cannot be hotswapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonHotswappableChange {
    /// Resource type of the changed resource.
    pub resource_type: String,
    /// Logical ID of the changed resource.
    pub logical_id: String,
    /// Properties that block hotswapping.
    pub rejected_properties: Vec<String>,
    /// Why the change cannot be hotswapped.
    pub reason: String,
    /// Whether the change is listed as an advisory in hotswap-only mode.
    pub hotswap_only_visible: bool,
}

/// The result of classifying one resource change.
#[derive(Debug)]
pub enum HotswapOutcome {
    /// The change can be patched directly.
    Hotswappable(HotswappableChange),
    /// The change needs a full deployment.
    NonHotswappable(NonHotswappableChange),
}

/// Classifies changes of one resource kind.
#[async_trait]
pub trait ResourceClassifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Classifies a change; changes of other kinds yield no outcomes.
    async fn classify(
        &self,
        logical_id: &str,
        change: &ResourceChange,
        evaluator: &Arc<TemplateEvaluator>,
    ) -> Result<Vec<HotswapOutcome>>;
}

/// Records a non-hotswappable outcome.
///
/// Without a `reason`, the outcome states that the rejected properties are
/// not hotswappable.
pub fn report_non_hotswappable_change(
    outcomes: &mut Vec<HotswapOutcome>,
    change: &ResourceChange,
    rejected_properties: Vec<String>,
    reason: Option<String>,
    hotswap_only_visible: bool,
) {
    let reason = reason.unwrap_or_else(|| {
        format!(
            "resource properties '{}' are not hotswappable",
            rejected_properties.join(", ")
        )
    });
    outcomes.push(HotswapOutcome::NonHotswappable(NonHotswappableChange {
        resource_type: change
            .new_type()
            .or_else(|| change.old_type())
            .unwrap_or_default()
            .to_string(),
        logical_id: change.logical_id.clone(),
        rejected_properties,
        reason,
        hotswap_only_visible,
    }));
}

/// A change's property diffs split against an allow-list.
#[derive(Debug)]
pub struct ClassifiedChanges<'a> {
    change: &'a ResourceChange,
    hotswappable: BTreeMap<&'a str, &'a PropertyDiff>,
    non_hotswappable: Vec<&'a str>,
}

impl<'a> ClassifiedChanges<'a> {
    /// Splits the differing properties of `change` against `allowed`.
    #[must_use]
    pub fn new(change: &'a ResourceChange, allowed: &[&str]) -> Self {
        let mut hotswappable = BTreeMap::new();
        let mut non_hotswappable = Vec::new();
        for (name, diff) in change.changed_properties() {
            if allowed.contains(&name.as_str()) {
                hotswappable.insert(name.as_str(), diff);
            } else {
                non_hotswappable.push(name.as_str());
            }
        }
        Self {
            change,
            hotswappable,
            non_hotswappable,
        }
    }

    /// True if any allowed property changed.
    #[must_use]
    pub fn has_hotswappable_changes(&self) -> bool {
        !self.hotswappable.is_empty()
    }

    /// Names of the allowed properties that changed.
    #[must_use]
    pub fn hotswappable_names(&self) -> Vec<String> {
        self.hotswappable.keys().map(|name| (*name).to_string()).collect()
    }

    /// Allowed properties that changed, with their diffs.
    #[must_use]
    pub const fn hotswappable_props(&self) -> &BTreeMap<&'a str, &'a PropertyDiff> {
        &self.hotswappable
    }

    /// New values of the allowed properties that changed; removed
    /// properties map to null.
    #[must_use]
    pub fn hotswappable_new_values(&self) -> Map<String, Value> {
        self.hotswappable
            .iter()
            .map(|(name, diff)| ((*name).to_string(), diff.new_value.clone().unwrap_or(Value::Null)))
            .collect()
    }

    /// Records one non-hotswappable outcome per rejected property.
    pub fn report_non_hotswappable_property_changes(&self, outcomes: &mut Vec<HotswapOutcome>) {
        for name in &self.non_hotswappable {
            report_non_hotswappable_change(
                outcomes,
                self.change,
                vec![(*name).to_string()],
                None,
                true,
            );
        }
    }
}

/// Keys that [`transform_object_keys`] leaves alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExclusion {
    /// The value under this key is copied verbatim.
    Verbatim,
    /// The value under this key is transformed with its own exclusions.
    Nested(&'static [(&'static str, KeyExclusion)]),
}

/// Recursively renames every mapping key with `transform`.
///
/// Keys are always renamed; `exclusions` only decide whether the value
/// under a key is transformed further.
#[must_use]
pub fn transform_object_keys(
    value: &Value,
    transform: fn(&str) -> String,
    exclusions: &[(&str, KeyExclusion)],
) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| transform_object_keys(item, transform, exclusions))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, child)| {
                    let exclusion = exclusions
                        .iter()
                        .find(|(name, _)| *name == key.as_str())
                        .map(|(_, exclusion)| *exclusion);
                    let child = match exclusion {
                        Some(KeyExclusion::Verbatim) => child.clone(),
                        Some(KeyExclusion::Nested(inner)) => {
                            transform_object_keys(child, transform, inner)
                        }
                        None => transform_object_keys(child, transform, &[]),
                    };
                    (transform(key), child)
                })
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}

/// Lowercases the first character, `ContainerDefinitions` -> `containerDefinitions`.
#[must_use]
pub fn lower_case_first_character(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_lowercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ResourceDefinition;
    use serde_json::json;

    fn change(old: Value, new: Value) -> ResourceChange {
        let old: Map<String, Value> = serde_json::from_value(old).unwrap();
        let new: Map<String, Value> = serde_json::from_value(new).unwrap();
        ResourceChange::from_definitions(
            "Func",
            Some(ResourceDefinition::new("AWS::Lambda::Function", old)),
            Some(ResourceDefinition::new("AWS::Lambda::Function", new)),
        )
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("fall-back".parse::<HotswapMode>().unwrap(), HotswapMode::FallBack);
        assert_eq!("HOTSWAP-ONLY".parse::<HotswapMode>().unwrap(), HotswapMode::HotswapOnly);
        assert_eq!(
            "full-deployment".parse::<HotswapMode>().unwrap(),
            HotswapMode::FullDeployment
        );
        assert!("sometimes".parse::<HotswapMode>().is_err());
        assert_eq!(HotswapMode::HotswapOnly.to_string(), "hotswap-only");
    }

    #[test]
    fn test_classify_changes_splits_on_allow_list() {
        let change = change(
            json!({ "Description": "a", "Timeout": 3, "MemorySize": 128 }),
            json!({ "Description": "b", "Timeout": 5, "MemorySize": 256 }),
        );
        let classified = ClassifiedChanges::new(&change, &["Description"]);
        assert_eq!(classified.hotswappable_names(), vec!["Description"]);

        let mut outcomes = Vec::new();
        classified.report_non_hotswappable_property_changes(&mut outcomes);
        assert_eq!(outcomes.len(), 2);
        for outcome in &outcomes {
            match outcome {
                HotswapOutcome::NonHotswappable(non) => {
                    assert_eq!(non.rejected_properties.len(), 1);
                    assert!(non.hotswap_only_visible);
                    assert!(non.reason.contains("not hotswappable"));
                }
                HotswapOutcome::Hotswappable(_) => panic!("expected non-hotswappable"),
            }
        }
    }

    #[test]
    fn test_removed_property_maps_to_null() {
        let change = change(json!({ "Description": "a" }), json!({}));
        let classified = ClassifiedChanges::new(&change, &["Description"]);
        assert_eq!(classified.hotswappable_new_values()["Description"], Value::Null);
    }

    #[test]
    fn test_lower_case_first_character() {
        assert_eq!(lower_case_first_character("ContainerDefinitions"), "containerDefinitions");
        assert_eq!(lower_case_first_character("x"), "x");
        assert_eq!(lower_case_first_character(""), "");
    }

    #[test]
    fn test_transform_object_keys_with_exclusions() {
        const EXCLUSIONS: &[(&str, KeyExclusion)] = &[(
            "Containers",
            KeyExclusion::Nested(&[("Labels", KeyExclusion::Verbatim)]),
        )];
        let value = json!({
            "Family": "web",
            "Containers": [{ "Name": "app", "Labels": { "Team": "Core" } }]
        });

        let transformed = transform_object_keys(&value, lower_case_first_character, EXCLUSIONS);
        assert_eq!(
            transformed,
            json!({
                "family": "web",
                "containers": [{ "name": "app", "labels": { "Team": "Core" } }]
            })
        );
    }
}
