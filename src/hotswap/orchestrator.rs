//! Runs every classifier over a change set and applies the result.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::HotswapConfig;
use crate::error::Result;
use crate::services::HotswapServices;
use crate::template::{ChangeSet, ResourceChange, TemplateEvaluator};

use super::appsync::AppSyncClassifier;
use super::bucket_deployment::{BucketDeploymentClassifier, skip_change_for_bucket_deployment_policy};
use super::codebuild::CodeBuildProjectClassifier;
use super::common::{
    HotswapMode, HotswapOutcome, HotswappableChange, NonHotswappableChange, ResourceClassifier,
    report_non_hotswappable_change,
};
use super::ecs::EcsServiceClassifier;
use super::lambda::LambdaFunctionClassifier;
use super::report::{HotswapReport, HotswapStatus, HotswappableSummary};
use super::stepfunctions::StateMachineClassifier;

/// Resource type of the deployment tool's own metadata resource.
pub const CDK_METADATA: &str = "AWS::CDK::Metadata";

/// Classifies and applies hotswaps.
pub struct HotswapOrchestrator {
    classifiers: Vec<Box<dyn ResourceClassifier>>,
}

impl std::fmt::Debug for HotswapOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.classifiers.iter().map(|c| c.name()).collect();
        f.debug_struct("HotswapOrchestrator")
            .field("classifiers", &names)
            .finish()
    }
}

/// Outcomes of one change set, split by kind.
#[derive(Debug, Default)]
pub struct Classification {
    /// Changes that can be patched directly.
    pub hotswappable: Vec<HotswappableChange>,
    /// Changes that need a full deployment.
    pub non_hotswappable: Vec<NonHotswappableChange>,
}

impl Classification {
    fn from_outcomes(outcomes: Vec<HotswapOutcome>) -> Self {
        let mut classification = Self::default();
        for outcome in outcomes {
            match outcome {
                HotswapOutcome::Hotswappable(change) => classification.hotswappable.push(change),
                HotswapOutcome::NonHotswappable(change) => classification.non_hotswappable.push(change),
            }
        }
        classification
    }

    /// Returns true if nothing was classified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hotswappable.is_empty() && self.non_hotswappable.is_empty()
    }

    fn summaries(&self) -> Vec<HotswappableSummary> {
        self.hotswappable.iter().map(HotswappableSummary::from).collect()
    }
}

impl HotswapOrchestrator {
    /// Creates an orchestrator with every built-in classifier.
    #[must_use]
    pub fn new(config: &HotswapConfig) -> Self {
        Self::with_classifiers(vec![
            Box::new(LambdaFunctionClassifier::new(config.waits)),
            Box::new(EcsServiceClassifier::new(config.ecs, config.waits)),
            Box::new(StateMachineClassifier),
            Box::new(CodeBuildProjectClassifier),
            Box::new(BucketDeploymentClassifier),
            Box::new(AppSyncClassifier::new(config.waits)),
        ])
    }

    /// Creates an orchestrator with the given classifiers.
    #[must_use]
    pub fn with_classifiers(classifiers: Vec<Box<dyn ResourceClassifier>>) -> Self {
        Self { classifiers }
    }

    /// Classifies every change of a change set.
    ///
    /// Resource changes are classified concurrently; every classification
    /// is awaited before the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first evaluation or environment error.
    pub async fn classify(
        &self,
        change_set: &ChangeSet,
        evaluator: &Arc<TemplateEvaluator>,
    ) -> Result<Classification> {
        let mut outcomes = Vec::new();

        for section in &change_set.non_resource_changes {
            outcomes.push(HotswapOutcome::NonHotswappable(NonHotswappableChange {
                resource_type: section.clone(),
                logical_id: section.clone(),
                rejected_properties: Vec::new(),
                reason: format!("changes to the '{section}' section are not hotswappable"),
                hotswap_only_visible: true,
            }));
        }

        let results = join_all(
            change_set
                .resource_changes
                .iter()
                .map(|change| self.classify_change(change, evaluator)),
        )
        .await;
        for result in results {
            outcomes.extend(result?);
        }

        Ok(Classification::from_outcomes(outcomes))
    }

    async fn classify_change(
        &self,
        change: &ResourceChange,
        evaluator: &Arc<TemplateEvaluator>,
    ) -> Result<Vec<HotswapOutcome>> {
        let logical_id = change.logical_id.as_str();
        let mut outcomes = Vec::new();

        let (Some(old_type), Some(new_type)) = (change.old_type(), change.new_type()) else {
            let reason = if change.old_definition.is_none() {
                format!("resource '{logical_id}' was created by this deployment")
            } else {
                format!("resource '{logical_id}' was destroyed by this deployment")
            };
            report_non_hotswappable_change(&mut outcomes, change, Vec::new(), Some(reason), true);
            return Ok(outcomes);
        };

        if old_type != new_type {
            report_non_hotswappable_change(
                &mut outcomes,
                change,
                vec![String::from("Type")],
                Some(format!(
                    "resource '{logical_id}' had its type changed from '{old_type}' to '{new_type}'"
                )),
                true,
            );
            return Ok(outcomes);
        }

        if new_type == CDK_METADATA {
            return Ok(outcomes);
        }

        if skip_change_for_bucket_deployment_policy(logical_id, change, evaluator).await? {
            debug!("Skipping policy {} used only by bucket deployments", logical_id);
            return Ok(outcomes);
        }

        for classifier in &self.classifiers {
            let classified = classifier.classify(logical_id, change, evaluator).await?;
            if !classified.is_empty() {
                debug!("{} classified {} into {} outcomes", classifier.name(), logical_id, classified.len());
            }
            outcomes.extend(classified);
        }

        if outcomes.is_empty() {
            let changed = change.changed_property_names();
            if !changed.is_empty() {
                report_non_hotswappable_change(
                    &mut outcomes,
                    change,
                    changed,
                    Some(format!("resource type '{new_type}' is not supported for hotswap")),
                    true,
                );
            }
        }

        Ok(outcomes)
    }

    /// Classifies a change set without applying anything.
    ///
    /// # Errors
    ///
    /// Returns the first classification error.
    pub async fn plan(
        &self,
        mode: HotswapMode,
        change_set: &ChangeSet,
        evaluator: &Arc<TemplateEvaluator>,
    ) -> Result<HotswapReport> {
        if mode == HotswapMode::FullDeployment {
            return Ok(HotswapReport::new(mode, HotswapStatus::Bypassed, Vec::new(), Vec::new()));
        }

        let classification = self.classify(change_set, evaluator).await?;
        let status = if classification.is_empty() {
            HotswapStatus::NoOp
        } else if mode == HotswapMode::FallBack && !classification.non_hotswappable.is_empty() {
            HotswapStatus::FallBackRequired
        } else {
            HotswapStatus::Planned
        };

        Ok(HotswapReport::new(
            mode,
            status,
            classification.summaries(),
            classification.non_hotswappable,
        ))
    }

    /// Classifies a change set and applies what the mode allows.
    ///
    /// In fall-back mode nothing is applied unless every change is
    /// hotswappable. In hotswap-only mode every hotswappable change is
    /// applied and the rest are logged as advisories.
    ///
    /// # Errors
    ///
    /// Returns the first classification or apply error. Patches already
    /// applied are not reverted.
    pub async fn try_hotswap(
        &self,
        mode: HotswapMode,
        change_set: &ChangeSet,
        evaluator: &Arc<TemplateEvaluator>,
        services: &dyn HotswapServices,
    ) -> Result<HotswapReport> {
        if mode == HotswapMode::FullDeployment {
            info!("Hotswap disabled, a full deployment is required");
            return Ok(HotswapReport::new(mode, HotswapStatus::Bypassed, Vec::new(), Vec::new()));
        }

        let classification = self.classify(change_set, evaluator).await?;
        let summaries = classification.summaries();

        if mode == HotswapMode::FallBack && !classification.non_hotswappable.is_empty() {
            info!(
                "{} changes are not hotswappable, falling back to a full deployment",
                classification.non_hotswappable.len()
            );
            return Ok(HotswapReport::new(
                mode,
                HotswapStatus::FallBackRequired,
                summaries,
                classification.non_hotswappable,
            ));
        }

        for advisory in classification
            .non_hotswappable
            .iter()
            .filter(|change| change.hotswap_only_visible)
        {
            warn!(
                "{} ({}) was not hotswapped: {}",
                advisory.logical_id, advisory.resource_type, advisory.reason
            );
        }

        if classification.hotswappable.is_empty() {
            info!("No hotswappable changes found");
            return Ok(HotswapReport::new(
                mode,
                HotswapStatus::NoOp,
                summaries,
                classification.non_hotswappable,
            ));
        }

        let results = join_all(classification.hotswappable.iter().map(|change| async move {
            for name in &change.resource_names {
                info!("Hotswapping {}", name);
            }
            change.action.apply(services).await
        }))
        .await;
        results.into_iter().collect::<Result<Vec<_>>>()?;

        info!("Hotswapped {} changes", classification.hotswappable.len());
        Ok(HotswapReport::new(
            mode,
            HotswapStatus::Applied,
            summaries,
            classification.non_hotswappable,
        ))
    }
}
