//! Hotswap classification and application.
//!
//! Each supported resource kind has a classifier that turns a
//! [`ResourceChange`](crate::template::ResourceChange) into hotswappable
//! patches and non-hotswappable findings. The [`HotswapOrchestrator`] runs
//! every classifier over a change set and decides, per [`HotswapMode`],
//! whether the patches are applied.

mod appsync;
mod bucket_deployment;
mod codebuild;
mod common;
mod ecs;
mod lambda;
mod orchestrator;
mod report;
mod stepfunctions;

#[cfg(test)]
mod test_support;

pub use appsync::{
    APPSYNC_API_KEY, APPSYNC_FUNCTION, APPSYNC_RESOLVER, APPSYNC_SCHEMA, AppSyncClassifier,
};
pub use bucket_deployment::{
    BUCKET_DEPLOYMENT, BucketDeploymentClassifier, IAM_POLICY, REQUIRED_BY_CFN,
    skip_change_for_bucket_deployment_policy,
};
pub use codebuild::{CODEBUILD_PROJECT, CodeBuildProjectClassifier};
pub use common::{
    ClassifiedChanges, HotswapAction, HotswapMode, HotswapOutcome, HotswappableChange,
    KeyExclusion, NonHotswappableChange, NoopAction, ResourceClassifier, lower_case_first_character,
    report_non_hotswappable_change, transform_object_keys,
};
pub use ecs::{ECS_SERVICE, EcsServiceClassifier, TASK_DEFINITION};
pub use lambda::{LAMBDA_ALIAS, LAMBDA_FUNCTION, LAMBDA_VERSION, LambdaFunctionClassifier};
pub use orchestrator::{CDK_METADATA, Classification, HotswapOrchestrator};
pub use report::{HotswapReport, HotswapStatus, HotswappableSummary};
pub use stepfunctions::{STATE_MACHINE, StateMachineClassifier};
