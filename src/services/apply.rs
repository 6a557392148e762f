//! Service calls issued while applying hotswap patches.
//!
//! Request and response types carry only the fields the patches use.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// A new code location for a function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionCodeUpdate {
    /// Physical name of the function.
    pub function_name: String,
    /// Bucket holding the code archive.
    pub s3_bucket: Option<String>,
    /// Key of the code archive.
    pub s3_key: Option<String>,
    /// Object version of the code archive.
    pub s3_object_version: Option<String>,
    /// Container image URI.
    pub image_uri: Option<String>,
    /// Zipped inline code.
    pub zip_file: Option<Vec<u8>>,
}

/// A configuration change for a function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionConfigurationUpdate {
    /// Physical name of the function.
    pub function_name: String,
    /// New description.
    pub description: Option<String>,
    /// New environment block (`{"Variables": {...}}`).
    pub environment: Option<Value>,
}

/// Lifecycle state of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionState {
    /// Being created or reconfigured.
    Pending,
    /// Ready for invocation.
    Active,
    /// Idle and reclaimed.
    Inactive,
    /// Creation failed.
    Failed,
}

/// Status of the most recent update to a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastUpdateStatus {
    /// Update still running.
    InProgress,
    /// Update completed.
    Successful,
    /// Update failed.
    Failed,
}

/// The parts of a function's configuration the update waiter reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfiguration {
    /// Lifecycle state.
    pub state: Option<FunctionState>,
    /// Status of the last update.
    pub last_update_status: Option<LastUpdateStatus>,
    /// Reason attached to the last update status.
    pub last_update_status_reason: Option<String>,
    /// VPC the function is attached to.
    pub vpc_id: Option<String>,
    /// `Zip` or `Image`.
    pub package_type: Option<String>,
}

impl FunctionConfiguration {
    /// Functions in a VPC or packaged as images take much longer to update.
    #[must_use]
    pub fn is_slow_to_update(&self) -> bool {
        self.vpc_id.as_deref().is_some_and(|id| !id.is_empty())
            || self.package_type.as_deref() == Some("Image")
    }

    /// Returns true once the last update has completed.
    #[must_use]
    pub fn is_update_complete(&self) -> bool {
        matches!(
            self.last_update_status,
            None | Some(LastUpdateStatus::Successful)
        ) && self.state != Some(FunctionState::Pending)
    }

    /// Returns true if the platform reports a failed update.
    #[must_use]
    pub fn is_update_failed(&self) -> bool {
        self.last_update_status == Some(LastUpdateStatus::Failed)
            || self.state == Some(FunctionState::Failed)
    }
}

/// A request to roll a container service onto a new task definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUpdate {
    /// Service ARN.
    pub service_arn: String,
    /// Cluster name taken from the service ARN.
    pub cluster: String,
    /// ARN of the newly registered task definition.
    pub task_definition_arn: String,
    /// Always set for hotswap deployments.
    pub force_new_deployment: bool,
    /// Minimum healthy percent during the rollout.
    pub minimum_healthy_percent: u32,
    /// Maximum percent during the rollout, platform default if absent.
    pub maximum_percent: Option<u32>,
}

/// Deployment status of a container service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Number of active deployments.
    pub deployments: usize,
    /// Running task count.
    pub running_count: u32,
    /// Desired task count.
    pub desired_count: u32,
}

impl ServiceStatus {
    /// A service is stable once a single deployment runs every desired task.
    #[must_use]
    pub const fn is_stable(&self) -> bool {
        self.deployments == 1 && self.running_count == self.desired_count
    }
}

/// A change to a build project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectUpdate {
    /// Project name.
    pub name: String,
    /// New source block, keys lowercased.
    pub source: Option<Value>,
    /// New environment block, keys lowercased.
    pub environment: Option<Value>,
    /// New source version.
    pub source_version: Option<String>,
}

/// A resolver function of a GraphQL API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSyncFunction {
    /// Function name, unique within the API.
    pub name: String,
    /// Identifier the API assigned to the function.
    pub function_id: String,
}

/// Progress of a schema creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaStatus {
    /// Creation running.
    Processing,
    /// Schema in use.
    Active,
    /// Previous schema being removed.
    Deleting,
    /// Creation failed.
    Failed,
    /// Creation completed.
    Success,
    /// No creation was requested.
    NotApplicable,
}

/// Status of the most recent schema creation of an API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCreationStatus {
    /// Current status.
    pub status: SchemaStatus,
    /// Failure details, if any.
    #[serde(default)]
    pub details: Option<String>,
}

impl SchemaCreationStatus {
    /// True while the schema is still being created or replaced.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(self.status, SchemaStatus::Processing | SchemaStatus::Deleting)
    }
}

/// The service operations hotswap patches are built from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HotswapServices: Send + Sync {
    /// Points a function at new code.
    async fn update_function_code(&self, update: &FunctionCodeUpdate) -> Result<FunctionConfiguration>;

    /// Changes a function's description or environment.
    async fn update_function_configuration(
        &self,
        update: &FunctionConfigurationUpdate,
    ) -> Result<FunctionConfiguration>;

    /// Reads a function's current configuration.
    async fn get_function_configuration(&self, function_name: &str) -> Result<FunctionConfiguration>;

    /// Publishes a new immutable version and returns its number.
    async fn publish_version(&self, function_name: &str) -> Result<String>;

    /// Points an alias at a version.
    async fn update_alias(&self, function_name: &str, alias_name: &str, version: &str) -> Result<()>;

    /// Registers a task definition and returns its ARN.
    async fn register_task_definition(&self, task_definition: &Value) -> Result<String>;

    /// Starts a service rollout and returns the cluster ARN.
    async fn update_service(&self, update: &ServiceUpdate) -> Result<String>;

    /// Reads a service's deployment status.
    async fn describe_service(&self, cluster: &str, service_arn: &str) -> Result<ServiceStatus>;

    /// Replaces a state machine definition.
    async fn update_state_machine(&self, state_machine_arn: &str, definition: &str) -> Result<()>;

    /// Updates a build project.
    async fn update_project(&self, update: &ProjectUpdate) -> Result<()>;

    /// Invokes a function synchronously with a JSON payload.
    async fn invoke_function(&self, function_name: &str, payload: &[u8]) -> Result<()>;

    /// Reads an object's body as text.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<String>;

    /// Replaces a resolver. The request uses the API's lower camel case keys.
    async fn update_resolver(&self, request: &Value) -> Result<()>;

    /// Lists every resolver function of an API.
    async fn list_functions(&self, api_id: &str) -> Result<Vec<AppSyncFunction>>;

    /// Replaces a resolver function.
    ///
    /// Fails with [`ServiceError::ConcurrentModification`](crate::error::ServiceError::ConcurrentModification)
    /// while another update of the same API is in flight.
    async fn update_function(&self, request: &Value) -> Result<()>;

    /// Starts replacing an API's schema.
    async fn start_schema_creation(&self, api_id: &str, definition: &str) -> Result<SchemaCreationStatus>;

    /// Reads the status of an API's latest schema creation.
    async fn get_schema_creation_status(&self, api_id: &str) -> Result<SchemaCreationStatus>;

    /// Updates an API key.
    async fn update_api_key(&self, request: &Value) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slow_to_update() {
        let in_vpc = FunctionConfiguration {
            vpc_id: Some(String::from("vpc-123")),
            ..FunctionConfiguration::default()
        };
        assert!(in_vpc.is_slow_to_update());

        let image = FunctionConfiguration {
            package_type: Some(String::from("Image")),
            ..FunctionConfiguration::default()
        };
        assert!(image.is_slow_to_update());

        let zip = FunctionConfiguration {
            vpc_id: Some(String::new()),
            package_type: Some(String::from("Zip")),
            ..FunctionConfiguration::default()
        };
        assert!(!zip.is_slow_to_update());
    }

    #[test]
    fn test_update_completion() {
        let in_progress = FunctionConfiguration {
            last_update_status: Some(LastUpdateStatus::InProgress),
            ..FunctionConfiguration::default()
        };
        assert!(!in_progress.is_update_complete());
        assert!(!in_progress.is_update_failed());

        let done = FunctionConfiguration {
            state: Some(FunctionState::Active),
            last_update_status: Some(LastUpdateStatus::Successful),
            ..FunctionConfiguration::default()
        };
        assert!(done.is_update_complete());

        let failed = FunctionConfiguration {
            last_update_status: Some(LastUpdateStatus::Failed),
            ..FunctionConfiguration::default()
        };
        assert!(failed.is_update_failed());
    }

    #[test]
    fn test_service_stability() {
        let rolling = ServiceStatus {
            deployments: 2,
            running_count: 2,
            desired_count: 2,
        };
        assert!(!rolling.is_stable());

        let stable = ServiceStatus {
            deployments: 1,
            running_count: 2,
            desired_count: 2,
        };
        assert!(stable.is_stable());
    }

    #[test]
    fn test_schema_status_parsing() {
        let status: SchemaCreationStatus =
            serde_json::from_str(r#"{"status": "PROCESSING"}"#).unwrap();
        assert!(status.is_in_progress());

        let status: SchemaCreationStatus =
            serde_json::from_str(r#"{"status": "FAILED", "details": "bad type"}"#).unwrap();
        assert!(!status.is_in_progress());
        assert_eq!(status.details.as_deref(), Some("bad type"));
    }
}
