//! Read-only queries against the deployed environment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One deployed resource of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackResource {
    /// Logical ID in the template.
    pub logical_id: String,
    /// Physical ID assigned by the platform.
    pub physical_id: String,
    /// Resource type string.
    pub resource_type: String,
}

impl StackResource {
    /// Creates a stack resource record.
    #[must_use]
    pub fn new(
        logical_id: impl Into<String>,
        physical_id: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            physical_id: physical_id.into(),
            resource_type: resource_type.into(),
        }
    }
}

/// A cross-stack export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    /// Export name.
    pub name: String,
    /// Exported value; exports without a value exist but cannot be imported.
    #[serde(default)]
    pub value: Option<String>,
}

/// One page of the export listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPage {
    /// Exports on this page.
    pub exports: Vec<Export>,
    /// Token of the next page; absent on the last page.
    pub next_page_token: Option<String>,
}

/// Queries the evaluator issues against the deployed environment.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnvironmentQuery: Send + Sync {
    /// Lists every deployed resource of a stack.
    async fn list_stack_resources(&self, stack_name: &str) -> Result<Vec<StackResource>>;

    /// Lists one page of exports, starting at `page_token`.
    async fn list_exports(&self, page_token: Option<String>) -> Result<ExportPage>;

    /// Returns the domain suffix of the given region.
    async fn url_suffix(&self, region: &str) -> Result<String>;
}
