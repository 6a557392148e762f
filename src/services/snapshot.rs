//! File-backed environment for offline classification.
//!
//! A snapshot records what the deployed environment looked like: the
//! stack's resources, its nested stacks, the account's exports, and the
//! parameter values in use. It answers [`EnvironmentQuery`] without any
//! network access.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, ServiceError};
use crate::template::{EnvironmentContext, NestedStacks, load_document};

use super::environment::{EnvironmentQuery, Export, ExportPage, StackResource};

/// Exports returned per page.
pub const EXPORT_PAGE_SIZE: usize = 100;

fn default_partition() -> String {
    String::from("aws")
}

fn default_url_suffix() -> String {
    String::from("amazonaws.com")
}

/// A recorded deployment environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSnapshot {
    /// Name of the root stack.
    pub stack_name: String,

    /// Account ID.
    pub account: String,

    /// Region.
    pub region: String,

    /// Partition.
    #[serde(default = "default_partition")]
    pub partition: String,

    /// Domain suffix of the region.
    #[serde(default = "default_url_suffix")]
    pub url_suffix: String,

    /// Parameter values in use by the root stack.
    #[serde(default)]
    pub parameters: HashMap<String, Value>,

    /// Deployed resources keyed by stack name, root and nested.
    #[serde(default)]
    pub stacks: HashMap<String, Vec<StackResource>>,

    /// Exports of the account and region.
    #[serde(default)]
    pub exports: Vec<Export>,

    /// Nested stacks of the root stack.
    #[serde(default)]
    pub nested_stacks: NestedStacks,
}

impl EnvironmentSnapshot {
    /// Loads a snapshot from a JSON or YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_document(path, "environment snapshot")
    }

    /// Builds an evaluation context for the root stack backed by this snapshot.
    #[must_use]
    pub fn into_context(self) -> EnvironmentContext {
        let stack_name = self.stack_name.clone();
        let account = self.account.clone();
        let region = self.region.clone();
        let partition = self.partition.clone();
        let parameters = self.parameters.clone();
        let nested_stacks = self.nested_stacks.clone();

        EnvironmentContext::new(Arc::new(self), stack_name, account, region, partition)
            .with_parameters(parameters)
            .with_nested_stacks(nested_stacks)
    }
}

#[async_trait]
impl EnvironmentQuery for EnvironmentSnapshot {
    async fn list_stack_resources(&self, stack_name: &str) -> Result<Vec<StackResource>> {
        self.stacks.get(stack_name).cloned().ok_or_else(|| {
            ServiceError::call_failed(
                "cloudformation",
                "ListStackResources",
                format!("Stack with id {stack_name} does not exist"),
            )
            .into()
        })
    }

    async fn list_exports(&self, page_token: Option<String>) -> Result<ExportPage> {
        let start = match page_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                ServiceError::call_failed("cloudformation", "ListExports", format!("invalid token {token}"))
            })?,
            None => 0,
        };

        let exports: Vec<Export> = self
            .exports
            .iter()
            .skip(start)
            .take(EXPORT_PAGE_SIZE)
            .cloned()
            .collect();
        let end = start.saturating_add(exports.len());
        let next_page_token = (end < self.exports.len()).then(|| end.to_string());

        Ok(ExportPage {
            exports,
            next_page_token,
        })
    }

    async fn url_suffix(&self, _region: &str) -> Result<String> {
        Ok(self.url_suffix.clone())
    }
}
