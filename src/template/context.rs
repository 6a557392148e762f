//! Per-stack evaluation context.
//!
//! The context holds the environment a template is evaluated against:
//! account, region, partition, parameter values, the nested-stack registry,
//! and the environment query interface. Environment lookups are cached so
//! each evaluator hits the environment at most once per fact.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::error::Result;
use crate::services::{EnvironmentQuery, Export, StackResource};

use super::model::NestedStacks;

/// Pseudo-parameter for the account ID.
pub const ACCOUNT_ID: &str = "AWS::AccountId";
/// Pseudo-parameter for the region.
pub const REGION: &str = "AWS::Region";
/// Pseudo-parameter for the partition.
pub const PARTITION: &str = "AWS::Partition";
/// Pseudo-parameter for the domain suffix.
pub const URL_SUFFIX: &str = "AWS::URLSuffix";

#[derive(Debug, Default)]
struct ExportCursor {
    exports: HashMap<String, Export>,
    next_page_token: Option<String>,
    exhausted: bool,
}

/// Environment for evaluating one stack's template.
pub struct EnvironmentContext {
    stack_name: String,
    account: String,
    region: String,
    partition: String,
    parameters: HashMap<String, Value>,
    nested_stacks: Arc<NestedStacks>,
    query: Arc<dyn EnvironmentQuery>,
    stack_resources: OnceCell<Vec<StackResource>>,
    exports: Mutex<ExportCursor>,
    url_suffix: OnceCell<String>,
}

impl fmt::Debug for EnvironmentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentContext")
            .field("stack_name", &self.stack_name)
            .field("account", &self.account)
            .field("region", &self.region)
            .field("partition", &self.partition)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl EnvironmentContext {
    /// Creates a context for `stack_name`, seeding the pseudo-parameters.
    #[must_use]
    pub fn new(
        query: Arc<dyn EnvironmentQuery>,
        stack_name: impl Into<String>,
        account: impl Into<String>,
        region: impl Into<String>,
        partition: impl Into<String>,
    ) -> Self {
        let account = account.into();
        let region = region.into();
        let partition = partition.into();

        let mut parameters = HashMap::new();
        parameters.insert(ACCOUNT_ID.to_string(), Value::String(account.clone()));
        parameters.insert(REGION.to_string(), Value::String(region.clone()));
        parameters.insert(PARTITION.to_string(), Value::String(partition.clone()));

        Self {
            stack_name: stack_name.into(),
            account,
            region,
            partition,
            parameters,
            nested_stacks: Arc::new(NestedStacks::new()),
            query,
            stack_resources: OnceCell::new(),
            exports: Mutex::new(ExportCursor::default()),
            url_suffix: OnceCell::new(),
        }
    }

    /// Adds parameter values; explicit values override pseudo-parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// Sets the nested-stack registry.
    #[must_use]
    pub fn with_nested_stacks(mut self, nested_stacks: NestedStacks) -> Self {
        self.nested_stacks = Arc::new(nested_stacks);
        self
    }

    /// Creates the context of a nested stack.
    ///
    /// The child shares the environment and the nested-stack registry but
    /// has its own parameters and its own caches.
    #[must_use]
    pub fn nested(&self, stack_name: impl Into<String>, parameters: HashMap<String, Value>) -> Self {
        let mut child = Self::new(
            Arc::clone(&self.query),
            stack_name,
            self.account.clone(),
            self.region.clone(),
            self.partition.clone(),
        )
        .with_parameters(parameters);
        child.nested_stacks = Arc::clone(&self.nested_stacks);
        child
    }

    /// Name of the stack.
    #[must_use]
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// Account ID.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Partition.
    #[must_use]
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// The nested-stack registry.
    #[must_use]
    pub fn nested_stacks(&self) -> &NestedStacks {
        &self.nested_stacks
    }

    /// Returns a parameter value; null and empty-string values count as unset.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .get(name)
            .filter(|v| !v.is_null() && v.as_str() != Some(""))
    }

    /// Deployed resources of the stack, fetched once.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment query fails.
    pub async fn stack_resources(&self) -> Result<&[StackResource]> {
        let resources = self
            .stack_resources
            .get_or_try_init(|| async {
                debug!("Listing resources of stack {}", self.stack_name);
                self.query.list_stack_resources(&self.stack_name).await
            })
            .await?;
        Ok(resources)
    }

    /// Domain suffix of the region, fetched once.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment query fails.
    pub async fn url_suffix(&self) -> Result<&str> {
        let suffix = self
            .url_suffix
            .get_or_try_init(|| self.query.url_suffix(&self.region))
            .await?;
        Ok(suffix)
    }

    /// Looks up an export by name.
    ///
    /// Pages are fetched lazily and only until the name is found; every page
    /// is fetched at most once per context.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment query fails.
    pub async fn lookup_export(&self, name: &str) -> Result<Option<Export>> {
        let mut cursor = self.exports.lock().await;
        if let Some(export) = cursor.exports.get(name) {
            return Ok(Some(export.clone()));
        }

        while !cursor.exhausted {
            let page = self.query.list_exports(cursor.next_page_token.clone()).await?;
            debug!("Fetched {} exports", page.exports.len());

            cursor.exhausted = page.next_page_token.is_none();
            cursor.next_page_token = page.next_page_token;

            let mut found = None;
            for export in page.exports {
                if export.name.is_empty() {
                    continue;
                }
                if export.name == name {
                    found = Some(export.clone());
                }
                cursor.exports.insert(export.name.clone(), export);
            }
            if found.is_some() {
                return Ok(found);
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ExportPage, MockEnvironmentQuery};
    use serde_json::json;

    fn export(name: &str, value: &str) -> Export {
        Export {
            name: name.to_string(),
            value: Some(value.to_string()),
        }
    }

    fn context(query: MockEnvironmentQuery) -> EnvironmentContext {
        EnvironmentContext::new(Arc::new(query), "app", "123456789012", "us-east-1", "aws")
    }

    #[test]
    fn test_pseudo_parameters_seeded() {
        let ctx = context(MockEnvironmentQuery::new());
        assert_eq!(ctx.parameter(ACCOUNT_ID), Some(&json!("123456789012")));
        assert_eq!(ctx.parameter(REGION), Some(&json!("us-east-1")));
        assert_eq!(ctx.parameter(PARTITION), Some(&json!("aws")));
    }

    #[test]
    fn test_empty_parameters_count_as_unset() {
        let ctx = context(MockEnvironmentQuery::new()).with_parameters([
            (String::from("Empty"), json!("")),
            (String::from("Null"), Value::Null),
            (String::from("Stage"), json!("prod")),
        ]);
        assert_eq!(ctx.parameter("Empty"), None);
        assert_eq!(ctx.parameter("Null"), None);
        assert_eq!(ctx.parameter("Stage"), Some(&json!("prod")));
    }

    #[tokio::test]
    async fn test_stack_resources_fetched_once() {
        let mut query = MockEnvironmentQuery::new();
        query
            .expect_list_stack_resources()
            .times(1)
            .returning(|_| Ok(vec![StackResource::new("Func", "my-func", "AWS::Lambda::Function")]));

        let ctx = context(query);
        assert_eq!(ctx.stack_resources().await.unwrap().len(), 1);
        assert_eq!(ctx.stack_resources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_export_lookup_stops_at_match() {
        let mut query = MockEnvironmentQuery::new();
        query
            .expect_list_exports()
            .withf(|token| token.is_none())
            .times(1)
            .returning(|_| {
                Ok(ExportPage {
                    exports: vec![export("first", "1")],
                    next_page_token: Some(String::from("p2")),
                })
            });
        query
            .expect_list_exports()
            .withf(|token| token.as_deref() == Some("p2"))
            .times(1)
            .returning(|_| {
                Ok(ExportPage {
                    exports: vec![export("second", "2")],
                    next_page_token: Some(String::from("p3")),
                })
            });

        let ctx = context(query);
        assert_eq!(ctx.lookup_export("first").await.unwrap(), Some(export("first", "1")));
        assert_eq!(ctx.lookup_export("second").await.unwrap(), Some(export("second", "2")));
        // Cached, no further page fetched.
        assert_eq!(ctx.lookup_export("first").await.unwrap(), Some(export("first", "1")));
    }

    #[tokio::test]
    async fn test_export_lookup_exhausts_pages() {
        let mut query = MockEnvironmentQuery::new();
        query.expect_list_exports().times(1).returning(|_| {
            Ok(ExportPage {
                exports: vec![export("only", "1")],
                next_page_token: None,
            })
        });

        let ctx = context(query);
        assert_eq!(ctx.lookup_export("missing").await.unwrap(), None);
        assert_eq!(ctx.lookup_export("missing").await.unwrap(), None);
    }

    #[test]
    fn test_nested_context_inherits_environment() {
        let ctx = context(MockEnvironmentQuery::new());
        let mut params = HashMap::new();
        params.insert(String::from("Name"), json!("child"));

        let child = ctx.nested("app-Nested-ABC", params);
        assert_eq!(child.stack_name(), "app-Nested-ABC");
        assert_eq!(child.parameter(REGION), Some(&json!("us-east-1")));
        assert_eq!(child.parameter("Name"), Some(&json!("child")));
    }
}
