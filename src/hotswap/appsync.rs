//! Hotswapping of GraphQL API resolvers, functions, schemas, and API keys.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::WaitSettings;
use crate::error::{EvaluationError, HotswapError, Result, ServiceError};
use crate::services::{HotswapServices, SchemaStatus};
use crate::template::{ResourceChange, TemplateEvaluator};

use super::common::{
    ClassifiedChanges, HotswapAction, HotswapOutcome, HotswappableChange, ResourceClassifier,
    lower_case_first_character, transform_object_keys,
};

/// Resource type of a resolver.
pub const APPSYNC_RESOLVER: &str = "AWS::AppSync::Resolver";
/// Resource type of a resolver function.
pub const APPSYNC_FUNCTION: &str = "AWS::AppSync::FunctionConfiguration";
/// Resource type of a schema.
pub const APPSYNC_SCHEMA: &str = "AWS::AppSync::GraphQLSchema";
/// Resource type of an API key.
pub const APPSYNC_API_KEY: &str = "AWS::AppSync::ApiKey";

const SERVICE: &str = "appsync";
const APPSYNC_TYPES: &[&str] = &[APPSYNC_RESOLVER, APPSYNC_FUNCTION, APPSYNC_SCHEMA, APPSYNC_API_KEY];
const APPSYNC_PROPERTIES: &[&str] = &[
    "RequestMappingTemplate",
    "RequestMappingTemplateS3Location",
    "ResponseMappingTemplate",
    "ResponseMappingTemplateS3Location",
    "Code",
    "CodeS3Location",
    "Definition",
    "DefinitionS3Location",
    "Expires",
];

/// Request keys holding an object location, paired with the key its
/// content replaces.
const S3_LOCATION_KEYS: &[(&str, &str)] = &[
    ("requestMappingTemplateS3Location", "requestMappingTemplate"),
    ("responseMappingTemplateS3Location", "responseMappingTemplate"),
    ("codeS3Location", "code"),
    ("definitionS3Location", "definition"),
];

const FUNCTION_UPDATE_RETRIES: u32 = 6;

/// Classifies changes to GraphQL API resources.
#[derive(Debug, Clone, Copy)]
pub struct AppSyncClassifier {
    waits: WaitSettings,
}

impl AppSyncClassifier {
    /// Creates a classifier with the given poll and backoff pacing.
    #[must_use]
    pub const fn new(waits: WaitSettings) -> Self {
        Self { waits }
    }
}

#[async_trait]
impl ResourceClassifier for AppSyncClassifier {
    fn name(&self) -> &'static str {
        "appsync"
    }

    async fn classify(
        &self,
        logical_id: &str,
        change: &ResourceChange,
        evaluator: &Arc<TemplateEvaluator>,
    ) -> Result<Vec<HotswapOutcome>> {
        let Some(resource_type) = change.new_type().filter(|t| APPSYNC_TYPES.contains(t)) else {
            return Ok(Vec::new());
        };

        let mut outcomes = Vec::new();
        let classified = ClassifiedChanges::new(change, APPSYNC_PROPERTIES);
        classified.report_non_hotswappable_property_changes(&mut outcomes);

        if !classified.has_hotswappable_changes() {
            return Ok(outcomes);
        }

        let name_expression = if resource_type == APPSYNC_FUNCTION {
            change.new_properties().get("Name")
        } else {
            None
        };
        let physical_name = evaluator
            .establish_resource_physical_name(logical_id, name_expression)
            .await?
            .map(|arn| {
                if resource_type == APPSYNC_RESOLVER {
                    resolver_name(&arn).unwrap_or(arn)
                } else {
                    arn
                }
            });
        let display_name = physical_name.as_deref().unwrap_or(logical_id);

        info!("{} {} is hotswappable", resource_type, display_name);
        outcomes.push(HotswapOutcome::Hotswappable(HotswappableChange {
            resource_type: resource_type.to_string(),
            props_changed: classified.hotswappable_names(),
            service: SERVICE,
            resource_names: vec![format!("{resource_type} '{display_name}'")],
            action: Box::new(AppSyncAction {
                resource_type: resource_type.to_string(),
                logical_id: logical_id.to_string(),
                physical_name,
                properties: request_properties(change),
                evaluator: Arc::clone(evaluator),
                waits: self.waits,
            }),
        }));
        Ok(outcomes)
    }
}

/// `<type>.<field>` from a resolver ARN
/// (`arn:...:apis/<api>/types/<type>/resolvers/<field>`).
fn resolver_name(arn: &str) -> Option<String> {
    let parts: Vec<&str> = arn.split('/').collect();
    match (parts.get(3), parts.get(5)) {
        (Some(type_name), Some(field_name)) => Some(format!("{type_name}.{field_name}")),
        _ => None,
    }
}

/// The deployed properties with every hotswappable property taken from the
/// new definition.
fn request_properties(change: &ResourceChange) -> Map<String, Value> {
    let mut properties = change
        .old_definition
        .as_ref()
        .map(|d| d.properties.clone())
        .unwrap_or_default();
    let new_properties = change.new_properties();
    for name in APPSYNC_PROPERTIES {
        match new_properties.get(*name) {
            Some(value) => {
                properties.insert((*name).to_string(), value.clone());
            }
            None => {
                properties.remove(*name);
            }
        }
    }
    properties
}

/// Splits `s3://bucket/key` into bucket and key.
fn parse_s3_location(location: &str) -> Option<(&str, String)> {
    let parts: Vec<&str> = location.split('/').collect();
    if parts.len() < 4 || parts[2].is_empty() {
        return None;
    }
    Some((parts[2], parts[3..].join("/")))
}

fn request_string<'a>(request: &'a Map<String, Value>, key: &str, logical_id: &str) -> Result<&'a str> {
    request
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            EvaluationError::MissingProperty {
                logical_id: logical_id.to_string(),
                property: key.to_string(),
            }
            .into()
        })
}

#[derive(Debug)]
struct AppSyncAction {
    resource_type: String,
    logical_id: String,
    physical_name: Option<String>,
    properties: Map<String, Value>,
    evaluator: Arc<TemplateEvaluator>,
    waits: WaitSettings,
}

impl AppSyncAction {
    async fn build_request(&self, services: &dyn HotswapServices) -> Result<Map<String, Value>> {
        let evaluated = self
            .evaluator
            .evaluate(&Value::Object(self.properties.clone()))
            .await?;
        let Value::Object(mut request) =
            transform_object_keys(&evaluated, lower_case_first_character, &[])
        else {
            return Err(HotswapError::internal("evaluated properties are not a mapping"));
        };

        for (location_key, content_key) in S3_LOCATION_KEYS {
            let Some(location) = request.remove(*location_key) else {
                continue;
            };
            let Some(location) = location.as_str() else {
                continue;
            };
            let (bucket, key) = parse_s3_location(location).ok_or_else(|| {
                ServiceError::call_failed("s3", "GetObject", format!("malformed location '{location}'"))
            })?;
            debug!("Fetching {} from {}", content_key, location);
            let content = services.get_object(bucket, &key).await?;
            request.insert((*content_key).to_string(), Value::String(content));
        }

        Ok(request)
    }

    async fn update_function(
        &self,
        services: &dyn HotswapServices,
        physical_name: &str,
        mut request: Map<String, Value>,
    ) -> Result<()> {
        if request.contains_key("code") {
            request.remove("functionVersion");
        } else {
            request.remove("runtime");
        }

        let api_id = request_string(&request, "apiId", &self.logical_id)?;
        let function_id = services
            .list_functions(api_id)
            .await?
            .into_iter()
            .find(|f| f.name == physical_name)
            .map(|f| f.function_id)
            .ok_or_else(|| ServiceError::InvalidResponse {
                service: String::from(SERVICE),
                message: format!("function '{physical_name}' not found in API {api_id}"),
            })?;
        request.insert(String::from("functionId"), Value::String(function_id));
        let request = Value::Object(request);

        let mut retry = 0;
        loop {
            match services.update_function(&request).await {
                Err(HotswapError::Service(ServiceError::ConcurrentModification { .. }))
                    if retry < FUNCTION_UPDATE_RETRIES =>
                {
                    let delay = self.waits.appsync_retry_delay(retry);
                    debug!("Function {} is being modified, retrying in {:?}", physical_name, delay);
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                result => return result,
            }
        }
    }

    async fn create_schema(
        &self,
        services: &dyn HotswapServices,
        physical_name: &str,
        request: &Map<String, Value>,
    ) -> Result<()> {
        let api_id = request_string(request, "apiId", &self.logical_id)?;
        let definition = request_string(request, "definition", &self.logical_id)?;

        let mut status = services.start_schema_creation(api_id, definition).await?;
        while status.is_in_progress() {
            tokio::time::sleep(self.waits.appsync_poll_interval()).await;
            status = services.get_schema_creation_status(api_id).await?;
        }

        if status.status == SchemaStatus::Failed {
            return Err(ServiceError::UpdateFailed {
                resource: physical_name.to_string(),
                reason: status
                    .details
                    .unwrap_or_else(|| String::from("Schema creation has failed.")),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl HotswapAction for AppSyncAction {
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()> {
        let Some(physical_name) = self.physical_name.as_deref() else {
            warn!("No physical name found for {} {}, skipping", self.resource_type, self.logical_id);
            return Ok(());
        };

        let mut request = self.build_request(services).await?;
        info!("Updating {} {}", self.resource_type, physical_name);

        match self.resource_type.as_str() {
            APPSYNC_RESOLVER => services.update_resolver(&Value::Object(request)).await,
            APPSYNC_FUNCTION => self.update_function(services, physical_name, request).await,
            APPSYNC_SCHEMA => self.create_schema(services, physical_name, &request).await,
            APPSYNC_API_KEY => {
                if !request.contains_key("id") {
                    let parts: Vec<&str> = physical_name.split('/').collect();
                    if let [_, _, _, key_id] = parts.as_slice() {
                        request.insert(String::from("id"), Value::String((*key_id).to_string()));
                    }
                }
                services.update_api_key(&Value::Object(request)).await
            }
            other => Err(HotswapError::internal(format!("unexpected resource type {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotswap::test_support::{change, evaluator, fast_waits, hotswappable, non_hotswappable};
    use crate::services::{AppSyncFunction, MockHotswapServices, SchemaCreationStatus, StackResource};
    use serde_json::json;

    const RESOLVER_ARN: &str =
        "arn:aws:appsync:us-east-1:123456789012:apis/api123/types/Query/resolvers/getItem";

    fn classifier() -> AppSyncClassifier {
        AppSyncClassifier::new(fast_waits())
    }

    fn status(status: SchemaStatus, details: Option<&str>) -> SchemaCreationStatus {
        SchemaCreationStatus {
            status,
            details: details.map(String::from),
        }
    }

    #[test]
    fn test_resolver_name_from_arn() {
        assert_eq!(resolver_name(RESOLVER_ARN).as_deref(), Some("Query.getItem"));
        assert_eq!(resolver_name("not-an-arn"), None);
    }

    #[test]
    fn test_parse_s3_location() {
        assert_eq!(
            parse_s3_location("s3://assets/templates/request.vtl"),
            Some(("assets", String::from("templates/request.vtl")))
        );
        assert_eq!(parse_s3_location("s3://assets"), None);
    }

    #[tokio::test]
    async fn test_resolver_template_update() {
        let evaluator = evaluator(
            json!({ "Resources": {} }),
            vec![StackResource::new("Resolver", RESOLVER_ARN, APPSYNC_RESOLVER)],
        );
        let change = change(
            "Resolver",
            APPSYNC_RESOLVER,
            json!({
                "ApiId": "api123",
                "TypeName": "Query",
                "FieldName": "getItem",
                "RequestMappingTemplate": "old"
            }),
            json!({
                "ApiId": "api123",
                "TypeName": "Query",
                "FieldName": "getItem",
                "RequestMappingTemplate": { "Fn::Join": ["", ["new-", { "Ref": "AWS::Region" }]] }
            }),
        );

        let outcomes = classifier().classify("Resolver", &change, &evaluator).await.unwrap();
        let accepted = hotswappable(&outcomes);
        assert_eq!(
            accepted[0].resource_names,
            vec![format!("{APPSYNC_RESOLVER} 'Query.getItem'")]
        );
        assert_eq!(accepted[0].props_changed, vec!["RequestMappingTemplate"]);

        let mut services = MockHotswapServices::new();
        services
            .expect_update_resolver()
            .withf(|request| {
                *request
                    == json!({
                        "apiId": "api123",
                        "typeName": "Query",
                        "fieldName": "getItem",
                        "requestMappingTemplate": "new-us-east-1"
                    })
            })
            .times(1)
            .returning(|_| Ok(()));

        accepted[0].action.apply(&services).await.unwrap();
    }

    #[tokio::test]
    async fn test_s3_location_is_fetched() {
        let evaluator = evaluator(
            json!({ "Resources": {} }),
            vec![StackResource::new("Resolver", RESOLVER_ARN, APPSYNC_RESOLVER)],
        );
        let change = change(
            "Resolver",
            APPSYNC_RESOLVER,
            json!({ "ApiId": "api123", "ResponseMappingTemplateS3Location": "s3://assets/old.vtl" }),
            json!({ "ApiId": "api123", "ResponseMappingTemplateS3Location": "s3://assets/vtl/new.vtl" }),
        );

        let outcomes = classifier().classify("Resolver", &change, &evaluator).await.unwrap();

        let mut services = MockHotswapServices::new();
        services
            .expect_get_object()
            .withf(|bucket, key| bucket == "assets" && key == "vtl/new.vtl")
            .times(1)
            .returning(|_, _| Ok(String::from("$util.toJson($ctx.result)")));
        services
            .expect_update_resolver()
            .withf(|request| {
                request["responseMappingTemplate"] == json!("$util.toJson($ctx.result)")
                    && request.get("responseMappingTemplateS3Location").is_none()
            })
            .times(1)
            .returning(|_| Ok(()));

        hotswappable(&outcomes)[0].action.apply(&services).await.unwrap();
    }

    #[tokio::test]
    async fn test_function_update_retries_concurrent_modification() {
        let evaluator = evaluator(json!({ "Resources": {} }), Vec::new());
        let change = change(
            "Func",
            APPSYNC_FUNCTION,
            json!({ "ApiId": "api123", "Name": "lookup", "Runtime": { "Name": "APPSYNC_JS" }, "Code": "old" }),
            json!({ "ApiId": "api123", "Name": "lookup", "Runtime": { "Name": "APPSYNC_JS" }, "Code": "new" }),
        );

        let outcomes = classifier().classify("Func", &change, &evaluator).await.unwrap();
        let accepted = hotswappable(&outcomes);
        assert_eq!(accepted[0].resource_names, vec![format!("{APPSYNC_FUNCTION} 'lookup'")]);

        let mut services = MockHotswapServices::new();
        services
            .expect_list_functions()
            .withf(|api_id| api_id == "api123")
            .times(1)
            .returning(|_| {
                Ok(vec![
                    AppSyncFunction {
                        name: String::from("other"),
                        function_id: String::from("fn-0"),
                    },
                    AppSyncFunction {
                        name: String::from("lookup"),
                        function_id: String::from("fn-1"),
                    },
                ])
            });
        let mut calls = 0;
        services
            .expect_update_function()
            .withf(|request| request["functionId"] == json!("fn-1") && request["code"] == json!("new"))
            .times(3)
            .returning(move |_| {
                calls += 1;
                if calls < 3 {
                    Err(ServiceError::ConcurrentModification {
                        resource: String::from("lookup"),
                    }
                    .into())
                } else {
                    Ok(())
                }
            });

        accepted[0].action.apply(&services).await.unwrap();
    }

    #[tokio::test]
    async fn test_function_update_gives_up_after_retries() {
        let evaluator = evaluator(json!({ "Resources": {} }), Vec::new());
        let change = change(
            "Func",
            APPSYNC_FUNCTION,
            json!({ "ApiId": "api123", "Name": "lookup", "RequestMappingTemplate": "a" }),
            json!({ "ApiId": "api123", "Name": "lookup", "RequestMappingTemplate": "b" }),
        );

        let outcomes = classifier().classify("Func", &change, &evaluator).await.unwrap();

        let mut services = MockHotswapServices::new();
        services.expect_list_functions().returning(|_| {
            Ok(vec![AppSyncFunction {
                name: String::from("lookup"),
                function_id: String::from("fn-1"),
            }])
        });
        services
            .expect_update_function()
            .times(7)
            .returning(|_| {
                Err(ServiceError::ConcurrentModification {
                    resource: String::from("lookup"),
                }
                .into())
            });

        let err = hotswappable(&outcomes)[0].action.apply(&services).await.unwrap_err();
        assert!(matches!(
            err,
            HotswapError::Service(ServiceError::ConcurrentModification { .. })
        ));
    }

    #[tokio::test]
    async fn test_function_runtime_dropped_without_code() {
        let evaluator = evaluator(json!({ "Resources": {} }), Vec::new());
        let change = change(
            "Func",
            APPSYNC_FUNCTION,
            json!({ "ApiId": "api123", "Name": "lookup", "Runtime": "x", "FunctionVersion": "2018-05-29", "RequestMappingTemplate": "a" }),
            json!({ "ApiId": "api123", "Name": "lookup", "Runtime": "x", "FunctionVersion": "2018-05-29", "RequestMappingTemplate": "b" }),
        );

        let outcomes = classifier().classify("Func", &change, &evaluator).await.unwrap();

        let mut services = MockHotswapServices::new();
        services.expect_list_functions().returning(|_| {
            Ok(vec![AppSyncFunction {
                name: String::from("lookup"),
                function_id: String::from("fn-1"),
            }])
        });
        services
            .expect_update_function()
            .withf(|request| {
                request.get("runtime").is_none() && request["functionVersion"] == json!("2018-05-29")
            })
            .times(1)
            .returning(|_| Ok(()));

        hotswappable(&outcomes)[0].action.apply(&services).await.unwrap();
    }

    #[tokio::test]
    async fn test_schema_creation_polls_until_done() {
        let evaluator = evaluator(
            json!({ "Resources": {} }),
            vec![StackResource::new("Schema", "api123/schema", APPSYNC_SCHEMA)],
        );
        let change = change(
            "Schema",
            APPSYNC_SCHEMA,
            json!({ "ApiId": "api123", "Definition": "type Query { a: Int }" }),
            json!({ "ApiId": "api123", "Definition": "type Query { b: Int }" }),
        );

        let outcomes = classifier().classify("Schema", &change, &evaluator).await.unwrap();

        let mut services = MockHotswapServices::new();
        services
            .expect_start_schema_creation()
            .withf(|api_id, definition| api_id == "api123" && definition == "type Query { b: Int }")
            .times(1)
            .returning(|_, _| Ok(status(SchemaStatus::Processing, None)));
        let mut polls = 0;
        services
            .expect_get_schema_creation_status()
            .times(2)
            .returning(move |_| {
                polls += 1;
                Ok(if polls == 1 {
                    status(SchemaStatus::Processing, None)
                } else {
                    status(SchemaStatus::Success, None)
                })
            });

        hotswappable(&outcomes)[0].action.apply(&services).await.unwrap();
    }

    #[tokio::test]
    async fn test_schema_creation_failure_is_an_error() {
        let evaluator = evaluator(
            json!({ "Resources": {} }),
            vec![StackResource::new("Schema", "api123/schema", APPSYNC_SCHEMA)],
        );
        let change = change(
            "Schema",
            APPSYNC_SCHEMA,
            json!({ "ApiId": "api123", "Definition": "a" }),
            json!({ "ApiId": "api123", "Definition": "b" }),
        );

        let outcomes = classifier().classify("Schema", &change, &evaluator).await.unwrap();

        let mut services = MockHotswapServices::new();
        services
            .expect_start_schema_creation()
            .returning(|_, _| Ok(status(SchemaStatus::Failed, None)));

        let err = hotswappable(&outcomes)[0].action.apply(&services).await.unwrap_err();
        assert!(err.to_string().contains("Schema creation has failed."));
    }

    #[tokio::test]
    async fn test_api_key_id_from_arn() {
        let evaluator = evaluator(
            json!({ "Resources": {} }),
            vec![StackResource::new(
                "Key",
                "arn:aws:appsync:us-east-1:123456789012:apis/api123/apikeys/da2-key",
                APPSYNC_API_KEY,
            )],
        );
        let change = change(
            "Key",
            APPSYNC_API_KEY,
            json!({ "ApiId": "api123", "Expires": 1_700_000_000 }),
            json!({ "ApiId": "api123", "Expires": 1_800_000_000 }),
        );

        let outcomes = classifier().classify("Key", &change, &evaluator).await.unwrap();

        let mut services = MockHotswapServices::new();
        services
            .expect_update_api_key()
            .withf(|request| {
                *request == json!({ "apiId": "api123", "expires": 1_800_000_000, "id": "da2-key" })
            })
            .times(1)
            .returning(|_| Ok(()));

        hotswappable(&outcomes)[0].action.apply(&services).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_physical_name_skips() {
        let evaluator = evaluator(json!({ "Resources": {} }), Vec::new());
        let change = change(
            "Resolver",
            APPSYNC_RESOLVER,
            json!({ "Code": "a" }),
            json!({ "Code": "b" }),
        );

        let outcomes = classifier().classify("Resolver", &change, &evaluator).await.unwrap();
        let services = MockHotswapServices::new();
        hotswappable(&outcomes)[0].action.apply(&services).await.unwrap();
    }

    #[tokio::test]
    async fn test_other_properties_are_rejected() {
        let evaluator = evaluator(json!({ "Resources": {} }), Vec::new());
        let change = change(
            "Resolver",
            APPSYNC_RESOLVER,
            json!({ "DataSourceName": "a" }),
            json!({ "DataSourceName": "b" }),
        );

        let outcomes = classifier().classify("Resolver", &change, &evaluator).await.unwrap();
        assert!(hotswappable(&outcomes).is_empty());
        assert_eq!(
            non_hotswappable(&outcomes)[0].rejected_properties,
            vec!["DataSourceName"]
        );
    }
}
