//! Attribute formatting for deployed resources.
//!
//! `Fn::GetAtt` on a deployed resource is answered from its physical ID
//! plus the environment, without asking the platform. Only the resource
//! kinds listed in [`ResourceKind`] are supported.

use crate::error::EvaluationError;

/// Inputs for formatting one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArnParts<'a> {
    /// Partition, for example `aws`.
    pub partition: &'a str,
    /// Lowercased service segment of the resource type.
    pub service: &'a str,
    /// Deployment region.
    pub region: &'a str,
    /// Deployment account.
    pub account: &'a str,
    /// Resource-type segment of the ARN.
    pub resource_type: &'a str,
    /// Physical ID of the resource.
    pub resource_name: &'a str,
}

/// Environment fields shared by every formatted attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArnEnvironment<'a> {
    /// Partition, for example `aws`.
    pub partition: &'a str,
    /// Deployment region.
    pub region: &'a str,
    /// Deployment account.
    pub account: &'a str,
}

type AttributeFormatter = fn(&ArnParts<'_>) -> Option<String>;
type AttributeTable = &'static [(&'static str, AttributeFormatter)];

const IAM_ATTRIBUTES: AttributeTable = &[("Arn", iam_arn)];
const S3_ATTRIBUTES: AttributeTable = &[("Arn", s3_arn)];
const COLON_ARN_ATTRIBUTES: AttributeTable = &[("Arn", colon_arn)];
const SLASH_ARN_ATTRIBUTES: AttributeTable = &[("Arn", slash_arn)];
const EVENT_BUS_ATTRIBUTES: AttributeTable = &[("Arn", slash_arn), ("Name", physical_name)];
const GRAPHQL_API_ATTRIBUTES: AttributeTable = &[("ApiId", graphql_api_id)];
const FUNCTION_CONFIGURATION_ATTRIBUTES: AttributeTable = &[("FunctionId", graphql_child_id)];
const DATA_SOURCE_ATTRIBUTES: AttributeTable = &[("Name", graphql_child_id)];

/// Resource kinds whose attributes can be formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `AWS::IAM::Role`
    IamRole,
    /// `AWS::IAM::User`
    IamUser,
    /// `AWS::IAM::Group`
    IamGroup,
    /// `AWS::S3::Bucket`
    S3Bucket,
    /// `AWS::Lambda::Function`
    LambdaFunction,
    /// `AWS::Events::EventBus`
    EventBus,
    /// `AWS::DynamoDB::Table`
    DynamoDbTable,
    /// `AWS::KMS::Key`
    KmsKey,
    /// `AWS::AppSync::GraphQLApi`
    GraphQlApi,
    /// `AWS::AppSync::FunctionConfiguration`
    GraphQlFunctionConfiguration,
    /// `AWS::AppSync::DataSource`
    GraphQlDataSource,
}

impl ResourceKind {
    /// Every supported kind.
    pub const ALL: [Self; 11] = [
        Self::IamRole,
        Self::IamUser,
        Self::IamGroup,
        Self::S3Bucket,
        Self::LambdaFunction,
        Self::EventBus,
        Self::DynamoDbTable,
        Self::KmsKey,
        Self::GraphQlApi,
        Self::GraphQlFunctionConfiguration,
        Self::GraphQlDataSource,
    ];

    /// The resource type string of this kind.
    #[must_use]
    pub const fn resource_type(self) -> &'static str {
        match self {
            Self::IamRole => "AWS::IAM::Role",
            Self::IamUser => "AWS::IAM::User",
            Self::IamGroup => "AWS::IAM::Group",
            Self::S3Bucket => "AWS::S3::Bucket",
            Self::LambdaFunction => "AWS::Lambda::Function",
            Self::EventBus => "AWS::Events::EventBus",
            Self::DynamoDbTable => "AWS::DynamoDB::Table",
            Self::KmsKey => "AWS::KMS::Key",
            Self::GraphQlApi => "AWS::AppSync::GraphQLApi",
            Self::GraphQlFunctionConfiguration => "AWS::AppSync::FunctionConfiguration",
            Self::GraphQlDataSource => "AWS::AppSync::DataSource",
        }
    }

    /// Looks up the kind for a resource type string.
    #[must_use]
    pub fn from_resource_type(resource_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.resource_type() == resource_type)
    }

    const fn attributes(self) -> AttributeTable {
        match self {
            Self::IamRole | Self::IamUser | Self::IamGroup => IAM_ATTRIBUTES,
            Self::S3Bucket => S3_ATTRIBUTES,
            Self::LambdaFunction => COLON_ARN_ATTRIBUTES,
            Self::EventBus => EVENT_BUS_ATTRIBUTES,
            Self::DynamoDbTable | Self::KmsKey => SLASH_ARN_ATTRIBUTES,
            Self::GraphQlApi => GRAPHQL_API_ATTRIBUTES,
            Self::GraphQlFunctionConfiguration => FUNCTION_CONFIGURATION_ATTRIBUTES,
            Self::GraphQlDataSource => DATA_SOURCE_ATTRIBUTES,
        }
    }

    /// Lowercased service segment, `AWS::Lambda::Function` -> `lambda`.
    #[must_use]
    pub fn service(self) -> String {
        type_segment(self.resource_type(), 1)
    }

    /// Resource-type segment used inside ARNs.
    #[must_use]
    pub fn arn_resource_type(self) -> String {
        match self {
            Self::EventBus => String::from("event-bus"),
            _ => type_segment(self.resource_type(), 2),
        }
    }

    /// Formats `attribute` for a resource of this kind.
    ///
    /// Returns `Ok(None)` when the physical ID does not have the shape the
    /// formatter needs.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute has no formatter for this kind.
    pub fn format_attribute(
        self,
        attribute: &str,
        env: &ArnEnvironment<'_>,
        physical_id: &str,
    ) -> Result<Option<String>, EvaluationError> {
        let formatter = self
            .attributes()
            .iter()
            .find(|(name, _)| *name == attribute)
            .map(|(_, formatter)| *formatter)
            .ok_or_else(|| EvaluationError::UnsupportedAttribute {
                resource_type: self.resource_type().to_string(),
                attribute: attribute.to_string(),
            })?;

        let service = self.service();
        let resource_type = self.arn_resource_type();
        Ok(formatter(&ArnParts {
            partition: env.partition,
            service: &service,
            region: env.region,
            account: env.account,
            resource_type: &resource_type,
            resource_name: physical_id,
        }))
    }
}

/// Formats `attribute` of a deployed resource of type `resource_type`.
///
/// # Errors
///
/// Returns an error if the type or the attribute is not in the table.
pub fn format_resource_attribute(
    resource_type: &str,
    attribute: &str,
    env: &ArnEnvironment<'_>,
    physical_id: &str,
) -> Result<Option<String>, EvaluationError> {
    let kind = ResourceKind::from_resource_type(resource_type).ok_or_else(|| {
        EvaluationError::UnsupportedResourceType {
            resource_type: resource_type.to_string(),
        }
    })?;
    kind.format_attribute(attribute, env, physical_id)
}

fn type_segment(resource_type: &str, index: usize) -> String {
    resource_type
        .split("::")
        .nth(index)
        .unwrap_or_default()
        .to_lowercase()
}

fn iam_arn(parts: &ArnParts<'_>) -> Option<String> {
    Some(format!(
        "arn:{}:{}::{}:{}/{}",
        parts.partition, parts.service, parts.account, parts.resource_type, parts.resource_name
    ))
}

fn s3_arn(parts: &ArnParts<'_>) -> Option<String> {
    Some(format!(
        "arn:{}:{}:::{}",
        parts.partition, parts.service, parts.resource_name
    ))
}

fn colon_arn(parts: &ArnParts<'_>) -> Option<String> {
    Some(format!(
        "arn:{}:{}:{}:{}:{}:{}",
        parts.partition,
        parts.service,
        parts.region,
        parts.account,
        parts.resource_type,
        parts.resource_name
    ))
}

fn slash_arn(parts: &ArnParts<'_>) -> Option<String> {
    Some(format!(
        "arn:{}:{}:{}:{}:{}/{}",
        parts.partition,
        parts.service,
        parts.region,
        parts.account,
        parts.resource_type,
        parts.resource_name
    ))
}

fn physical_name(parts: &ArnParts<'_>) -> Option<String> {
    Some(parts.resource_name.to_string())
}

// arn:aws:appsync:<region>:<account>:apis/<apiId>
fn graphql_api_id(parts: &ArnParts<'_>) -> Option<String> {
    parts.resource_name.split('/').nth(1).map(str::to_string)
}

// arn:aws:appsync:<region>:<account>:apis/<apiId>/{functions,datasources}/<id>
fn graphql_child_id(parts: &ArnParts<'_>) -> Option<String> {
    parts.resource_name.split('/').nth(3).map(str::to_string)
}
