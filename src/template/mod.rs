//! Template documents and expression evaluation.
//!
//! This module provides:
//! - The template, resource, and change-set data model
//! - Recognition of intrinsic-function expressions
//! - Attribute formatting for deployed resources
//! - The per-stack evaluation context and the evaluator itself

mod arn;
mod context;
mod evaluator;
mod intrinsic;
mod model;

pub use arn::{ArnEnvironment, ArnParts, ResourceKind, format_resource_attribute};
pub use context::{ACCOUNT_ID, EnvironmentContext, PARTITION, REGION, URL_SUFFIX};
pub use evaluator::{NESTED_STACK_TYPE, ResourceReference, TemplateEvaluator, stringify_scalar};
pub use intrinsic::{INTRINSIC_PREFIX, Intrinsic, REF};
pub use model::{
    ChangeSet, NestedStack, NestedStacks, OutputDeclaration, ParameterDeclaration, PropertyDiff,
    ResourceChange, ResourceDefinition, Template, find_nested_stack, load_document,
    parse_json_document, parse_yaml_document,
};
