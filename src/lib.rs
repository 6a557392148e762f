// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items should be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halldyll Hotswap
//!
//! Decides which changes of a stack update can be applied directly to the
//! running resources, skipping a full deployment, and applies them.
//!
//! ## Overview
//!
//! A hotswap attempt takes the new template, the per-resource diff against
//! the deployed template, and access to the deployed environment:
//!
//! 1. **Evaluation**: template expressions (`Ref`, `Fn::GetAtt`, `Fn::Sub`,
//!    ...) are resolved against parameters, the deployed resource inventory,
//!    and cross-stack exports.
//! 2. **Classification**: each changed resource is routed to the classifier
//!    for its kind, which returns hotswappable patches and non-hotswappable
//!    findings.
//! 3. **Application**: depending on the [`hotswap::HotswapMode`], the patches
//!    are applied concurrently or the whole change falls back to a full
//!    deployment.
//!
//! ## Modules
//!
//! - [`config`]: Hotswap settings, parsing and validation
//! - [`template`]: Template model and expression evaluator
//! - [`services`]: Environment queries and service calls
//! - [`hotswap`]: Classifiers and the orchestrator
//! - [`cli`]: Command-line interface
//!
//! ## Supported resource kinds
//!
//! | Kind | Hotswappable properties |
//! |------|-------------------------|
//! | `AWS::Lambda::Function` | `Code`, `Environment`, `Description` |
//! | `AWS::Lambda::Version` | always (no-op) |
//! | `AWS::Lambda::Alias` | `FunctionVersion` (no-op) |
//! | `AWS::ECS::TaskDefinition` | `ContainerDefinitions` |
//! | `AWS::StepFunctions::StateMachine` | `DefinitionString` |
//! | `AWS::CodeBuild::Project` | `Source`, `Environment`, `SourceVersion` |
//! | `Custom::CDKBucketDeployment` | all |
//! | `AWS::AppSync::Resolver`, `FunctionConfiguration` | mapping templates, `Code` (inline or S3 location) |
//! | `AWS::AppSync::GraphQLSchema` | `Definition`, `DefinitionS3Location` |
//! | `AWS::AppSync::ApiKey` | `Expires` |

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod hotswap;
pub mod services;
pub mod template;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, HotswapConfig};
pub use error::{HotswapError, Result};
pub use hotswap::{HotswapMode, HotswapOrchestrator, HotswapReport, HotswapStatus};
pub use services::{EnvironmentQuery, EnvironmentSnapshot, HotswapServices};
pub use template::{ChangeSet, ResourceChange, Template, TemplateEvaluator};
