//! ssm-ctl - parameter files for the SSM Parameter Store
//!
//! YAML documents declare parameters, inputs and common fields; the
//! [`DocumentCompiler`] turns them into resolved parameters that the
//! [`SsmClient`] pushes, deletes, downloads or diffs.

pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod input;
pub mod parameter;
pub mod prompt;
pub mod registry;
pub mod store;
pub mod types;
pub mod varstring;

pub use client::{GetOptions, PathDiff, PathListing, PathOptions, SsmClient};
pub use config::SsmCtlConfig;
pub use document::{CompilationUnit, DocumentCompiler, RegisteredUnit, ResolvedUnit};
pub use error::{FixSuggestion, Result, SsmCtlError};
pub use input::{Input, Inputs};
pub use parameter::{LoadOptions, Parameter};
pub use prompt::{Prompter, ScriptedPrompter, TerminalPrompter};
pub use registry::{Bindings, ResolveContext, VariableBinding, VariableRegistry};
pub use types::ParameterType;
pub use varstring::VarString;
