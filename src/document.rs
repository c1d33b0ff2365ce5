//! Document compilation
//!
//! A parameter document is a YAML mapping. Reserved keys start with a dot:
//!
//! ```yaml
//! .INPUT:
//!   Env: String
//! .COMMON:
//!   Overwrite: true
//! .FLUSH: /app/$(Env)
//!
//! /app/$(Env)/url: https://example.com
//! /app/$(Env)/hosts: [a, b]
//! ```
//!
//! A run moves through typed stages: [`CompilationUnit`] (parsed or merged),
//! [`RegisteredUnit`] (references collected) and [`ResolvedUnit`] (every
//! reference bound). Values can only be read from a `ResolvedUnit`.

use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::client::SsmClient;
use crate::error::{Result, SsmCtlError};
use crate::input::{self, Input, InputResolver, Inputs};
use crate::parameter::{LoadOptions, Parameter};
use crate::prompt::Prompter;
use crate::registry::{Bindings, ResolveContext, VariableBinding, VariableRegistry};
use crate::types::scalar_string;
use crate::varstring::VarString;

pub const INPUT_KEY: &str = ".INPUT";
pub const COMMON_KEY: &str = ".COMMON";
pub const FLUSH_KEY: &str = ".FLUSH";

/// Parses, merges and compiles parameter documents
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentCompiler {
    options: LoadOptions,
}

impl DocumentCompiler {
    pub fn new(options: LoadOptions) -> Self {
        Self { options }
    }

    pub fn parse_str(&self, text: &str) -> Result<CompilationUnit> {
        let document: Value = serde_yaml::from_str(text)?;
        self.parse(&document)
    }

    /// Split a document into inputs, parameters and flush paths.
    ///
    /// `.COMMON` fields are applied to every entry first, then the entry's
    /// own fields override them.
    pub fn parse(&self, document: &Value) -> Result<CompilationUnit> {
        let root = match document {
            Value::Null => return Ok(CompilationUnit::default()),
            Value::Mapping(root) => root,
            _ => {
                return Err(SsmCtlError::InvalidDocument {
                    reason: "top level must be a mapping".to_string(),
                })
            }
        };

        let inputs = Input::load_all(root.get(INPUT_KEY).unwrap_or(&Value::Null))?;

        let common = match root.get(COMMON_KEY) {
            None | Some(Value::Null) => Mapping::new(),
            Some(Value::Mapping(common)) => common.clone(),
            Some(_) => {
                return Err(SsmCtlError::InvalidDocument {
                    reason: format!("{} must be a mapping", COMMON_KEY),
                })
            }
        };

        let flush_paths = load_flush(root.get(FLUSH_KEY))?;

        let mut parameters = IndexMap::new();
        for (key, data) in root {
            let name = scalar_string(key).ok_or_else(|| SsmCtlError::InvalidDocument {
                reason: format!("key {:?} is not a string", key),
            })?;
            if name.starts_with('.') {
                continue;
            }

            let mut fragment = Mapping::new();
            fragment.insert("Name".into(), name.clone().into());
            for (field, value) in &common {
                fragment.insert(field.clone(), value.clone());
            }
            for (field, value) in entry_fields(&name, data)? {
                fragment.insert(field, value);
            }

            let parameter = Parameter::load(&fragment, self.options)?;
            parameters.insert(name, parameter);
        }

        debug!(
            inputs = inputs.len(),
            parameters = parameters.len(),
            flush = flush_paths.len(),
            "parsed document"
        );
        Ok(CompilationUnit {
            inputs,
            parameters,
            flush_paths,
        })
    }

    /// Combine two units; `b` wins on parameter names
    pub fn merge(a: CompilationUnit, b: CompilationUnit) -> Result<CompilationUnit> {
        a.merge(b)
    }

    /// Build a document from resolved parameters.
    ///
    /// `.FLUSH` is written only when there are paths (a single path as a
    /// scalar). Disabled parameters are skipped when `ignore_disabled`.
    pub fn compile<'p, I>(
        parameters: I,
        flush_paths: &[String],
        ignore_disabled: bool,
        ctx: &ResolveContext<'_>,
    ) -> Result<Mapping>
    where
        I: IntoIterator<Item = &'p Parameter>,
    {
        let mut document = Mapping::new();

        match flush_paths {
            [] => {}
            [path] => {
                document.insert(FLUSH_KEY.into(), path.clone().into());
            }
            paths => {
                let paths = paths.iter().cloned().map(Value::String).collect();
                document.insert(FLUSH_KEY.into(), Value::Sequence(paths));
            }
        }

        for parameter in parameters {
            if ignore_disabled && parameter.disabled(ctx)? {
                continue;
            }
            let dumped = parameter.dump(ctx)?;
            let mut name = Value::Null;
            let mut data = Mapping::new();
            for (field, value) in dumped {
                if field.as_str() == Some("Name") {
                    name = value;
                } else {
                    data.insert(field, value);
                }
            }
            document.insert(name, Value::Mapping(data));
        }
        Ok(document)
    }
}

/// Normalize an entry: bare scalars are Strings, bare sequences StringLists
fn entry_fields(name: &str, data: &Value) -> Result<Mapping> {
    let mut fields = Mapping::new();
    match data {
        Value::Null => {}
        Value::Mapping(mapping) => return Ok(mapping.clone()),
        Value::Sequence(_) => {
            fields.insert("Type".into(), "StringList".into());
            fields.insert("Value".into(), data.clone());
        }
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            fields.insert("Type".into(), "String".into());
            fields.insert("Value".into(), data.clone());
        }
        Value::Tagged(_) => {
            return Err(SsmCtlError::InvalidDocument {
                reason: format!("entry {} uses an unsupported YAML tag", name),
            })
        }
    }
    Ok(fields)
}

fn load_flush(section: Option<&Value>) -> Result<Vec<String>> {
    let invalid = || SsmCtlError::InvalidDocument {
        reason: format!("{} must be a path or a list of paths", FLUSH_KEY),
    };
    match section {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(path)) => Ok(vec![path.clone()]),
        Some(Value::Sequence(paths)) => paths
            .iter()
            .map(|path| path.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        Some(_) => Err(invalid()),
    }
}

/// Parsed (or merged) document content
#[derive(Debug, Clone, Default)]
pub struct CompilationUnit {
    pub inputs: Inputs,
    /// Keyed by the name as written; overrides keep the first position
    pub parameters: IndexMap<String, Parameter>,
    pub flush_paths: Vec<String>,
}

impl CompilationUnit {
    /// Merge `other` into this unit.
    ///
    /// Inputs follow the input merge rule, later parameters replace earlier
    /// ones, and flush paths are concatenated.
    pub fn merge(mut self, other: CompilationUnit) -> Result<Self> {
        input::merge_inputs(&mut self.inputs, other.inputs)?;
        for (name, parameter) in other.parameters {
            if self.parameters.contains_key(&name) {
                debug!(parameter = %name, "parameter overridden by later document");
            }
            self.parameters.insert(name, parameter);
        }
        self.flush_paths.extend(other.flush_paths);
        Ok(self)
    }

    /// Apply a value supplied outside the documents
    pub fn supply_input(
        &mut self,
        name: &str,
        value: impl Into<String>,
        encrypted: bool,
    ) -> Result<()> {
        input::supply_value(&mut self.inputs, name, value, encrypted)
    }

    /// Collect every referenced variable name, flush paths included
    pub fn register(self) -> RegisteredUnit {
        let mut registry = VariableRegistry::new();
        for parameter in self.parameters.values() {
            parameter.collect_references(&mut registry);
        }
        for path in &self.flush_paths {
            VarString::new(path.as_str()).collect_references(&mut registry);
        }
        info!(variables = registry.len(), "registered variables");
        RegisteredUnit {
            unit: self,
            registry,
        }
    }
}

/// A unit whose references have been collected
#[derive(Debug)]
pub struct RegisteredUnit {
    unit: CompilationUnit,
    registry: VariableRegistry,
}

impl RegisteredUnit {
    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn inputs(&self) -> &Inputs {
        &self.unit.inputs
    }

    pub fn unit(&self) -> &CompilationUnit {
        &self.unit
    }

    /// Bind every variable through the unit's inputs, prompting when allowed
    pub fn resolve(
        self,
        prompter: &mut dyn Prompter,
        prompt: bool,
        echo: Option<bool>,
    ) -> Result<ResolvedUnit> {
        let RegisteredUnit { unit, registry } = self;
        let CompilationUnit {
            inputs,
            parameters,
            flush_paths,
        } = unit;

        let mut resolver = InputResolver::new(inputs, prompter).prompt(prompt).echo(echo);
        let bindings = registry.resolve_all(|name| resolver.resolve(name))?;
        Ok(ResolvedUnit {
            parameters,
            flush_paths,
            bindings,
        })
    }

    /// Bind every variable with a caller-supplied resolver
    pub fn resolve_with<F>(self, resolver: F) -> Result<ResolvedUnit>
    where
        F: FnMut(&str) -> Result<VariableBinding>,
    {
        let bindings = self.registry.resolve_all(resolver)?;
        Ok(ResolvedUnit {
            parameters: self.unit.parameters,
            flush_paths: self.unit.flush_paths,
            bindings,
        })
    }
}

/// A unit whose every reference is bound
#[derive(Debug)]
pub struct ResolvedUnit {
    parameters: IndexMap<String, Parameter>,
    flush_paths: Vec<String>,
    bindings: Bindings,
}

impl ResolvedUnit {
    pub fn context<'a>(&'a self, client: &'a SsmClient) -> ResolveContext<'a> {
        ResolveContext::new(&self.bindings, client)
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values()
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Flush paths with their references resolved
    pub fn flush_paths(&self, client: &SsmClient) -> Result<Vec<String>> {
        let ctx = self.context(client);
        self.flush_paths
            .iter()
            .map(|path| VarString::new(path.as_str()).resolve(&ctx))
            .collect()
    }

    /// Resolved names of every parameter, in document order
    pub fn names(&self, client: &SsmClient) -> Result<Vec<String>> {
        let ctx = self.context(client);
        self.parameters().map(|p| p.name(&ctx)).collect()
    }

    /// Compile back to document shape
    pub fn compile(
        &self,
        client: &SsmClient,
        include_flush: bool,
        ignore_disabled: bool,
    ) -> Result<Mapping> {
        let flush_paths = if include_flush {
            self.flush_paths(client)?
        } else {
            Vec::new()
        };
        let ctx = self.context(client);
        DocumentCompiler::compile(self.parameters(), &flush_paths, ignore_disabled, &ctx)
    }
}
