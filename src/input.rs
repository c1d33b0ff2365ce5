//! Inputs: named values supplied by the operator or the command line
//!
//! SecureString inputs keep ciphertext until a caller asks for the value
//! with an explicit key id; the decrypted plaintext is then cached on the
//! input for the rest of the run.

use std::collections::BTreeMap;

use once_cell::unsync::OnceCell;
use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::{debug, warn};

use crate::client::SsmClient;
use crate::error::{Result, SsmCtlError};
use crate::prompt::Prompter;
use crate::registry::{DelegatedLookup, VariableBinding};
use crate::types::{scalar_string, ParameterType};

/// Inputs of a compilation unit, keyed by name
pub type Inputs = BTreeMap<String, Input>;

#[derive(Debug, Clone)]
pub struct Input {
    name: String,
    kind: ParameterType,
    pattern: Option<String>,
    description: Option<String>,
    default: Option<String>,
    plaintext: Option<String>,
    ciphertext: Option<String>,
    decrypted: OnceCell<String>,
}

/// Long form of an `.INPUT` entry
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InputFields {
    #[serde(rename = "Type")]
    kind: Option<String>,
    pattern: Option<String>,
    description: Option<String>,
    default: Option<Value>,
}

impl Input {
    pub fn new(name: impl Into<String>, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            kind,
            pattern: None,
            description: None,
            default: None,
            plaintext: None,
            ciphertext: None,
            decrypted: OnceCell::new(),
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Load the `.INPUT` section of a document.
    ///
    /// Entries are either a bare type name or a mapping with `Type`,
    /// `Pattern`, `Description` and `Default`.
    pub fn load_all(section: &Value) -> Result<Inputs> {
        let mapping = match section {
            Value::Null => return Ok(Inputs::new()),
            Value::Mapping(mapping) => mapping,
            _ => {
                return Err(SsmCtlError::InvalidDocument {
                    reason: ".INPUT must be a mapping of input names".to_string(),
                })
            }
        };

        let mut inputs = Inputs::new();
        for (key, data) in mapping {
            let name = scalar_string(key).ok_or_else(|| SsmCtlError::InvalidDocument {
                reason: format!("input name {:?} is not a string", key),
            })?;
            let input = Self::load(&name, data)?;
            inputs.insert(name, input);
        }
        Ok(inputs)
    }

    fn load(name: &str, data: &Value) -> Result<Self> {
        let fields = match data {
            Value::Null => InputFields::default(),
            Value::String(kind) => InputFields {
                kind: Some(kind.clone()),
                ..InputFields::default()
            },
            Value::Mapping(_) => serde_yaml::from_value(data.clone())?,
            _ => {
                return Err(SsmCtlError::InvalidField {
                    name: name.to_string(),
                    field: "Type".to_string(),
                    expected: "a type name or a mapping".to_string(),
                })
            }
        };

        let kind = match fields.kind.as_deref() {
            Some(kind) => kind.parse()?,
            None => ParameterType::String,
        };
        if kind.is_secure() && fields.default.is_some() {
            return Err(SsmCtlError::SecureDefault {
                name: name.to_string(),
            });
        }

        let default = match &fields.default {
            None | Some(Value::Null) => None,
            Some(Value::Sequence(items)) => Some(
                items
                    .iter()
                    .filter_map(scalar_string)
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            Some(other) => Some(scalar_string(other).ok_or_else(|| SsmCtlError::InvalidField {
                name: name.to_string(),
                field: "Default".to_string(),
                expected: "a scalar or a list".to_string(),
            })?),
        };

        Ok(Self {
            pattern: fields.pattern,
            description: fields.description,
            default,
            ..Self::new(name, kind)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParameterType {
        self.kind
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn default(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn is_set(&self) -> bool {
        self.plaintext.is_some() || self.ciphertext.is_some() || self.decrypted.get().is_some()
    }

    /// Store a supplied value.
    ///
    /// SecureString inputs store ciphertext unless `encrypted` is `Some(false)`.
    /// A second call replaces the first value.
    pub fn set_value(&mut self, value: impl Into<String>, encrypted: Option<bool>) {
        if self.kind.is_secure() && encrypted != Some(false) {
            self.ciphertext = Some(value.into());
            self.decrypted = OnceCell::new();
        } else {
            self.plaintext = Some(value.into());
        }
    }

    /// Ask the operator for the value.
    ///
    /// `echo` defaults to on, except for SecureString inputs.
    pub fn set_value_from_prompt(
        &mut self,
        prompter: &mut dyn Prompter,
        echo: Option<bool>,
    ) -> Result<()> {
        match self.kind {
            ParameterType::String => {
                let value = self.prompt_for_string(prompter, echo.unwrap_or(true))?;
                self.plaintext = Some(value);
            }
            ParameterType::SecureString => {
                let value = self.prompt_for_string(prompter, echo.unwrap_or(false))?;
                self.ciphertext = None;
                self.decrypted = OnceCell::from(value);
            }
            ParameterType::StringList => {
                let value = self.prompt_for_list(prompter, echo.unwrap_or(true))?;
                self.plaintext = Some(value);
            }
        }
        Ok(())
    }

    fn prompt_for_string(&self, prompter: &mut dyn Prompter, echo: bool) -> Result<String> {
        let description = match &self.description {
            Some(description) => format!(" ({})", description),
            None => String::new(),
        };
        let prompt = format!("Enter {} [{}]{}: ", self.name, self.kind, description);
        let value = self.read(prompter, &prompt, echo)?;

        if value.is_empty() {
            if let Some(default) = &self.default {
                return Ok(default.clone());
            }
        }
        self.check_pattern(&value)?;
        Ok(value)
    }

    fn prompt_for_list(&self, prompter: &mut dyn Prompter, echo: bool) -> Result<String> {
        prompter
            .message(&format!(
                "Enter StringList {} values (blank line when done):",
                self.name
            ))
            .map_err(|e| self.prompt_failed(e))?;

        let first = self.read(prompter, "- ", echo)?;
        if first.is_empty() {
            if let Some(default) = &self.default {
                return Ok(default.clone());
            }
        }

        let value = if first.contains(',') || first.is_empty() {
            first
        } else {
            let mut entries = vec![first];
            loop {
                let entry = self.read(prompter, "- ", echo)?;
                if entry.is_empty() {
                    break;
                }
                entries.push(entry);
            }
            entries.join(",")
        };

        self.check_pattern(&value)?;
        Ok(value)
    }

    fn read(&self, prompter: &mut dyn Prompter, prompt: &str, echo: bool) -> Result<String> {
        prompter
            .read_line(prompt, echo)
            .map_err(|e| self.prompt_failed(e))
    }

    fn prompt_failed(&self, err: anyhow::Error) -> SsmCtlError {
        SsmCtlError::PromptFailed {
            name: self.name.clone(),
            reason: format!("{:#}", err),
        }
    }

    fn check_pattern(&self, value: &str) -> Result<()> {
        if let Some(pattern) = &self.pattern {
            if !Regex::new(pattern)?.is_match(value) {
                return Err(SsmCtlError::InvalidInput {
                    name: self.name.clone(),
                    pattern: pattern.clone(),
                });
            }
        }
        Ok(())
    }

    /// The plaintext value.
    ///
    /// Without a key id, SecureString inputs refuse to answer. With one, the
    /// cached plaintext is returned, or the ciphertext is decrypted and cached.
    pub fn value(&self, key_id: Option<&str>, client: &SsmClient) -> Result<String> {
        let Some(key_id) = key_id else {
            if self.kind.is_secure() {
                return Err(SsmCtlError::SecureInputWithoutKey {
                    name: self.name.clone(),
                });
            }
            return self.plaintext.clone().ok_or_else(|| self.missing());
        };

        if let Some(value) = self.decrypted.get() {
            return Ok(value.clone());
        }
        if let Some(ciphertext) = &self.ciphertext {
            let plaintext = client.decrypt(ciphertext, Some(key_id))?;
            return Ok(self.decrypted.get_or_init(|| plaintext).clone());
        }
        self.plaintext.clone().ok_or_else(|| self.missing())
    }

    fn missing(&self) -> SsmCtlError {
        SsmCtlError::InputMissing {
            name: self.name.clone(),
        }
    }
}

/// Merge `other` into `inputs`.
///
/// Types must match and patterns must not conflict. Missing patterns and
/// descriptions are filled in from `other`.
pub fn merge_inputs(inputs: &mut Inputs, other: Inputs) -> Result<()> {
    for (name, incoming) in other {
        let Some(existing) = inputs.get_mut(&name) else {
            inputs.insert(name, incoming);
            continue;
        };

        if existing.kind != incoming.kind {
            return Err(SsmCtlError::InputTypeConflict {
                name,
                first: existing.kind.to_string(),
                second: incoming.kind.to_string(),
            });
        }
        match (&existing.pattern, incoming.pattern) {
            (Some(first), Some(second)) if *first != second => {
                return Err(SsmCtlError::InputPatternConflict {
                    name,
                    first: first.clone(),
                    second,
                });
            }
            (None, Some(second)) => existing.pattern = Some(second),
            _ => {}
        }
        if existing.description.is_none() {
            existing.description = incoming.description;
        }
    }
    Ok(())
}

/// Apply a value given on the command line.
///
/// A declared input keeps its declared type; an undeclared one becomes a
/// String (or SecureString when `encrypted`). Ciphertext cannot be given
/// for a declared input that is not a SecureString.
pub fn supply_value(
    inputs: &mut Inputs,
    name: &str,
    value: impl Into<String>,
    encrypted: bool,
) -> Result<()> {
    let supplied = if encrypted {
        ParameterType::SecureString
    } else {
        ParameterType::String
    };
    let input = inputs
        .entry(name.to_string())
        .or_insert_with(|| Input::new(name, supplied));
    if encrypted && !input.kind.is_secure() {
        return Err(SsmCtlError::InputTypeConflict {
            name: name.to_string(),
            first: input.kind.to_string(),
            second: supplied.to_string(),
        });
    }
    input.set_value(value, Some(encrypted));
    Ok(())
}

/// Resolves registered names to bindings, prompting where allowed
pub struct InputResolver<'p> {
    inputs: Inputs,
    prompt: bool,
    echo: Option<bool>,
    prompter: &'p mut dyn Prompter,
}

impl<'p> InputResolver<'p> {
    pub fn new(inputs: Inputs, prompter: &'p mut dyn Prompter) -> Self {
        Self {
            inputs,
            prompt: true,
            echo: None,
            prompter,
        }
    }

    pub fn prompt(mut self, prompt: bool) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn echo(mut self, echo: Option<bool>) -> Self {
        self.echo = echo;
        self
    }

    /// Bind one name: built-ins delegate, inputs are prompted for if unset
    pub fn resolve(&mut self, name: &str) -> Result<VariableBinding> {
        if let Some(lookup) = DelegatedLookup::for_name(name) {
            if self.inputs.contains_key(name) {
                warn!(input = %name, "input shadows a built-in variable and is ignored");
            }
            return Ok(VariableBinding::Delegated(lookup));
        }

        let mut input = match self.inputs.remove(name) {
            Some(input) => input,
            None if self.prompt => Input::new(name, ParameterType::String),
            None => {
                return Err(SsmCtlError::InputMissing {
                    name: name.to_string(),
                })
            }
        };

        if !input.is_set() {
            if !self.prompt {
                return Err(SsmCtlError::InputMissing {
                    name: name.to_string(),
                });
            }
            debug!(input = %name, kind = %input.kind, "prompting for input");
            input.set_value_from_prompt(&mut *self.prompter, self.echo)?;
        }
        Ok(VariableBinding::Input(input))
    }
}
