//! Error types with error codes and fix suggestions
//!
//! Error code ranges:
//! - SSM-000-009: IO / document decoding
//! - SSM-010-019: Input errors (prompting, supplied values)
//! - SSM-020-039: Validation errors (document structure, merge conflicts)
//! - SSM-040-049: Remote store / crypto errors
//! - SSM-050-059: Internal invariant violations
//! - SSM-060-069: Configuration errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SsmCtlError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum SsmCtlError {
    // ═══════════════════════════════════════════
    // IO / DECODING (000-009)
    // ═══════════════════════════════════════════
    #[error("[SSM-001] YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("[SSM-002] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[SSM-003] Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    // ═══════════════════════════════════════════
    // INPUT ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[SSM-010] Invalid input for {name}: value does not match pattern '{pattern}'")]
    InvalidInput { name: String, pattern: String },

    #[error("[SSM-011] Input {name} not given")]
    InputMissing { name: String },

    #[error("[SSM-012] SecureString input {name} cannot be read without a key id")]
    SecureInputWithoutKey { name: String },

    #[error("[SSM-013] Failed to read input {name}: {reason}")]
    PromptFailed { name: String, reason: String },

    // ═══════════════════════════════════════════
    // VALIDATION ERRORS (020-039)
    // ═══════════════════════════════════════════
    #[error("[SSM-020] Conflicting input types for {name}: {first} vs {second}")]
    InputTypeConflict {
        name: String,
        first: String,
        second: String,
    },

    #[error("[SSM-021] Conflicting input patterns for {name}: '{first}' vs '{second}'")]
    InputPatternConflict {
        name: String,
        first: String,
        second: String,
    },

    #[error("[SSM-022] Defaults are not allowed for SecureString input {name}")]
    SecureDefault { name: String },

    #[error("[SSM-023] Unknown parameter type '{value}'")]
    UnknownType { value: String },

    #[error("[SSM-024] Value cannot be used with SecureString parameter {name}")]
    SecureStringValue { name: String },

    #[error("[SSM-025] Mismatched secure inputs on parameter {name}: {reason}")]
    MismatchedKeyId { name: String, reason: String },

    #[error("[SSM-026] Value missing for parameter {name}")]
    MissingValue { name: String },

    #[error("[SSM-027] '{value}' is not a valid single reference")]
    InvalidReference { value: String },

    #[error("[SSM-028] Invalid document: {reason}")]
    InvalidDocument { reason: String },

    #[error("[SSM-029] Field '{field}' of {name} must be {expected}")]
    InvalidField {
        name: String,
        field: String,
        expected: String,
    },

    // ═══════════════════════════════════════════
    // REMOTE STORE / CRYPTO ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[SSM-040] Invalid parameter names {}", .names.join(", "))]
    InvalidParameters { names: Vec<String> },

    #[error("[SSM-041] Parameter store {operation} failed: {reason}")]
    RemoteStore { operation: String, reason: String },

    #[error("[SSM-042] Crypto {operation} failed: {reason}")]
    Crypto { operation: String, reason: String },

    #[error("[SSM-043] Invalid options: {reason}")]
    InvalidOptions { reason: String },

    // ═══════════════════════════════════════════
    // INTERNAL (050-059)
    // ═══════════════════════════════════════════
    #[error("[SSM-050] Variable $({name}) was read before it was resolved")]
    UnresolvedVariable { name: String },

    // ═══════════════════════════════════════════
    // CONFIG (060-069)
    // ═══════════════════════════════════════════
    #[error("[SSM-060] Configuration error: {reason}")]
    ConfigError { reason: String },
}

impl SsmCtlError {
    pub(crate) fn remote(operation: &str, err: anyhow::Error) -> Self {
        SsmCtlError::RemoteStore {
            operation: operation.to_string(),
            reason: format!("{:#}", err),
        }
    }

    pub(crate) fn crypto(operation: &str, err: anyhow::Error) -> Self {
        SsmCtlError::Crypto {
            operation: operation.to_string(),
            reason: format!("{:#}", err),
        }
    }
}

impl FixSuggestion for SsmCtlError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            SsmCtlError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            SsmCtlError::Io(_) => Some("Check file path and permissions"),
            SsmCtlError::Regex(_) => Some("Fix the Pattern/AllowedPattern regular expression"),
            SsmCtlError::InvalidInput { .. } => Some("Re-run and enter a value matching the pattern"),
            SsmCtlError::InputMissing { .. } => {
                Some("Pass the value with --input NAME VALUE or allow prompting with --prompt")
            }
            SsmCtlError::SecureInputWithoutKey { .. } => {
                Some("Reference SecureString inputs only from SecureString parameters with a KeyId")
            }
            SsmCtlError::PromptFailed { .. } => Some("Run from an interactive terminal or pass --input"),
            SsmCtlError::InputTypeConflict { .. } => {
                Some("Declare the input with the same Type in every file")
            }
            SsmCtlError::InputPatternConflict { .. } => {
                Some("Use the same Pattern for the input in every file, or declare it once")
            }
            SsmCtlError::SecureDefault { .. } => Some("Remove Default from the SecureString input"),
            SsmCtlError::UnknownType { .. } => Some("Use one of: String, StringList, SecureString"),
            SsmCtlError::SecureStringValue { .. } => {
                Some("Use EncryptedValue (see `ssm-ctl encrypt`) or Input for SecureString parameters")
            }
            SsmCtlError::MismatchedKeyId { .. } => {
                Some("KeyId is required for SecureString and forbidden for other types")
            }
            SsmCtlError::MissingValue { .. } => Some("Add a Value or set Disable: true"),
            SsmCtlError::InvalidReference { .. } => Some("Use an input name or $(name)"),
            SsmCtlError::InvalidDocument { .. } => {
                Some("Top-level keys are parameter names or .INPUT/.COMMON/.FLUSH")
            }
            SsmCtlError::InvalidField { .. } => None,
            SsmCtlError::InvalidParameters { .. } => Some("Check the parameter names exist"),
            SsmCtlError::RemoteStore { .. } => Some("Check AWS credentials, region and permissions"),
            SsmCtlError::Crypto { .. } => Some("Check the KMS key id and your kms:Encrypt/kms:Decrypt access"),
            SsmCtlError::InvalidOptions { .. } => None,
            SsmCtlError::UnresolvedVariable { .. } => None,
            SsmCtlError::ConfigError { .. } => Some("Check ~/.config/ssm-ctl/config.toml"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_codes() {
        let err = SsmCtlError::InputMissing {
            name: "Foo".to_string(),
        };
        assert_eq!(err.to_string(), "[SSM-011] Input Foo not given");

        let err = SsmCtlError::InvalidParameters {
            names: vec!["/a".to_string(), "/b".to_string()],
        };
        assert_eq!(err.to_string(), "[SSM-040] Invalid parameter names /a, /b");
    }

    #[test]
    fn remote_wraps_anyhow_chain() {
        let err = SsmCtlError::remote("PutParameter", anyhow::anyhow!("throttled"));
        assert!(err.to_string().contains("PutParameter"));
        assert!(err.to_string().contains("throttled"));
        assert!(err.fix_suggestion().is_some());
    }
}
