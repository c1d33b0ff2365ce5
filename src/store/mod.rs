//! # Parameter store backends
//!
//! Traits and implementations for the remote parameter service and the key
//! management service behind it.
//!
//! - [`ParameterStore`] - name/value/type/key records organized by path
//! - [`Cipher`] - encrypt/decrypt with a managed key id
//! - [`MemoryStore`] / [`LocalCipher`] - in-process backends for tests and
//!   offline runs
//! - `AwsStore` / `KmsCipher` - SSM, STS and KMS (cargo feature `aws`)
//!
//! Backends are synchronous and report failures as `anyhow::Error`;
//! [`SsmClient`](crate::SsmClient) attaches the operation name.
//!
//! ```rust
//! use ssm_ctl::store::create_backend;
//! use ssm_ctl::config::AwsConfig;
//!
//! let backend = create_backend("memory", &AwsConfig::default());
//! assert!(backend.is_ok());
//!
//! let unknown = create_backend("invalid", &AwsConfig::default());
//! assert!(unknown.is_err());
//! ```

mod memory;

#[cfg(feature = "aws")]
mod aws;

pub use memory::{LocalCipher, MemoryStore};

#[cfg(feature = "aws")]
pub use aws::{AwsStore, KmsCipher};

use anyhow::{bail, Result};

use crate::config::AwsConfig;
use crate::types::ParameterType;

// ============================================================================
// RECORDS
// ============================================================================

/// One PutParameter call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub name: String,
    pub kind: ParameterType,
    pub value: String,
    pub allowed_pattern: Option<String>,
    pub description: Option<String>,
    pub key_id: Option<String>,
    pub overwrite: bool,
}

/// A stored parameter (one version of it, for history reads)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterRecord {
    pub name: String,
    pub kind: ParameterType,
    pub value: String,
    pub key_id: Option<String>,
    pub allowed_pattern: Option<String>,
    pub description: Option<String>,
    pub version: i64,
    /// Seconds since the Unix epoch
    pub last_modified_date: Option<i64>,
    pub last_modified_user: Option<String>,
}

/// Result of a by-name read
#[derive(Debug, Clone, Default)]
pub struct GetParametersOutput {
    pub records: Vec<ParameterRecord>,
    /// Names that do not exist
    pub invalid: Vec<String>,
}

/// One page of a paginated read
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<ParameterRecord>,
    pub next_token: Option<String>,
}

/// Filter on by-path reads (`Type`, `KeyId`, `Name`, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterFilter {
    pub key: String,
    /// `Equals` when unset; `BeginsWith` is also understood
    pub option: Option<String>,
    pub values: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PathQuery {
    pub path: String,
    pub recursive: bool,
    pub with_decryption: bool,
    pub filters: Vec<ParameterFilter>,
}

// ============================================================================
// TRAITS
// ============================================================================

/// Remote parameter service
pub trait ParameterStore: Send + Sync {
    /// Backend name (e.g., "aws", "memory")
    fn name(&self) -> &str;

    fn put_parameter(&self, request: &PutRequest) -> Result<()>;

    /// Read the latest version of up to 10 names
    fn get_parameters(&self, names: &[String], with_decryption: bool)
        -> Result<GetParametersOutput>;

    fn get_parameters_by_path(
        &self,
        query: &PathQuery,
        next_token: Option<&str>,
    ) -> Result<RecordPage>;

    /// Every version of one name; an unknown name yields an empty page
    fn get_parameter_history(
        &self,
        name: &str,
        with_decryption: bool,
        next_token: Option<&str>,
    ) -> Result<RecordPage>;

    /// Delete up to 10 names, returning the ones that did not exist
    fn delete_parameters(&self, names: &[String]) -> Result<Vec<String>>;

    /// Region the store lives in
    fn region(&self) -> Result<String>;

    /// Account of the calling identity
    fn account(&self) -> Result<String>;
}

/// Key management service
pub trait Cipher: Send + Sync {
    fn name(&self) -> &str;

    /// Encrypt under `key_id`, returning printable ciphertext
    fn encrypt(&self, plaintext: &str, key_id: &str) -> Result<String>;

    /// Decrypt printable ciphertext; `key_id` is a hint, not a requirement
    fn decrypt(&self, ciphertext: &str, key_id: Option<&str>) -> Result<String>;
}

// ============================================================================
// BACKEND FACTORY
// ============================================================================

/// Create a store and cipher pair by backend name
///
/// | Name | Description | Requires |
/// |------|-------------|----------|
/// | `aws` | SSM + KMS + STS | `aws` feature, AWS credentials |
/// | `memory` | In-process, empty at start | Nothing |
pub fn create_backend(
    name: &str,
    settings: &AwsConfig,
) -> Result<(Box<dyn ParameterStore>, Box<dyn Cipher>)> {
    match name.to_lowercase().as_str() {
        "memory" => Ok((Box::new(MemoryStore::new()), Box::new(LocalCipher::new()))),
        #[cfg(feature = "aws")]
        "aws" => {
            let (store, cipher) = aws::connect(settings)?;
            Ok((Box::new(store), Box::new(cipher)))
        }
        #[cfg(not(feature = "aws"))]
        "aws" => {
            let _ = settings;
            bail!("backend 'aws' requires the `aws` feature")
        }
        other => bail!("Unknown backend: {}. Available: aws, memory", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_is_available() {
        let (store, cipher) = create_backend("Memory", &AwsConfig::default()).unwrap();
        assert_eq!(store.name(), "memory");
        assert_eq!(cipher.name(), "local");
    }

    #[test]
    fn unknown_backend_lists_alternatives() {
        let err = create_backend("gcp", &AwsConfig::default()).err().unwrap();
        assert!(err.to_string().contains("Available: aws, memory"));
    }
}
