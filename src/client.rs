//! Remote store client
//!
//! [`SsmClient`] wraps a [`ParameterStore`] and a [`Cipher`] with batching,
//! pagination, re-encryption on read and run-scoped memoization (region,
//! account, qualified key ids, decrypted plaintexts).

use std::collections::BTreeSet;
use std::fmt;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SsmCtlError};
use crate::parameter::Parameter;
use crate::registry::ResolveContext;
use crate::store::{
    Cipher, ParameterFilter, ParameterRecord, ParameterStore, PathQuery, PutRequest,
};

/// Names per remote batch call
pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct GetOptions {
    /// Read through parameter history to get key id, pattern, description
    /// and last-modified metadata
    pub full: bool,
    /// Read SecureStrings decrypted and re-encrypt them on the client side
    pub reencrypt: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            full: false,
            reencrypt: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathOptions {
    pub names_only: bool,
    pub full: bool,
    pub recursive: bool,
    pub reencrypt: bool,
    pub filters: Vec<ParameterFilter>,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            names_only: false,
            full: false,
            recursive: true,
            reencrypt: true,
            filters: Vec::new(),
        }
    }
}

impl PathOptions {
    pub fn names_only() -> Self {
        Self {
            names_only: true,
            ..Self::default()
        }
    }

    pub fn full() -> Self {
        Self {
            full: true,
            ..Self::default()
        }
    }
}

/// What a path read returns
#[derive(Debug)]
pub enum PathListing {
    Names(Vec<String>),
    Parameters(Vec<Parameter>),
}

impl PathListing {
    pub fn into_names(self) -> Vec<String> {
        match self {
            PathListing::Names(names) => names,
            PathListing::Parameters(parameters) => parameters
                .iter()
                .map(|p| p.name_template().template().to_string())
                .collect(),
        }
    }

    pub fn into_parameters(self) -> Vec<Parameter> {
        match self {
            PathListing::Names(_) => Vec::new(),
            PathListing::Parameters(parameters) => parameters,
        }
    }
}

/// Names to add, overwrite and remove to make the store match a document set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathDiff {
    pub add: Vec<String>,
    pub overwrite: Vec<String>,
    pub remove: Vec<String>,
}

/// Key selection for re-encryption on read
#[derive(Debug, Clone)]
struct ReencryptRule {
    /// Name prefix; `None` matches every name
    prefix: Option<String>,
    /// `None` keeps the record's own key
    key_id: Option<String>,
}

impl ReencryptRule {
    fn matches(&self, name: &str) -> bool {
        self.prefix
            .as_deref()
            .map_or(true, |prefix| name.starts_with(prefix))
    }
}

pub struct SsmClient {
    store: Box<dyn ParameterStore>,
    cipher: Box<dyn Cipher>,
    batch_size: usize,
    region: OnceCell<String>,
    account: OnceCell<String>,
    /// Bare key id → qualified ARN
    key_ids: DashMap<String, String>,
    /// Ciphertext → plaintext
    plaintexts: DashMap<String, String>,
    reencrypt_rules: Vec<ReencryptRule>,
}

impl SsmClient {
    pub fn new(store: Box<dyn ParameterStore>, cipher: Box<dyn Cipher>) -> Self {
        Self {
            store,
            cipher,
            batch_size: DEFAULT_BATCH_SIZE,
            region: OnceCell::new(),
            account: OnceCell::new(),
            key_ids: DashMap::new(),
            plaintexts: DashMap::new(),
            reencrypt_rules: Vec::new(),
        }
    }

    /// Names per batch call, capped at the service limit
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, DEFAULT_BATCH_SIZE);
        self
    }

    pub fn backend_name(&self) -> &str {
        self.store.name()
    }

    // ========================================================================
    // IDENTITY
    // ========================================================================

    pub fn region(&self) -> Result<String> {
        self.region
            .get_or_try_init(|| {
                self.store
                    .region()
                    .map_err(|e| SsmCtlError::remote("GetRegion", e))
            })
            .cloned()
    }

    pub fn account(&self) -> Result<String> {
        self.account
            .get_or_try_init(|| {
                self.store
                    .account()
                    .map_err(|e| SsmCtlError::remote("GetCallerIdentity", e))
            })
            .cloned()
    }

    /// Qualify a bare key id or alias as `arn:aws:kms:<region>:<account>:<key>`
    pub fn format_key_id(&self, key_id: &str) -> Result<String> {
        if key_id.starts_with("arn") {
            return Ok(key_id.to_string());
        }
        if let Some(qualified) = self.key_ids.get(key_id) {
            return Ok(qualified.clone());
        }
        let qualified = format!(
            "arn:aws:kms:{}:{}:{}",
            self.region()?,
            self.account()?,
            key_id
        );
        self.key_ids.insert(key_id.to_string(), qualified.clone());
        Ok(qualified)
    }

    // ========================================================================
    // CRYPTO
    // ========================================================================

    pub fn encrypt(&self, plaintext: &str, key_id: &str) -> Result<String> {
        let ciphertext = self
            .cipher
            .encrypt(plaintext, key_id)
            .map_err(|e| SsmCtlError::crypto("Encrypt", e))?;
        self.plaintexts.insert(ciphertext.clone(), plaintext.to_string());
        Ok(ciphertext)
    }

    /// Decrypt, reusing earlier results for the same ciphertext
    pub fn decrypt(&self, ciphertext: &str, key_id: Option<&str>) -> Result<String> {
        if let Some(plaintext) = self.plaintexts.get(ciphertext) {
            return Ok(plaintext.clone());
        }
        debug!(key_id = ?key_id, "decrypting value");
        let plaintext = self
            .cipher
            .decrypt(ciphertext, key_id)
            .map_err(|e| SsmCtlError::crypto("Decrypt", e))?;
        self.plaintexts.insert(ciphertext.to_string(), plaintext.clone());
        Ok(plaintext)
    }

    /// Choose the key SecureStrings are re-encrypted with on read.
    ///
    /// Without a prefix the rule list is reset to this key (or emptied when
    /// `key_id` is `None`). With a prefix, a key is appended as a new rule,
    /// while `None` is put first so matching names keep their own key.
    /// Prefixed rules are consulted before the catch-all.
    pub fn set_reencrypt_key(&mut self, key_id: Option<&str>, prefix: Option<&str>) {
        let rule = ReencryptRule {
            prefix: prefix.map(str::to_string),
            key_id: key_id.map(str::to_string),
        };
        match (prefix, key_id) {
            (None, None) => self.reencrypt_rules.clear(),
            (None, Some(_)) => self.reencrypt_rules = vec![rule],
            (Some(_), Some(_)) => self.reencrypt_rules.push(rule),
            (Some(_), None) => self.reencrypt_rules.insert(0, rule),
        }
    }

    fn reencrypt_key(&self, name: &str, default: Option<&str>) -> Option<String> {
        let prefixed = self
            .reencrypt_rules
            .iter()
            .find(|rule| rule.prefix.is_some() && rule.matches(name));
        let rule = prefixed.or_else(|| {
            self.reencrypt_rules
                .iter()
                .find(|rule| rule.prefix.is_none())
        });
        match rule {
            Some(ReencryptRule {
                key_id: Some(key_id),
                ..
            }) => Some(key_id.clone()),
            _ => default.map(str::to_string),
        }
    }

    fn load_record(&self, record: ParameterRecord, reencrypt: bool) -> Result<Parameter> {
        if !(reencrypt && record.kind.is_secure()) {
            return Ok(Parameter::from_record(record, None));
        }
        let key_id = self
            .reencrypt_key(&record.name, record.key_id.as_deref())
            .ok_or_else(|| SsmCtlError::Crypto {
                operation: "Encrypt".to_string(),
                reason: format!("no key id to re-encrypt {}", record.name),
            })?;
        let ciphertext = self.encrypt(&record.value, &key_id)?;
        Ok(Parameter::from_record(record, Some(ciphertext)))
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Write every enabled parameter, in batches.
    ///
    /// All values are resolved before the first write. Returns the number of
    /// parameters written.
    pub fn batch_put<'p, I>(
        &self,
        parameters: I,
        ctx: &ResolveContext<'_>,
        overwrite_default: bool,
    ) -> Result<usize>
    where
        I: IntoIterator<Item = &'p Parameter>,
    {
        let mut requests = Vec::new();
        for parameter in parameters {
            if parameter.disabled(ctx)? {
                debug!(parameter = %parameter.name_template(), "skipping disabled parameter");
                continue;
            }
            let name = parameter.name(ctx)?;
            let value = parameter
                .value(ctx)?
                .ok_or_else(|| SsmCtlError::MissingValue { name: name.clone() })?;
            requests.push(PutRequest {
                name,
                kind: parameter.kind(),
                value,
                allowed_pattern: parameter.allowed_pattern(ctx)?,
                description: parameter.description().map(str::to_string),
                key_id: parameter.key_id(ctx)?,
                overwrite: parameter.overwrite(overwrite_default),
            });
        }

        for (index, batch) in requests.chunks(self.batch_size).enumerate() {
            self.put_batch(index, batch)?;
        }
        info!(count = requests.len(), "parameters written");
        Ok(requests.len())
    }

    #[instrument(skip_all, fields(batch = index, names = batch.len()))]
    fn put_batch(&self, index: usize, batch: &[PutRequest]) -> Result<()> {
        for request in batch {
            debug!(name = %request.name, kind = %request.kind, "put parameter");
            self.store
                .put_parameter(request)
                .map_err(|e| SsmCtlError::remote("PutParameter", e.context(request.name.clone())))?;
        }
        Ok(())
    }

    /// Delete names in batches; unknown names are logged and skipped
    pub fn delete(&self, names: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for (index, batch) in names.chunks(self.batch_size).enumerate() {
            deleted += self.delete_batch(index, batch)?;
        }
        Ok(deleted)
    }

    #[instrument(skip_all, fields(batch = index, names = batch.len()))]
    fn delete_batch(&self, index: usize, batch: &[String]) -> Result<usize> {
        let invalid = self
            .store
            .delete_parameters(batch)
            .map_err(|e| SsmCtlError::remote("DeleteParameters", e))?;
        if !invalid.is_empty() {
            warn!(names = %invalid.join(", "), "parameters to delete did not exist");
        }
        Ok(batch.len() - invalid.len())
    }

    /// Delete everything under `path`
    pub fn delete_path(
        &self,
        path: &str,
        recursive: bool,
        filters: Vec<ParameterFilter>,
    ) -> Result<usize> {
        let options = PathOptions {
            names_only: true,
            recursive,
            filters,
            ..PathOptions::default()
        };
        let names = self.get_path(path, &options)?.into_names();
        self.delete(&names)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Read the named parameters; unknown names fail together
    pub fn get(&self, names: &[String], options: GetOptions) -> Result<Vec<Parameter>> {
        let mut invalid = Vec::new();
        let mut parameters = Vec::new();

        if options.full {
            for name in names {
                let mut versions = self.get_versions(name, options.reencrypt, Some(1))?;
                match versions.pop() {
                    Some(latest) => parameters.push(latest),
                    None => invalid.push(name.clone()),
                }
            }
        } else {
            for (index, batch) in names.chunks(self.batch_size).enumerate() {
                debug!(batch = index, names = batch.len(), "get parameters");
                let output = self
                    .store
                    .get_parameters(batch, options.reencrypt)
                    .map_err(|e| SsmCtlError::remote("GetParameters", e))?;
                invalid.extend(output.invalid);
                for record in output.records {
                    parameters.push(self.load_record(record, options.reencrypt)?);
                }
            }
        }

        if !invalid.is_empty() {
            return Err(SsmCtlError::InvalidParameters { names: invalid });
        }
        Ok(parameters)
    }

    /// Full history of a parameter, newest version first; empty when unknown
    #[instrument(skip(self))]
    pub fn get_versions(
        &self,
        name: &str,
        reencrypt: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Parameter>> {
        let mut records = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .store
                .get_parameter_history(name, reencrypt, next_token.as_deref())
                .map_err(|e| SsmCtlError::remote("GetParameterHistory", e))?;
            records.extend(page.records);
            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }

        records.sort_by(|a, b| b.version.cmp(&a.version));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        records
            .into_iter()
            .map(|record| self.load_record(record, reencrypt))
            .collect()
    }

    /// Read everything under `path`.
    ///
    /// `names_only` returns names; `full` re-reads each name through its
    /// history. The two cannot be combined.
    #[instrument(skip(self, options), fields(names_only = options.names_only, full = options.full))]
    pub fn get_path(&self, path: &str, options: &PathOptions) -> Result<PathListing> {
        if options.names_only && options.full {
            return Err(SsmCtlError::InvalidOptions {
                reason: "names_only and full cannot be combined".to_string(),
            });
        }

        let query = PathQuery {
            path: path.to_string(),
            recursive: options.recursive,
            with_decryption: options.reencrypt && !options.names_only,
            filters: options.filters.clone(),
        };

        let mut names = Vec::new();
        let mut parameters = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .store
                .get_parameters_by_path(&query, next_token.as_deref())
                .map_err(|e| SsmCtlError::remote("GetParametersByPath", e))?;
            for record in page.records {
                if options.names_only || options.full {
                    names.push(record.name);
                } else {
                    parameters.push(self.load_record(record, options.reencrypt)?);
                }
            }
            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }

        if options.names_only {
            return Ok(PathListing::Names(names));
        }
        if options.full {
            let full = GetOptions {
                full: true,
                reencrypt: options.reencrypt,
            };
            return self.get(&names, full).map(PathListing::Parameters);
        }
        Ok(PathListing::Parameters(parameters))
    }

    /// Compare document names against what is stored under `paths`.
    ///
    /// Names outside every path count as additions.
    pub fn diff_paths(&self, paths: &[String], names: &[String]) -> Result<PathDiff> {
        let names: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        let mut add = BTreeSet::new();
        let mut overwrite = BTreeSet::new();
        let mut remove = BTreeSet::new();

        for path in paths {
            let stored = self.get_path(path, &PathOptions::names_only())?.into_names();
            let stored: BTreeSet<&str> = stored.iter().map(String::as_str).collect();
            let on_path: BTreeSet<&str> = names
                .iter()
                .copied()
                .filter(|name| is_under(name, path))
                .collect();

            add.extend(on_path.difference(&stored).map(|s| s.to_string()));
            overwrite.extend(on_path.intersection(&stored).map(|s| s.to_string()));
            remove.extend(stored.difference(&on_path).map(|s| s.to_string()));
        }
        for name in names {
            if !overwrite.contains(name) && !remove.contains(name) {
                add.insert(name.to_string());
            }
        }

        Ok(PathDiff {
            add: add.into_iter().collect(),
            overwrite: overwrite.into_iter().collect(),
            remove: remove.into_iter().collect(),
        })
    }
}

/// `name` is the path itself or lies below it
fn is_under(name: &str, path: &str) -> bool {
    let path = path.trim_end_matches('/');
    name.strip_prefix(path)
        .map_or(false, |rest| rest.is_empty() || rest.starts_with('/'))
}

impl fmt::Debug for SsmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsmClient")
            .field("store", &self.store.name())
            .field("cipher", &self.cipher.name())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
