//! In-process parameter store and cipher
//!
//! Behaves like the remote service closely enough for tests and dry runs:
//! versioned history, overwrite protection, allowed-pattern checks, path
//! pagination and the 10-name limit on batch calls.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;

use super::{
    Cipher, GetParametersOutput, ParameterFilter, ParameterRecord, ParameterStore, PathQuery,
    PutRequest, RecordPage,
};

/// Most names a single batch call accepts
const MAX_BATCH_NAMES: usize = 10;

/// Starting point of the store's logical clock
const EPOCH_START: i64 = 1_700_000_000;

#[derive(Debug, Default)]
struct State {
    /// Name → versions, oldest first
    history: BTreeMap<String, Vec<ParameterRecord>>,
    puts: Vec<PutRequest>,
    deletes: Vec<Vec<String>>,
    clock: i64,
}

/// In-memory parameter store. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    page_size: usize,
    region: String,
    account: String,
    user: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            page_size: 10,
            region: "us-east-1".to_string(),
            account: "000000000000".to_string(),
            user: "arn:aws:iam::000000000000:user/memory".to_string(),
        }
    }

    pub fn with_identity(mut self, region: impl Into<String>, account: impl Into<String>) -> Self {
        self.region = region.into();
        self.account = account.into();
        self
    }

    /// Records per page on paginated reads
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Every put request received, in order
    pub fn put_requests(&self) -> Vec<PutRequest> {
        self.state.lock().unwrap().puts.clone()
    }

    /// Every delete batch received, in order
    pub fn delete_batches(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().deletes.clone()
    }

    /// Names currently stored
    pub fn names(&self) -> Vec<String> {
        self.state.lock().unwrap().history.keys().cloned().collect()
    }

    /// Latest version of a parameter, as stored (plaintext)
    pub fn latest(&self, name: &str) -> Option<ParameterRecord> {
        self.state
            .lock()
            .unwrap()
            .history
            .get(name)
            .and_then(|versions| versions.last().cloned())
    }

    /// Stored value as returned to a caller
    fn present(record: &ParameterRecord, with_decryption: bool) -> ParameterRecord {
        let mut record = record.clone();
        if record.kind.is_secure() && !with_decryption {
            let key_id = record.key_id.as_deref().unwrap_or("alias/aws/ssm");
            record.value = LocalCipher::seal(&record.value, key_id);
        }
        record
    }

    fn page(&self, records: Vec<ParameterRecord>, next_token: Option<&str>) -> Result<RecordPage> {
        let start = match next_token {
            Some(token) => token
                .parse::<usize>()
                .with_context(|| format!("invalid next token '{}'", token))?,
            None => 0,
        };
        let end = (start + self.page_size).min(records.len());
        let next_token = (end < records.len()).then(|| end.to_string());
        Ok(RecordPage {
            records: records.get(start..end).map(<[_]>::to_vec).unwrap_or_default(),
            next_token,
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_batch(names: &[String]) -> Result<()> {
    if names.len() > MAX_BATCH_NAMES {
        bail!(
            "at most {} names per call, got {}",
            MAX_BATCH_NAMES,
            names.len()
        );
    }
    Ok(())
}

fn under_path(name: &str, path: &str, recursive: bool) -> bool {
    let prefix = if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    };
    match name.strip_prefix(&prefix) {
        Some(rest) => recursive || !rest.contains('/'),
        None => false,
    }
}

fn filter_matches(filter: &ParameterFilter, record: &ParameterRecord) -> Result<bool> {
    let field = match filter.key.as_str() {
        "Type" => Some(record.kind.as_str().to_string()),
        "KeyId" => record.key_id.clone(),
        "Name" => Some(record.name.clone()),
        other => bail!("unsupported parameter filter key '{}'", other),
    };
    let Some(field) = field else {
        return Ok(false);
    };
    let matched = match filter.option.as_deref() {
        None | Some("Equals") => filter.values.iter().any(|v| *v == field),
        Some("BeginsWith") => filter.values.iter().any(|v| field.starts_with(v.as_str())),
        Some(other) => bail!("unsupported parameter filter option '{}'", other),
    };
    Ok(matched)
}

impl ParameterStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn put_parameter(&self, request: &PutRequest) -> Result<()> {
        if let Some(pattern) = &request.allowed_pattern {
            if !Regex::new(pattern)?.is_match(&request.value) {
                bail!(
                    "ParameterPatternMismatch: value of {} does not match '{}'",
                    request.name,
                    pattern
                );
            }
        }

        let mut state = self.state.lock().unwrap();
        state.puts.push(request.clone());

        let version = match state.history.get(&request.name) {
            Some(_) if !request.overwrite => {
                bail!("ParameterAlreadyExists: {}", request.name)
            }
            Some(versions) => versions.last().map_or(1, |v| v.version + 1),
            None => 1,
        };

        state.clock += 1;
        let record = ParameterRecord {
            name: request.name.clone(),
            kind: request.kind,
            value: request.value.clone(),
            key_id: request.key_id.clone(),
            allowed_pattern: request.allowed_pattern.clone(),
            description: request.description.clone(),
            version,
            last_modified_date: Some(EPOCH_START + state.clock),
            last_modified_user: Some(self.user.clone()),
        };
        state
            .history
            .entry(request.name.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    fn get_parameters(
        &self,
        names: &[String],
        with_decryption: bool,
    ) -> Result<GetParametersOutput> {
        check_batch(names)?;
        let state = self.state.lock().unwrap();
        let mut output = GetParametersOutput::default();
        for name in names {
            match state.history.get(name).and_then(|v| v.last()) {
                Some(record) => output.records.push(Self::present(record, with_decryption)),
                None => output.invalid.push(name.clone()),
            }
        }
        Ok(output)
    }

    fn get_parameters_by_path(
        &self,
        query: &PathQuery,
        next_token: Option<&str>,
    ) -> Result<RecordPage> {
        let records = {
            let state = self.state.lock().unwrap();
            let mut records = Vec::new();
            for (name, versions) in &state.history {
                if !under_path(name, &query.path, query.recursive) {
                    continue;
                }
                let Some(record) = versions.last() else {
                    continue;
                };
                let mut keep = true;
                for filter in &query.filters {
                    keep &= filter_matches(filter, record)?;
                }
                if keep {
                    records.push(Self::present(record, query.with_decryption));
                }
            }
            records
        };
        self.page(records, next_token)
    }

    fn get_parameter_history(
        &self,
        name: &str,
        with_decryption: bool,
        next_token: Option<&str>,
    ) -> Result<RecordPage> {
        let records = {
            let state = self.state.lock().unwrap();
            let Some(versions) = state.history.get(name) else {
                return Ok(RecordPage::default());
            };
            versions
                .iter()
                .map(|record| Self::present(record, with_decryption))
                .collect::<Vec<_>>()
        };
        self.page(records, next_token)
    }

    fn delete_parameters(&self, names: &[String]) -> Result<Vec<String>> {
        check_batch(names)?;
        let mut state = self.state.lock().unwrap();
        state.deletes.push(names.to_vec());
        let invalid = names
            .iter()
            .filter(|name| state.history.remove(name.as_str()).is_none())
            .cloned()
            .collect::<Vec<_>>();
        Ok(invalid)
    }

    fn region(&self) -> Result<String> {
        Ok(self.region.clone())
    }

    fn account(&self) -> Result<String> {
        Ok(self.account.clone())
    }
}

/// Reversible stand-in for a key management service.
///
/// Ciphertext is base64 of `key_id NUL plaintext`; any instance can decrypt
/// what another produced.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCipher;

impl LocalCipher {
    pub fn new() -> Self {
        Self
    }

    pub fn seal(plaintext: &str, key_id: &str) -> String {
        STANDARD.encode(format!("{}\0{}", key_id, plaintext))
    }

    /// Split ciphertext into `(key_id, plaintext)`
    pub fn open(ciphertext: &str) -> Result<(String, String)> {
        let bytes = STANDARD
            .decode(ciphertext.trim())
            .context("ciphertext is not base64")?;
        let text = String::from_utf8(bytes).context("ciphertext is not UTF-8")?;
        let (key_id, plaintext) = text
            .split_once('\0')
            .ok_or_else(|| anyhow!("ciphertext was not produced by the local cipher"))?;
        Ok((key_id.to_string(), plaintext.to_string()))
    }
}

impl Cipher for LocalCipher {
    fn name(&self) -> &str {
        "local"
    }

    fn encrypt(&self, plaintext: &str, key_id: &str) -> Result<String> {
        Ok(Self::seal(plaintext, key_id))
    }

    fn decrypt(&self, ciphertext: &str, _key_id: Option<&str>) -> Result<String> {
        let (_, plaintext) = Self::open(ciphertext)?;
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParameterType;

    fn put(store: &MemoryStore, name: &str, value: &str, overwrite: bool) -> Result<()> {
        store.put_parameter(&PutRequest {
            name: name.to_string(),
            kind: ParameterType::String,
            value: value.to_string(),
            allowed_pattern: None,
            description: None,
            key_id: None,
            overwrite,
        })
    }

    fn query(path: &str, recursive: bool) -> PathQuery {
        PathQuery {
            path: path.to_string(),
            recursive,
            with_decryption: true,
            filters: Vec::new(),
        }
    }

    #[test]
    fn put_without_overwrite_rejects_existing() {
        let store = MemoryStore::new();
        put(&store, "/a", "1", false).unwrap();
        let err = put(&store, "/a", "2", false).unwrap_err();
        assert!(err.to_string().contains("ParameterAlreadyExists"));

        put(&store, "/a", "2", true).unwrap();
        assert_eq!(store.latest("/a").unwrap().version, 2);
        assert_eq!(store.put_requests().len(), 3);
    }

    #[test]
    fn put_checks_allowed_pattern() {
        let store = MemoryStore::new();
        let err = store
            .put_parameter(&PutRequest {
                name: "/port".to_string(),
                kind: ParameterType::String,
                value: "http".to_string(),
                allowed_pattern: Some(r"^\d+$".to_string()),
                description: None,
                key_id: None,
                overwrite: false,
            })
            .unwrap_err();
        assert!(err.to_string().contains("ParameterPatternMismatch"));
    }

    #[test]
    fn get_reports_invalid_names() {
        let store = MemoryStore::new();
        put(&store, "/a", "1", false).unwrap();
        let output = store
            .get_parameters(&["/a".to_string(), "/missing".to_string()], true)
            .unwrap();
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.invalid, vec!["/missing".to_string()]);
    }

    #[test]
    fn batch_calls_are_limited_to_ten_names() {
        let store = MemoryStore::new();
        let names: Vec<String> = (0..11).map(|i| format!("/n{}", i)).collect();
        assert!(store.get_parameters(&names, false).is_err());
        assert!(store.delete_parameters(&names).is_err());
    }

    #[test]
    fn path_reads_respect_recursion_and_pages() {
        let store = MemoryStore::new().with_page_size(2);
        for name in ["/app/a", "/app/b", "/app/c", "/app/sub/d", "/apple"] {
            put(&store, name, "v", false).unwrap();
        }

        let first = store.get_parameters_by_path(&query("/app", true), None).unwrap();
        assert_eq!(first.records.len(), 2);
        let token = first.next_token.unwrap();
        let second = store
            .get_parameters_by_path(&query("/app", true), Some(&token))
            .unwrap();
        assert_eq!(second.records.len(), 2);
        assert!(second.next_token.is_none());

        let flat = store.get_parameters_by_path(&query("/app/", false), None).unwrap();
        let mut names: Vec<_> = flat.records.iter().map(|r| r.name.clone()).collect();
        let rest = store
            .get_parameters_by_path(&query("/app/", false), flat.next_token.as_deref())
            .unwrap();
        names.extend(rest.records.into_iter().map(|r| r.name));
        assert_eq!(names, vec!["/app/a", "/app/b", "/app/c"]);
    }

    #[test]
    fn path_filters_match_type() {
        let store = MemoryStore::new();
        put(&store, "/app/a", "v", false).unwrap();
        let mut q = query("/app", true);
        q.filters.push(ParameterFilter {
            key: "Type".to_string(),
            option: None,
            values: vec!["SecureString".to_string()],
        });
        assert!(store.get_parameters_by_path(&q, None).unwrap().records.is_empty());
    }

    #[test]
    fn secure_values_are_sealed_without_decryption() {
        let store = MemoryStore::new();
        store
            .put_parameter(&PutRequest {
                name: "/secret".to_string(),
                kind: ParameterType::SecureString,
                value: "pa55".to_string(),
                allowed_pattern: None,
                description: None,
                key_id: Some("alias/app".to_string()),
                overwrite: false,
            })
            .unwrap();

        let sealed = store.get_parameters(&["/secret".to_string()], false).unwrap();
        let (key, plaintext) = LocalCipher::open(&sealed.records[0].value).unwrap();
        assert_eq!(key, "alias/app");
        assert_eq!(plaintext, "pa55");

        let clear = store.get_parameters(&["/secret".to_string()], true).unwrap();
        assert_eq!(clear.records[0].value, "pa55");
    }

    #[test]
    fn delete_returns_unknown_names() {
        let store = MemoryStore::new();
        put(&store, "/a", "1", false).unwrap();
        let invalid = store
            .delete_parameters(&["/a".to_string(), "/b".to_string()])
            .unwrap();
        assert_eq!(invalid, vec!["/b".to_string()]);
        assert!(store.names().is_empty());
        assert_eq!(store.delete_batches().len(), 1);
    }

    #[test]
    fn local_cipher_round_trip_and_garbage() {
        let cipher = LocalCipher::new();
        let ciphertext = cipher.encrypt("hello", "key").unwrap();
        assert_eq!(cipher.decrypt(&ciphertext, None).unwrap(), "hello");
        assert!(cipher.decrypt("not base64!", None).is_err());
    }
}
