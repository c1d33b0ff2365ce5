//! `$(name)` template strings
//!
//! A [`VarString`] is tokenized once when it is built. Resolution is a
//! separate phase: [`VarString::references`] feeds the variable registry, and
//! [`VarString::resolve`] substitutes bound values in a single pass. Nothing
//! is cached inside the value itself.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, SsmCtlError};
use crate::registry::{ResolveContext, VariableRegistry};

/// `$(name)` where name is a run of word characters
static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\((\w+)\)").unwrap());

/// A bare variable name
static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+$").unwrap());

/// Token representing a parsed template fragment
#[derive(Debug, Clone)]
enum Token {
    /// Literal text (stores range in original string)
    Literal(Range<usize>),
    /// `$(name)` reference
    Reference(String),
}

/// A lazily-resolved template string
#[derive(Debug, Clone)]
pub struct VarString {
    template: String,
    tokens: Vec<Token>,
    /// Key used to decrypt the referenced inputs, when this string feeds a
    /// SecureString value
    key_id: Option<Box<VarString>>,
}

impl VarString {
    /// Parse a template, extracting its `$(name)` references
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let tokens = tokenize(&template);
        Self {
            template,
            tokens,
            key_id: None,
        }
    }

    /// A string taken verbatim: `$(name)` sequences are not references
    pub fn literal(template: impl Into<String>) -> Self {
        let template = template.into();
        let tokens = vec![Token::Literal(0..template.len())];
        Self {
            template,
            tokens,
            key_id: None,
        }
    }

    /// Attach the key id used to decrypt referenced inputs
    pub fn with_key_id(mut self, key_id: VarString) -> Self {
        self.key_id = Some(Box::new(key_id));
        self
    }

    /// Classify `s` as a single reference.
    ///
    /// `$(name)` is returned as is, a bare `name` is wrapped as `$(name)`,
    /// anything else is rejected.
    pub fn single_reference(s: &str) -> Result<String> {
        if let Some(m) = REFERENCE_RE.find(s) {
            if m.start() == 0 && m.end() == s.len() {
                return Ok(s.to_string());
            }
        }
        if NAME_RE.is_match(s) {
            return Ok(format!("$({})", s));
        }
        Err(SsmCtlError::InvalidReference {
            value: s.to_string(),
        })
    }

    /// The raw template text
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn key_id(&self) -> Option<&VarString> {
        self.key_id.as_deref()
    }

    /// Referenced names in template order (duplicates kept)
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|token| match token {
            Token::Reference(name) => Some(name.as_str()),
            Token::Literal(_) => None,
        })
    }

    pub fn has_references(&self) -> bool {
        self.references().next().is_some()
    }

    /// Register every referenced name, including the key id's
    pub fn collect_references(&self, registry: &mut VariableRegistry) {
        for name in self.references() {
            registry.register(name);
        }
        if let Some(key_id) = &self.key_id {
            key_id.collect_references(registry);
        }
    }

    /// Substitute bound values for every reference.
    ///
    /// A string without references resolves to its own template and never
    /// touches the context.
    pub fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<String> {
        if !self.has_references() {
            return Ok(self.template.clone());
        }

        let key_id = match &self.key_id {
            Some(key_id) => Some(key_id.resolve(ctx)?),
            None => None,
        };

        let mut result = String::with_capacity(self.template.len() + 32);
        for token in &self.tokens {
            match token {
                Token::Literal(range) => result.push_str(&self.template[range.clone()]),
                Token::Reference(name) => {
                    result.push_str(&ctx.lookup(name, key_id.as_deref())?);
                }
            }
        }
        Ok(result)
    }
}

fn tokenize(template: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut last_end = 0;

    for cap in REFERENCE_RE.captures_iter(template) {
        let m = cap.get(0).unwrap();
        if m.start() > last_end {
            tokens.push(Token::Literal(last_end..m.start()));
        }
        tokens.push(Token::Reference(cap[1].to_string()));
        last_end = m.end();
    }

    if last_end < template.len() {
        tokens.push(Token::Literal(last_end..template.len()));
    }
    tokens
}

impl PartialEq for VarString {
    fn eq(&self, other: &Self) -> bool {
        self.template == other.template
    }
}

impl Eq for VarString {}

impl PartialEq<str> for VarString {
    fn eq(&self, other: &str) -> bool {
        self.template == other
    }
}

impl PartialEq<&str> for VarString {
    fn eq(&self, other: &&str) -> bool {
        self.template == *other
    }
}

impl Hash for VarString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.template.hash(state);
    }
}

impl fmt::Display for VarString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

impl From<&str> for VarString {
    fn from(s: &str) -> Self {
        VarString::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Bindings;
    use crate::store::{LocalCipher, MemoryStore};
    use crate::SsmClient;

    fn client() -> SsmClient {
        SsmClient::new(Box::new(MemoryStore::new()), Box::new(LocalCipher::new()))
    }

    #[test]
    fn extracts_references_in_order_with_duplicates() {
        let s = VarString::new("/$(Env)/app/$(Name)/$(Env)");
        let refs: Vec<_> = s.references().collect();
        assert_eq!(refs, vec!["Env", "Name", "Env"]);
    }

    #[test]
    fn no_references_resolves_to_template_without_bindings() {
        let client = client();
        let bindings = Bindings::default();
        let ctx = ResolveContext::new(&bindings, &client);

        let s = VarString::new("plain value");
        assert!(!s.has_references());
        assert_eq!(s.resolve(&ctx).unwrap(), "plain value");
    }

    #[test]
    fn literal_ignores_reference_syntax() {
        let s = VarString::literal("$(NotAVariable)");
        assert!(!s.has_references());
        let client = client();
        let bindings = Bindings::default();
        let ctx = ResolveContext::new(&bindings, &client);
        assert_eq!(s.resolve(&ctx).unwrap(), "$(NotAVariable)");
    }

    #[test]
    fn unbound_reference_is_an_internal_error() {
        let client = client();
        let bindings = Bindings::default();
        let ctx = ResolveContext::new(&bindings, &client);

        let err = VarString::new("$(Missing)").resolve(&ctx).unwrap_err();
        assert!(matches!(err, SsmCtlError::UnresolvedVariable { name } if name == "Missing"));
    }

    #[test]
    fn malformed_references_stay_literal() {
        let s = VarString::new("$(a-b) $x $() $(ok)");
        let refs: Vec<_> = s.references().collect();
        assert_eq!(refs, vec!["ok"]);
    }

    #[test]
    fn equality_is_by_template() {
        let a = VarString::new("$(A)");
        let b = VarString::new("$(A)").with_key_id(VarString::new("key"));
        assert_eq!(a, b);
        assert_eq!(a, "$(A)");
        assert_ne!(a, VarString::new("$(B)"));
    }

    #[test]
    fn single_reference_forms() {
        assert_eq!(VarString::single_reference("$(Foo)").unwrap(), "$(Foo)");
        assert_eq!(VarString::single_reference("Foo").unwrap(), "$(Foo)");
        assert!(VarString::single_reference("$(Foo) extra").is_err());
        assert!(VarString::single_reference("not valid").is_err());
        assert!(VarString::single_reference("").is_err());
    }

    #[test]
    fn collect_includes_key_id_references() {
        let s = VarString::new("$(Secret)").with_key_id(VarString::new("arn:$(Region):$(Account)"));
        let mut registry = VariableRegistry::new();
        s.collect_references(&mut registry);
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["Account", "Region", "Secret"]);
    }
}
