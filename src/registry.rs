//! Variable registry and resolved bindings
//!
//! The registry collects every `$(name)` referenced by a compilation unit.
//! [`VariableRegistry::resolve_all`] turns it into [`Bindings`], the only
//! value a [`VarString`](crate::VarString) can be resolved against, so reads
//! can never happen before resolution.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::client::SsmClient;
use crate::error::{Result, SsmCtlError};
use crate::input::Input;

/// Built-in names answered by the remote store client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegatedLookup {
    Region,
    Account,
}

impl DelegatedLookup {
    /// The delegated lookup for a built-in name, if `name` is one
    pub fn for_name(name: &str) -> Option<Self> {
        match name {
            "Region" => Some(DelegatedLookup::Region),
            "Account" => Some(DelegatedLookup::Account),
            _ => None,
        }
    }

    fn value(&self, client: &SsmClient) -> Result<String> {
        match self {
            DelegatedLookup::Region => client.region(),
            DelegatedLookup::Account => client.account(),
        }
    }
}

/// What a registered name resolved to
#[derive(Debug, Clone)]
pub enum VariableBinding {
    Input(Input),
    Delegated(DelegatedLookup),
}

impl VariableBinding {
    /// Read the bound value, decrypting with `key_id` when the input holds ciphertext
    pub fn value(&self, key_id: Option<&str>, client: &SsmClient) -> Result<String> {
        match self {
            VariableBinding::Input(input) => input.value(key_id, client),
            VariableBinding::Delegated(lookup) => lookup.value(client),
        }
    }
}

/// Every distinct variable name referenced in one run
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    names: BTreeSet<String>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a name (idempotent)
    pub fn register(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    /// Registered names in lexicographic order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolve every registered name in lexicographic order.
    ///
    /// The first failing name aborts the whole resolution.
    pub fn resolve_all<F>(&self, mut resolver: F) -> Result<Bindings>
    where
        F: FnMut(&str) -> Result<VariableBinding>,
    {
        let mut bindings = Bindings::default();
        for name in &self.names {
            debug!(variable = %name, "resolving variable");
            let binding = resolver(name)?;
            bindings.resolved.insert(name.clone(), binding);
        }
        Ok(bindings)
    }
}

/// Resolved name → binding mappings
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    resolved: BTreeMap<String, VariableBinding>,
}

impl Bindings {
    /// Get a resolved binding
    pub fn get(&self, name: &str) -> Option<&VariableBinding> {
        self.resolved.get(name)
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Everything a VarString needs to produce its value
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    bindings: &'a Bindings,
    client: &'a SsmClient,
}

impl<'a> ResolveContext<'a> {
    pub fn new(bindings: &'a Bindings, client: &'a SsmClient) -> Self {
        Self { bindings, client }
    }

    pub fn client(&self) -> &'a SsmClient {
        self.client
    }

    /// Value of a bound name
    pub fn lookup(&self, name: &str, key_id: Option<&str>) -> Result<String> {
        let binding = self
            .bindings
            .get(name)
            .ok_or_else(|| SsmCtlError::UnresolvedVariable {
                name: name.to_string(),
            })?;
        binding.value(key_id, self.client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LocalCipher, MemoryStore};
    use crate::types::ParameterType;

    fn client() -> SsmClient {
        SsmClient::new(
            Box::new(MemoryStore::new().with_identity("eu-west-1", "123456789012")),
            Box::new(LocalCipher::new()),
        )
    }

    #[test]
    fn register_is_idempotent() {
        let mut registry = VariableRegistry::new();
        registry.register("B");
        registry.register("A");
        registry.register("B");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn resolve_all_visits_names_in_sorted_order() {
        let mut registry = VariableRegistry::new();
        for name in ["zeta", "Alpha", "beta", "Region"] {
            registry.register(name);
        }

        let mut seen = Vec::new();
        let bindings = registry
            .resolve_all(|name| {
                seen.push(name.to_string());
                Ok(VariableBinding::Delegated(DelegatedLookup::Region))
            })
            .unwrap();

        assert_eq!(seen, vec!["Alpha", "Region", "beta", "zeta"]);
        assert_eq!(bindings.len(), 4);
    }

    #[test]
    fn resolve_all_stops_at_first_failure() {
        let mut registry = VariableRegistry::new();
        registry.register("A");
        registry.register("B");

        let mut calls = 0;
        let err = registry
            .resolve_all(|name| {
                calls += 1;
                Err(SsmCtlError::InputMissing {
                    name: name.to_string(),
                })
            })
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, SsmCtlError::InputMissing { name } if name == "A"));
    }

    #[test]
    fn delegated_lookups_use_client_identity() {
        let client = client();
        let mut registry = VariableRegistry::new();
        registry.register("Region");
        registry.register("Account");
        let bindings = registry
            .resolve_all(|name| {
                Ok(VariableBinding::Delegated(
                    DelegatedLookup::for_name(name).unwrap(),
                ))
            })
            .unwrap();

        let ctx = ResolveContext::new(&bindings, &client);
        assert_eq!(ctx.lookup("Region", None).unwrap(), "eu-west-1");
        assert_eq!(ctx.lookup("Account", None).unwrap(), "123456789012");
    }

    #[test]
    fn input_binding_reads_plaintext() {
        let client = client();
        let mut input = Input::new("Env", ParameterType::String);
        input.set_value("prod", None);

        let mut registry = VariableRegistry::new();
        registry.register("Env");
        let bindings = registry
            .resolve_all(|_| Ok(VariableBinding::Input(input.clone())))
            .unwrap();

        let ctx = ResolveContext::new(&bindings, &client);
        assert_eq!(ctx.lookup("Env", None).unwrap(), "prod");
    }

    #[test]
    fn for_name_only_knows_builtins() {
        assert_eq!(DelegatedLookup::for_name("Region"), Some(DelegatedLookup::Region));
        assert_eq!(DelegatedLookup::for_name("Account"), Some(DelegatedLookup::Account));
        assert_eq!(DelegatedLookup::for_name("region"), None);
    }
}
