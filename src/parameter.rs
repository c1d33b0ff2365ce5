//! Parameters: typed configuration entries built from document fragments

use serde_yaml::{Mapping, Value};

use crate::error::{Result, SsmCtlError};
use crate::registry::{ResolveContext, VariableRegistry};
use crate::store::ParameterRecord;
use crate::types::{scalar_string, ParameterType};
use crate::varstring::VarString;

/// Type inference after an explicit `Type` field, first match wins
const INFERENCE_RULES: &[(fn(&Mapping) -> bool, ParameterType)] = &[
    (|f: &Mapping| f.contains_key("KeyId"), ParameterType::SecureString),
    (
        |f: &Mapping| matches!(f.get("Value"), Some(Value::Sequence(_))),
        ParameterType::StringList,
    ),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Only `Name` may contain references; every other field is literal
    pub vars_in_name_only: bool,
    /// Accept a plain `Value` on SecureString (records read back from the store)
    pub allow_secure_string_value: bool,
}

#[derive(Debug, Clone)]
pub enum ParameterValue {
    Single(VarString),
    List(Vec<VarString>),
}

#[derive(Debug, Clone)]
pub enum Disable {
    Flag(bool),
    Template(VarString),
}

/// Read-only fields of records read from the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterMetadata {
    pub version: Option<i64>,
    /// Seconds since the Unix epoch
    pub last_modified_date: Option<i64>,
    pub last_modified_user: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    name: VarString,
    kind: ParameterType,
    value: Option<ParameterValue>,
    /// Value holds ciphertext (`EncryptedValue`)
    encrypted: bool,
    allowed_pattern: Option<VarString>,
    description: Option<String>,
    key_id: Option<VarString>,
    overwrite: Option<bool>,
    disable: Option<Disable>,
    metadata: ParameterMetadata,
}

impl Parameter {
    /// Build a parameter from a fragment that already carries `Name`
    pub fn load(fragment: &Mapping, options: LoadOptions) -> Result<Self> {
        let name = field_string(fragment, "parameter", "Name")?.ok_or_else(|| {
            SsmCtlError::InvalidDocument {
                reason: "parameter without Name".to_string(),
            }
        })?;
        let var = |s: String| {
            if options.vars_in_name_only {
                VarString::literal(s)
            } else {
                VarString::new(s)
            }
        };

        let kind = infer_type(fragment, &name)?;
        let key_id = field_string(fragment, &name, "KeyId")?.map(var);
        check_key_id(&name, kind, key_id.is_some())?;

        let mut encrypted = false;
        let value = match (kind, &key_id) {
            (ParameterType::SecureString, Some(key_id)) => {
                if let Some(ciphertext) = field_string(fragment, &name, "EncryptedValue")? {
                    encrypted = true;
                    Some(ParameterValue::Single(var(ciphertext)))
                } else if let Some(input) = field_string(fragment, &name, "Input")? {
                    let reference = VarString::single_reference(&input)?;
                    Some(ParameterValue::Single(
                        var(reference).with_key_id(key_id.clone()),
                    ))
                } else if let Some(value) = field_string(fragment, &name, "Value")? {
                    if !options.allow_secure_string_value {
                        return Err(SsmCtlError::SecureStringValue { name });
                    }
                    Some(ParameterValue::Single(VarString::literal(value)))
                } else {
                    None
                }
            }
            _ => match fragment.get("Value") {
                None | Some(Value::Null) => None,
                Some(Value::Sequence(items)) => {
                    let items = items
                        .iter()
                        .map(|item| {
                            scalar_string(item).map(var).ok_or_else(|| {
                                invalid_field(&name, "Value", "a list of scalars")
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    Some(ParameterValue::List(items))
                }
                Some(other) => {
                    let value = scalar_string(other)
                        .ok_or_else(|| invalid_field(&name, "Value", "a scalar or a list"))?;
                    Some(ParameterValue::Single(var(value)))
                }
            },
        };

        let allowed_pattern = field_string(fragment, &name, "AllowedPattern")?.map(var);
        let description = field_string(fragment, &name, "Description")?;
        let overwrite = match fragment.get("Overwrite") {
            None | Some(Value::Null) => None,
            Some(value) => Some(flag(value).ok_or_else(|| {
                invalid_field(&name, "Overwrite", "a boolean")
            })?),
        };
        let disable = match fragment.get("Disable").or_else(|| fragment.get("Disabled")) {
            None | Some(Value::Null) => None,
            Some(Value::String(template)) => Some(Disable::Template(var(template.clone()))),
            Some(value) => Some(Disable::Flag(
                flag(value).ok_or_else(|| invalid_field(&name, "Disable", "a boolean"))?,
            )),
        };

        Ok(Self {
            name: VarString::new(name),
            kind,
            value,
            encrypted,
            allowed_pattern,
            description,
            key_id,
            overwrite,
            disable,
            metadata: ParameterMetadata::default(),
        })
    }

    /// Build a parameter from a record read from the store.
    ///
    /// Every field is literal. `encrypted_value` replaces the record value
    /// when the SecureString was re-encrypted on read.
    pub fn from_record(record: ParameterRecord, encrypted_value: Option<String>) -> Self {
        let encrypted = encrypted_value.is_some();
        let value = encrypted_value.unwrap_or(record.value);
        Self {
            name: VarString::literal(record.name),
            kind: record.kind,
            value: Some(ParameterValue::Single(VarString::literal(value))),
            encrypted,
            allowed_pattern: record.allowed_pattern.map(VarString::literal),
            description: record.description,
            key_id: record.key_id.map(VarString::literal),
            overwrite: None,
            disable: None,
            metadata: ParameterMetadata {
                version: Some(record.version),
                last_modified_date: record.last_modified_date,
                last_modified_user: record.last_modified_user,
            },
        }
    }

    /// Register every name referenced by any field
    pub fn collect_references(&self, registry: &mut VariableRegistry) {
        self.name.collect_references(registry);
        match &self.value {
            Some(ParameterValue::Single(value)) => value.collect_references(registry),
            Some(ParameterValue::List(items)) => {
                for item in items {
                    item.collect_references(registry);
                }
            }
            None => {}
        }
        for template in [&self.allowed_pattern, &self.key_id].into_iter().flatten() {
            template.collect_references(registry);
        }
        if let Some(Disable::Template(template)) = &self.disable {
            template.collect_references(registry);
        }
    }

    pub fn name_template(&self) -> &VarString {
        &self.name
    }

    pub fn name(&self, ctx: &ResolveContext<'_>) -> Result<String> {
        self.name.resolve(ctx)
    }

    pub fn kind(&self) -> ParameterType {
        self.kind
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn metadata(&self) -> &ParameterMetadata {
        &self.metadata
    }

    pub fn allowed_pattern(&self, ctx: &ResolveContext<'_>) -> Result<Option<String>> {
        self.allowed_pattern.as_ref().map(|p| p.resolve(ctx)).transpose()
    }

    pub fn key_id(&self, ctx: &ResolveContext<'_>) -> Result<Option<String>> {
        self.key_id.as_ref().map(|k| k.resolve(ctx)).transpose()
    }

    /// Explicit `Overwrite`, or the run-wide default
    pub fn overwrite(&self, default: bool) -> bool {
        self.overwrite.unwrap_or(default)
    }

    pub fn disabled(&self, ctx: &ResolveContext<'_>) -> Result<bool> {
        match &self.disable {
            None => Ok(false),
            Some(Disable::Flag(flag)) => Ok(*flag),
            Some(Disable::Template(template)) => Ok(is_truthy(&template.resolve(ctx)?)),
        }
    }

    /// Resolved value without decryption; lists are comma-joined
    pub fn raw_value(&self, ctx: &ResolveContext<'_>) -> Result<Option<String>> {
        match &self.value {
            None => Ok(None),
            Some(ParameterValue::Single(value)) => value.resolve(ctx).map(Some),
            Some(ParameterValue::List(items)) => {
                let items = items
                    .iter()
                    .map(|item| item.resolve(ctx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(items.join(",")))
            }
        }
    }

    /// Plaintext value.
    ///
    /// `None` only for a disabled parameter without a value; an enabled one
    /// fails with a missing-value error.
    pub fn value(&self, ctx: &ResolveContext<'_>) -> Result<Option<String>> {
        let Some(raw) = self.raw_value(ctx)? else {
            if self.disabled(ctx)? {
                return Ok(None);
            }
            return Err(SsmCtlError::MissingValue {
                name: self.display_name(ctx),
            });
        };

        if !self.encrypted {
            return Ok(Some(raw));
        }
        let key_id = self.key_id(ctx)?;
        ctx.client().decrypt(&raw, key_id.as_deref()).map(Some)
    }

    /// Document form of the parameter.
    ///
    /// `Overwrite` and `Disable` are not part of the output. SecureString
    /// values never appear in plaintext.
    pub fn dump(&self, ctx: &ResolveContext<'_>) -> Result<Mapping> {
        let mut data = Mapping::new();
        data.insert("Name".into(), self.name(ctx)?.into());
        data.insert("Type".into(), self.kind.as_str().into());

        if self.kind.is_secure() && self.encrypted {
            let ciphertext = self.raw_value(ctx)?;
            data.insert("EncryptedValue".into(), optional(ciphertext));
        } else if self.kind.is_secure() && self.is_input_sourced() {
            // Input values are dumped encrypted under the parameter key
            let ciphertext = match (self.value(ctx)?, self.key_id(ctx)?) {
                (Some(plaintext), Some(key_id)) => Some(ctx.client().encrypt(&plaintext, &key_id)?),
                _ => None,
            };
            data.insert("EncryptedValue".into(), optional(ciphertext));
        } else {
            data.insert("Value".into(), optional(self.value(ctx)?));
        }

        if let Some(pattern) = self.allowed_pattern(ctx)? {
            data.insert("AllowedPattern".into(), pattern.into());
        }
        if let Some(description) = &self.description {
            data.insert("Description".into(), description.clone().into());
        }
        if let Some(key_id) = self.key_id(ctx)? {
            data.insert("KeyId".into(), key_id.into());
        }
        Ok(data)
    }

    fn is_input_sourced(&self) -> bool {
        matches!(&self.value, Some(ParameterValue::Single(value)) if value.key_id().is_some())
    }

    fn display_name(&self, ctx: &ResolveContext<'_>) -> String {
        self.name(ctx).unwrap_or_else(|_| self.name.to_string())
    }
}

fn infer_type(fragment: &Mapping, name: &str) -> Result<ParameterType> {
    if let Some(kind) = field_string(fragment, name, "Type")? {
        return kind.parse();
    }
    Ok(INFERENCE_RULES
        .iter()
        .find(|(matches, _)| matches(fragment))
        .map(|(_, kind)| *kind)
        .unwrap_or_default())
}

fn check_key_id(name: &str, kind: ParameterType, has_key_id: bool) -> Result<()> {
    let reason = match (kind.is_secure(), has_key_id) {
        (true, false) => "SecureString requires KeyId",
        (false, true) => "KeyId is only allowed on SecureString",
        _ => return Ok(()),
    };
    Err(SsmCtlError::MismatchedKeyId {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// A scalar field as text; absent and null are `None`
fn field_string(fragment: &Mapping, name: &str, field: &str) -> Result<Option<String>> {
    match fragment.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => scalar_string(value)
            .map(Some)
            .ok_or_else(|| invalid_field(name, field, "a scalar")),
    }
}

fn invalid_field(name: &str, field: &str, expected: &str) -> SsmCtlError {
    SsmCtlError::InvalidField {
        name: name.to_string(),
        field: field.to_string(),
        expected: expected.to_string(),
    }
}

fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(is_truthy(s)),
        Value::Number(n) => Some(n.as_f64().map_or(true, |n| n != 0.0)),
        _ => None,
    }
}

/// Empty, `false`, `no`, `off` and `0` are false (case-insensitive)
pub(crate) fn is_truthy(s: &str) -> bool {
    let s = s.trim();
    !(s.is_empty()
        || s.eq_ignore_ascii_case("false")
        || s.eq_ignore_ascii_case("no")
        || s.eq_ignore_ascii_case("off")
        || s == "0")
}

fn optional(value: Option<String>) -> Value {
    value.map(Value::String).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SsmClient;
    use crate::input::Input;
    use crate::registry::{Bindings, VariableBinding};
    use crate::store::{LocalCipher, MemoryStore};

    fn client() -> SsmClient {
        SsmClient::new(
            Box::new(MemoryStore::new().with_identity("us-east-1", "111122223333")),
            Box::new(LocalCipher::new()),
        )
    }

    fn fragment(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn load(yaml: &str) -> Result<Parameter> {
        Parameter::load(&fragment(yaml), LoadOptions::default())
    }

    fn bind(parameter: &Parameter, inputs: Vec<Input>) -> Bindings {
        let mut registry = VariableRegistry::new();
        parameter.collect_references(&mut registry);
        registry
            .resolve_all(|name| {
                if let Some(lookup) = crate::registry::DelegatedLookup::for_name(name) {
                    return Ok(VariableBinding::Delegated(lookup));
                }
                let input = inputs.iter().find(|i| i.name() == name).cloned().unwrap();
                Ok(VariableBinding::Input(input))
            })
            .unwrap()
    }

    #[test]
    fn type_inference_table() {
        let cases = [
            ("Name: /a\nType: StringList\nValue: x\n", ParameterType::StringList),
            ("Name: /a\nKeyId: k\nEncryptedValue: c\n", ParameterType::SecureString),
            ("Name: /a\nValue: [x, y]\n", ParameterType::StringList),
            ("Name: /a\nValue: x\n", ParameterType::String),
            ("Name: /a\nDisable: true\n", ParameterType::String),
        ];
        for (yaml, expected) in cases {
            assert_eq!(load(yaml).unwrap().kind(), expected, "{}", yaml);
        }
    }

    #[test]
    fn explicit_type_beats_key_id() {
        let err = load("Name: /a\nType: String\nKeyId: k\nValue: x\n").unwrap_err();
        assert!(matches!(err, SsmCtlError::MismatchedKeyId { .. }));
    }

    #[test]
    fn secure_string_requires_key_id() {
        let err = load("Name: /a\nType: SecureString\nEncryptedValue: c\n").unwrap_err();
        assert!(matches!(err, SsmCtlError::MismatchedKeyId { .. }));
    }

    #[test]
    fn secure_string_literal_value_is_rejected() {
        let err = load("Name: /a\nKeyId: k\nValue: plain\n").unwrap_err();
        assert!(matches!(err, SsmCtlError::SecureStringValue { name } if name == "/a"));

        let options = LoadOptions {
            allow_secure_string_value: true,
            ..LoadOptions::default()
        };
        let parameter =
            Parameter::load(&fragment("Name: /a\nKeyId: k\nValue: plain\n"), options).unwrap();
        assert!(!parameter.is_encrypted());
    }

    #[test]
    fn invalid_input_reference_is_rejected() {
        let err = load("Name: /a\nKeyId: k\nInput: not a name\n").unwrap_err();
        assert!(matches!(err, SsmCtlError::InvalidReference { .. }));
    }

    #[test]
    fn list_values_join_with_commas() {
        let client = client();
        let parameter = load("Name: /hosts\nValue: [a, 2, true]\n").unwrap();
        let bindings = Bindings::default();
        let ctx = ResolveContext::new(&bindings, &client);
        assert_eq!(parameter.value(&ctx).unwrap().as_deref(), Some("a,2,true"));
    }

    #[test]
    fn missing_value_fails_only_when_enabled() {
        let client = client();
        let bindings = Bindings::default();
        let ctx = ResolveContext::new(&bindings, &client);

        let disabled = load("Name: /a\nDisable: true\n").unwrap();
        assert_eq!(disabled.value(&ctx).unwrap(), None);

        let enabled = load("Name: /a\n").unwrap();
        let err = enabled.value(&ctx).unwrap_err();
        assert!(matches!(err, SsmCtlError::MissingValue { name } if name == "/a"));
    }

    #[test]
    fn disable_template_is_truth_tested() {
        let client = client();
        for (answer, expected) in [
            ("yes", true),
            ("1", true),
            ("", false),
            ("False", false),
            ("no", false),
            ("OFF", false),
            ("0", false),
        ] {
            let parameter = load("Name: /a\nValue: x\nDisable: $(Skip)\n").unwrap();
            let mut input = Input::new("Skip", ParameterType::String);
            input.set_value(answer, None);
            let bindings = bind(&parameter, vec![input]);
            let ctx = ResolveContext::new(&bindings, &client);
            assert_eq!(parameter.disabled(&ctx).unwrap(), expected, "{:?}", answer);
        }
    }

    #[test]
    fn disabled_alias_is_accepted() {
        let client = client();
        let bindings = Bindings::default();
        let ctx = ResolveContext::new(&bindings, &client);
        let parameter = load("Name: /a\nDisabled: true\n").unwrap();
        assert!(parameter.disabled(&ctx).unwrap());
    }

    #[test]
    fn vars_in_name_only_keeps_other_fields_literal() {
        let client = client();
        let options = LoadOptions {
            vars_in_name_only: true,
            ..LoadOptions::default()
        };
        let parameter =
            Parameter::load(&fragment("Name: /$(Env)/a\nValue: $(Other)\n"), options).unwrap();

        let mut registry = VariableRegistry::new();
        parameter.collect_references(&mut registry);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Env"]);

        let mut env = Input::new("Env", ParameterType::String);
        env.set_value("prod", None);
        let bindings = bind(&parameter, vec![env]);
        let ctx = ResolveContext::new(&bindings, &client);
        assert_eq!(parameter.name(&ctx).unwrap(), "/prod/a");
        assert_eq!(parameter.value(&ctx).unwrap().as_deref(), Some("$(Other)"));
    }

    #[test]
    fn encrypted_value_is_decrypted_for_value_and_kept_for_dump() {
        let client = client();
        let ciphertext = client.encrypt("pa55", "alias/app").unwrap();
        let yaml = format!("Name: /db/password\nKeyId: alias/app\nEncryptedValue: {}\n", ciphertext);
        let parameter = load(&yaml).unwrap();

        let bindings = Bindings::default();
        let ctx = ResolveContext::new(&bindings, &client);
        assert_eq!(parameter.value(&ctx).unwrap().as_deref(), Some("pa55"));

        let dumped = parameter.dump(&ctx).unwrap();
        assert_eq!(dumped.get("EncryptedValue").and_then(Value::as_str), Some(ciphertext.as_str()));
        assert!(dumped.get("Value").is_none());
        assert_eq!(dumped.get("KeyId").and_then(Value::as_str), Some("alias/app"));
    }

    #[test]
    fn secure_input_is_decrypted_with_resolved_key_id() {
        let client = client();
        let key = "arn:aws:kms:us-east-1:111122223333:alias/app";
        let parameter = load(
            "Name: /db/password\nInput: Secret\nKeyId: arn:aws:kms:$(Region):$(Account):alias/app\n",
        )
        .unwrap();
        assert_eq!(parameter.kind(), ParameterType::SecureString);

        let mut secret = Input::new("Secret", ParameterType::SecureString);
        secret.set_value(client.encrypt("pa55", key).unwrap(), None);
        let bindings = bind(&parameter, vec![secret]);
        let ctx = ResolveContext::new(&bindings, &client);

        assert_eq!(parameter.key_id(&ctx).unwrap().as_deref(), Some(key));
        assert_eq!(parameter.value(&ctx).unwrap().as_deref(), Some("pa55"));
    }

    #[test]
    fn input_sourced_secure_string_dumps_ciphertext() {
        let client = client();
        let parameter =
            load("Name: /s\nType: SecureString\nKeyId: alias/app\nInput: Secret\n").unwrap();

        let mut secret = Input::new("Secret", ParameterType::SecureString);
        secret.set_value(client.encrypt("pa55", "alias/other").unwrap(), None);
        let bindings = bind(&parameter, vec![secret]);
        let ctx = ResolveContext::new(&bindings, &client);

        let dumped = parameter.dump(&ctx).unwrap();
        assert!(dumped.get("Value").is_none());
        let ciphertext = dumped.get("EncryptedValue").and_then(Value::as_str).unwrap();
        assert_eq!(
            LocalCipher::open(ciphertext).unwrap(),
            ("alias/app".to_string(), "pa55".to_string())
        );
    }

    #[test]
    fn dump_field_order_and_omissions() {
        let client = client();
        let parameter = load(
            "Name: /a\nValue: x\nDescription: d\nAllowedPattern: ^x$\nOverwrite: true\nDisable: false\n",
        )
        .unwrap();
        let bindings = Bindings::default();
        let ctx = ResolveContext::new(&bindings, &client);

        let dumped = parameter.dump(&ctx).unwrap();
        let keys: Vec<_> = dumped.keys().filter_map(Value::as_str).collect();
        assert_eq!(keys, vec!["Name", "Type", "Value", "AllowedPattern", "Description"]);
        assert!(parameter.overwrite(false));
    }

    #[test]
    fn overwrite_falls_back_to_default() {
        let parameter = load("Name: /a\nValue: x\n").unwrap();
        assert!(!parameter.overwrite(false));
        assert!(parameter.overwrite(true));
    }

    #[test]
    fn records_load_as_literals_with_metadata() {
        let record = ParameterRecord {
            name: "/app/$(x)".to_string(),
            kind: ParameterType::String,
            value: "$(y)".to_string(),
            key_id: None,
            allowed_pattern: None,
            description: Some("desc".to_string()),
            version: 3,
            last_modified_date: Some(1_700_000_000),
            last_modified_user: Some("arn:aws:iam::1:user/ops".to_string()),
        };
        let parameter = Parameter::from_record(record, None);

        let mut registry = VariableRegistry::new();
        parameter.collect_references(&mut registry);
        assert!(registry.is_empty());
        assert_eq!(parameter.metadata().version, Some(3));
        assert_eq!(parameter.description(), Some("desc"));
    }
}
