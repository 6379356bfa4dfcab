//! OS keyring source (cargo feature `keyring`).

use std::rc::Rc;

use serde_json::{Map, Value};

use crate::error::{Result, SettingsError};
use crate::keymap::{KeyedMapping, LazyMapping};
use crate::schema::introspect::field_candidates;
use crate::schema::Schema;
use crate::sources::resolver::FieldResolver;
use crate::sources::{ResolutionConfig, Source};

/// Options for [`KeyringSource`].
#[derive(Debug, Clone)]
pub struct KeyringOptions {
    /// Service entry name in the OS keyring.
    pub service_name: String,
    pub prefix: Option<String>,
    pub case_sensitive: Option<bool>,
    pub populate_by_name: Option<bool>,
}

impl KeyringOptions {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            prefix: None,
            case_sensitive: None,
            populate_by_name: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn case_sensitive(mut self, sensitive: bool) -> Self {
        self.case_sensitive = Some(sensitive);
        self
    }

    pub fn populate_by_name(mut self, enabled: bool) -> Self {
        self.populate_by_name = Some(enabled);
        self
    }

    pub(crate) fn effective(&self, base: &ResolutionConfig) -> ResolutionConfig {
        ResolutionConfig {
            env_prefix: self.prefix.clone().unwrap_or_else(|| base.env_prefix.clone()),
            // The backend cannot enumerate its keys, so delimiter expansion
            // has nothing to walk.
            nested_delimiter: None,
            case_sensitive: self.case_sensitive.unwrap_or(base.case_sensitive),
            populate_by_name: self.populate_by_name.unwrap_or(base.populate_by_name),
            ignore_empty: base.ignore_empty,
            parse_none_str: base.parse_none_str.clone(),
        }
    }
}

type Backend = Rc<dyn Fn(&str, &str) -> Option<String>>;

/// Reads secrets from the operating system keyring.
///
/// Candidate names for every field are computed up front and a lazy mapping
/// defers the per-name backend round-trips, so only names the schema declares
/// are ever queried.
pub struct KeyringSource {
    config: ResolutionConfig,
    service_name: String,
    backend: Backend,
}

impl KeyringSource {
    pub fn new(options: &KeyringOptions, base: &ResolutionConfig) -> Result<Self> {
        Self::with_backend(options, base, fetch_secret)
    }

    /// Replace the OS keyring with a fixed lookup, for tests and embedders
    /// that bring their own secret store.
    pub fn with_backend(
        options: &KeyringOptions,
        base: &ResolutionConfig,
        backend: impl Fn(&str, &str) -> Option<String> + 'static,
    ) -> Result<Self> {
        if options.service_name.is_empty() {
            return Err(SettingsError::Configuration(
                "keyring source requires a non-empty service name".to_string(),
            ));
        }
        Ok(Self {
            config: options.effective(base),
            service_name: options.service_name.clone(),
            backend: Rc::new(backend),
        })
    }

    fn candidate_names(&self, schema: &Schema) -> Vec<String> {
        let mut names = Vec::new();
        for field in schema.fields() {
            for candidate in field_candidates(
                field,
                &self.config.env_prefix,
                self.config.case_sensitive,
                self.config.populate_by_name,
            ) {
                if !names.contains(&candidate.lookup) {
                    names.push(candidate.lookup);
                }
            }
        }
        names
    }
}

impl Source for KeyringSource {
    fn name(&self) -> &'static str {
        "KeyringSource"
    }

    fn resolve(&self, schema: &Schema) -> Result<Map<String, Value>> {
        let names = self.candidate_names(schema);
        let service = self.service_name.clone();
        let backend = Rc::clone(&self.backend);
        let lazy = LazyMapping::new(names, move |name| {
            backend(&service, name).map(Value::String)
        });
        let mapping = KeyedMapping::new(lazy, self.config.case_sensitive);
        FieldResolver::new(&mapping, &self.config, self.name()).resolve(schema)
    }
}

fn fetch_secret(service: &str, name: &str) -> Option<String> {
    // Unit tests must never talk to the real OS keychain.
    if cfg!(test) {
        return None;
    }
    let entry = match keyring::Entry::new(service, name) {
        Ok(entry) => entry,
        Err(err) => {
            tracing::warn!(service, name, error = %err, "keyring entry unavailable");
            return None;
        }
    };
    match entry.get_password() {
        Ok(secret) => Some(secret),
        Err(keyring::Error::NoEntry) => None,
        Err(err) => {
            tracing::warn!(service, name, error = %err, "keyring lookup failed");
            None
        }
    }
}
