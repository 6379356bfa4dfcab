//! Process-environment source.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::keymap::{KeyedMapping, MapProvider};
use crate::schema::Schema;
use crate::sources::resolver::FieldResolver;
use crate::sources::{ResolutionConfig, Source};

/// Per-source overrides for environment resolution. Unset fields fall back
/// to the builder-wide configuration.
#[derive(Debug, Clone, Default)]
pub struct EnvOptions {
    pub prefix: Option<String>,
    pub nested_delimiter: Option<String>,
    pub case_sensitive: Option<bool>,
    pub populate_by_name: Option<bool>,
    pub ignore_empty: Option<bool>,
    pub parse_none_str: Option<String>,
}

impl EnvOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_nested_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.nested_delimiter = Some(delimiter.into());
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

    pub fn ignore_empty(mut self, enabled: bool) -> Self {
        self.ignore_empty = Some(enabled);
        self
    }

    pub fn with_parse_none_str(mut self, sentinel: impl Into<String>) -> Self {
        self.parse_none_str = Some(sentinel.into());
        self
    }

    pub(crate) fn effective(&self, base: &ResolutionConfig) -> ResolutionConfig {
        ResolutionConfig {
            env_prefix: self.prefix.clone().unwrap_or_else(|| base.env_prefix.clone()),
            nested_delimiter: self
                .nested_delimiter
                .clone()
                .or_else(|| base.nested_delimiter.clone()),
            case_sensitive: self.case_sensitive.unwrap_or(base.case_sensitive),
            populate_by_name: self.populate_by_name.unwrap_or(base.populate_by_name),
            ignore_empty: self.ignore_empty.unwrap_or(base.ignore_empty),
            parse_none_str: self.parse_none_str.clone().or_else(|| base.parse_none_str.clone()),
        }
    }
}

/// Reads the process environment, snapshotted once per `resolve` call.
///
/// A fixed snapshot can be injected instead, which keeps resolution hermetic
/// for tests and for embedders that capture the environment at startup.
pub struct EnvSource {
    config: ResolutionConfig,
    snapshot: Option<BTreeMap<String, String>>,
}

impl EnvSource {
    pub fn new(config: ResolutionConfig) -> Self {
        Self { config, snapshot: None }
    }

    /// Resolve against a fixed set of variables instead of the live process
    /// environment.
    pub fn with_snapshot(config: ResolutionConfig, snapshot: BTreeMap<String, String>) -> Self {
        Self { config, snapshot: Some(snapshot) }
    }

    fn provider(&self) -> MapProvider {
        let vars: BTreeMap<String, Value> = match &self.snapshot {
            Some(snapshot) => snapshot
                .iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect(),
            None => std::env::vars_os()
                .filter_map(|(key, value)| {
                    Some((key.into_string().ok()?, Value::String(value.into_string().ok()?)))
                })
                .collect(),
        };
        MapProvider::new(vars)
    }
}

impl Source for EnvSource {
    fn name(&self) -> &'static str {
        "EnvSource"
    }

    fn resolve(&self, schema: &Schema) -> Result<Map<String, Value>> {
        let mapping = KeyedMapping::new(self.provider(), self.config.case_sensitive);
        FieldResolver::new(&mapping, &self.config, self.name()).resolve(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldKind};
    use serde_json::json;

    fn vars(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn prefixed_variables_resolve_case_insensitively() {
        let schema = Schema::builder("Settings")
            .field(Field::new("host", FieldKind::Str))
            .field(Field::new("port", FieldKind::Int))
            .build();
        let config = ResolutionConfig {
            env_prefix: "app_".to_string(),
            ..ResolutionConfig::default()
        };
        let source = EnvSource::with_snapshot(
            config,
            vars(&[("APP_HOST", "example.org"), ("APP_PORT", "8080"), ("OTHER", "x")]),
        );
        let resolved = source.resolve(&schema).expect("env resolution");
        assert_eq!(Value::Object(resolved), json!({"host": "example.org", "port": 8080}));
    }

    #[test]
    fn per_source_prefix_overrides_shared_config() {
        let schema = Schema::builder("Settings")
            .field(Field::new("host", FieldKind::Str))
            .build();
        let options = EnvOptions::new().with_prefix("svc_");
        let config = options.effective(&ResolutionConfig {
            env_prefix: "app_".to_string(),
            ..ResolutionConfig::default()
        });
        let source = EnvSource::with_snapshot(config, vars(&[("SVC_HOST", "svc.example")]));
        let resolved = source.resolve(&schema).expect("env resolution");
        assert_eq!(Value::Object(resolved), json!({"host": "svc.example"}));
    }
}
