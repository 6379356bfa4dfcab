//! Dotenv file source.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::error::{Result, SettingsError};
use crate::keymap::{KeyedMapping, MapProvider};
use crate::schema::introspect::fold;
use crate::schema::{ExtraPolicy, Schema};
use crate::sources::resolver::FieldResolver;
use crate::sources::{ResolutionConfig, Source};

/// Per-source overrides for dotenv resolution plus the file list. Unset
/// fields fall back to the builder-wide configuration.
#[derive(Debug, Clone, Default)]
pub struct DotenvOptions {
    pub paths: Vec<PathBuf>,
    pub prefix: Option<String>,
    pub nested_delimiter: Option<String>,
    pub case_sensitive: Option<bool>,
    pub populate_by_name: Option<bool>,
    pub ignore_empty: Option<bool>,
    pub parse_none_str: Option<String>,
}

impl DotenvOptions {
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
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

/// Reads one or more dotenv files, later files overriding earlier ones, and
/// resolves the merged variables like environment variables.
///
/// Keys that match no field are handled per the schema's [`ExtraPolicy`]:
/// `Allow` surfaces the first path segment of the prefix-stripped key with
/// its raw value, `Ignore` drops it, and `Forbid` fails when any key lacks
/// the configured prefix.
pub struct DotenvSource {
    config: ResolutionConfig,
    paths: Vec<PathBuf>,
}

impl DotenvSource {
    pub fn new(config: ResolutionConfig, paths: Vec<PathBuf>) -> Self {
        Self { config, paths }
    }

    fn read_files(&self) -> Result<BTreeMap<String, Value>> {
        let mut merged = BTreeMap::new();
        for path in &self.paths {
            if !path.is_file() {
                tracing::debug!(path = %path.display(), "dotenv file not found, skipping");
                continue;
            }
            let content = std::fs::read_to_string(path).map_err(|source| {
                SettingsError::ReadFile { path: path.display().to_string(), source }
            })?;
            for (key, value) in parse_dotenv(&content) {
                let key = fold(&key, self.config.case_sensitive);
                merged.insert(key, value.map(Value::String).unwrap_or(Value::Null));
            }
        }
        Ok(merged)
    }

    fn apply_extras(
        &self,
        schema: &Schema,
        entries: &BTreeMap<String, Value>,
        data: &mut Map<String, Value>,
    ) -> Result<()> {
        let policy = schema.extra_policy();
        let prefix = fold(&self.config.env_prefix, self.config.case_sensitive);
        for (key, value) in entries {
            if !key.starts_with(&prefix) {
                if policy == ExtraPolicy::Forbid {
                    return Err(SettingsError::Configuration(format!(
                        "unable to load variables from dotenv file due to the presence of \
                         variables without the specified prefix '{}'",
                        self.config.env_prefix
                    )));
                }
                continue;
            }
            if value.is_null() {
                continue;
            }
            let stripped = &key[prefix.len()..];
            let first_segment = match &self.config.nested_delimiter {
                Some(delimiter) => match stripped.split_once(delimiter.as_str()) {
                    Some((first, _)) => first,
                    None => stripped,
                },
                None => stripped,
            };
            let known = data.keys().any(|existing| {
                fold(existing, self.config.case_sensitive) == fold(first_segment, self.config.case_sensitive)
            });
            if !known {
                data.insert(first_segment.to_string(), value.clone());
            }
        }
        Ok(())
    }
}

impl Source for DotenvSource {
    fn name(&self) -> &'static str {
        "DotenvSource"
    }

    fn resolve(&self, schema: &Schema) -> Result<Map<String, Value>> {
        let entries = self.read_files()?;
        let mapping = KeyedMapping::new(
            MapProvider::new(entries.clone()),
            self.config.case_sensitive,
        );
        let mut data = FieldResolver::new(&mapping, &self.config, self.name()).resolve(schema)?;
        if schema.extra_policy() != ExtraPolicy::Ignore {
            self.apply_extras(schema, &entries, &mut data)?;
        }
        Ok(data)
    }
}

/// Parse dotenv file content into ordered `(key, value)` pairs.
///
/// Supports `KEY=value` lines, an optional `export ` prefix, `#` comment
/// lines, and single- or double-quoted values; double quotes interpret the
/// usual backslash escapes while single quotes are literal. A bare `KEY`
/// without `=` yields no value, which resolution treats as an explicit null.
pub(crate) fn parse_dotenv(content: &str) -> Vec<(String, Option<String>)> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = match line.strip_prefix("export ") {
            Some(rest) => rest.trim_start(),
            None => line,
        };
        let Some((key, value)) = line.split_once('=') else {
            entries.push((line.to_string(), None));
            continue;
        };
        let key = key.trim().to_string();
        let value = value.trim();
        let value = if let Some(inner) = quoted(value, '"') {
            unescape_double_quoted(inner)
        } else if let Some(inner) = quoted(value, '\'') {
            inner.to_string()
        } else {
            strip_inline_comment(value).trim_end().to_string()
        };
        entries.push((key, Some(value)));
    }
    entries
}

fn quoted(value: &str, quote: char) -> Option<&str> {
    value.strip_prefix(quote)?.strip_suffix(quote)
}

fn unescape_double_quoted(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn strip_inline_comment(value: &str) -> &str {
    match value.find(" #") {
        Some(pos) => &value[..pos],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldKind};
    use serde_json::json;
    use std::io::Write;

    fn write_env(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write dotenv");
        file
    }

    #[test]
    fn parses_quotes_comments_and_export() {
        let parsed = parse_dotenv(
            "# comment\n\
             export HOST=example.org\n\
             NAME=\"line\\nbreak\"\n\
             MOTTO='no \\n escapes'\n\
             EMPTY=\n\
             PORT=8080 # inline\n\
             FLAG\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("HOST".to_string(), Some("example.org".to_string())),
                ("NAME".to_string(), Some("line\nbreak".to_string())),
                ("MOTTO".to_string(), Some("no \\n escapes".to_string())),
                ("EMPTY".to_string(), Some(String::new())),
                ("PORT".to_string(), Some("8080".to_string())),
                ("FLAG".to_string(), None),
            ]
        );
    }

    #[test]
    fn later_files_override_earlier_ones() {
        let first = write_env("HOST=first\nPORT=1\n");
        let second = write_env("HOST=second\n");
        let schema = Schema::builder("Settings")
            .field(Field::new("host", FieldKind::Str))
            .field(Field::new("port", FieldKind::Int))
            .build();
        let source = DotenvSource::new(
            ResolutionConfig::default(),
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
        );
        let resolved = source.resolve(&schema).expect("dotenv resolution");
        assert_eq!(Value::Object(resolved), json!({"host": "second", "port": 1}));
    }

    #[test]
    fn missing_files_are_skipped() {
        let schema = Schema::builder("Settings")
            .field(Field::new("host", FieldKind::Str))
            .build();
        let source = DotenvSource::new(
            ResolutionConfig::default(),
            vec![PathBuf::from("/definitely/not/here/.env")],
        );
        let resolved = source.resolve(&schema).expect("dotenv resolution");
        assert!(resolved.is_empty());
    }

    #[test]
    fn bare_key_is_an_explicit_null_and_yields_no_value() {
        let file = write_env("HOST\n");
        let schema = Schema::builder("Settings")
            .field(Field::new("host", FieldKind::Str))
            .build();
        let source =
            DotenvSource::new(ResolutionConfig::default(), vec![file.path().to_path_buf()]);
        let resolved = source.resolve(&schema).expect("dotenv resolution");
        assert!(resolved.is_empty());
    }

    #[test]
    fn allow_policy_surfaces_prefix_stripped_extras() {
        let file = write_env("APP_HOST=h\nAPP_EXTRA__FLAG=1\nUNRELATED=x\n");
        let schema = Schema::builder("Settings")
            .extra_policy(ExtraPolicy::Allow)
            .field(Field::new("host", FieldKind::Str))
            .build();
        let config = ResolutionConfig {
            env_prefix: "app_".to_string(),
            nested_delimiter: Some("__".to_string()),
            ..ResolutionConfig::default()
        };
        let source = DotenvSource::new(config, vec![file.path().to_path_buf()]);
        let resolved = source.resolve(&schema).expect("dotenv resolution");
        assert_eq!(Value::Object(resolved), json!({"host": "h", "extra": "1"}));
    }

    #[test]
    fn forbid_policy_rejects_unprefixed_keys() {
        let file = write_env("APP_HOST=h\nROGUE=x\n");
        let schema = Schema::builder("Settings")
            .extra_policy(ExtraPolicy::Forbid)
            .field(Field::new("host", FieldKind::Str))
            .build();
        let config = ResolutionConfig {
            env_prefix: "app_".to_string(),
            ..ResolutionConfig::default()
        };
        let source = DotenvSource::new(config, vec![file.path().to_path_buf()]);
        let err = source.resolve(&schema).expect_err("unprefixed key must fail");
        assert!(matches!(err, SettingsError::Configuration(_)));
    }

    #[test]
    fn ignore_policy_drops_extras() {
        let file = write_env("HOST=h\nEXTRA=x\n");
        let schema = Schema::builder("Settings")
            .field(Field::new("host", FieldKind::Str))
            .build();
        let source =
            DotenvSource::new(ResolutionConfig::default(), vec![file.path().to_path_buf()]);
        let resolved = source.resolve(&schema).expect("dotenv resolution");
        assert_eq!(Value::Object(resolved), json!({"host": "h"}));
    }
}
