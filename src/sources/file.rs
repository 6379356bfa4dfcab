//! Structured config-file sources (JSON, YAML, TOML).

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::{Result, SettingsError};
use crate::merge::deep_update;
use crate::schema::Schema;
use crate::sources::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Yaml,
    Toml,
}

impl FileFormat {
    fn from_extension(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

/// Options for [`FileSource`].
#[derive(Debug, Clone)]
pub struct FileOptions {
    pub paths: Vec<PathBuf>,
    /// Parse format for every path; inferred from each file's extension when
    /// unset.
    pub format: Option<FileFormat>,
    /// Dotted section to read instead of the document root, e.g.
    /// `tool.my-app`.
    pub section: Option<String>,
    /// Merge multiple files recursively instead of replacing top-level keys.
    pub deep_merge: bool,
}

impl FileOptions {
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            format: None,
            section: None,
            deep_merge: false,
        }
    }

    pub fn with_format(mut self, format: FileFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn deep_merge(mut self, enabled: bool) -> Self {
        self.deep_merge = enabled;
        self
    }
}

/// Reads ordered structured config files into one mapping.
///
/// Missing files are skipped silently so a fixed search list can cover
/// machines where only some paths exist. Later files override earlier ones:
/// by top-level key replacement normally, recursively when `deep_merge` is
/// on.
pub struct FileSource {
    options: FileOptions,
}

impl FileSource {
    pub fn new(options: FileOptions) -> Self {
        Self { options }
    }

    fn load_one(&self, path: &Path) -> Result<Option<Map<String, Value>>> {
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        }
        let format = self
            .options
            .format
            .or_else(|| FileFormat::from_extension(path))
            .ok_or_else(|| {
                SettingsError::Configuration(format!(
                    "cannot determine config format for '{}'",
                    path.display()
                ))
            })?;
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        let parsed = parse_document(format, &text, path)?;
        if parsed.is_null() {
            return Ok(Some(Map::new()));
        }
        let Value::Object(document) = parsed else {
            return Err(SettingsError::ParseFile {
                path: path.display().to_string(),
                reason: "top-level value must be a mapping".to_string(),
            });
        };
        match &self.options.section {
            Some(section) => extract_section(&document, section)
                .map(Some)
                .ok_or_else(|| SettingsError::SectionNotFound {
                    section: section.clone(),
                    path: path.display().to_string(),
                }),
            None => Ok(Some(document)),
        }
    }
}

impl Source for FileSource {
    fn name(&self) -> &'static str {
        match self.options.format {
            Some(FileFormat::Json) => "JsonFileSource",
            Some(FileFormat::Yaml) => "YamlFileSource",
            Some(FileFormat::Toml) => "TomlFileSource",
            None => "FileSource",
        }
    }

    fn resolve(&self, _schema: &Schema) -> Result<Map<String, Value>> {
        let mut merged = Map::new();
        for path in &self.options.paths {
            let Some(document) = self.load_one(path)? else {
                continue;
            };
            if self.options.deep_merge {
                deep_update(&mut merged, document);
            } else {
                for (key, value) in document {
                    merged.insert(key, value);
                }
            }
        }
        Ok(merged)
    }
}

fn parse_document(format: FileFormat, text: &str, path: &Path) -> Result<Value> {
    let parse_error = |reason: String| SettingsError::ParseFile {
        path: path.display().to_string(),
        reason,
    };
    match format {
        FileFormat::Json => {
            serde_json::from_str(text).map_err(|err| parse_error(err.to_string()))
        }
        FileFormat::Yaml => {
            let value: serde_yaml::Value =
                serde_yaml::from_str(text).map_err(|err| parse_error(err.to_string()))?;
            serde_json::to_value(value).map_err(|err| parse_error(err.to_string()))
        }
        FileFormat::Toml => {
            let value: toml::Value =
                toml::from_str(text).map_err(|err| parse_error(err.to_string()))?;
            serde_json::to_value(value).map_err(|err| parse_error(err.to_string()))
        }
    }
}

/// Descend a dotted section path, preferring the longest literal dotted key
/// present at each level. `tool.my.app` first tries the single key
/// `"tool.my.app"`, then `"tool.my"` + `app`, then `"tool"` + the rest.
fn extract_section(document: &Map<String, Value>, dotted: &str) -> Option<Map<String, Value>> {
    let segments: Vec<&str> = dotted.split('.').collect();
    descend(document, &segments)
}

fn descend(document: &Map<String, Value>, segments: &[&str]) -> Option<Map<String, Value>> {
    if segments.is_empty() {
        return Some(document.clone());
    }
    for take in (1..=segments.len()).rev() {
        let literal = segments[..take].join(".");
        if let Some(Value::Object(inner)) = document.get(&literal) {
            if let Some(found) = descend(inner, &segments[take..]) {
                return Some(found);
            }
        }
    }
    None
}
