//! Secrets-directory source.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::error::{Result, SettingsError};
use crate::keymap::{KeyedMapping, LazyMapping};
use crate::schema::Schema;
use crate::sources::resolver::FieldResolver;
use crate::sources::{ResolutionConfig, Source};

/// Ceiling on the combined size of all secrets files, unless overridden.
pub const DEFAULT_SECRETS_SIZE_LIMIT: u64 = 16 * 1024 * 1024;

/// What to do when a configured secrets directory does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingDirPolicy {
    /// Skip it silently.
    Ignore,
    /// Log a warning and skip it.
    #[default]
    Warn,
    /// Fail resolution.
    Error,
}

/// Options for [`SecretsDirSource`]. Unset shared fields fall back to the
/// builder-wide configuration.
#[derive(Debug, Clone)]
pub struct SecretsOptions {
    pub dirs: Vec<PathBuf>,
    /// Flatten nested keys out of file names, e.g. `db__password`.
    pub nested_delimiter: Option<String>,
    /// Flatten nested keys out of subdirectory paths, e.g. `db/password`.
    /// Mutually exclusive with `nested_delimiter`.
    pub nested_subdir: bool,
    pub missing_dir: MissingDirPolicy,
    pub size_limit: u64,
    pub prefix: Option<String>,
    pub case_sensitive: Option<bool>,
    pub populate_by_name: Option<bool>,
    pub parse_none_str: Option<String>,
}

impl SecretsOptions {
    pub fn new(dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
            nested_delimiter: None,
            nested_subdir: false,
            missing_dir: MissingDirPolicy::default(),
            size_limit: DEFAULT_SECRETS_SIZE_LIMIT,
            prefix: None,
            case_sensitive: None,
            populate_by_name: None,
            parse_none_str: None,
        }
    }

    pub fn with_nested_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.nested_delimiter = Some(delimiter.into());
        self
    }

    pub fn nested_subdir(mut self, enabled: bool) -> Self {
        self.nested_subdir = enabled;
        self
    }

    pub fn missing_dir(mut self, policy: MissingDirPolicy) -> Self {
        self.missing_dir = policy;
        self
    }

    pub fn with_size_limit(mut self, limit: u64) -> Self {
        self.size_limit = limit;
        self
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

    pub fn with_parse_none_str(mut self, sentinel: impl Into<String>) -> Self {
        self.parse_none_str = Some(sentinel.into());
        self
    }

    pub(crate) fn effective(&self, base: &ResolutionConfig) -> ResolutionConfig {
        let nested_delimiter = if self.nested_subdir {
            Some("/".to_string())
        } else {
            self.nested_delimiter.clone()
        };
        ResolutionConfig {
            env_prefix: self.prefix.clone().unwrap_or_else(|| base.env_prefix.clone()),
            nested_delimiter,
            case_sensitive: self.case_sensitive.unwrap_or(base.case_sensitive),
            populate_by_name: self.populate_by_name.unwrap_or(base.populate_by_name),
            ignore_empty: base.ignore_empty,
            parse_none_str: self.parse_none_str.clone().or_else(|| base.parse_none_str.clone()),
        }
    }
}

/// One secret per file under one or more directories, in the Docker/Kubernetes
/// mounted-secrets style.
///
/// File contents are whitespace-stripped and read lazily: only keys a field
/// candidate actually asks for touch the filesystem. Nested keys come from
/// either delimited file names or subdirectory paths, never both.
#[derive(Debug)]
pub struct SecretsDirSource {
    config: ResolutionConfig,
    dirs: Vec<PathBuf>,
    nested_subdir: bool,
    missing_dir: MissingDirPolicy,
    size_limit: u64,
}

impl SecretsDirSource {
    pub fn new(options: &SecretsOptions, base: &ResolutionConfig) -> Result<Self> {
        if options.nested_delimiter.is_some() && options.nested_subdir {
            return Err(SettingsError::Configuration(
                "secrets nested_delimiter and nested_subdir are mutually exclusive".to_string(),
            ));
        }
        Ok(Self {
            config: options.effective(base),
            dirs: options.dirs.clone(),
            nested_subdir: options.nested_subdir,
            missing_dir: options.missing_dir,
            size_limit: options.size_limit,
        })
    }

    /// Walk the configured directories collecting secret keys and the file
    /// each maps to. Later directories override earlier ones on key clashes.
    fn collect(&self) -> Result<(Vec<String>, HashMap<String, PathBuf>)> {
        let mut keys = Vec::new();
        let mut paths: HashMap<String, PathBuf> = HashMap::new();
        let mut total_size = 0u64;
        for dir in &self.dirs {
            if !dir.exists() {
                match self.missing_dir {
                    MissingDirPolicy::Ignore => {}
                    MissingDirPolicy::Warn => {
                        tracing::warn!(path = %dir.display(), "secrets directory does not exist");
                    }
                    MissingDirPolicy::Error => {
                        return Err(SettingsError::SecretsDirMissing {
                            path: dir.display().to_string(),
                        });
                    }
                }
                continue;
            }
            if !dir.is_dir() {
                return Err(SettingsError::SecretsNotADirectory {
                    path: dir.display().to_string(),
                });
            }
            let walker = walkdir::WalkDir::new(dir)
                .min_depth(1)
                .max_depth(if self.nested_subdir { usize::MAX } else { 1 })
                .follow_links(true);
            for entry in walker {
                let entry = entry.map_err(|err| SettingsError::ReadFile {
                    path: dir.display().to_string(),
                    source: err.into(),
                })?;
                if entry.file_type().is_dir() {
                    if !self.nested_subdir {
                        tracing::warn!(
                            path = %entry.path().display(),
                            "secrets entry is not a regular file, skipping"
                        );
                    }
                    continue;
                }
                if !entry.file_type().is_file() {
                    tracing::warn!(
                        path = %entry.path().display(),
                        "secrets entry is not a regular file, skipping"
                    );
                    continue;
                }
                let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
                total_size = total_size.saturating_add(size);
                if total_size > self.size_limit {
                    return Err(SettingsError::SecretsSizeExceeded {
                        limit: self.size_limit,
                        actual: total_size,
                    });
                }
                let Ok(relative) = entry.path().strip_prefix(dir) else {
                    continue;
                };
                let key = if self.nested_subdir {
                    relative
                        .components()
                        .map(|component| component.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/")
                } else {
                    entry.file_name().to_string_lossy().into_owned()
                };
                if paths.insert(key.clone(), entry.into_path()).is_none() {
                    keys.push(key);
                }
            }
        }
        Ok((keys, paths))
    }
}

impl Source for SecretsDirSource {
    fn name(&self) -> &'static str {
        "SecretsDirSource"
    }

    fn resolve(&self, schema: &Schema) -> Result<Map<String, Value>> {
        let (keys, paths) = self.collect()?;
        let failures: Rc<RefCell<Vec<(String, std::io::Error)>>> =
            Rc::new(RefCell::new(Vec::new()));
        let read_failures = Rc::clone(&failures);
        let lazy = LazyMapping::new(keys, move |key| {
            let path = paths.get(key)?;
            match std::fs::read_to_string(path) {
                Ok(content) => Some(Value::String(content.trim().to_string())),
                Err(err) => {
                    read_failures.borrow_mut().push((path.display().to_string(), err));
                    None
                }
            }
        });
        let mapping = KeyedMapping::new(lazy, self.config.case_sensitive);
        let data = FieldResolver::new(&mapping, &self.config, self.name()).resolve(schema)?;
        if let Some((path, source)) = failures.borrow_mut().drain(..).next() {
            return Err(SettingsError::ReadFile { path, source });
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldKind};
    use serde_json::json;

    fn write_secret(dir: &std::path::Path, name: &str, content: &str) {
        if let Some(parent) = std::path::Path::new(name).parent() {
            std::fs::create_dir_all(dir.join(parent)).expect("create secret subdir");
        }
        std::fs::write(dir.join(name), content).expect("write secret");
    }

    fn schema_with_nested() -> Schema {
        let db = Schema::builder("Db")
            .field(Field::new("password", FieldKind::Str))
            .build();
        Schema::builder("Settings")
            .field(Field::new("api_key", FieldKind::Str))
            .field(Field::new("db", FieldKind::model(db)))
            .build()
    }

    #[test]
    fn flat_secrets_resolve_with_whitespace_stripped() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_secret(dir.path(), "api_key", "  s3cr3t\n");
        let options = SecretsOptions::new([dir.path()]);
        let source = SecretsDirSource::new(&options, &ResolutionConfig::default())
            .expect("valid options");
        let resolved = source.resolve(&schema_with_nested()).expect("secrets resolution");
        assert_eq!(Value::Object(resolved), json!({"api_key": "s3cr3t"}));
    }

    #[test]
    fn delimited_file_names_expand_into_nested_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_secret(dir.path(), "db__password", "hunter2");
        let options = SecretsOptions::new([dir.path()]).with_nested_delimiter("__");
        let source = SecretsDirSource::new(&options, &ResolutionConfig::default())
            .expect("valid options");
        let resolved = source.resolve(&schema_with_nested()).expect("secrets resolution");
        assert_eq!(Value::Object(resolved), json!({"db": {"password": "hunter2"}}));
    }

    #[test]
    fn subdirectory_paths_expand_into_nested_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_secret(dir.path(), "db/password", "hunter2");
        let options = SecretsOptions::new([dir.path()]).nested_subdir(true);
        let source = SecretsDirSource::new(&options, &ResolutionConfig::default())
            .expect("valid options");
        let resolved = source.resolve(&schema_with_nested()).expect("secrets resolution");
        assert_eq!(Value::Object(resolved), json!({"db": {"password": "hunter2"}}));
    }

    #[test]
    fn delimiter_and_subdir_together_are_rejected() {
        let options = SecretsOptions::new(["/run/secrets"])
            .with_nested_delimiter("__")
            .nested_subdir(true);
        let err = SecretsDirSource::new(&options, &ResolutionConfig::default())
            .expect_err("mutually exclusive nesting modes");
        assert!(matches!(err, SettingsError::Configuration(_)));
    }

    #[test]
    fn missing_dir_policy_error_fails_resolution() {
        let options = SecretsOptions::new(["/definitely/not/here"])
            .missing_dir(MissingDirPolicy::Error);
        let source = SecretsDirSource::new(&options, &ResolutionConfig::default())
            .expect("valid options");
        let err = source.resolve(&schema_with_nested()).expect_err("missing dir must fail");
        assert!(matches!(err, SettingsError::SecretsDirMissing { .. }));
    }

    #[test]
    fn missing_dir_policy_ignore_yields_empty_mapping() {
        let options = SecretsOptions::new(["/definitely/not/here"])
            .missing_dir(MissingDirPolicy::Ignore);
        let source = SecretsDirSource::new(&options, &ResolutionConfig::default())
            .expect("valid options");
        let resolved = source.resolve(&schema_with_nested()).expect("secrets resolution");
        assert!(resolved.is_empty());
    }

    #[test]
    fn file_path_instead_of_directory_is_fatal() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let options = SecretsOptions::new([file.path()]);
        let source = SecretsDirSource::new(&options, &ResolutionConfig::default())
            .expect("valid options");
        let err = source.resolve(&schema_with_nested()).expect_err("file path must fail");
        assert!(matches!(err, SettingsError::SecretsNotADirectory { .. }));
    }

    #[test]
    fn size_ceiling_is_enforced_across_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_secret(dir.path(), "api_key", "0123456789");
        let options = SecretsOptions::new([dir.path()]).with_size_limit(4);
        let source = SecretsDirSource::new(&options, &ResolutionConfig::default())
            .expect("valid options");
        let err = source.resolve(&schema_with_nested()).expect_err("over the limit");
        assert!(matches!(err, SettingsError::SecretsSizeExceeded { limit: 4, .. }));
    }

    #[test]
    fn later_directories_override_earlier_ones() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        write_secret(first.path(), "api_key", "old");
        write_secret(second.path(), "api_key", "new");
        let options = SecretsOptions::new([first.path(), second.path()]);
        let source = SecretsDirSource::new(&options, &ResolutionConfig::default())
            .expect("valid options");
        let resolved = source.resolve(&schema_with_nested()).expect("secrets resolution");
        assert_eq!(Value::Object(resolved), json!({"api_key": "new"}));
    }
}
