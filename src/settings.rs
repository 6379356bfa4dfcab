//! Builder tying a schema to an ordered stack of sources.
//!
//! [`SettingsBuilder`] records which sources to consult and the shared
//! resolution options they inherit. Nothing touches the environment or the
//! filesystem until [`load`](SettingsBuilder::load): at that point the
//! builder constructs every registered source in canonical precedence order,
//! resolves each one against the schema, and deep-merges the resulting
//! mappings so that earlier sources win conflicting keys. Because
//! construction is deferred, shared options such as the env prefix apply to
//! every source no matter the order the caller invoked the setters in.
//!
//! [`load_as`](SettingsBuilder::load_as) additionally rewrites alias keys
//! back to declared field names and deserializes the merged tree into a
//! caller-provided type.

use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Result, SettingsError, SourceError};
use crate::merge::merge_prioritized;
use crate::schema::{Alias, AliasChoice, AliasPath, Field, FieldKind, PathSegment, Schema};
use crate::sources::cli::{CliOptions, CliSource};
use crate::sources::default::DefaultsSource;
use crate::sources::dotenv::{DotenvOptions, DotenvSource};
use crate::sources::env::{EnvOptions, EnvSource};
use crate::sources::file::{FileOptions, FileSource};
use crate::sources::init::InitSource;
#[cfg(feature = "keyring")]
use crate::sources::keyring::{KeyringOptions, KeyringSource};
use crate::sources::secrets::{SecretsDirSource, SecretsOptions};
use crate::sources::{ResolutionConfig, Source};

/// The source stack handed to [`SettingsBuilder::customize_sources`].
///
/// Sources are listed in precedence order: index 0 wins conflicts. `Rc`
/// keeps injected sources cheap to clone into repeated loads.
pub type SourceList = Vec<Rc<dyn Source>>;

/// Composes registered sources into one resolved settings tree.
///
/// The canonical precedence order is fixed regardless of registration
/// order: init values, then CLI, environment, dotenv files, secrets
/// directories, config files (in registration order), keyring, and
/// schema defaults last. [`customize_sources`](Self::customize_sources)
/// can rearrange that list before resolution runs.
pub struct SettingsBuilder {
    schema: Schema,
    config: ResolutionConfig,
    aggregate_errors: bool,
    init: Option<Map<String, Value>>,
    cli: Option<CliOptions>,
    env: Option<EnvOptions>,
    dotenv: Option<DotenvOptions>,
    secrets: Option<SecretsOptions>,
    files: Vec<FileOptions>,
    #[cfg(feature = "keyring")]
    keyring: Option<KeyringOptions>,
    defaults: bool,
    customize: Option<Box<dyn Fn(SourceList) -> SourceList>>,
}

impl SettingsBuilder {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            config: ResolutionConfig::default(),
            aggregate_errors: false,
            init: None,
            cli: None,
            env: None,
            dotenv: None,
            secrets: None,
            files: Vec::new(),
            #[cfg(feature = "keyring")]
            keyring: None,
            defaults: true,
            customize: None,
        }
    }

    /// Prefix tried in front of bare field names by text-keyed sources.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.env_prefix = prefix.into();
        self
    }

    /// Separator that expands flat keys into nested field paths.
    pub fn with_nested_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.config.nested_delimiter = Some(delimiter.into());
        self
    }

    /// Match key case exactly instead of the case-folded default.
    pub fn case_sensitive(mut self, sensitive: bool) -> Self {
        self.config.case_sensitive = sensitive;
        self
    }

    /// Also try declared field names for fields that carry an alias.
    pub fn populate_by_name(mut self, enabled: bool) -> Self {
        self.config.populate_by_name = enabled;
        self
    }

    /// Treat empty provider strings as absent.
    pub fn ignore_empty(mut self, enabled: bool) -> Self {
        self.config.ignore_empty = enabled;
        self
    }

    /// String converted to JSON null after each source's tree is built.
    pub fn with_parse_none_str(mut self, sentinel: impl Into<String>) -> Self {
        self.config.parse_none_str = Some(sentinel.into());
        self
    }

    /// Collect per-source failures into one [`SettingsError::Aggregate`]
    /// instead of stopping at the first failing source.
    pub fn aggregate_errors(mut self, enabled: bool) -> Self {
        self.aggregate_errors = enabled;
        self
    }

    /// Highest-precedence literal values, typically programmatic overrides.
    pub fn with_init(mut self, values: Map<String, Value>) -> Self {
        self.init = Some(values);
        self
    }

    /// Parse command-line arguments as a source.
    pub fn with_cli(mut self, options: CliOptions) -> Self {
        self.cli = Some(options);
        self
    }

    /// Read process environment variables as a source.
    pub fn with_env(mut self, options: EnvOptions) -> Self {
        self.env = Some(options);
        self
    }

    /// Read dotenv files as a source.
    pub fn with_dotenv(mut self, options: DotenvOptions) -> Self {
        self.dotenv = Some(options);
        self
    }

    /// Read file-per-key secrets directories as a source.
    pub fn with_secrets_dir(mut self, options: SecretsOptions) -> Self {
        self.secrets = Some(options);
        self
    }

    /// Read structured config files as a source. May be called repeatedly;
    /// earlier registrations win conflicts between file sources.
    pub fn with_file(mut self, options: FileOptions) -> Self {
        self.files.push(options);
        self
    }

    /// Read the platform keyring as a source.
    #[cfg(feature = "keyring")]
    pub fn with_keyring(mut self, options: KeyringOptions) -> Self {
        self.keyring = Some(options);
        self
    }

    /// Keep or drop the defaults-last source. On by default.
    pub fn with_defaults(mut self, enabled: bool) -> Self {
        self.defaults = enabled;
        self
    }

    /// Rearrange the assembled source stack before resolution.
    ///
    /// The hook receives the registered sources in canonical precedence
    /// order and returns the stack actually consulted. It may reorder,
    /// drop, or inject sources; returning an empty list makes
    /// [`load`](Self::load) produce an empty mapping.
    pub fn customize_sources(mut self, hook: impl Fn(SourceList) -> SourceList + 'static) -> Self {
        self.customize = Some(Box::new(hook));
        self
    }

    /// Resolve every source and merge the outputs into one JSON tree.
    ///
    /// Each source yields an independent snapshot; snapshots are then
    /// deep-merged with earlier sources winning scalar conflicts and
    /// nested objects merged key-by-key. Construction and resolution both
    /// happen inside this call, so repeated loads observe current
    /// environment and file state.
    pub fn load(&self) -> Result<Value> {
        let sources = self.assemble()?;
        tracing::debug!(
            schema = self.schema.name(),
            sources = sources.len(),
            "resolving settings"
        );
        let outputs = self.resolve_all(&sources)?;
        Ok(Value::Object(merge_prioritized(outputs)))
    }

    /// [`load`](Self::load), then deserialize into `T`.
    ///
    /// Before deserializing, alias keys in the merged tree are rewritten
    /// back to declared field names (walking nested models, lists, and
    /// maps) so that `T` can mirror the schema's field names directly.
    pub fn load_as<T: DeserializeOwned>(&self) -> Result<T> {
        let merged = self.load()?;
        let normalized = match merged {
            Value::Object(map) => Value::Object(normalize_model(&self.schema, map)),
            other => other,
        };
        Ok(serde_json::from_value(normalized)?)
    }

    /// Construct the registered sources in canonical precedence order and
    /// run the customize hook over the result.
    fn assemble(&self) -> Result<SourceList> {
        let mut sources: SourceList = Vec::new();
        if let Some(values) = &self.init {
            sources.push(Rc::new(InitSource::new(values.clone())));
        }
        if let Some(options) = &self.cli {
            sources.push(Rc::new(CliSource::new(options.clone(), &self.config)?));
        }
        if let Some(options) = &self.env {
            sources.push(Rc::new(EnvSource::new(options.effective(&self.config))));
        }
        if let Some(options) = &self.dotenv {
            sources.push(Rc::new(DotenvSource::new(
                options.effective(&self.config),
                options.paths.clone(),
            )));
        }
        if let Some(options) = &self.secrets {
            sources.push(Rc::new(SecretsDirSource::new(options, &self.config)?));
        }
        for options in &self.files {
            sources.push(Rc::new(FileSource::new(options.clone())));
        }
        #[cfg(feature = "keyring")]
        if let Some(options) = &self.keyring {
            sources.push(Rc::new(KeyringSource::new(options, &self.config)?));
        }
        if self.defaults {
            sources.push(Rc::new(DefaultsSource::new(true)));
        }
        match &self.customize {
            Some(hook) => Ok(hook(sources)),
            None => Ok(sources),
        }
    }

    fn resolve_all(&self, sources: &[Rc<dyn Source>]) -> Result<Vec<Map<String, Value>>> {
        let mut outputs = Vec::with_capacity(sources.len());
        let mut failures = Vec::new();
        for source in sources {
            match source.resolve(&self.schema) {
                Ok(mapping) => {
                    tracing::debug!(
                        source = source.name(),
                        keys = mapping.len(),
                        "source resolved"
                    );
                    outputs.push(mapping);
                }
                Err(error) if self.aggregate_errors => failures.push(SourceError {
                    source: source.name().to_string(),
                    error: Box::new(error),
                }),
                Err(error) => return Err(error),
            }
        }
        if !failures.is_empty() {
            return Err(SettingsError::Aggregate(failures));
        }
        Ok(outputs)
    }
}

/// Rewrite one model layer from source keys back to declared field names.
///
/// Sources store values under each field's preferred key (first alias name,
/// or the declared name when no alias exists), and init mappings may use
/// alias paths into nested structures. Deserialization targets want declared
/// names, so each field is pulled out via its alias and re-inserted under
/// `field.name()`, recursing into nested models. Keys no field claims pass
/// through untouched for the deserializer's unknown-key policy to judge.
fn normalize_model(schema: &Schema, mut map: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    let mut consumed_heads: Vec<String> = Vec::new();
    for field in schema.fields() {
        if let Some(value) = extract_field_value(field, &mut map, &mut consumed_heads) {
            out.insert(field.name().to_string(), normalize_value(field.kind(), value));
        }
    }
    // Heads are dropped only after every field has had a chance to walk
    // into them, so alias paths sharing a head all resolve.
    for head in consumed_heads {
        map.remove(&head);
    }
    for (key, value) in map {
        out.entry(key).or_insert(value);
    }
    out
}

fn normalize_value(kind: &FieldKind, value: Value) -> Value {
    match kind {
        FieldKind::Model(_) | FieldKind::Union(_) => match value {
            Value::Object(map) => {
                let mut current = map;
                for schema in kind.models() {
                    current = normalize_model(schema, current);
                }
                Value::Object(current)
            }
            other => other,
        },
        FieldKind::List(inner) => match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| normalize_value(inner, item))
                    .collect(),
            ),
            other => other,
        },
        FieldKind::Map(inner) => match value {
            Value::Object(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, normalize_value(inner, value)))
                    .collect(),
            ),
            other => other,
        },
        _ => value,
    }
}

/// Remove and return the value addressing `field`, trying alias entries
/// first and the declared name as the final fallback.
fn extract_field_value(
    field: &Field,
    map: &mut Map<String, Value>,
    consumed_heads: &mut Vec<String>,
) -> Option<Value> {
    match field.alias() {
        None => map.remove(field.name()),
        Some(Alias::Name(name)) => map.remove(name).or_else(|| map.remove(field.name())),
        Some(Alias::Path(path)) => {
            extract_path(path, map, consumed_heads).or_else(|| map.remove(field.name()))
        }
        Some(Alias::Choices(choices)) => {
            for choice in choices {
                let hit = match choice {
                    AliasChoice::Name(name) => map.remove(name),
                    AliasChoice::Path(path) => extract_path(path, map, consumed_heads),
                };
                if hit.is_some() {
                    return hit;
                }
            }
            map.remove(field.name())
        }
    }
}

/// Walk an alias path into the merged tree. A bare head is removed
/// outright; deeper paths clone the leaf and record the head for removal
/// once the whole model layer is processed.
fn extract_path(
    path: &AliasPath,
    map: &mut Map<String, Value>,
    consumed_heads: &mut Vec<String>,
) -> Option<Value> {
    if path.segments().is_empty() {
        return map.remove(path.head());
    }
    let mut cursor = map.get(path.head())?;
    for segment in path.segments() {
        cursor = match segment {
            PathSegment::Key(key) => cursor.get(key)?,
            PathSegment::Index(index) => cursor.get(*index)?,
        };
    }
    let value = cursor.clone();
    consumed_heads.push(path.head().to_string());
    Some(value)
}
