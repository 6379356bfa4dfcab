//! Runtime schema model.
//!
//! Consumers describe their settings shape as an explicit [`Schema`] of
//! [`Field`]s. The resolution engine reads it to derive candidate lookup
//! keys, nesting structure, and CLI grammar; it never mutates it.

pub mod introspect;

use serde_json::Value;

/// How non-schema keys surfaced by a source are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtraPolicy {
    /// Pass unknown keys through to the merged result.
    Allow,
    /// Drop unknown keys silently.
    #[default]
    Ignore,
    /// Raise a configuration error when unknown keys appear.
    Forbid,
}

/// CLI rendering for a bool field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagMode {
    /// A valued flag: `--flag true` / `--flag false`.
    Explicit,
    /// A `--flag` / `--no-flag` pair.
    Dual,
    /// A single bare flag that flips the field's default.
    Toggle,
}

/// Overrides the automatic JSON-decode decision for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeHint {
    /// Decode complex fields, pass scalars through.
    #[default]
    Auto,
    /// Never JSON-decode; hand the raw text to the validator.
    NoDecode,
    /// Always JSON-decode, even for scalar fields.
    ForceDecode,
}

/// One step into a structured source value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A lookup path into a structured value: a head key plus nested segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasPath {
    head: String,
    segments: Vec<PathSegment>,
}

impl AliasPath {
    pub fn new(head: impl Into<String>) -> Self {
        Self { head: head.into(), segments: Vec::new() }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Key(key.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(PathSegment::Index(index));
        self
    }

    pub fn head(&self) -> &str {
        &self.head
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Total depth including the head key.
    pub fn depth(&self) -> usize {
        1 + self.segments.len()
    }
}

/// One alternative in an alias-choices list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasChoice {
    Name(String),
    Path(AliasPath),
}

impl AliasChoice {
    pub(crate) fn head(&self) -> &str {
        match self {
            AliasChoice::Name(name) => name,
            AliasChoice::Path(path) => path.head(),
        }
    }
}

/// A field's validation alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alias {
    /// A single alternative name.
    Name(String),
    /// Ordered alternative names, tried first to last.
    Choices(Vec<AliasChoice>),
    /// A path into a structured value.
    Path(AliasPath),
}

impl Alias {
    pub fn choices<I, C>(choices: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<AliasChoice>,
    {
        Alias::Choices(choices.into_iter().map(Into::into).collect())
    }

    /// The alias names in priority order (path aliases contribute their head).
    pub fn names(&self) -> Vec<&str> {
        match self {
            Alias::Name(name) => vec![name.as_str()],
            Alias::Choices(choices) => choices.iter().map(AliasChoice::head).collect(),
            Alias::Path(path) => vec![path.head()],
        }
    }
}

impl From<&str> for AliasChoice {
    fn from(name: &str) -> Self {
        AliasChoice::Name(name.to_string())
    }
}

impl From<String> for AliasChoice {
    fn from(name: String) -> Self {
        AliasChoice::Name(name)
    }
}

impl From<AliasPath> for AliasChoice {
    fn from(path: AliasPath) -> Self {
        AliasChoice::Path(path)
    }
}

/// The declared type of a field's value.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Str,
    Int,
    Float,
    Bool,
    /// A homogeneous sequence.
    List(Box<FieldKind>),
    /// A string-keyed mapping.
    Map(Box<FieldKind>),
    /// A nested structured model.
    Model(Schema),
    /// One of several alternatives, tried by the downstream validator.
    Union(Vec<FieldKind>),
    /// Anything JSON-shaped.
    Any,
}

impl FieldKind {
    pub fn list_of(inner: FieldKind) -> Self {
        FieldKind::List(Box::new(inner))
    }

    pub fn map_of(inner: FieldKind) -> Self {
        FieldKind::Map(Box::new(inner))
    }

    pub fn model(schema: Schema) -> Self {
        FieldKind::Model(schema)
    }

    /// Whether values of this kind need JSON decoding from flat text sources.
    pub fn is_complex(&self) -> bool {
        match self {
            FieldKind::Str | FieldKind::Int | FieldKind::Float | FieldKind::Bool => false,
            FieldKind::List(_) | FieldKind::Map(_) | FieldKind::Model(_) | FieldKind::Any => true,
            FieldKind::Union(members) => members.iter().any(FieldKind::is_complex),
        }
    }

    /// True for a union type with at least one complex member.
    pub fn union_contains_complex(&self) -> bool {
        matches!(self, FieldKind::Union(members) if members.iter().any(FieldKind::is_complex))
    }

    /// Whether a JSON-decode failure may fall back to the raw string.
    ///
    /// Only unions tolerate this: a plain member (e.g. a date-like string)
    /// can still validate downstream, so the text is kept as-is.
    pub fn allows_parse_failure(&self) -> bool {
        self.union_contains_complex()
    }

    /// All structured-model alternatives of this kind, in declaration order.
    pub fn models(&self) -> Vec<&Schema> {
        match self {
            FieldKind::Model(schema) => vec![schema],
            FieldKind::Union(members) => members.iter().flat_map(FieldKind::models).collect(),
            _ => Vec::new(),
        }
    }

    /// True for list- and map-shaped kinds (CLI variadic/append handling).
    pub fn is_collection(&self) -> bool {
        matches!(self, FieldKind::List(_) | FieldKind::Map(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, FieldKind::Map(_))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, FieldKind::Bool)
    }
}

/// A single named field of a [`Schema`].
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    default: Option<Value>,
    alias: Option<Alias>,
    description: Option<String>,
    positional: bool,
    subcommand: bool,
    hidden: bool,
    flag_mode: Option<FlagMode>,
    decode: DecodeHint,
    exclusive_group: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            alias: None,
            description: None,
            positional: false,
            subcommand: false,
            hidden: false,
            flag_mode: None,
            decode: DecodeHint::Auto,
            exclusive_group: false,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_alias(mut self, alias: Alias) -> Self {
        self.alias = Some(alias);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark as a CLI positional argument.
    pub fn positional(mut self) -> Self {
        self.positional = true;
        self
    }

    /// Mark as a CLI subcommand field.
    pub fn subcommand(mut self) -> Self {
        self.subcommand = true;
        self
    }

    /// Suppress from CLI help.
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_flag_mode(mut self, mode: FlagMode) -> Self {
        self.flag_mode = Some(mode);
        self
    }

    /// Never JSON-decode this field's raw text.
    pub fn no_decode(mut self) -> Self {
        self.decode = DecodeHint::NoDecode;
        self
    }

    /// Always JSON-decode this field's raw text.
    pub fn force_decode(mut self) -> Self {
        self.decode = DecodeHint::ForceDecode;
        self
    }

    /// Render this nested-model field as a mutually exclusive CLI group.
    pub fn exclusive_group(mut self) -> Self {
        self.exclusive_group = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn alias(&self) -> Option<&Alias> {
        self.alias.as_ref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }

    pub fn is_positional(&self) -> bool {
        self.positional
    }

    pub fn is_subcommand(&self) -> bool {
        self.subcommand
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn flag_mode(&self) -> Option<FlagMode> {
        self.flag_mode
    }

    pub fn decode_hint(&self) -> DecodeHint {
        self.decode
    }

    pub fn is_exclusive_group(&self) -> bool {
        self.exclusive_group
    }

    /// All names this field answers to: alias names first, declared name last.
    pub fn lookup_names(&self) -> Vec<&str> {
        let mut names = self.alias.as_ref().map(Alias::names).unwrap_or_default();
        if !names.contains(&self.name.as_str()) {
            names.push(&self.name);
        }
        names
    }

    /// The key this field's value is stored under in merged results:
    /// the preferred (first) alias name, or the declared name without one.
    /// An alias with no names at all falls back to the declared name.
    pub fn preferred_key(&self) -> &str {
        self.alias
            .as_ref()
            .and_then(|alias| alias.names().first().copied())
            .unwrap_or(&self.name)
    }

    /// Whether `key` names this field, folding case when insensitive.
    pub fn matches_key(&self, key: &str, case_sensitive: bool) -> bool {
        self.lookup_names().iter().any(|name| {
            if case_sensitive {
                *name == key
            } else {
                name.eq_ignore_ascii_case(key)
            }
        })
    }
}

/// An ordered collection of fields describing one settings shape.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: Vec<Field>,
    extra: ExtraPolicy,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder { name: name.into(), fields: Vec::new(), extra: ExtraPolicy::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn extra_policy(&self) -> ExtraPolicy {
        self.extra
    }

    /// Find the field a raw source key addresses, by name or alias.
    pub fn field_matching(&self, key: &str, case_sensitive: bool) -> Option<&Field> {
        self.fields.iter().find(|field| field.matches_key(key, case_sensitive))
    }
}

/// Builder for [`Schema`].
pub struct SchemaBuilder {
    name: String,
    fields: Vec<Field>,
    extra: ExtraPolicy,
}

impl SchemaBuilder {
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn extra_policy(mut self, policy: ExtraPolicy) -> Self {
        self.extra = policy;
        self
    }

    pub fn build(self) -> Schema {
        Schema { name: self.name, fields: self.fields, extra: self.extra }
    }
}
