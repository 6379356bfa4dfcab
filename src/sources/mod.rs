//! Settings sources and the shared field-resolution engine.
//!
//! Each source owns an explicit options struct, merges it with the shared
//! [`ResolutionConfig`] at registration time, and produces one mapping
//! snapshot per invocation. Key/value-backed sources delegate the per-field
//! work to [`resolver::FieldResolver`]; the CLI and file sources feed their
//! bespoke front-ends into the same key space.

pub mod cli;
pub mod default;
pub mod dotenv;
pub mod env;
pub mod file;
pub mod init;
#[cfg(feature = "keyring")]
pub mod keyring;
pub mod resolver;
pub mod secrets;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::schema::Schema;

/// A settings source.
///
/// Invoked zero or more times per resolution; every call returns a fresh
/// mapping snapshot keyed by field key. Sources keep no state across calls
/// beyond explicit caches (keymap index, lazy values, built CLI grammar).
pub trait Source {
    /// Short name used in error and trace messages.
    fn name(&self) -> &'static str;

    /// Produce this source's contribution for the given schema.
    fn resolve(&self, schema: &Schema) -> Result<Map<String, Value>>;
}

/// Shared resolution knobs, fixed once at builder construction.
///
/// Per-source options override these key-by-key when the source is
/// registered; afterwards every source carries its own immutable copy.
#[derive(Debug, Clone, Default)]
pub struct ResolutionConfig {
    /// Prefix applied to bare field names when looking up text sources.
    pub env_prefix: String,
    /// Separator that flattens nested field paths into single keys.
    pub nested_delimiter: Option<String>,
    /// Whether lookups match key case exactly.
    pub case_sensitive: bool,
    /// Also try the bare field name for fields that declare an alias.
    pub populate_by_name: bool,
    /// Drop provider values that are empty strings.
    pub ignore_empty: bool,
    /// String sentinel converted to JSON null after a source's tree is
    /// fully assembled.
    pub parse_none_str: Option<String>,
}
