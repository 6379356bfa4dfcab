//! Shared field-resolution engine.
//!
//! Every key/value-backed source (env, dotenv, secrets directory, keyring,
//! parsed CLI results) resolves fields the same way: walk the schema, try
//! each field's candidate keys in order, decode complex values from JSON
//! text, and expand nesting-delimiter keys into sub-mappings. The engine is
//! parameterized by a [`KeyedMapping`] and a [`ResolutionConfig`]; sources
//! differ only in how they build those.
//!
//! Candidate semantics: an absent key or an explicitly-null value moves on
//! to the next candidate; a mapping value accumulates across candidates
//! (earlier candidates winning overlaps); the first non-mapping value wins
//! the field outright. A configured `parse_none_str` sentinel rides through
//! resolution as a string and becomes JSON null in a final recursive pass,
//! except where nested keys already populated the same slot.

use serde_json::{Map, Value};

use crate::error::{Result, SettingsError};
use crate::keymap::{KeyedMapping, KeyedProvider};
use crate::merge::deep_update;
use crate::schema::introspect::{field_candidates, nested_field_candidates, CandidateKey};
use crate::schema::{DecodeHint, Field, FieldKind, Schema};
use crate::sources::ResolutionConfig;

pub struct FieldResolver<'a, P> {
    mapping: &'a KeyedMapping<P>,
    config: &'a ResolutionConfig,
    source_name: &'static str,
}

impl<'a, P: KeyedProvider> FieldResolver<'a, P> {
    pub fn new(
        mapping: &'a KeyedMapping<P>,
        config: &'a ResolutionConfig,
        source_name: &'static str,
    ) -> Self {
        Self { mapping, config, source_name }
    }

    /// Resolve every schema field this source can supply.
    pub fn resolve(&self, schema: &Schema) -> Result<Map<String, Value>> {
        let mut resolved = Map::new();
        for field in schema.fields() {
            let candidates = field_candidates(
                field,
                &self.config.env_prefix,
                self.config.case_sensitive,
                self.config.populate_by_name,
            );
            if let Some(value) = self.resolve_field(field, &candidates)? {
                resolved.insert(field.preferred_key().to_string(), value);
            }
        }
        if let Some(sentinel) = &self.config.parse_none_str {
            for value in resolved.values_mut() {
                strip_none_sentinel(value, sentinel);
            }
        }
        Ok(resolved)
    }

    fn resolve_field(&self, field: &Field, candidates: &[CandidateKey]) -> Result<Option<Value>> {
        let mut accumulated: Option<Map<String, Value>> = None;
        let mut pending_sentinel: Option<Value> = None;

        for candidate in candidates {
            let Some(raw) = self.mapping.lookup(&candidate.lookup) else {
                continue;
            };
            if raw.is_null() {
                // Explicitly null means "try the next candidate", never
                // "field is null"; real nulls come from the sentinel.
                continue;
            }
            if self.skips_empty(&raw) {
                continue;
            }
            if self.is_sentinel(&raw) {
                // Short-circuits like any scalar, but nested keys below may
                // still claim the slot.
                pending_sentinel = Some(raw);
                break;
            }
            match self.prepare_value(field, candidate, raw)? {
                Value::Object(incoming) => match accumulated.as_mut() {
                    Some(base) => {
                        // Earlier candidates win overlapping keys: fold the
                        // accumulator over the lower-priority result.
                        let mut merged = incoming;
                        deep_update(&mut merged, std::mem::take(base));
                        *base = merged;
                    }
                    None => accumulated = Some(incoming),
                },
                scalar => return Ok(Some(scalar)),
            }
        }

        if let Some(delimiter) = &self.config.nested_delimiter {
            let models = field.kind().models();
            if !models.is_empty() {
                let nested = self.resolve_nested(candidates, delimiter, &models)?;
                if !nested.is_empty() {
                    // Flattened keys override an embedded JSON blob's values.
                    let base = accumulated.get_or_insert_with(Map::new);
                    deep_update(base, nested);
                }
            }
        }

        match (accumulated, pending_sentinel) {
            (Some(map), _) if !map.is_empty() => Ok(Some(Value::Object(map))),
            (_, Some(sentinel)) => Ok(Some(sentinel)),
            (Some(map), None) => Ok(Some(Value::Object(map))),
            (None, None) => Ok(None),
        }
    }

    /// Expand `<candidate><delimiter><sub-field>` keys into a sub-mapping,
    /// recursing through nested models. Earlier candidates win; for union
    /// kinds the first member declaring a sub-field wins.
    fn resolve_nested(
        &self,
        candidates: &[CandidateKey],
        delimiter: &str,
        models: &[&Schema],
    ) -> Result<Map<String, Value>> {
        let mut total = Map::new();
        for candidate in candidates.iter().rev() {
            let prefix = format!("{}{delimiter}", candidate.lookup);
            let mut per_candidate = Map::new();
            for schema in models {
                for sub_field in schema.fields() {
                    if per_candidate.contains_key(sub_field.preferred_key()) {
                        continue;
                    }
                    let sub_candidates =
                        nested_field_candidates(sub_field, &prefix, self.config.case_sensitive);
                    if let Some(value) = self.resolve_field(sub_field, &sub_candidates)? {
                        per_candidate.insert(sub_field.preferred_key().to_string(), value);
                    }
                }
            }
            deep_update(&mut total, per_candidate);
        }
        Ok(total)
    }

    fn prepare_value(&self, field: &Field, candidate: &CandidateKey, raw: Value) -> Result<Value> {
        let wants_decode = match field.decode_hint() {
            DecodeHint::NoDecode => false,
            DecodeHint::ForceDecode => true,
            DecodeHint::Auto => field.kind().is_complex() || candidate.complex,
        };
        if wants_decode {
            self.decode_complex(field, raw)
        } else {
            Ok(coerce_scalar(field.kind(), raw))
        }
    }

    fn decode_complex(&self, field: &Field, raw: Value) -> Result<Value> {
        let text = match raw {
            Value::String(text) => text,
            structured => return Ok(self.conform(field.kind(), structured)),
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(decoded) => Ok(self.conform(field.kind(), decoded)),
            Err(err) if field.kind().allows_parse_failure() => {
                tracing::debug!(field = field.name(), error = %err, "keeping raw text for tolerant union");
                Ok(Value::String(text))
            }
            Err(err) => Err(SettingsError::Resolution {
                origin: self.source_name,
                field: field.name().to_string(),
                reason: format!("invalid JSON: {err}"),
            }),
        }
    }

    /// Normalize a decoded structure against its declared kind: re-key
    /// embedded objects to preferred field keys (folding case when
    /// insensitive) and parse scalar leaves into their declared JSON types.
    fn conform(&self, kind: &FieldKind, value: Value) -> Value {
        match kind {
            FieldKind::Model(_) | FieldKind::Union(_) => {
                let models = kind.models();
                if models.is_empty() {
                    value
                } else {
                    self.conform_model(&models, value)
                }
            }
            FieldKind::List(inner) => match value {
                Value::Array(items) => Value::Array(
                    items.into_iter().map(|item| self.conform(inner, item)).collect(),
                ),
                other => other,
            },
            FieldKind::Map(inner) => match value {
                Value::Object(entries) => Value::Object(
                    entries.into_iter().map(|(key, val)| (key, self.conform(inner, val))).collect(),
                ),
                other => other,
            },
            FieldKind::Any => value,
            scalar => coerce_scalar(scalar, value),
        }
    }

    fn conform_model(&self, models: &[&Schema], value: Value) -> Value {
        let Value::Object(entries) = value else {
            return value;
        };
        let mut conformed = Map::new();
        for (key, nested) in entries {
            match models
                .iter()
                .find_map(|schema| schema.field_matching(&key, self.config.case_sensitive))
            {
                Some(sub_field) => {
                    conformed.insert(
                        sub_field.preferred_key().to_string(),
                        self.conform(sub_field.kind(), nested),
                    );
                }
                None => {
                    conformed.insert(key, nested);
                }
            }
        }
        Value::Object(conformed)
    }

    fn skips_empty(&self, raw: &Value) -> bool {
        self.config.ignore_empty && matches!(raw, Value::String(text) if text.is_empty())
    }

    fn is_sentinel(&self, raw: &Value) -> bool {
        match raw {
            Value::String(text) => self.config.parse_none_str.as_deref() == Some(text.as_str()),
            _ => false,
        }
    }
}

/// Convert text values equal to the configured sentinel into JSON null, at
/// any nesting depth.
pub(crate) fn strip_none_sentinel(value: &mut Value, sentinel: &str) {
    match value {
        Value::String(text) if text == sentinel => *value = Value::Null,
        Value::Object(entries) => {
            for nested in entries.values_mut() {
                strip_none_sentinel(nested, sentinel);
            }
        }
        Value::Array(items) => {
            for nested in items.iter_mut() {
                strip_none_sentinel(nested, sentinel);
            }
        }
        _ => {}
    }
}

fn coerce_scalar(kind: &FieldKind, raw: Value) -> Value {
    let Value::String(text) = raw else {
        return raw;
    };
    match kind {
        FieldKind::Int => {
            if let Ok(number) = text.parse::<i64>() {
                Value::Number(number.into())
            } else if let Ok(number) = text.parse::<u64>() {
                Value::Number(number.into())
            } else {
                Value::String(text)
            }
        }
        FieldKind::Float => match text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            Some(number) => Value::Number(number),
            None => Value::String(text),
        },
        FieldKind::Bool => match text.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        _ => Value::String(text),
    }
}
