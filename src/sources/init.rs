//! Programmatic overrides handed to the builder directly.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::schema::Schema;
use crate::sources::Source;

/// Values supplied by the embedding application, by default the
/// highest-priority source.
///
/// Keys naming a field, by declared name or by any alias, are re-keyed to the
/// field's preferred key so every source agrees on the same merge key. Keys
/// that match nothing pass through untouched.
pub struct InitSource {
    values: Map<String, Value>,
}

impl InitSource {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

impl Source for InitSource {
    fn name(&self) -> &'static str {
        "InitSource"
    }

    fn resolve(&self, schema: &Schema) -> Result<Map<String, Value>> {
        let mut resolved = Map::new();
        for (key, value) in self.values.clone() {
            match schema.field_matching(&key, true) {
                Some(field) => {
                    resolved.insert(field.preferred_key().to_string(), value);
                }
                None => {
                    resolved.insert(key, value);
                }
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Alias, Field, FieldKind};
    use serde_json::json;

    #[test]
    fn rekeys_field_names_to_preferred_alias() {
        let schema = Schema::builder("Settings")
            .field(Field::new("token", FieldKind::Str).with_alias(Alias::choices(["auth", "tok"])))
            .build();
        let mut values = Map::new();
        values.insert("token".to_string(), json!("secret"));
        values.insert("unrelated".to_string(), json!(1));

        let source = InitSource::new(values);
        let resolved = source.resolve(&schema).expect("init source never fails");
        assert_eq!(Value::Object(resolved), json!({"auth": "secret", "unrelated": 1}));
    }

    #[test]
    fn alias_lookup_also_lands_on_preferred_key() {
        let schema = Schema::builder("Settings")
            .field(Field::new("token", FieldKind::Str).with_alias(Alias::choices(["auth", "tok"])))
            .build();
        let mut values = Map::new();
        values.insert("tok".to_string(), json!("secret"));

        let source = InitSource::new(values);
        let resolved = source.resolve(&schema).expect("init source never fails");
        assert_eq!(Value::Object(resolved), json!({"auth": "secret"}));
    }
}
