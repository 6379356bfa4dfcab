//! Declared schema defaults as the lowest-priority source.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::schema::Schema;
use crate::sources::Source;

/// Surfaces every declared default value, keyed by preferred field key.
///
/// Sitting last in the stack, this fills whatever higher-priority sources
/// left unset. Model-kind defaults arrive as whole objects, so a source
/// supplying only some sub-fields deep-merges a partial override into the
/// default instead of replacing it.
pub struct DefaultsSource {
    enabled: bool,
}

impl DefaultsSource {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Source for DefaultsSource {
    fn name(&self) -> &'static str {
        "DefaultsSource"
    }

    fn resolve(&self, schema: &Schema) -> Result<Map<String, Value>> {
        let mut resolved = Map::new();
        if !self.enabled {
            return Ok(resolved);
        }
        for field in schema.fields() {
            if let Some(default) = field.default() {
                resolved.insert(field.preferred_key().to_string(), default.clone());
            }
        }
        Ok(resolved)
    }
}
