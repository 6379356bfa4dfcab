//! Deep-merge primitives used to combine source outputs.
//!
//! Two mappings merge recursively: when both sides hold an object at the
//! same key the objects merge key-by-key, otherwise the overlay value
//! replaces the base value whole. Lists and scalars never splice.

use serde_json::{Map, Value};

/// Merge `overlay` into `base`, with `overlay` winning leaf conflicts.
pub fn deep_update(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, incoming) in overlay {
        let merged = match (base.remove(&key), incoming) {
            (Some(Value::Object(mut existing)), Value::Object(incoming)) => {
                deep_update(&mut existing, incoming);
                Value::Object(existing)
            }
            (_, incoming) => incoming,
        };
        base.insert(key, merged);
    }
}

/// Merge an ordered list of mappings where the first mapping has the
/// highest priority. Folds from the last mapping to the first so that
/// earlier entries overwrite later ones.
pub fn merge_prioritized(outputs: Vec<Map<String, Value>>) -> Map<String, Value> {
    let mut merged = Map::new();
    for mapping in outputs.into_iter().rev() {
        deep_update(&mut merged, mapping);
    }
    merged
}
