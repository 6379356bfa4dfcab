//! Keyed mapping adapters.
//!
//! Every key/value-backed source funnels lookups through [`KeyedMapping`],
//! which wraps a raw [`KeyedProvider`] behind a case-folding index. The
//! index maps folded key -> original key and is built once per adapter; on
//! fold collisions the first key in iteration order wins and the loser is
//! traced at debug level. `None` from a lookup means the key is absent,
//! `Some(Value::Null)` means it is present and explicitly null.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use once_cell::unsync::OnceCell;
use serde_json::Value;

/// A raw key/value store a source reads from.
///
/// Concrete adapters (process env snapshot, parsed dotenv file, secrets
/// directory, keyring backend) implement this; the resolution engine only
/// ever sees the trait.
pub trait KeyedProvider {
    /// Value for an exact original key, or `None` if absent.
    fn get(&self, key: &str) -> Option<Value>;

    /// All original keys, in a stable order.
    fn keys(&self) -> Vec<String>;

    fn contains(&self, key: &str) -> bool {
        self.keys().iter().any(|existing| existing == key)
    }

    fn len(&self) -> usize {
        self.keys().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An eager in-memory provider over a sorted map.
#[derive(Debug, Clone, Default)]
pub struct MapProvider {
    entries: BTreeMap<String, Value>,
}

impl MapProvider {
    pub fn new(entries: BTreeMap<String, Value>) -> Self {
        Self { entries }
    }
}

impl From<BTreeMap<String, Value>> for MapProvider {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self::new(entries)
    }
}

impl FromIterator<(String, Value)> for MapProvider {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl KeyedProvider for MapProvider {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Case-(in)sensitive lookup over any provider.
pub struct KeyedMapping<P> {
    provider: P,
    case_sensitive: bool,
    index: OnceCell<HashMap<String, String>>,
}

impl<P: KeyedProvider> KeyedMapping<P> {
    pub fn new(provider: P, case_sensitive: bool) -> Self {
        Self { provider, case_sensitive, index: OnceCell::new() }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Look up by candidate name. Callers fold the name themselves when
    /// case-insensitive (candidate lookups arrive pre-folded).
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if self.case_sensitive {
            self.provider.get(name)
        } else {
            let original = self.index().get(name)?;
            self.provider.get(original)
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        if self.case_sensitive {
            self.provider.contains(name)
        } else {
            self.index().contains_key(name)
        }
    }

    /// Original (unfolded) provider keys.
    pub fn original_keys(&self) -> Vec<String> {
        self.provider.keys()
    }

    fn index(&self) -> &HashMap<String, String> {
        self.index.get_or_init(|| {
            let mut index = HashMap::new();
            for key in self.provider.keys() {
                let folded = key.to_lowercase();
                if let Some(existing) = index.get(&folded) {
                    tracing::debug!(
                        winner = %existing,
                        ignored = %key,
                        "case-insensitive key collision, keeping first"
                    );
                    continue;
                }
                index.insert(folded, key);
            }
            index
        })
    }
}

type LazyResolver = Rc<dyn Fn(&str) -> Option<Value>>;

/// A provider that defers value computation until a key is first requested.
///
/// Stores the known key set plus a resolver closure; each resolved value
/// (including "absent") is cached per instance. Cloning shares the resolver
/// and snapshots the cache, so already-computed values stay computed and
/// pending ones stay lazy — composition never forces backend work.
pub struct LazyMapping {
    keys: Vec<String>,
    resolver: LazyResolver,
    cache: RefCell<HashMap<String, Option<Value>>>,
}

impl LazyMapping {
    pub fn new(keys: Vec<String>, resolver: impl Fn(&str) -> Option<Value> + 'static) -> Self {
        Self { keys, resolver: Rc::new(resolver), cache: RefCell::new(HashMap::new()) }
    }

    /// Number of keys resolved so far (test observability).
    pub fn computed_count(&self) -> usize {
        self.cache.borrow().len()
    }
}

impl Clone for LazyMapping {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            resolver: Rc::clone(&self.resolver),
            cache: RefCell::new(self.cache.borrow().clone()),
        }
    }
}

impl std::fmt::Debug for LazyMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyMapping")
            .field("keys", &self.keys)
            .field("computed", &self.computed_count())
            .finish()
    }
}

impl KeyedProvider for LazyMapping {
    fn get(&self, key: &str) -> Option<Value> {
        if !self.keys.iter().any(|known| known == key) {
            return None;
        }
        self.cache
            .borrow_mut()
            .entry(key.to_string())
            .or_insert_with(|| (self.resolver)(key))
            .clone()
    }

    fn keys(&self) -> Vec<String> {
        self.keys.clone()
    }

    fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|known| known == key)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}
