use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which the producing extractor's version is recorded.
pub const METADATA_VERSION_KEY: &str = "version";

/// Extractor-owned derived attributes (dimensions, previews, ...).
///
/// The catalog treats the contents as opaque apart from
/// [`METADATA_VERSION_KEY`], which is consulted when deciding whether a
/// record's derived data predates the extractor that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version stamped by the extractor that last produced this map.
    /// Missing or non-numeric values count as version 0.
    pub fn version(&self) -> u32 {
        self.0
            .get(METADATA_VERSION_KEY)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    }

    pub fn set_version(&mut self, version: u32) {
        self.0
            .insert(METADATA_VERSION_KEY.to_string(), Value::from(version));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Overlay `other` onto this map, replacing keys present in both.
    pub fn merge(&mut self, other: Metadata) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(value: Map<String, Value>) -> Self {
        Metadata(value)
    }
}
