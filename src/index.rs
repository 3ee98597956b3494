use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A secondary index that maps extracted field values back to primary keys.
///
/// For example, if your keys are `user:123` with JSON values containing `{"city": "Zurich"}`,
/// you can create a secondary index on "city" to quickly find all users in "Zurich".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecondaryIndex {
    /// Name of this index (e.g., "city_index").
    pub name: String,
    /// The JSON field path this index extracts (e.g., "city" or "address.city").
    pub field_path: String,
    /// Inverted index: field_value -> set of primary keys.
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl SecondaryIndex {
    /// Create a new empty secondary index.
    pub fn new(name: String, field_path: String) -> Self {
        Self {
            name,
            field_path,
            entries: BTreeMap::new(),
        }
    }

    /// Index a key-value pair. Extracts the field from the value (assumes JSON).
    /// If the value is not JSON or the field is missing, the key is not indexed.
    pub fn index_entry(&mut self, primary_key: &str, value: &[u8]) {
        // First remove any old entry for this key
        self.remove_key(primary_key);

        // Try to extract the field value
        if let Some(field_val) = self.extract_field(value) {
            self.entries
                .entry(field_val)
                .or_default()
                .insert(primary_key.to_string());
        }
    }

    /// Remove a primary key from the index.
    pub fn remove_key(&mut self, primary_key: &str) {
        let mut empty_values = Vec::new();
        for (val, keys) in self.entries.iter_mut() {
            keys.remove(primary_key);
            if keys.is_empty() {
                empty_values.push(val.clone());
            }
        }
        for val in empty_values {
            self.entries.remove(&val);
        }
    }

    /// Look up primary keys by an exact field value.
    pub fn lookup(&self, field_value: &str) -> Vec<String> {
        self.entries
            .get(field_value)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Range lookup: find keys where the indexed field is in [start, end).
    pub fn range_lookup(&self, start: &str, end: &str) -> Vec<String> {
        use std::ops::Bound;
        let mut result = Vec::new();
        for (_val, keys) in self.entries.range::<String, _>((
            Bound::Included(&start.to_string()),
            Bound::Excluded(&end.to_string()),
        )) {
            result.extend(keys.iter().cloned());
        }
        result.sort();
        result
    }

    /// Prefix lookup on the indexed field values.
    pub fn prefix_lookup(&self, prefix: &str) -> Vec<String> {
        let mut result = Vec::new();
        for (val, keys) in &self.entries {
            if val.starts_with(prefix) {
                result.extend(keys.iter().cloned());
            }
        }
        result.sort();
        result
    }

    /// Get all distinct indexed values.
    pub fn distinct_values(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of distinct indexed values.
    pub fn cardinality(&self) -> usize {
        self.entries.len()
    }

    /// Total number of indexed key references.
    pub fn total_entries(&self) -> usize {
        self.entries.values().map(|s| s.len()).sum()
    }

    /// Extract a field value from a JSON byte slice.
    fn extract_field(&self, value: &[u8]) -> Option<String> {
        let parsed: serde_json::Value = serde_json::from_slice(value).ok()?;
        let parts: Vec<&str> = self.field_path.split('.').collect();
        let mut current = &parsed;
        for part in parts {
            current = current.get(part)?;
        }
        match current {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => Some(current.to_string()),
        }
    }
}

/// Manages multiple secondary indexes for a database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexManager {
    indexes: BTreeMap<String, SecondaryIndex>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new secondary index.
    pub fn create_index(&mut self, name: &str, field_path: &str) -> Result<()> {
        if self.indexes.contains_key(name) {
            return Err(Error::Exists(name.to_string()));
        }
        let idx = SecondaryIndex::new(name.to_string(), field_path.to_string());
        self.indexes.insert(name.to_string(), idx);
        Ok(())
    }

    /// Drop an index.
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        if self.indexes.remove(name).is_none() {
            return Err(Error::NotFound(name.to_string()));
        }
        Ok(())
    }

    /// Index a key-value pair across all indexes.
    pub fn on_put(&mut self, key: &str, value: &[u8]) {
        for idx in self.indexes.values_mut() {
            idx.index_entry(key, value);
        }
    }

    /// Remove a key from all indexes.
    pub fn on_delete(&mut self, key: &str) {
        for idx in self.indexes.values_mut() {
            idx.remove_key(key);
        }
    }

    /// Query an index by exact value.
    pub fn query(&self, index_name: &str, value: &str) -> Result<Vec<String>> {
        let idx = self
            .indexes
            .get(index_name)
            .ok_or_else(|| Error::NotFound(index_name.to_string()))?;
        Ok(idx.lookup(value))
    }

    /// Query an index by prefix.
    pub fn query_prefix(&self, index_name: &str, prefix: &str) -> Result<Vec<String>> {
        let idx = self
            .indexes
            .get(index_name)
            .ok_or_else(|| Error::NotFound(index_name.to_string()))?;
        Ok(idx.prefix_lookup(prefix))
    }

    /// Get an index by name.
    pub fn get_index(&self, name: &str) -> Option<&SecondaryIndex> {
        self.indexes.get(name)
    }

    /// List all index names.
    pub fn list_indexes(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    /// Rebuild all indexes from a full set of key-value pairs.
    pub fn rebuild_all(&mut self, entries: &[(String, Vec<u8>)]) {
        for idx in self.indexes.values_mut() {
            idx.entries.clear();
            for (key, value) in entries {
                idx.index_entry(key, value);
            }
        }
    }
}
