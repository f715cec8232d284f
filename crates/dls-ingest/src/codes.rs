//! Ordered code dictionaries
//!
//! [`CodeMap`] is one codelist (short code -> long label) that keeps
//! insertion order. [`CodeDict`] maps a dimension or attribute key to its
//! codelist and is what a dataset stores as `codelists`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// Insertion-ordered map of short code to label
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeMap {
    entries: Vec<(String, String)>,
    by_code: HashMap<String, usize>,
}

impl CodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, code: &str) -> Option<&str> {
        self.by_code
            .get(code)
            .map(|&i| self.entries[i].1.as_str())
    }

    /// Short code of the first entry carrying `label`
    pub fn code_for_label(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, l)| l == label)
            .map(|(c, _)| c.as_str())
    }

    /// Insert unless the code is already present. Returns true on insert.
    pub fn insert_if_absent(&mut self, code: impl Into<String>, label: impl Into<String>) -> bool {
        let code = code.into();
        if self.by_code.contains_key(&code) {
            return false;
        }
        self.by_code.insert(code.clone(), self.entries.len());
        self.entries.push((code, label.into()));
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(c, l)| (c.as_str(), l.as_str()))
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    /// First-write-wins union
    pub fn merge(&mut self, other: &CodeMap) {
        for (code, label) in other.iter() {
            self.insert_if_absent(code, label);
        }
    }

    /// Next free sequential numeric code
    fn next_auto_code(&self) -> String {
        let mut n = self.entries.len();
        while self.by_code.contains_key(&n.to_string()) {
            n += 1;
        }
        n.to_string()
    }
}

impl<C: Into<String>, L: Into<String>> FromIterator<(C, L)> for CodeMap {
    fn from_iter<T: IntoIterator<Item = (C, L)>>(iter: T) -> Self {
        let mut map = CodeMap::new();
        for (code, label) in iter {
            map.insert_if_absent(code, label);
        }
        map
    }
}

// JSONB reorders object keys, so codelists travel as [code, label] pairs
impl Serialize for CodeMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for CodeMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Vec::<(String, String)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

/// Ordered mapping of key name -> [`CodeMap`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeDict {
    names: Vec<String>,
    maps: HashMap<String, CodeMap>,
}

impl CodeDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value for `name` and return its short code.
    ///
    /// With an explicit `code` the entry is added unless the code is already
    /// known. Without one, a known `label` returns its existing code and an
    /// unknown label gets the next sequential number ("0", "1", ...).
    pub fn update_entry(&mut self, name: &str, code: Option<&str>, label: &str) -> String {
        let map = self.entry(name);
        match code {
            Some(code) => {
                map.insert_if_absent(code, label);
                code.to_string()
            },
            None => {
                if let Some(existing) = map.code_for_label(label) {
                    return existing.to_string();
                }
                let code = map.next_auto_code();
                map.insert_if_absent(code.clone(), label);
                code
            },
        }
    }

    /// Codelist for `name`, created empty on first use
    pub fn entry(&mut self, name: &str) -> &mut CodeMap {
        if !self.maps.contains_key(name) {
            self.names.push(name.to_string());
        }
        self.maps.entry(name.to_string()).or_default()
    }

    pub fn get(&self, name: &str) -> Option<&CodeMap> {
        self.maps.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CodeMap)> {
        self.names
            .iter()
            .filter_map(|n| self.maps.get(n).map(|m| (n.as_str(), m)))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when no key holds a single code
    pub fn is_empty(&self) -> bool {
        self.maps.values().all(CodeMap::is_empty)
    }

    /// Union with `other`; existing codes keep their labels
    pub fn merge(&mut self, other: &CodeDict) {
        for (name, map) in other.iter() {
            self.entry(name).merge(map);
        }
    }
}

impl Serialize for CodeDict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for CodeDict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut dict = CodeDict::new();
        for (name, codes) in Vec::<(String, CodeMap)>::deserialize(deserializer)? {
            dict.entry(&name).merge(&codes);
        }
        Ok(dict)
    }
}
