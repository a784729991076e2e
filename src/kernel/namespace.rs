//! The persistent, insertion-ordered variable namespace of one kernel.

use std::collections::HashMap;

use super::value::{dispose, Value};

/// Names starting with this marker are executable but never listed.
pub const INTERNAL_MARKER: char = '_';

pub fn is_internal(name: &str) -> bool {
    name.starts_with(INTERNAL_MARKER)
}

/// Variable bindings in first-definition order.
///
/// Re-assigning an existing name keeps its original position.
#[derive(Default)]
pub struct Namespace {
    entries: Vec<(String, Value)>,
    index: HashMap<String, usize>,
}

impl Namespace {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index.get(name).map(|&idx| &self.entries[idx].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        match self.index.get(name) {
            Some(&idx) => dispose(std::mem::replace(&mut self.entries[idx].1, value)),
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push((name.to_string(), value));
            }
        }
    }

    pub fn clear(&mut self) {
        self.index.clear();
        for (_, value) in self.entries.drain(..) {
            dispose(value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn visible_entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .filter(|(name, _)| !is_internal(name))
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn visible_names(&self) -> Vec<String> {
        self.visible_entries()
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        self.clear();
    }
}
