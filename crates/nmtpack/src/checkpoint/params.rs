//! Ordered parameter map.

use indexmap::IndexMap;

use nmtpack_core::Tensor;

/// Named parameter tensors in checkpoint order.
///
/// Iteration yields entries in insertion order. Re-inserting an existing name
/// replaces its tensor but keeps its original position. The layout planner
/// relies on this contract; the checkpoint loader inserts in header order.
#[derive(Debug, Clone, Default)]
pub struct ParameterMap {
    entries: IndexMap<String, Tensor>,
}

impl ParameterMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tensor, returning the one it replaced.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.entries.insert(name.into(), tensor)
    }

    /// Looks up a tensor by exact name.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries.get(name)
    }

    /// Returns true if a tensor with this exact name exists.
    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Iterates `(name, tensor)` pairs in checkpoint order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates names in checkpoint order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of element counts over every tensor.
    pub fn total_elements(&self) -> usize {
        self.entries.values().map(Tensor::num_elements).sum()
    }
}

impl<S: Into<String>> FromIterator<(S, Tensor)> for ParameterMap {
    fn from_iter<I: IntoIterator<Item = (S, Tensor)>>(iter: I) -> Self {
        let mut map = ParameterMap::new();
        for (name, tensor) in iter {
            map.insert(name, tensor);
        }
        map
    }
}
