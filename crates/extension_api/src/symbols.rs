//! Named symbol tables exchanged between the host and extension images.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A resolved symbol. Callers downcast to the concrete type they expect.
pub type SymbolValue = Arc<dyn Any + Send + Sync>;

/// Mapping from symbol name to value.
///
/// Each loaded extension owns one of these as its private scope; the host owns
/// another for its own internals.
#[derive(Clone, Default)]
pub struct SymbolTable {
    entries: HashMap<String, SymbolValue>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous symbol of the same name.
    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.entries.insert(name.into(), Arc::new(value));
    }

    pub fn insert_value(&mut self, name: impl Into<String>, value: SymbolValue) {
        self.entries.insert(name.into(), value);
    }

    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SymbolValue> {
        self.entries.get(name)
    }

    /// Typed lookup; `None` when absent or of another type.
    pub fn get_as<T: Any>(&self, name: &str) -> Option<&T> {
        self.entries.get(name).and_then(|value| value.downcast_ref::<T>())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SymbolValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("SymbolTable").field("symbols", &names).finish()
    }
}

/// Imports of one extension after the host bound them, keyed by the name the
/// extension asked for (before any remapping).
#[derive(Debug, Clone, Default)]
pub struct ResolvedImports {
    table: SymbolTable,
}

impl ResolvedImports {
    pub fn new(table: SymbolTable) -> Self {
        Self { table }
    }

    pub fn get(&self, name: &str) -> Option<&SymbolValue> {
        self.table.get(name)
    }

    pub fn get_as<T: Any>(&self, name: &str) -> Option<&T> {
        self.table.get_as(name)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
