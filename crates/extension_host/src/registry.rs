//! The unit registry: which extensions are active, in load order, and the
//! global cache of symbols they export.

use crate::error::LoadError;
use crate::unit::IsolatedCodeUnit;
use dashmap::DashMap;
use extension_api::SymbolValue;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
struct CachedSymbol {
    owner: String,
    value: SymbolValue,
}

/// Name to active unit, plus the exported-symbol cache.
///
/// Presence of an entry is the only meaning of "loaded" for dependency
/// checks. Reads may happen from any thread; writers hold the lock only for
/// the mutation itself.
pub struct UnitRegistry {
    units: RwLock<IndexMap<String, Arc<IsolatedCodeUnit>>>,
    symbols: DashMap<String, CachedSymbol>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self {
            units: RwLock::new(IndexMap::new()),
            symbols: DashMap::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<IsolatedCodeUnit>> {
        self.units.read().get(name).cloned()
    }

    /// Names in load order.
    pub fn names(&self) -> Vec<String> {
        self.units.read().keys().cloned().collect()
    }

    /// Units in load order.
    pub fn units(&self) -> Vec<Arc<IsolatedCodeUnit>> {
        self.units.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }

    /// Inserts a unit unless one with the same name is present, then publishes
    /// its exports.
    ///
    /// # Arguments
    ///
    /// * `unit` - The freshly built unit
    ///
    /// # Errors
    ///
    /// [`LoadError::AlreadyLoaded`] when the name is taken; nothing is
    /// published in that case.
    pub fn try_insert(&self, unit: Arc<IsolatedCodeUnit>) -> Result<(), LoadError> {
        let mut units = self.units.write();
        if units.contains_key(unit.name()) {
            return Err(LoadError::AlreadyLoaded(unit.name().to_string()));
        }
        self.publish(&unit);
        units.insert(unit.name().to_string(), unit);
        Ok(())
    }

    /// Re-tracks a unit that was evicted on disable. Returns false when it was
    /// already tracked.
    pub fn track(&self, unit: Arc<IsolatedCodeUnit>) -> bool {
        let mut units = self.units.write();
        if units.contains_key(unit.name()) {
            return false;
        }
        self.publish(&unit);
        units.insert(unit.name().to_string(), unit);
        true
    }

    /// Removes a unit and purges the cache entries it owns. Load order of
    /// the remaining units is kept.
    pub fn evict(&self, name: &str) -> Option<Arc<IsolatedCodeUnit>> {
        let mut units = self.units.write();
        let removed = units.shift_remove(name)?;
        let before = self.symbols.len();
        self.symbols.retain(|_, cached| cached.owner != name);
        debug!(
            extension = name,
            "Evicted {} and purged {} cached symbols",
            name,
            before.saturating_sub(self.symbols.len())
        );
        Some(removed)
    }

    /// Looks a symbol up in every active unit's exports. Cache misses scan
    /// units in load order and cache the first hit.
    ///
    /// # Arguments
    ///
    /// * `name` - Exported symbol name
    ///
    /// # Returns
    ///
    /// The value published by the earliest-loaded active unit, or `None`.
    pub fn lookup_symbol(&self, name: &str) -> Option<SymbolValue> {
        if let Some(cached) = self.symbols.get(name) {
            return Some(cached.value.clone());
        }

        let units = self.units.read();
        let (owner, value) = units
            .values()
            .find_map(|unit| unit.exports().get(name).map(|value| (unit.name(), value.clone())))?;
        self.symbols
            .entry(name.to_string())
            .or_insert_with(|| CachedSymbol {
                owner: owner.to_string(),
                value: value.clone(),
            });
        Some(value)
    }

    /// Number of symbols currently in the global cache.
    pub fn cached_symbols(&self) -> usize {
        self.symbols.len()
    }

    fn publish(&self, unit: &IsolatedCodeUnit) {
        for (name, value) in unit.exports().iter() {
            self.symbols.entry(name.to_string()).or_insert_with(|| CachedSymbol {
                owner: unit.name().to_string(),
                value: value.clone(),
            });
        }
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}
