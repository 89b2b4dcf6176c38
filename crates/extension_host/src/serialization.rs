//! Host-wide registry of the types loaded extensions can restore from
//! configuration.

use crate::error::SerializationError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use extension_api::{ExtensionError, SerializableType, SymbolValue};
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

struct RegisteredType {
    owner: String,
    serializable: SerializableType,
}

/// Alias to serializable type, each remembering the extension that provided it.
///
/// The first extension to claim an alias keeps it until it is unregistered.
#[derive(Default)]
pub struct SerializationRegistry {
    types: DashMap<String, RegisteredType>,
}

impl SerializationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every type of `owner` whose alias is still free.
    ///
    /// # Arguments
    ///
    /// * `owner` - Name of the extension providing the types
    /// * `types` - The extension's serializable types
    ///
    /// # Returns
    ///
    /// The number of aliases newly claimed by `owner`.
    pub fn register_all(&self, owner: &str, types: &[SerializableType]) -> usize {
        let mut claimed = 0;
        for serializable in types {
            match self.types.entry(serializable.alias().to_string()) {
                Entry::Vacant(entry) => {
                    entry.insert(RegisteredType {
                        owner: owner.to_string(),
                        serializable: serializable.clone(),
                    });
                    claimed += 1;
                }
                Entry::Occupied(entry) if entry.get().owner != owner => {
                    warn!(
                        extension = owner,
                        "Serializable alias '{}' is already provided by {}",
                        serializable.alias(),
                        entry.get().owner
                    );
                }
                Entry::Occupied(_) => {}
            }
        }
        claimed
    }

    /// Drops every alias claimed by `owner`. Returns how many were removed.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let before = self.types.len();
        self.types.retain(|_, registered| registered.owner != owner);
        let removed = before.saturating_sub(self.types.len());
        if removed > 0 {
            debug!(extension = owner, "Unregistered {} serializable types", removed);
        }
        removed
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.types.contains_key(alias)
    }

    /// Extension currently providing `alias`.
    pub fn owner_of(&self, alias: &str) -> Option<String> {
        self.types.get(alias).map(|registered| registered.owner.clone())
    }

    /// Registered aliases, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.types.iter().map(|entry| entry.key().clone()).collect();
        aliases.sort();
        aliases
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Restores a value of the type registered as `alias`. A panicking
    /// deserializer is reported as a restore failure.
    pub fn deserialize(&self, alias: &str, table: &toml::Table) -> Result<SymbolValue, SerializationError> {
        let (owner, serializable) = self
            .types
            .get(alias)
            .map(|registered| (registered.owner.clone(), registered.serializable.clone()))
            .ok_or_else(|| SerializationError::UnknownAlias(alias.to_string()))?;

        std::panic::catch_unwind(AssertUnwindSafe(|| serializable.deserialize(table)))
            .unwrap_or_else(|payload| Err(ExtensionError::from_panic(payload)))
            .map_err(|source| SerializationError::Restore {
                alias: alias.to_string(),
                owner,
                source,
            })
    }
}
