//! Types an extension can restore from configuration tables.
//!
//! An extension lists the types it knows how to rebuild, each under a stable
//! alias. The host keeps the aliases in a process-wide registry while the
//! extension is loaded, so configuration written by one extension can be
//! read back by any other.

use crate::{ExtensionError, SymbolValue};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Rebuilds a value from its configuration table.
pub type Deserializer = Arc<dyn Fn(&toml::Table) -> Result<SymbolValue, ExtensionError> + Send + Sync>;

/// A type restorable from configuration, registered under `alias`.
///
/// ```rust
/// use extension_api::SerializableType;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Home {
///     x: i64,
///     z: i64,
/// }
///
/// let home = SerializableType::of::<Home>("Home");
/// let table: toml::Table = toml::from_str("x = 4\nz = -2").unwrap();
/// let value = home.deserialize(&table).unwrap();
/// assert_eq!(value.downcast_ref::<Home>().map(|h| h.x + h.z), Some(2));
/// ```
#[derive(Clone)]
pub struct SerializableType {
    alias: String,
    deserializer: Deserializer,
}

impl SerializableType {
    /// Restores `T` through its serde implementation.
    pub fn of<T>(alias: impl Into<String>) -> Self
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        let alias = alias.into();
        let name = alias.clone();
        Self::with_deserializer(alias, move |table: &toml::Table| {
            toml::Value::Table(table.clone())
                .try_into::<T>()
                .map(|value| Arc::new(value) as SymbolValue)
                .map_err(|e| ExtensionError::Failed(format!("Cannot restore {}: {}", name, e)))
        })
    }

    /// Restores values with a hand-written function.
    pub fn with_deserializer<F>(alias: impl Into<String>, deserializer: F) -> Self
    where
        F: Fn(&toml::Table) -> Result<SymbolValue, ExtensionError> + Send + Sync + 'static,
    {
        Self {
            alias: alias.into(),
            deserializer: Arc::new(deserializer),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn deserialize(&self, table: &toml::Table) -> Result<SymbolValue, ExtensionError> {
        (self.deserializer)(table)
    }
}

impl fmt::Debug for SerializableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializableType").field("alias", &self.alias).finish()
    }
}
