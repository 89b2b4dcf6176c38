//! Sample extension: logs a greeting whenever another extension is enabled,
//! a farewell when one is disabled, and exports a greeting routine other
//! extensions can import as `greeter/Greeter::greet`.

use async_trait::async_trait;
use extension_api::{
    declare_extension, Extension, ExtensionContext, ExtensionDisableOccurrence, ExtensionEnableOccurrence,
    ExtensionError, Listener, LogLevel, Priority, Routine, SymbolTable,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;

pub const GREET_SYMBOL: &str = "greeter/Greeter::greet";

/// Host name, as named by the host API this extension was built against. The
/// host remaps it when its internals have since been renamed or relocated.
pub const HOST_NAME_SYMBOL: &str = "host/Server::name";

/// Signature of the exported greeting routine.
pub type GreetFn = fn(&str) -> String;

fn greet(name: &str) -> String {
    format!("Welcome, {}!", name)
}

pub struct GreeterExtension {
    welcomed: Arc<AtomicU32>,
}

impl GreeterExtension {
    pub fn new() -> Self {
        Self {
            welcomed: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl Default for GreeterExtension {
    fn default() -> Self {
        Self::new()
    }
}

struct Welcomer {
    welcomed: Arc<AtomicU32>,
}

impl Listener for Welcomer {
    fn listener_name(&self) -> &str {
        "Welcomer"
    }

    fn routines(&self) -> Vec<Routine> {
        let welcomed = Arc::clone(&self.welcomed);
        vec![
            Routine::handler("welcome", move |occurrence: &mut ExtensionEnableOccurrence| {
                let count = welcomed.fetch_add(1, Ordering::Relaxed) + 1;
                info!("{} (#{})", greet(&occurrence.extension), count);
                Ok(())
            })
            .priority(Priority::Monitor),
            Routine::handler("farewell", |occurrence: &mut ExtensionDisableOccurrence| {
                info!("Farewell, {} v{}", occurrence.extension, occurrence.version);
                Ok(())
            })
            .priority(Priority::Monitor),
        ]
    }
}

#[async_trait]
impl Extension for GreeterExtension {
    fn exports(&self) -> SymbolTable {
        SymbolTable::new().with(GREET_SYMBOL, greet as GreetFn)
    }

    async fn on_enable(&mut self, context: Arc<dyn ExtensionContext>) -> Result<(), ExtensionError> {
        let host = context
            .lookup_symbol(HOST_NAME_SYMBOL)
            .and_then(|value| value.downcast_ref::<&'static str>().copied())
            .unwrap_or("unknown host");
        context.log(
            LogLevel::Info,
            &format!("{} ready on {}", context.descriptor().full_name(), host),
        );
        Ok(())
    }

    async fn on_disable(&mut self, context: Arc<dyn ExtensionContext>) -> Result<(), ExtensionError> {
        context.log(
            LogLevel::Info,
            &format!("Welcomed {} extensions", self.welcomed.load(Ordering::Relaxed)),
        );
        Ok(())
    }

    fn listeners(&self) -> Vec<Arc<dyn Listener>> {
        vec![Arc::new(Welcomer {
            welcomed: Arc::clone(&self.welcomed),
        })]
    }
}

declare_extension!(GreeterExtension);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_the_greeting_routine() {
        let exports = GreeterExtension::new().exports();
        let greet = exports.get_as::<GreetFn>(GREET_SYMBOL).unwrap();
        assert_eq!(greet("economy"), "Welcome, economy!");
    }

    #[test]
    fn welcomer_counts_enabled_extensions() {
        let extension = GreeterExtension::new();
        let listeners = extension.listeners();
        let routines = listeners[0].routines();
        assert_eq!(routines.len(), 2);

        let mut occurrence = ExtensionEnableOccurrence {
            extension: "economy".to_string(),
            version: "1.0".to_string(),
        };
        (routines[0].body())(&mut occurrence).unwrap();
        (routines[0].body())(&mut occurrence).unwrap();
        assert_eq!(extension.welcomed.load(Ordering::Relaxed), 2);

        // the welcome routine only accepts enable occurrences
        let mut wrong = ExtensionDisableOccurrence {
            extension: "economy".to_string(),
            version: "1.0".to_string(),
        };
        assert!(matches!(
            (routines[0].body())(&mut wrong),
            Err(ExtensionError::OccurrenceMismatch { .. })
        ));
    }

    #[test]
    fn entry_points_produce_an_instance() {
        assert_eq!(extension_api_version(), extension_api::EXTENSION_API_VERSION);
        let raw = unsafe { create_extension() };
        assert!(!raw.is_null());
        let extension = unsafe { Box::from_raw(raw) };
        assert!(extension.exports().contains(GREET_SYMBOL));
    }
}
