//! Hard-dependency checks performed before an image is built.

use crate::error::LoadError;
use crate::registry::UnitRegistry;
use extension_api::Descriptor;
use tracing::debug;

/// Fails with the first hard dependency, in declaration order, that is not
/// currently loaded. Soft dependencies are never checked.
pub fn check_hard_dependencies(descriptor: &Descriptor, registry: &UnitRegistry) -> Result<(), LoadError> {
    if let Some(missing) = descriptor.hard_deps().iter().find(|dep| !registry.contains(dep)) {
        return Err(LoadError::UnknownDependency(missing.clone()));
    }

    let absent_soft: Vec<&str> = descriptor
        .soft_deps()
        .iter()
        .filter(|dep| !registry.contains(dep))
        .map(String::as_str)
        .collect();
    if !absent_soft.is_empty() {
        debug!(
            extension = descriptor.name(),
            "Soft dependencies of {} not loaded: {}",
            descriptor.full_name(),
            absent_soft.join(", ")
        );
    }
    Ok(())
}
