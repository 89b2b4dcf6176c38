//! Occurrence kind hierarchy.
//!
//! Kinds form a tree rooted at [`ROOT_KIND`]. Each kind stores the nearest
//! deprecated kind on its path to the root (itself included), computed once
//! when the kind is registered, so registration-time deprecation checks are a
//! single map lookup.

use crate::error::KindError;
use extension_api::ROOT_KIND;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Deprecation marker on an occurrence kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deprecation {
    pub reason: Option<String>,
    /// Report under the default warning state
    pub warn_by_default: bool,
}

impl Deprecation {
    pub fn new() -> Self {
        Self {
            reason: None,
            warn_by_default: true,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn warn_by_default(mut self, warn: bool) -> Self {
        self.warn_by_default = warn;
        self
    }
}

impl Default for Deprecation {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration request for one kind.
#[derive(Debug, Clone)]
pub struct KindSpec {
    name: String,
    parent: String,
    deprecation: Option<Deprecation>,
}

impl KindSpec {
    /// A kind directly under the root.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: ROOT_KIND.to_string(),
            deprecation: None,
        }
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = parent.into();
        self
    }

    pub fn deprecated(mut self, deprecation: Deprecation) -> Self {
        self.deprecation = Some(deprecation);
        self
    }
}

#[derive(Debug, Clone)]
struct KindNode {
    parent: Option<String>,
    /// Nearest deprecated kind on the path to the root, inclusive
    nearest_deprecated: Option<(String, Deprecation)>,
}

/// Registry of occurrence kinds known to the host.
#[derive(Debug)]
pub struct OccurrenceKinds {
    nodes: RwLock<HashMap<String, KindNode>>,
}

impl OccurrenceKinds {
    /// Creates the registry with the root kind and the built-in extension
    /// lifecycle kinds.
    pub fn new() -> Self {
        let kinds = Self {
            nodes: RwLock::new(HashMap::new()),
        };
        kinds.nodes.write().insert(
            ROOT_KIND.to_string(),
            KindNode {
                parent: None,
                nearest_deprecated: None,
            },
        );

        for spec in [
            KindSpec::new("extension"),
            KindSpec::new("extension_enable").parent("extension"),
            KindSpec::new("extension_disable").parent("extension"),
        ] {
            if let Err(e) = kinds.register(spec) {
                unreachable!("built-in kinds are registered in order: {}", e);
            }
        }
        kinds
    }

    /// Registers a kind. Its parent must already be registered.
    pub fn register(&self, spec: KindSpec) -> Result<(), KindError> {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&spec.name) {
            return Err(KindError::Duplicate(spec.name));
        }
        let parent = nodes.get(&spec.parent).ok_or_else(|| KindError::UnknownParent {
            kind: spec.name.clone(),
            parent: spec.parent.clone(),
        })?;

        let nearest_deprecated = match spec.deprecation {
            Some(deprecation) => Some((spec.name.clone(), deprecation)),
            None => parent.nearest_deprecated.clone(),
        };

        nodes.insert(
            spec.name,
            KindNode {
                parent: Some(spec.parent),
                nearest_deprecated,
            },
        );
        Ok(())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.nodes.read().contains_key(kind)
    }

    /// The kind followed by each ancestor up to the root. Empty for unknown kinds.
    pub fn ancestors(&self, kind: &str) -> Vec<String> {
        let nodes = self.nodes.read();
        let mut chain = Vec::new();
        let mut current = Some(kind.to_string());
        while let Some(name) = current {
            match nodes.get(&name) {
                Some(node) => {
                    current = node.parent.clone();
                    chain.push(name);
                }
                None => break,
            }
        }
        chain
    }

    /// Whether `kind` is `ancestor` or descends from it.
    pub fn is_subkind(&self, kind: &str, ancestor: &str) -> bool {
        self.ancestors(kind).iter().any(|k| k == ancestor)
    }

    /// Nearest deprecated kind on the path from `kind` to the root, inclusive.
    pub fn nearest_deprecated(&self, kind: &str) -> Option<(String, Deprecation)> {
        self.nodes.read().get(kind).and_then(|node| node.nearest_deprecated.clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl Default for OccurrenceKinds {
    fn default() -> Self {
        Self::new()
    }
}
