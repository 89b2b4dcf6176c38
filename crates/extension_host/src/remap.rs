//! Cross-version symbol remapping.
//!
//! Extensions name host internals the way they were named when the extension
//! was built. The host may since have renamed those internals and relocated
//! them under a versioned package. The remap table translates old names to the
//! current ones, and carries the inheritance data needed to find members
//! declared on a parent of the named class.
//!
//! The table is built from two resources under `mappings/<version>/`:
//!
//! - `symbols.srg`: `CL: <old> <new>` lines, new names before relocation
//! - `symbols.inheritmap`: `<class> <parent>...` lines, in relocated names

use crate::error::RemapError;
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub const RENAME_RESOURCE: &str = "symbols.srg";
pub const INHERITANCE_RESOURCE: &str = "symbols.inheritmap";

/// Separator between a class and a member in a symbol name.
pub const MEMBER_SEPARATOR: &str = "::";

/// Supplies remap resources by relative path.
pub trait RemapSource: Send + Sync {
    fn read_resource(&self, path: &str) -> std::io::Result<String>;
}

/// Reads resources from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryRemapSource {
    root: PathBuf,
}

impl DirectoryRemapSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl RemapSource for DirectoryRemapSource {
    fn read_resource(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.root.join(path))
    }
}

/// Immutable mapping from old host symbol names to current ones.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SymbolRemapTable {
    version: String,
    /// (package, package/version) applied to names the rename table misses
    relocation: Option<(String, String)>,
    renames: HashMap<String, String>,
    inheritance: HashMap<String, Vec<String>>,
}

impl SymbolRemapTable {
    /// Builds the table for `version`, reading each resource exactly once.
    pub fn build(
        source: &dyn RemapSource,
        version: &str,
        relocation_prefix: Option<&str>,
    ) -> Result<Self, RemapError> {
        let rename_path = format!("mappings/{}/{}", version, RENAME_RESOURCE);
        let inheritance_path = format!("mappings/{}/{}", version, INHERITANCE_RESOURCE);

        let rename_text = read(source, &rename_path)?;
        let relocation = relocation_prefix.map(|prefix| (prefix.to_string(), format!("{}/{}", prefix, version)));
        let renames = parse_renames(&rename_text, &rename_path, relocation_pair(&relocation))?;
        let inverse = invert(&renames)?;

        let inheritance_text = read(source, &inheritance_path)?;
        let inheritance = parse_inheritance(&inheritance_text, &inverse);

        info!(
            "Loaded symbol remap table for {}: {} renames, inheritance for {} classes",
            version,
            renames.len(),
            inheritance.len()
        );

        Ok(Self {
            version: version.to_string(),
            relocation,
            renames,
            inheritance,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Current name of an old class name.
    pub fn map(&self, old: &str) -> Option<&str> {
        self.renames.get(old).map(String::as_str)
    }

    /// Current name of an old class name: its rename if it has one, else the
    /// name moved under the versioned package when it lies in the relocated one.
    pub fn current_name(&self, old: &str) -> String {
        match self.map(old) {
            Some(mapped) => mapped.to_string(),
            None => relocate(old, relocation_pair(&self.relocation)),
        }
    }

    /// Direct parents of a class, in the old naming scheme.
    pub fn parents(&self, old: &str) -> &[String] {
        self.inheritance.get(old).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Current-scheme names to try, in order, for an old symbol name.
    ///
    /// A class reference yields its current name. A member reference
    /// (`Class::member`) yields the member on the mapped class, then on each
    /// ancestor in breadth-first order.
    pub fn candidates(&self, name: &str) -> Vec<String> {
        let Some((class, member)) = name.split_once(MEMBER_SEPARATOR) else {
            return vec![self.current_name(name)];
        };

        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([class.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            candidates.push(format!("{}{}{}", self.current_name(&current), MEMBER_SEPARATOR, member));
            queue.extend(self.parents(&current).iter().cloned());
        }
        candidates
    }

    pub fn len(&self) -> usize {
        self.renames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }
}

fn read(source: &dyn RemapSource, path: &str) -> Result<String, RemapError> {
    debug!("Reading remap resource {}", path);
    source.read_resource(path).map_err(|source| RemapError::Resource {
        resource: path.to_string(),
        source,
    })
}

fn relocation_pair(relocation: &Option<(String, String)>) -> Option<(&str, &str)> {
    relocation
        .as_ref()
        .map(|(prefix, replacement)| (prefix.as_str(), replacement.as_str()))
}

/// Whether `name` is `package` or lies inside it.
fn in_package(name: &str, package: &str) -> bool {
    name == package || name.strip_prefix(package).map_or(false, |rest| rest.starts_with('/'))
}

fn relocate(name: &str, relocation: Option<(&str, &str)>) -> String {
    match relocation {
        Some((prefix, replacement)) if in_package(name, prefix) && !in_package(name, replacement) => {
            format!("{}{}", replacement, &name[prefix.len()..])
        }
        _ => name.to_string(),
    }
}

/// Moves `name` under `<prefix>/<version>` when it lies in the `prefix`
/// package. Names outside the package, or already under the versioned one,
/// are returned unchanged.
///
/// ```rust
/// use extension_host::remap::relocated;
///
/// assert_eq!(relocated("host/Server", Some("host"), "v2"), "host/v2/Server");
/// assert_eq!(relocated("hostile/Thing", Some("host"), "v2"), "hostile/Thing");
/// assert_eq!(relocated("host/v2/Server", Some("host"), "v2"), "host/v2/Server");
/// ```
pub fn relocated(name: &str, prefix: Option<&str>, version: &str) -> String {
    match prefix {
        Some(prefix) => relocate(name, Some((prefix, &format!("{}/{}", prefix, version)))),
        None => name.to_string(),
    }
}

fn parse_renames(
    text: &str,
    resource: &str,
    relocation: Option<(&str, &str)>,
) -> Result<HashMap<String, String>, RemapError> {
    let mut renames = HashMap::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(rest) = line.strip_prefix("CL:") else {
            if ["PK:", "FD:", "MD:"].iter().any(|tag| line.starts_with(tag)) {
                continue;
            }
            return Err(malformed(resource, index, raw));
        };
        let mut parts = rest.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(old), Some(new), None) => {
                renames.insert(old.to_string(), relocate(new, relocation));
            }
            _ => return Err(malformed(resource, index, raw)),
        }
    }
    Ok(renames)
}

fn invert(renames: &HashMap<String, String>) -> Result<HashMap<String, String>, RemapError> {
    let mut inverse: HashMap<String, String> = HashMap::with_capacity(renames.len());
    for (old, new) in renames {
        if let Some(existing) = inverse.insert(new.clone(), old.clone()) {
            let (first, second) = if existing < *old {
                (existing, old.clone())
            } else {
                (old.clone(), existing)
            };
            return Err(RemapError::Conflict {
                target: new.clone(),
                first,
                second,
            });
        }
    }
    Ok(inverse)
}

fn parse_inheritance(text: &str, inverse: &HashMap<String, String>) -> HashMap<String, Vec<String>> {
    let to_old = |name: &str| inverse.get(name).cloned().unwrap_or_else(|| name.to_string());
    let mut inheritance = HashMap::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        if let Some(class) = parts.next() {
            let parents: Vec<String> = parts.map(to_old).collect();
            if !parents.is_empty() {
                inheritance.insert(to_old(class), parents);
            }
        }
    }
    inheritance
}

fn malformed(resource: &str, index: usize, raw: &str) -> RemapError {
    RemapError::Malformed {
        resource: resource.to_string(),
        line: index + 1,
        content: raw.to_string(),
    }
}

/// (mappings root, version, relocation prefix)
type CacheKey = (PathBuf, String, Option<String>);

/// Process-wide caches for on-disk remap resources.
static SHARED_CACHES: Lazy<DashMap<CacheKey, Arc<SymbolRemapCache>>> = Lazy::new(DashMap::new);

/// Lazily built, shared remap table.
///
/// Concurrent first callers block on a single build; once built, the table is
/// handed out by reference. A failed build is not cached, so a later call
/// retries.
pub struct SymbolRemapCache {
    source: Arc<dyn RemapSource>,
    version: String,
    relocation_prefix: Option<String>,
    table: OnceCell<Arc<SymbolRemapTable>>,
}

impl SymbolRemapCache {
    pub fn new(
        source: Arc<dyn RemapSource>,
        version: impl Into<String>,
        relocation_prefix: Option<String>,
    ) -> Self {
        Self {
            source,
            version: version.into(),
            relocation_prefix,
            table: OnceCell::new(),
        }
    }

    /// The process-wide cache for resources under `root`.
    ///
    /// Every caller asking for the same root, version and prefix gets the same
    /// cache, so the table is built at most once per process no matter how
    /// many loaders exist.
    pub fn shared(root: impl Into<PathBuf>, version: &str, relocation_prefix: Option<&str>) -> Arc<Self> {
        let root = root.into();
        let key = (root.clone(), version.to_string(), relocation_prefix.map(str::to_string));
        let cache = SHARED_CACHES.entry(key).or_insert_with(|| {
            Arc::new(Self::new(
                Arc::new(DirectoryRemapSource::new(root)),
                version,
                relocation_prefix.map(str::to_string),
            ))
        });
        Arc::clone(cache.value())
    }

    pub fn get_or_build(&self) -> Result<Arc<SymbolRemapTable>, RemapError> {
        self.table
            .get_or_try_init(|| {
                SymbolRemapTable::build(
                    self.source.as_ref(),
                    &self.version,
                    self.relocation_prefix.as_deref(),
                )
                .map(Arc::new)
            })
            .map(Arc::clone)
    }

    /// Whether the table has been built.
    pub fn is_built(&self) -> bool {
        self.table.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RENAMES: &str = "\
# host renames for v2
PK: host/internal host/internal
CL: host/internal/World host/internal/Level
CL: host/internal/Entity host/internal/Mob
CL: host/internal/Player host/internal/ServerPlayer
";

    const INHERITANCE: &str = "\
host/internal/v2/ServerPlayer host/internal/v2/Mob
host/internal/v2/Mob host/internal/v2/Tickable
";

    struct CountingSource {
        reads: AtomicUsize,
        files: HashMap<String, String>,
    }

    impl CountingSource {
        fn new() -> Self {
            let files = HashMap::from([
                (format!("mappings/v2/{}", RENAME_RESOURCE), RENAMES.to_string()),
                (format!("mappings/v2/{}", INHERITANCE_RESOURCE), INHERITANCE.to_string()),
            ]);
            Self {
                reads: AtomicUsize::new(0),
                files,
            }
        }
    }

    impl RemapSource for CountingSource {
        fn read_resource(&self, path: &str) -> std::io::Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
        }
    }

    #[test]
    fn relocates_new_names_under_the_version() {
        let table = SymbolRemapTable::build(&CountingSource::new(), "v2", Some("host/internal")).unwrap();
        assert_eq!(table.map("host/internal/World"), Some("host/internal/v2/Level"));
        assert_eq!(table.map("host/internal/Unknown"), None);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn unrenamed_names_in_the_relocated_package_still_move() {
        let table = SymbolRemapTable::build(&CountingSource::new(), "v2", Some("host/internal")).unwrap();
        assert_eq!(table.current_name("host/internal/Server"), "host/internal/v2/Server");
        assert_eq!(table.current_name("host/internal/v2/Tickable"), "host/internal/v2/Tickable");
        assert_eq!(table.current_name("host/internals/Other"), "host/internals/Other");
        assert_eq!(
            table.candidates("host/internal/Server::name"),
            vec!["host/internal/v2/Server::name".to_string()]
        );
    }

    #[test]
    fn inheritance_is_translated_to_old_names() {
        let table = SymbolRemapTable::build(&CountingSource::new(), "v2", Some("host/internal")).unwrap();
        assert_eq!(table.parents("host/internal/Player"), ["host/internal/Entity".to_string()]);
        assert_eq!(table.parents("host/internal/Entity"), ["host/internal/v2/Tickable".to_string()]);
    }

    #[test]
    fn member_candidates_walk_ancestors() {
        let table = SymbolRemapTable::build(&CountingSource::new(), "v2", Some("host/internal")).unwrap();
        assert_eq!(
            table.candidates("host/internal/Player::health"),
            vec![
                "host/internal/v2/ServerPlayer::health".to_string(),
                "host/internal/v2/Mob::health".to_string(),
                "host/internal/v2/Tickable::health".to_string(),
            ]
        );
        assert_eq!(table.candidates("host/internal/World"), vec!["host/internal/v2/Level".to_string()]);
        assert_eq!(table.candidates("other/Thing"), vec!["other/Thing".to_string()]);
    }

    #[test]
    fn cache_builds_once() {
        let source = Arc::new(CountingSource::new());
        let cache = SymbolRemapCache::new(source.clone(), "v2", Some("host/internal".to_string()));
        assert!(!cache.is_built());

        let first = cache.get_or_build().unwrap();
        let second = cache.get_or_build().unwrap();

        assert_eq!(*first, *second);
        assert!(Arc::ptr_eq(&first, &second));
        // one read per resource
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_first_access_builds_once() {
        let source = Arc::new(CountingSource::new());
        let cache = Arc::new(SymbolRemapCache::new(source.clone(), "v2", None));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get_or_build().unwrap().len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 3);
        }
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn shared_caches_are_process_wide_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let mappings = dir.path().join("mappings/v2");
        std::fs::create_dir_all(&mappings).unwrap();
        std::fs::write(mappings.join(RENAME_RESOURCE), RENAMES).unwrap();
        std::fs::write(mappings.join(INHERITANCE_RESOURCE), INHERITANCE).unwrap();

        let first = SymbolRemapCache::shared(dir.path(), "v2", Some("host/internal"));
        let second = SymbolRemapCache::shared(dir.path(), "v2", Some("host/internal"));
        let unprefixed = SymbolRemapCache::shared(dir.path(), "v2", None);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &unprefixed));

        first.get_or_build().unwrap();
        // resources are not read again through the other handle
        std::fs::remove_dir_all(&mappings).unwrap();
        assert!(second.is_built());
        assert_eq!(second.get_or_build().unwrap().len(), 3);
        assert!(!unprefixed.is_built());
    }

    #[test]
    fn missing_resource_is_an_error_and_not_cached() {
        let cache = SymbolRemapCache::new(Arc::new(CountingSource::new()), "v9", None);
        assert!(matches!(cache.get_or_build(), Err(RemapError::Resource { .. })));
        assert!(!cache.is_built());
    }

    #[test]
    fn conflicting_targets_cannot_be_inverted() {
        let mut files = CountingSource::new();
        files.files.insert(
            format!("mappings/v2/{}", RENAME_RESOURCE),
            "CL: a/One x/Same\nCL: a/Two x/Same\n".to_string(),
        );
        let err = SymbolRemapTable::build(&files, "v2", None).unwrap_err();
        assert!(matches!(
            err,
            RemapError::Conflict { ref target, ref first, ref second }
                if target == "x/Same" && first == "a/One" && second == "a/Two"
        ));
    }

    #[test]
    fn malformed_lines_are_reported_with_their_number() {
        let mut files = CountingSource::new();
        files.files.insert(
            format!("mappings/v2/{}", RENAME_RESOURCE),
            "CL: a/One x/One\nCL: only-one-name\n".to_string(),
        );
        let err = SymbolRemapTable::build(&files, "v2", None).unwrap_err();
        assert!(matches!(err, RemapError::Malformed { line: 2, .. }));
    }
}
