//! End-to-end tests for loading, enabling, disabling and unloading extensions.
//!
//! Extensions are statically linked through `BuiltinImageLoader`; each one
//! still needs an image file and a descriptor on disk, which the fixture
//! writes into a temporary directory.

use extension_host::extension_api::{
    async_trait, impl_occurrence, Extension, ExtensionContext, ExtensionDisableOccurrence,
    ExtensionEnableOccurrence, ExtensionError, Listener, Priority, ResolvedImports, Routine, SerializableType,
    SymbolTable,
};
use extension_host::{
    BuiltinImageLoader, Deprecation, ExtensionLoader, KindSpec, LifecycleError, LoadError, LoaderConfig,
    RegistrationError, RemapError, SerializationError, WarningState,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

type Log = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Fine,
    Fail,
    Panic,
}

fn run(outcome: Outcome, what: &str) -> Result<(), ExtensionError> {
    match outcome {
        Outcome::Fine => Ok(()),
        Outcome::Fail => Err(ExtensionError::Failed(format!("{} refused", what))),
        Outcome::Panic => panic!("{} panicked", what),
    }
}

#[derive(Clone)]
struct Scripted {
    name: &'static str,
    log: Log,
    exports: SymbolTable,
    imports: Vec<String>,
    looks_up: Option<&'static str>,
    serializable: Vec<SerializableType>,
    enable: Outcome,
    disable: Outcome,
    listeners: Vec<Arc<dyn Listener>>,
}

impl Scripted {
    fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: Arc::clone(log),
            exports: SymbolTable::new(),
            imports: Vec::new(),
            looks_up: None,
            serializable: Vec::new(),
            enable: Outcome::Fine,
            disable: Outcome::Fine,
            listeners: Vec::new(),
        }
    }

    fn exporting(mut self, symbol: &str, value: u32) -> Self {
        self.exports.insert(symbol, value);
        self
    }

    fn importing(mut self, symbol: &str) -> Self {
        self.imports.push(symbol.to_string());
        self
    }

    fn serializing(mut self, serializable: SerializableType) -> Self {
        self.serializable.push(serializable);
        self
    }

    /// Looks `symbol` up through the context while enabling.
    fn looking_up(mut self, symbol: &'static str) -> Self {
        self.looks_up = Some(symbol);
        self
    }

    fn on_enable(mut self, outcome: Outcome) -> Self {
        self.enable = outcome;
        self
    }

    fn on_disable(mut self, outcome: Outcome) -> Self {
        self.disable = outcome;
        self
    }

    fn listening(mut self, listener: impl Listener) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }
}

#[async_trait]
impl Extension for Scripted {
    fn imports(&self) -> Vec<String> {
        self.imports.clone()
    }

    fn exports(&self) -> SymbolTable {
        self.exports.clone()
    }

    fn serializable_types(&self) -> Vec<SerializableType> {
        self.serializable.clone()
    }

    fn link(&mut self, imports: &ResolvedImports) -> Result<(), ExtensionError> {
        for name in &self.imports {
            let rendered = if let Some(value) = imports.get_as::<u32>(name) {
                value.to_string()
            } else if let Some(value) = imports.get_as::<&'static str>(name) {
                value.to_string()
            } else {
                return Err(ExtensionError::MissingImport(name.clone()));
            };
            self.log.lock().push(format!("{}:link:{}={}", self.name, name, rendered));
        }
        Ok(())
    }

    async fn on_enable(&mut self, context: Arc<dyn ExtensionContext>) -> Result<(), ExtensionError> {
        assert_eq!(context.descriptor().name(), self.name);
        self.log.lock().push(format!("{}:on_enable", self.name));
        if let Some(symbol) = self.looks_up {
            let rendered = match context.lookup_symbol(symbol) {
                Some(value) => match value.downcast_ref::<u32>() {
                    Some(number) => number.to_string(),
                    None => "other".to_string(),
                },
                None => "none".to_string(),
            };
            self.log.lock().push(format!("{}:lookup:{}={}", self.name, symbol, rendered));
        }
        run(self.enable, "enable")
    }

    async fn on_disable(&mut self, _context: Arc<dyn ExtensionContext>) -> Result<(), ExtensionError> {
        self.log.lock().push(format!("{}:on_disable", self.name));
        run(self.disable, "disable")
    }

    fn listeners(&self) -> Vec<Arc<dyn Listener>> {
        self.listeners.clone()
    }
}

#[derive(Debug, Default)]
struct Ping {
    trail: Vec<String>,
    cancelled: bool,
}

impl_occurrence!(Ping, "ping", cancellable: cancelled);

#[derive(Debug, Default)]
struct LegacyPing;

impl_occurrence!(LegacyPing, "legacy_ping");

struct PingListener {
    owner: &'static str,
    priority: Priority,
}

impl Listener for PingListener {
    fn routines(&self) -> Vec<Routine> {
        let owner = self.owner;
        vec![Routine::handler("on_ping", move |ping: &mut Ping| {
            ping.trail.push(owner.to_string());
            Ok(())
        })
        .priority(self.priority)]
    }
}

struct LegacyListener;

impl Listener for LegacyListener {
    fn routines(&self) -> Vec<Routine> {
        vec![Routine::handler("on_legacy", |_: &mut LegacyPing| Ok(()))]
    }
}

struct LifecycleObserver {
    log: Log,
}

impl Listener for LifecycleObserver {
    fn routines(&self) -> Vec<Routine> {
        let enabled = Arc::clone(&self.log);
        let disabled = Arc::clone(&self.log);
        vec![
            Routine::handler("saw_enable", move |occurrence: &mut ExtensionEnableOccurrence| {
                enabled.lock().push(format!("observer:saw-enable:{}", occurrence.extension));
                Ok(())
            })
            .priority(Priority::Monitor),
            Routine::handler("saw_disable", move |occurrence: &mut ExtensionDisableOccurrence| {
                disabled.lock().push(format!("observer:saw-disable:{}", occurrence.extension));
                Ok(())
            })
            .priority(Priority::Monitor),
        ]
    }
}

struct Fixture {
    dir: TempDir,
    images: BuiltinImageLoader,
    log: Log,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            images: BuiltinImageLoader::new(),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.path().join(file)
    }

    /// Writes `file` and its descriptor, and serves `script` for it.
    fn extension(&mut self, file: &str, descriptor: &str, script: Scripted) -> PathBuf {
        let path = self.path(file);
        std::fs::write(&path, b"builtin").unwrap();
        std::fs::write(path.with_extension("toml"), descriptor).unwrap();
        self.images
            .register(file, move || -> Box<dyn Extension> { Box::new(script.clone()) });
        path
    }

    fn simple(&mut self, name: &'static str) -> PathBuf {
        let script = Scripted::new(name, &self.log);
        self.extension(&format!("{}.ext", name), &descriptor(name, &[]), script)
    }

    fn write_mappings(&self) {
        let root = self.path("mappings/v2");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(
            root.join("symbols.srg"),
            "# v2 renames\n\
             CL: host/internal/Player host/internal/ServerPlayer\n\
             CL: host/internal/Entity host/internal/Mob\n",
        )
        .unwrap();
        std::fs::write(
            root.join("symbols.inheritmap"),
            "host/internal/v2/ServerPlayer host/internal/v2/Mob\n",
        )
        .unwrap();
    }

    fn config(&self) -> LoaderConfig {
        LoaderConfig::default()
            .with_directory(self.dir.path())
            .with_mappings_dir(self.dir.path())
            .with_host_version("v2")
            .with_relocation_prefix("host/internal")
    }

    fn loader_with(&self, config: LoaderConfig) -> ExtensionLoader {
        let loader = ExtensionLoader::new(config)
            .with_image_loader(self.images.clone())
            .with_host_symbols(
                SymbolTable::new()
                    .with("host/internal/v2/ServerPlayer::health", 20u32)
                    .with("host/internal/v2/Mob::name", "mob"),
            );
        loader.kinds().register(KindSpec::new("ping")).unwrap();
        loader
            .kinds()
            .register(KindSpec::new("legacy_ping").deprecated(Deprecation::new().reason("use ping")))
            .unwrap();
        loader
    }

    fn loader(&self) -> ExtensionLoader {
        self.loader_with(self.config())
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

fn descriptor(name: &str, depend: &[&str]) -> String {
    let depend: Vec<String> = depend.iter().map(|dep| format!("\"{}\"", dep)).collect();
    format!(
        "name = \"{}\"\nversion = \"1.0\"\nauthors = [\"tester\"]\ndepend = [{}]\n",
        name,
        depend.join(", ")
    )
}

#[tokio::test]
async fn dependency_must_be_loaded_when_dependent_loads() {
    let mut fixture = Fixture::new();
    let alpha = fixture.simple("alpha");
    let beta_script = Scripted::new("beta", &fixture.log);
    let beta = fixture.extension("beta.ext", &descriptor("beta", &["alpha"]), beta_script);
    let gamma_script = Scripted::new("gamma", &fixture.log);
    let gamma = fixture.extension("gamma.ext", &descriptor("gamma", &["alpha"]), gamma_script);
    let loader = fixture.loader();

    loader.load(&alpha).unwrap();
    loader.load(&beta).unwrap();
    loader.unload("alpha").await.unwrap();

    let err = loader.load(&gamma).unwrap_err();
    assert!(matches!(err, LoadError::UnknownDependency(ref name) if name == "alpha"));
    assert_eq!(loader.list_loaded(), vec!["beta".to_string()]);
}

#[tokio::test]
async fn missing_hard_dependency_fails_before_the_image_is_built() {
    let mut fixture = Fixture::new();
    let alpha = fixture.simple("alpha");
    let beta = fixture.path("beta.ext");
    std::fs::write(&beta, b"builtin").unwrap();
    std::fs::write(beta.with_extension("toml"), descriptor("beta", &["alpha"])).unwrap();
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    let log = Arc::clone(&fixture.log);
    fixture.images.register("beta.ext", move || -> Box<dyn Extension> {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::new(Scripted::new("beta", &log))
    });
    let loader = fixture.loader();

    let err = loader.load(&beta).unwrap_err();
    assert!(matches!(err, LoadError::UnknownDependency(ref name) if name == "alpha"));
    assert_eq!(built.load(Ordering::SeqCst), 0);

    loader.load(&alpha).unwrap();
    loader.load(&beta).unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn path_like_names_are_rejected_before_any_folder_moves() {
    let mut fixture = Fixture::new();
    let script = Scripted::new("escaped", &fixture.log);
    let path = fixture.extension("escaped.ext", &descriptor("../escaped", &[]), script);
    let legacy = fixture.path("escaped");
    std::fs::create_dir(&legacy).unwrap();
    std::fs::write(legacy.join("state.toml"), "level = 3").unwrap();
    let loader = fixture.loader();

    assert!(matches!(loader.load(&path), Err(LoadError::Descriptor { .. })));
    assert!(legacy.join("state.toml").is_file());
    assert!(loader.list_loaded().is_empty());
}

#[derive(Debug, serde::Deserialize)]
struct Home {
    x: i64,
    z: i64,
}

#[tokio::test]
async fn serializable_types_follow_the_extension_lifecycle() {
    let mut fixture = Fixture::new();
    let script = Scripted::new("homes", &fixture.log).serializing(SerializableType::of::<Home>("Home"));
    let path = fixture.extension("homes.ext", &descriptor("homes", &[]), script);
    let loader = fixture.loader();
    let table: toml::Table = toml::from_str("x = 10\nz = -3").unwrap();

    loader.load(&path).unwrap();
    assert_eq!(loader.serialization().owner_of("Home").as_deref(), Some("homes"));
    let home = loader.serialization().deserialize("Home", &table).unwrap();
    assert_eq!(home.downcast_ref::<Home>().map(|home| (home.x, home.z)), Some((10, -3)));

    loader.enable("homes").await.unwrap();
    loader.disable("homes").await.unwrap();
    assert!(matches!(
        loader.serialization().deserialize("Home", &table),
        Err(SerializationError::UnknownAlias(_))
    ));

    loader.enable("homes").await.unwrap();
    assert!(loader.serialization().contains("Home"));
    assert_eq!(loader.stats().serializable_types, 1);

    loader.unload("homes").await.unwrap();
    assert!(loader.serialization().is_empty());
}

#[tokio::test]
async fn unloading_a_never_enabled_extension_drops_its_types() {
    let mut fixture = Fixture::new();
    let script = Scripted::new("homes", &fixture.log).serializing(SerializableType::of::<Home>("Home"));
    let path = fixture.extension("homes.ext", &descriptor("homes", &[]), script);
    let loader = fixture.loader();

    loader.load(&path).unwrap();
    loader.unload("homes").await.unwrap();
    assert!(!loader.serialization().contains("Home"));
}

#[tokio::test]
async fn same_name_is_never_loaded_twice() {
    let mut fixture = Fixture::new();
    let alpha = fixture.simple("alpha");
    let impostor_script = Scripted::new("alpha", &fixture.log);
    let impostor = fixture.extension("impostor.ext", &descriptor("alpha", &[]), impostor_script);
    let loader = fixture.loader();

    loader.load(&alpha).unwrap();
    assert!(matches!(loader.load(&alpha), Err(LoadError::AlreadyLoaded(_))));
    assert!(matches!(loader.load(&impostor), Err(LoadError::AlreadyLoaded(_))));

    // a disabled extension is still known
    loader.enable("alpha").await.unwrap();
    loader.disable("alpha").await.unwrap();
    assert!(matches!(loader.load(&impostor), Err(LoadError::AlreadyLoaded(_))));
    assert_eq!(loader.list_loaded().len(), 1);
}

#[tokio::test]
async fn missing_code_location_and_descriptor_fail_cleanly() {
    let fixture = Fixture::new();
    std::fs::write(fixture.path("bare.ext"), b"").unwrap();
    let loader = fixture.loader();

    assert!(matches!(
        loader.load(fixture.path("nowhere.ext")),
        Err(LoadError::MissingLocation(_))
    ));
    assert!(matches!(loader.load(fixture.path("bare.ext")), Err(LoadError::Descriptor { .. })));
    assert!(loader.list_loaded().is_empty());
}

#[tokio::test]
async fn disabling_removes_every_handler_of_the_extension() {
    let mut fixture = Fixture::new();
    let log = Arc::clone(&fixture.log);
    let script = Scripted::new("alpha", &log)
        .listening(PingListener {
            owner: "alpha",
            priority: Priority::Normal,
        })
        .listening(LifecycleObserver { log: Arc::clone(&log) });
    let alpha = fixture.extension("alpha.ext", &descriptor("alpha", &[]), script);
    let loader = fixture.loader();

    loader.load(&alpha).unwrap();
    loader.enable("alpha").await.unwrap();
    assert_eq!(loader.handlers().handler_count_for_owner("alpha"), 3);
    assert_eq!(loader.dispatch(&mut Ping::default()).invoked, 1);

    loader.disable("alpha").await.unwrap();

    assert_eq!(loader.handlers().handler_count_for_owner("alpha"), 0);
    for kind in ["ping", "extension_enable", "extension_disable"] {
        assert!(loader.handlers().registered_handlers_for(kind).is_empty());
    }
    assert_eq!(loader.dispatch(&mut Ping::default()).invoked, 0);
    assert!(!loader.is_enabled("alpha"));
}

#[tokio::test]
async fn enable_and_disable_notify_observers_in_order() {
    let mut fixture = Fixture::new();
    let log = Arc::clone(&fixture.log);
    let observer_script = Scripted::new("observer", &log).listening(LifecycleObserver { log: Arc::clone(&log) });
    let observer = fixture.extension("observer.ext", &descriptor("observer", &[]), observer_script);
    let beta = fixture.simple("beta");
    let loader = fixture.loader();

    loader.load(&observer).unwrap();
    loader.load(&beta).unwrap();
    loader.enable_all().await;
    loader.disable_all().await;

    assert_eq!(
        fixture.entries(),
        vec![
            "observer:on_enable",
            "observer:saw-enable:observer",
            "beta:on_enable",
            "observer:saw-enable:beta",
            // reverse load order, notification before the hook
            "observer:saw-disable:beta",
            "beta:on_disable",
            "observer:saw-disable:observer",
            "observer:on_disable",
        ]
    );
}

#[tokio::test]
async fn failing_hooks_do_not_stop_transitions() {
    let mut fixture = Fixture::new();
    let log = Arc::clone(&fixture.log);
    let failing = Scripted::new("failing", &log)
        .on_enable(Outcome::Fail)
        .on_disable(Outcome::Panic)
        .listening(PingListener {
            owner: "failing",
            priority: Priority::Normal,
        });
    let panicking = Scripted::new("panicking", &log).on_enable(Outcome::Panic);
    let failing = fixture.extension("failing.ext", &descriptor("failing", &[]), failing);
    let panicking = fixture.extension("panicking.ext", &descriptor("panicking", &[]), panicking);
    let healthy = fixture.simple("healthy");
    let loader = fixture.loader();

    for path in [&failing, &panicking, &healthy] {
        loader.load(path).unwrap();
    }
    loader.enable_all().await;

    for name in ["failing", "panicking", "healthy"] {
        assert!(loader.is_enabled(name), "{} should be enabled", name);
    }
    assert_eq!(loader.handlers().handler_count_for_owner("failing"), 1);

    loader.disable("failing").await.unwrap();
    assert!(!loader.is_enabled("failing"));
    assert_eq!(loader.handlers().handler_count_for_owner("failing"), 0);
    assert!(fixture.entries().contains(&"healthy:on_enable".to_string()));
}

#[tokio::test]
async fn legacy_data_folder_is_migrated_on_load() {
    let mut fixture = Fixture::new();
    let script = Scripted::new("alpha", &fixture.log);
    let path = fixture.extension("alpha-1.0.ext", &descriptor("alpha", &[]), script);
    let legacy = fixture.path("alpha-1.0");
    std::fs::create_dir(&legacy).unwrap();
    std::fs::write(legacy.join("state.toml"), "level = 3").unwrap();
    let loader = fixture.loader();

    let unit = loader.load(&path).unwrap();

    let canonical = fixture.path("alpha");
    assert_eq!(unit.data_folder(), canonical.as_path());
    assert!(canonical.join("state.toml").is_file());
    assert!(!legacy.exists());
}

#[tokio::test]
async fn data_folder_conflict_fails_the_load() {
    let mut fixture = Fixture::new();
    let path = fixture.simple("alpha");
    std::fs::write(fixture.path("alpha"), "a file where the folder should be").unwrap();
    let loader = fixture.loader();

    assert!(matches!(loader.load(&path), Err(LoadError::DataFolderConflict { .. })));
    assert!(loader.list_loaded().is_empty());
}

#[tokio::test]
async fn imports_are_resolved_through_the_remap_table() {
    let mut fixture = Fixture::new();
    fixture.write_mappings();
    let script = Scripted::new("alpha", &fixture.log)
        .exporting("alpha/helper", 7)
        .importing("host/internal/Player::health")
        .importing("host/internal/Player::name")
        .importing("alpha/helper");
    let alpha = fixture.extension("alpha.ext", &descriptor("alpha", &[]), script);
    let loader = fixture.loader();

    loader.load(&alpha).unwrap();

    assert_eq!(
        fixture.entries(),
        vec![
            "alpha:link:host/internal/Player::health=20",
            "alpha:link:host/internal/Player::name=mob",
            "alpha:link:alpha/helper=7",
        ]
    );
}

#[tokio::test]
async fn context_lookups_translate_old_host_names() {
    let mut fixture = Fixture::new();
    fixture.write_mappings();
    let script = Scripted::new("reader", &fixture.log)
        .looking_up("host/internal/Player::health");
    let path = fixture.extension("reader.ext", &descriptor("reader", &[]), script);
    let other = Scripted::new("blind", &fixture.log).looking_up("host/internal/Player::mana");
    let blind = fixture.extension("blind.ext", &descriptor("blind", &[]), other);
    let loader = fixture.loader();

    loader.load(&path).unwrap();
    loader.load(&blind).unwrap();
    loader.enable_all().await;

    let entries = fixture.entries();
    assert!(entries.contains(&"reader:lookup:host/internal/Player::health=20".to_string()));
    assert!(entries.contains(&"blind:lookup:host/internal/Player::mana=none".to_string()));
}

#[tokio::test]
async fn missing_remap_resources_fail_the_load_and_change_nothing() {
    let mut fixture = Fixture::new();
    let importer_script = Scripted::new("importer", &fixture.log).importing("host/internal/Player::health");
    let importer = fixture.extension("importer.ext", &descriptor("importer", &[]), importer_script);
    let plain = fixture.simple("plain");
    let loader = fixture.loader();

    let err = loader.load(&importer).unwrap_err();
    assert!(matches!(err, LoadError::Remap(RemapError::Resource { .. })));
    assert!(loader.list_loaded().is_empty());
    assert_eq!(loader.stats().active, 0);

    // import-free extensions never need the table
    loader.load(&plain).unwrap();
}

#[tokio::test]
async fn unresolved_imports_fail_the_load() {
    let mut fixture = Fixture::new();
    fixture.write_mappings();
    let script = Scripted::new("alpha", &fixture.log).importing("host/internal/Player::mana");
    let alpha = fixture.extension("alpha.ext", &descriptor("alpha", &[]), script);
    let loader = fixture.loader();

    let err = loader.load(&alpha).unwrap_err();
    assert!(matches!(
        err,
        LoadError::UnresolvedSymbol { ref symbol, .. } if symbol == "host/internal/Player::mana"
    ));
}

#[tokio::test]
async fn same_named_symbols_stay_private_to_each_extension() {
    let mut fixture = Fixture::new();
    fixture.write_mappings();
    let alpha_script = Scripted::new("alpha", &fixture.log)
        .exporting("helper", 1)
        .exporting("alpha/only", 10)
        .importing("helper");
    let beta_script = Scripted::new("beta", &fixture.log)
        .exporting("helper", 2)
        .importing("helper")
        .importing("alpha/only");
    let alpha = fixture.extension("alpha.ext", &descriptor("alpha", &[]), alpha_script);
    let beta = fixture.extension("beta.ext", &descriptor("beta", &["alpha"]), beta_script);
    let loader = fixture.loader();

    loader.load(&alpha).unwrap();
    loader.load(&beta).unwrap();

    assert_eq!(
        fixture.entries(),
        vec![
            "alpha:link:helper=1",
            "beta:link:helper=2",
            "beta:link:alpha/only=10",
        ]
    );
    let global = loader.lookup_symbol("helper").unwrap();
    assert_eq!(global.downcast_ref::<u32>(), Some(&1));

    // evicting alpha hands the shared name to beta
    loader.enable("alpha").await.unwrap();
    loader.disable("alpha").await.unwrap();
    let global = loader.lookup_symbol("helper").unwrap();
    assert_eq!(global.downcast_ref::<u32>(), Some(&2));
    assert!(loader.lookup_symbol("alpha/only").is_none());
}

#[tokio::test]
async fn handlers_run_by_priority_then_registration_order() {
    let mut fixture = Fixture::new();
    let log = Arc::clone(&fixture.log);
    let alpha_script = Scripted::new("alpha", &log)
        .listening(PingListener {
            owner: "alpha-normal",
            priority: Priority::Normal,
        })
        .listening(PingListener {
            owner: "alpha-monitor",
            priority: Priority::Monitor,
        });
    let beta_script = Scripted::new("beta", &log)
        .listening(PingListener {
            owner: "beta-normal",
            priority: Priority::Normal,
        })
        .listening(PingListener {
            owner: "beta-lowest",
            priority: Priority::Lowest,
        });
    let alpha = fixture.extension("alpha.ext", &descriptor("alpha", &[]), alpha_script);
    let beta = fixture.extension("beta.ext", &descriptor("beta", &[]), beta_script);
    let loader = fixture.loader();

    loader.load(&alpha).unwrap();
    loader.load(&beta).unwrap();
    loader.enable_all().await;

    let mut ping = Ping::default();
    let report = loader.dispatch(&mut ping);

    assert_eq!(report.invoked, 4);
    assert_eq!(report.failed, 0);
    assert_eq!(ping.trail, vec!["beta-lowest", "alpha-normal", "beta-normal", "alpha-monitor"]);
}

#[tokio::test]
async fn fatal_deprecations_reject_the_listener_only() {
    let mut fixture = Fixture::new();
    let script = Scripted::new("alpha", &fixture.log)
        .listening(LegacyListener)
        .listening(PingListener {
            owner: "alpha",
            priority: Priority::Normal,
        });
    let alpha = fixture.extension("alpha.ext", &descriptor("alpha", &[]), script);
    let loader = fixture.loader_with(fixture.config().with_warning_state(WarningState::On));

    loader.load(&alpha).unwrap();
    loader.enable("alpha").await.unwrap();

    assert!(loader.is_enabled("alpha"));
    assert!(loader.handlers().registered_handlers_for("legacy_ping").is_empty());
    assert_eq!(loader.handlers().registered_handlers_for("ping").len(), 1);

    let err = loader.register_listener("alpha", Arc::new(LegacyListener)).unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Registration(RegistrationError::DeprecatedOccurrence { .. })
    ));
}

#[tokio::test]
async fn listeners_can_only_be_added_to_enabled_extensions() {
    let mut fixture = Fixture::new();
    let alpha = fixture.simple("alpha");
    let loader = fixture.loader();
    loader.load(&alpha).unwrap();

    let listener = || {
        Arc::new(PingListener {
            owner: "late",
            priority: Priority::High,
        }) as Arc<dyn Listener>
    };
    assert!(matches!(
        loader.register_listener("alpha", listener()),
        Err(LifecycleError::NotEnabled(_))
    ));
    assert!(matches!(
        loader.register_listener("ghost", listener()),
        Err(LifecycleError::NotFound(_))
    ));

    loader.enable("alpha").await.unwrap();
    assert_eq!(loader.register_listener("alpha", listener()).unwrap(), 1);
    assert_eq!(loader.dispatch(&mut Ping::default()).invoked, 1);
}

#[tokio::test]
async fn timings_probe_every_handler_while_enabled() {
    let mut fixture = Fixture::new();
    let script = Scripted::new("alpha", &fixture.log).listening(PingListener {
        owner: "alpha",
        priority: Priority::Normal,
    });
    let alpha = fixture.extension("alpha.ext", &descriptor("alpha", &[]), script);
    let loader = fixture.loader_with(fixture.config().with_timings(true));

    loader.load(&alpha).unwrap();
    loader.enable("alpha").await.unwrap();
    loader.dispatch(&mut Ping::default());
    loader.dispatch(&mut Ping::default());

    let timings = loader.timings().unwrap();
    let probes = timings.stats();
    assert_eq!(probes.len(), 1);
    assert!(probes[0].name.starts_with("Extension: alpha v1.0 Event: "));
    assert!(probes[0].name.ends_with("::on_ping(ping)"));
    assert_eq!(probes[0].count, 2);
    assert_eq!(timings.parent().count, 2);

    loader.disable("alpha").await.unwrap();
    assert!(timings.stats().is_empty());
}

#[tokio::test]
async fn directory_loading_reports_each_failure() {
    let mut fixture = Fixture::new();
    fixture.simple("alpha");
    let beta_script = Scripted::new("beta", &fixture.log);
    fixture.extension("beta.ext", &descriptor("beta", &["alpha"]), beta_script);
    let orphan_script = Scripted::new("orphan", &fixture.log);
    fixture.extension("aaa.ext", &descriptor("orphan", &["zzz"]), orphan_script);
    std::fs::write(fixture.path("notes.txt"), "not an extension").unwrap();
    let loader = fixture.loader();

    let discovered = loader.discover().await;
    assert_eq!(
        discovered,
        vec![fixture.path("aaa.ext"), fixture.path("alpha.ext"), fixture.path("beta.ext")]
    );

    let report = loader.load_directory().await;
    assert_eq!(report.loaded, vec!["alpha".to_string(), "beta".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(report.failed[0].1, LoadError::UnknownDependency(ref name) if name == "zzz"));

    loader.enable_all().await;
    let stats = loader.stats();
    assert_eq!(stats.known, 2);
    assert_eq!(stats.enabled, 2);
}
