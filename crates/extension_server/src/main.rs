//! Extension server entry point.
//!
//! Loads every extension in the configured directory, enables them in load
//! order, and disables them in reverse order on shutdown.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::anyhow;
use cli::CliArgs;
use config::AppConfig;
use extension_api::SymbolTable;
use extension_host::remap::relocated;
use extension_host::{ExtensionLoader, LoaderConfig, LoaderStats};
use tracing::{error, info, warn};

/// Class under which the server publishes its own symbols.
const SERVER_CLASS: &str = "host/Server";

/// Symbols the server exposes to extension imports, named in the current
/// (relocated) scheme.
fn host_symbols(config: &LoaderConfig) -> SymbolTable {
    let class = relocated(SERVER_CLASS, config.relocation_prefix.as_deref(), &config.host_version);
    SymbolTable::new()
        .with(format!("{}::name", class), "extension_server")
        .with(format!("{}::version", class), env!("CARGO_PKG_VERSION"))
        .with(format!("{}::host_version", class), config.host_version.clone())
}

fn log_stats(stats: &LoaderStats) {
    info!(
        "Extensions: {} known, {} enabled, {} handlers, {} cached symbols, {} serializable types",
        stats.known, stats.enabled, stats.handlers, stats.cached_symbols, stats.serializable_types
    );
    for extension in &stats.extensions {
        info!(
            "  {} v{} [{}] {} handlers, {} exports, data: {}",
            extension.name,
            extension.version,
            if extension.enabled { "enabled" } else { "disabled" },
            extension.handlers,
            extension.exports,
            extension.data_folder.display()
        );
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    args.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;
    logging::setup_logging(&config.logging)?;

    info!(
        "Extension server v{} | Config: {} | Extensions: {}",
        env!("CARGO_PKG_VERSION"),
        args.config_path.display(),
        config.loader.directory.display()
    );

    let loader = ExtensionLoader::new(config.loader.clone()).with_host_symbols(host_symbols(&config.loader));

    let report = loader.load_directory().await;
    for (path, e) in &report.failed {
        warn!("Skipped {}: {}", path.display(), e);
    }

    if args.list {
        for name in loader.list_loaded() {
            if let Some(unit) = loader.get(&name) {
                println!("{}\t{}", unit.descriptor().full_name(), unit.location().display());
            }
        }
        return Ok(());
    }

    loader.enable_all().await;
    log_stats(&loader.stats());
    info!("Press Ctrl+C to shut down");

    if let Err(e) = signals::shutdown_signal().await {
        error!("Signal handling failed: {}", e);
    }

    info!("Shutting down, disabling extensions");
    loader.disable_all().await;
    if let Some(timings) = loader.timings() {
        info!("{}", timings.report());
    }
    log_stats(&loader.stats());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_symbols_follow_relocation() {
        let plain = host_symbols(&LoaderConfig::default());
        assert_eq!(plain.get_as::<&str>("host/Server::name"), Some(&"extension_server"));

        let relocated = host_symbols(
            &LoaderConfig::default()
                .with_host_version("v2")
                .with_relocation_prefix("host"),
        );
        assert!(relocated.contains("host/v2/Server::version"));
        assert_eq!(
            relocated.get_as::<String>("host/v2/Server::host_version").map(String::as_str),
            Some("v2")
        );

        // only whole package segments are relocated
        let partial = host_symbols(
            &LoaderConfig::default()
                .with_host_version("v2")
                .with_relocation_prefix("hos"),
        );
        assert!(partial.contains("host/Server::name"));
    }
}
