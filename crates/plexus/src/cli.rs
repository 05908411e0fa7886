//! Subcommand implementations. Each returns the process exit code, or an
//! error that `main` reports before exiting with failure.
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use log::{info, warn};
use plexus_core::plugin_system::integrity;
use plexus_core::{
    LoadOptions, ManifestLoader, PluginManager, PluginSystemError, Result, RuntimeConfig,
};

/// Loads every manifest found in `dirs` without initializing anything.
///
/// Dependency checks are skipped so that broken graphs can still be reported.
async fn load_manifests(config: &RuntimeConfig, dirs: Vec<PathBuf>) -> Result<PluginManager> {
    let dirs = if dirs.is_empty() {
        config.plugin_dirs.clone()
    } else {
        dirs
    };
    if dirs.is_empty() {
        return Err(PluginSystemError::InvalidParameters {
            message: "no plugin directory given and none configured".to_string(),
        });
    }

    let manager = PluginManager::new(Arc::new(ManifestLoader::new()), config.clone());
    for dir in &dirs {
        let manifests = ManifestLoader::discover(dir).await?;
        if manifests.is_empty() {
            warn!("No manifests found in {}", dir.display());
        }
        for path in manifests {
            let options = LoadOptions::new().deferred().without_dependency_check();
            manager.load(&path, options).await?;
        }
    }
    info!("Loaded {} manifest(s)", manager.loaded_ids().await.len());
    Ok(manager)
}

pub async fn order(config: &RuntimeConfig, dirs: Vec<PathBuf>) -> Result<ExitCode> {
    let manager = load_manifests(config, dirs).await?;

    let cycles = manager.get_circular_dependencies().await;
    if !cycles.is_empty() {
        for cycle in &cycles {
            let mut members = cycle.cycle.clone();
            if let Some(first) = cycle.cycle.first() {
                members.push(first.clone());
            }
            println!(
                "cycle: {} (suggested break: {})",
                members.join(" -> "),
                cycle.suggested_break
            );
        }
        return Ok(ExitCode::FAILURE);
    }

    for (position, plugin_id) in manager.get_load_order().await.iter().enumerate() {
        println!("{}. {}", position + 1, plugin_id);
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn check(config: &RuntimeConfig, dirs: Vec<PathBuf>) -> Result<ExitCode> {
    let manager = load_manifests(config, dirs).await?;
    match manager.validate_dependencies().await {
        Ok(()) => {
            println!("OK: {} plugin(s)", manager.loaded_ids().await.len());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("FAILED: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

pub async fn run(config: &RuntimeConfig, dirs: Vec<PathBuf>) -> Result<ExitCode> {
    let manager = load_manifests(config, dirs).await?;
    manager.validate_dependencies().await?;
    let order = manager.try_get_load_order().await?;

    let mut failed = false;
    for plugin_id in &order {
        match manager.initialize(plugin_id).await {
            Ok(()) => {
                let state = manager.state(plugin_id).await.unwrap_or_default();
                println!("{}: {}", plugin_id, state);
            }
            Err(e) => {
                println!("{}: failed ({})", plugin_id, e);
                failed = true;
            }
        }
    }

    if let Err(e) = manager.shutdown_all(Some(config.shutdown_deadline)).await {
        eprintln!("Shutdown incomplete: {}", e);
        failed = true;
    }
    println!("Shut down {} plugin(s)", order.len());

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

pub async fn digest(file: &Path) -> Result<ExitCode> {
    let digest = integrity::compute_digest(file).await?;
    println!("{}  {}", digest, file.display());
    Ok(ExitCode::SUCCESS)
}
