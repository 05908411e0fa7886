//! # Plugin loaders
//!
//! A [`Loader`] turns a file into a running [`PluginInstance`]. Two loaders
//! ship with the runtime:
//!
//! - [`DynamicLibraryLoader`] opens shared libraries that export
//!   `_plexus_plugin_create` (see [`declare_plugin!`](crate::declare_plugin)).
//! - [`ManifestLoader`] reads `*.plugin.json` manifests into
//!   [`ManifestPlugin`]s: metadata-only plugins, handy for dependency
//!   planning and for tests.
//!
//! Loaders refuse a second instance with an id they already handed out, so a
//! duplicate never reaches the registry.
use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::io::ErrorKind as IoErrorKind;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use libloading::{Library, Symbol};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::constants::{
    BACKUP_STATE_COMMAND, MANIFEST_SUFFIX, PLUGIN_CREATE_SYMBOL, RESTORE_STATE_COMMAND,
};
use crate::lifecycle::LifecycleState;
use crate::plugin_system::error::{PluginSystemError, Result};
use crate::plugin_system::metadata::{PluginCapabilities, PluginDependency, PluginMetadata};
use crate::plugin_system::traits::{PluginError, PluginInstance, PluginPriority};
use crate::plugin_system::version::{VersionRange, parse_version};

/// Produces plugin instances from files.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Whether this loader understands `path`. Must not touch the filesystem.
    fn can_load(&self, path: &Path) -> bool;

    async fn load(&self, path: &Path) -> Result<Arc<dyn PluginInstance>>;

    /// Releases the loader's hold on a plugin it produced.
    async fn unload(&self, plugin_id: &str) -> Result<()>;

    fn supported_extensions(&self) -> Vec<String>;
}

/// Exports `_plexus_plugin_create` from a `cdylib` plugin crate.
///
/// ```ignore
/// plexus_core::declare_plugin!(MyPlugin::new());
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($constructor:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C-unwind" fn _plexus_plugin_create() -> *mut ::std::ffi::c_void {
            let instance: ::std::boxed::Box<dyn $crate::plugin_system::PluginInstance> =
                ::std::boxed::Box::new($constructor);
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(instance)) as *mut ::std::ffi::c_void
        }
    };
}

type PluginCreateFn = unsafe extern "C-unwind" fn() -> *mut c_void;

/// An instance together with the library its code lives in.
struct LibraryInstance {
    // Field order matters: the instance must drop before its library
    instance: Box<dyn PluginInstance>,
    _library: Library,
}

impl PluginInstance for LibraryInstance {
    fn id(&self) -> &str {
        self.instance.id()
    }

    fn metadata(&self) -> &PluginMetadata {
        self.instance.metadata()
    }

    fn state(&self) -> LifecycleState {
        self.instance.state()
    }

    fn initialize(&self) -> std::result::Result<(), PluginError> {
        self.instance.initialize()
    }

    fn shutdown(&self) -> std::result::Result<(), PluginError> {
        self.instance.shutdown()
    }

    fn configure(&self, config: &Value) -> std::result::Result<(), PluginError> {
        self.instance.configure(config)
    }

    fn execute_command(&self, name: &str, args: &Value) -> std::result::Result<Value, PluginError> {
        self.instance.execute_command(name, args)
    }

    fn available_commands(&self) -> Vec<String> {
        self.instance.available_commands()
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

fn open_library(path: &Path) -> Result<LibraryInstance> {
    let load_failed = |message: String| PluginSystemError::LoadFailed {
        plugin_id: path.display().to_string(),
        message,
    };

    let library = unsafe { Library::new(path) }
        .map_err(|e| load_failed(format!("failed to open library: {}", e)))?;

    let create: PluginCreateFn = {
        let symbol: Symbol<PluginCreateFn> = unsafe { library.get(PLUGIN_CREATE_SYMBOL) }
            .map_err(|e| load_failed(format!("missing symbol _plexus_plugin_create: {}", e)))?;
        *symbol
    };

    // A panic inside the plugin's constructor must not unwind into the host
    let raw = panic::catch_unwind(|| unsafe { create() })
        .map_err(|_| load_failed("plugin constructor panicked".to_string()))?;
    if raw.is_null() {
        return Err(load_failed("plugin constructor returned null".to_string()));
    }

    let instance = unsafe { Box::from_raw(raw as *mut Box<dyn PluginInstance>) };
    Ok(LibraryInstance {
        instance: *instance,
        _library: library,
    })
}

/// Loads plugins from shared libraries (`.so`, `.dylib`, `.dll`).
#[derive(Default)]
pub struct DynamicLibraryLoader {
    loaded: Mutex<HashMap<String, PathBuf>>,
}

impl DynamicLibraryLoader {
    const EXTENSIONS: [&'static str; 3] = ["so", "dylib", "dll"];

    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Loader for DynamicLibraryLoader {
    fn can_load(&self, path: &Path) -> bool {
        has_extension(path, &Self::EXTENSIONS)
    }

    async fn load(&self, path: &Path) -> Result<Arc<dyn PluginInstance>> {
        let owned = path.to_path_buf();
        let instance = tokio::task::spawn_blocking(move || open_library(&owned))
            .await
            .map_err(|e| PluginSystemError::LoadFailed {
                plugin_id: path.display().to_string(),
                message: format!("library loading task failed: {}", e),
            })??;

        let plugin_id = instance.id().to_string();
        let mut loaded = self.loaded.lock().await;
        if loaded.contains_key(&plugin_id) {
            return Err(PluginSystemError::AlreadyExists { plugin_id });
        }
        info!("Loaded library plugin '{}' from {}", plugin_id, path.display());
        loaded.insert(plugin_id, path.to_path_buf());
        Ok(Arc::new(instance))
    }

    async fn unload(&self, plugin_id: &str) -> Result<()> {
        // The library itself closes once the last instance handle is dropped
        match self.loaded.lock().await.remove(plugin_id) {
            Some(path) => {
                debug!("Released library plugin '{}' ({})", plugin_id, path.display());
                Ok(())
            }
            None => Err(PluginSystemError::not_found(plugin_id)),
        }
    }

    fn supported_extensions(&self) -> Vec<String> {
        Self::EXTENSIONS.iter().map(|e| e.to_string()).collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Id(String),
    Detailed {
        id: String,
        #[serde(default)]
        version_range: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    id: String,
    #[serde(default)]
    name: Option<String>,
    version: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    configuration: Option<Value>,
    #[serde(default)]
    commands: Vec<String>,
}

/// A plugin described entirely by a JSON manifest.
pub struct ManifestPlugin {
    id: String,
    metadata: PluginMetadata,
    commands: Vec<String>,
    state: StdMutex<LifecycleState>,
    configuration: StdMutex<Value>,
}

impl ManifestPlugin {
    const BUILTIN_COMMANDS: [&'static str; 4] =
        [BACKUP_STATE_COMMAND, RESTORE_STATE_COMMAND, "describe", "echo"];

    pub fn parse(path: &Path, data: &str) -> Result<Self> {
        let invalid = |message: String| PluginSystemError::InvalidFormat {
            path: path.to_path_buf(),
            message,
        };
        let raw: RawManifest = serde_json::from_str(data).map_err(|e| invalid(e.to_string()))?;
        if raw.id.trim().is_empty() {
            return Err(invalid("manifest id must not be empty".to_string()));
        }

        let version = parse_version(&raw.version).map_err(|e| invalid(e.to_string()))?;
        let capabilities = PluginCapabilities::from_names(&raw.capabilities)
            .map_err(|name| invalid(format!("unknown capability '{}'", name)))?;
        let priority = match raw.priority.as_deref() {
            Some(p) => p.parse::<PluginPriority>().map_err(invalid)?,
            None => PluginPriority::default(),
        };

        let mut dependencies = Vec::with_capacity(raw.dependencies.len());
        for dep in raw.dependencies {
            dependencies.push(match dep {
                RawDependency::Id(id) => PluginDependency::any(id),
                RawDependency::Detailed { id, version_range: None } => PluginDependency::any(id),
                RawDependency::Detailed { id, version_range: Some(range) } => {
                    let range = VersionRange::from_constraint(&range).map_err(|e| invalid(e.to_string()))?;
                    PluginDependency::with_range(id, range)
                }
            });
        }

        let mut metadata = PluginMetadata::new(raw.name.unwrap_or_else(|| raw.id.clone()), version)
            .with_author(raw.author)
            .with_description(raw.description)
            .with_priority(priority)
            .with_capabilities(capabilities);
        metadata.license = raw.license;
        metadata.category = raw.category;
        metadata.tags = raw.tags;
        metadata.dependencies = dependencies;

        Ok(Self {
            id: raw.id,
            metadata,
            commands: raw.commands,
            state: StdMutex::new(LifecycleState::Loaded),
            configuration: StdMutex::new(raw.configuration.unwrap_or(Value::Null)),
        })
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn configuration(&self) -> Value {
        self.configuration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PluginInstance for ManifestPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialize(&self) -> std::result::Result<(), PluginError> {
        self.set_state(LifecycleState::Running);
        Ok(())
    }

    fn shutdown(&self) -> std::result::Result<(), PluginError> {
        self.set_state(LifecycleState::Stopped);
        Ok(())
    }

    fn configure(&self, config: &Value) -> std::result::Result<(), PluginError> {
        *self.configuration.lock().unwrap_or_else(PoisonError::into_inner) = config.clone();
        Ok(())
    }

    fn execute_command(&self, name: &str, args: &Value) -> std::result::Result<Value, PluginError> {
        match name {
            BACKUP_STATE_COMMAND => Ok(json!({ "configuration": self.configuration() })),
            RESTORE_STATE_COMMAND => {
                let configuration = args.get("configuration").cloned().unwrap_or(Value::Null);
                self.configure(&configuration)?;
                Ok(Value::Null)
            }
            "describe" => Ok(json!({
                "id": self.id,
                "name": self.metadata.name,
                "version": self.metadata.version.to_string(),
                "dependencies": self.metadata.dependency_ids().collect::<Vec<_>>(),
            })),
            "echo" => Ok(args.clone()),
            other if self.commands.iter().any(|c| c == other) => Ok(args.clone()),
            other => Err(PluginError::UnknownCommand(other.to_string())),
        }
    }

    fn available_commands(&self) -> Vec<String> {
        let mut commands: Vec<String> = Self::BUILTIN_COMMANDS.iter().map(|c| c.to_string()).collect();
        commands.extend(self.commands.iter().cloned());
        commands
    }
}

/// Loads `*.plugin.json` manifests into [`ManifestPlugin`]s.
#[derive(Default)]
pub struct ManifestLoader {
    loaded: Mutex<HashSet<String>>,
}

impl ManifestLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manifest files directly inside `dir`, sorted by path.
    pub async fn discover(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| match e.kind() {
            IoErrorKind::NotFound => PluginSystemError::FileNotFound { path: dir.to_path_buf() },
            _ => PluginSystemError::InvalidParameters {
                message: format!("cannot read directory {}: {}", dir.display(), e),
            },
        })?;

        let mut found = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|e| PluginSystemError::InvalidParameters {
                message: format!("cannot read directory {}: {}", dir.display(), e),
            })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            if is_manifest(&path) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }
}

fn is_manifest(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.len() > MANIFEST_SUFFIX.len() && name.ends_with(MANIFEST_SUFFIX))
}

#[async_trait]
impl Loader for ManifestLoader {
    fn can_load(&self, path: &Path) -> bool {
        is_manifest(path)
    }

    async fn load(&self, path: &Path) -> Result<Arc<dyn PluginInstance>> {
        let data = tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
            IoErrorKind::NotFound => PluginSystemError::FileNotFound { path: path.to_path_buf() },
            _ => PluginSystemError::LoadFailed {
                plugin_id: path.display().to_string(),
                message: e.to_string(),
            },
        })?;
        let plugin = ManifestPlugin::parse(path, &data)?;

        let mut loaded = self.loaded.lock().await;
        if !loaded.insert(plugin.id.clone()) {
            return Err(PluginSystemError::AlreadyExists { plugin_id: plugin.id });
        }
        debug!("Loaded manifest plugin '{}' from {}", plugin.id, path.display());
        Ok(Arc::new(plugin))
    }

    async fn unload(&self, plugin_id: &str) -> Result<()> {
        if self.loaded.lock().await.remove(plugin_id) {
            Ok(())
        } else {
            Err(PluginSystemError::not_found(plugin_id))
        }
    }

    fn supported_extensions(&self) -> Vec<String> {
        vec![MANIFEST_SUFFIX.trim_start_matches('.').to_string()]
    }
}
