//! Declared plugin metadata: identity, version, capabilities, dependencies.
use std::fmt;

use bitflags::bitflags;
use semver::Version;

use crate::plugin_system::traits::PluginPriority;
use crate::plugin_system::version::VersionRange;

bitflags! {
    /// Capabilities a plugin declares about itself.
    ///
    /// Checked by value; the runtime never downcasts instances to discover them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PluginCapabilities: u32 {
        const HOT_RELOAD = 1 << 0;
        const STATE_TRANSFER = 1 << 1;
        const CONFIGURABLE = 1 << 2;
        const COMMANDS = 1 << 3;
        const BACKGROUND = 1 << 4;
        const THREAD_SAFE = 1 << 5;
        const NETWORK = 1 << 6;
        const FILESYSTEM = 1 << 7;
    }
}

impl PluginCapabilities {
    /// Parses capability names as written in manifests (`"hot_reload"`,
    /// `"STATE_TRANSFER"`). Returns the unknown name on failure.
    pub fn from_names<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut caps = PluginCapabilities::empty();
        for name in names {
            let name = name.as_ref();
            let flag = PluginCapabilities::from_name(&name.trim().to_uppercase())
                .ok_or_else(|| name.to_string())?;
            caps |= flag;
        }
        Ok(caps)
    }
}

/// A declared dependency on another plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDependency {
    pub plugin_id: String,
    /// Acceptable versions of the dependency; `None` accepts any version.
    pub version_range: Option<VersionRange>,
}

impl PluginDependency {
    /// Depend on any version of `plugin_id`.
    pub fn any(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            version_range: None,
        }
    }

    pub fn with_range(plugin_id: impl Into<String>, range: VersionRange) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            version_range: Some(range),
        }
    }

    /// True when `version` satisfies the declared range (or no range was declared).
    pub fn accepts(&self, version: &Version) -> bool {
        self.version_range
            .as_ref()
            .is_none_or(|range| range.includes(version))
    }
}

impl fmt::Display for PluginDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version_range {
            Some(range) => write!(f, "{} ({})", self.plugin_id, range),
            None => write!(f, "{}", self.plugin_id),
        }
    }
}

/// Metadata a plugin declares about itself.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginMetadata {
    pub name: String,
    pub version: Version,
    pub author: String,
    pub description: String,
    pub license: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub capabilities: PluginCapabilities,
    pub dependencies: Vec<PluginDependency>,
    pub priority: PluginPriority,
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            author: String::new(),
            description: String::new(),
            license: None,
            category: None,
            tags: Vec::new(),
            capabilities: PluginCapabilities::empty(),
            dependencies: Vec::new(),
            priority: PluginPriority::default(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependency(mut self, dependency: PluginDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_priority(mut self, priority: PluginPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_capabilities(mut self, capabilities: PluginCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Declared dependency ids, in declaration order (duplicates preserved).
    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.plugin_id.as_str())
    }
}
