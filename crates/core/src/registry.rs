//! Name/version → checkout directory index.
//!
//! The loop never touches the filesystem layout directly; session
//! construction receives a [`Registry`] so tests can hand in a
//! [`MemoryRegistry`].

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RegistryError;

/// Versions of one agent or tool, in registration order.
pub type Versions = IndexMap<String, PathBuf>;

/// Serialized form of the registry index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryIndex {
    #[serde(default)]
    pub tools: IndexMap<String, Versions>,
    #[serde(default)]
    pub agents: IndexMap<String, Versions>,
}

impl RegistryIndex {
    fn lookup(entries: &IndexMap<String, Versions>, name: &str, version: Option<&str>) -> Option<PathBuf> {
        let versions = entries.get(name)?;
        match version {
            Some(v) => versions.get(v).cloned(),
            None => versions.values().next().cloned(),
        }
    }
}

/// Lookup interface used when building an agent session.
pub trait Registry: Send + Sync {
    /// Checkout directory of a tool. Without a version the first registered one wins.
    fn tool_path(&self, name: &str, version: Option<&str>) -> Result<Option<PathBuf>, RegistryError>;

    /// Every registered tool with the directory of its first version.
    fn all_tools(&self) -> Result<Vec<(String, PathBuf)>, RegistryError>;

    /// Checkout directory of an agent (first registered version).
    fn agent_path(&self, name: &str) -> Result<Option<PathBuf>, RegistryError>;

    /// Names of all registered agents.
    fn agents(&self) -> Result<Vec<String>, RegistryError>;

    /// Full index, for listings.
    fn index(&self) -> Result<RegistryIndex, RegistryError>;
}

fn first_versions(entries: &IndexMap<String, Versions>) -> Vec<(String, PathBuf)> {
    entries
        .iter()
        .filter_map(|(name, versions)| {
            versions
                .values()
                .next()
                .map(|path| (name.clone(), path.clone()))
        })
        .collect()
}

// ── Filesystem registry ───────────────────────────────────────────

/// Registry backed by `<root>/config.json`, re-read on every lookup so that
/// concurrent CLI invocations see each other's registrations.
#[derive(Debug, Clone)]
pub struct FsRegistry {
    root: PathBuf,
}

impl FsRegistry {
    /// Open (and create if needed) the registry rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let root = root.into();
        for dir in [root.clone(), root.join("agents"), root.join("tools")] {
            std::fs::create_dir_all(&dir).map_err(|e| RegistryError::Io(dir.clone(), e))?;
        }
        let registry = Self { root };
        let index_path = registry.index_path();
        if !index_path.exists() {
            std::fs::write(&index_path, "{}").map_err(|e| RegistryError::Io(index_path.clone(), e))?;
            info!(path = %index_path.display(), "created registry index");
        }
        Ok(registry)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    fn read_index(&self) -> Result<RegistryIndex, RegistryError> {
        let path = self.index_path();
        let content = std::fs::read_to_string(&path).map_err(|e| RegistryError::Io(path.clone(), e))?;
        serde_json::from_str(&content).map_err(|e| RegistryError::Corrupt(path, e))
    }

    fn write_index(&self, index: &RegistryIndex) -> Result<(), RegistryError> {
        let path = self.index_path();
        let json = serde_json::to_string_pretty(index).map_err(|e| RegistryError::Corrupt(path.clone(), e))?;
        std::fs::write(&path, json).map_err(|e| RegistryError::Io(path, e))
    }

    pub fn register_tool(&self, name: &str, version: &str, dir: &Path) -> Result<(), RegistryError> {
        let mut index = self.read_index()?;
        index
            .tools
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), dir.to_path_buf());
        debug!(tool = name, version, "registered tool");
        self.write_index(&index)
    }

    pub fn register_agent(&self, name: &str, version: &str, dir: &Path) -> Result<(), RegistryError> {
        let mut index = self.read_index()?;
        index
            .agents
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), dir.to_path_buf());
        debug!(agent = name, version, "registered agent");
        self.write_index(&index)
    }

    pub fn delete_tool(&self, name: &str, version: &str) -> Result<(), RegistryError> {
        let mut index = self.read_index()?;
        let removed = remove_version(&mut index.tools, name, version).ok_or_else(|| {
            RegistryError::NotRegistered {
                kind: "tool",
                name: name.to_string(),
                version: version.to_string(),
            }
        })?;
        self.write_index(&index)?;
        self.remove_checkout(&removed)
    }

    pub fn delete_agent(&self, name: &str, version: &str) -> Result<(), RegistryError> {
        let mut index = self.read_index()?;
        let removed = remove_version(&mut index.agents, name, version).ok_or_else(|| {
            RegistryError::NotRegistered {
                kind: "agent",
                name: name.to_string(),
                version: version.to_string(),
            }
        })?;
        self.write_index(&index)?;
        self.remove_checkout(&removed)
    }

    /// Only checkouts that live under the registry root are deleted.
    fn remove_checkout(&self, dir: &Path) -> Result<(), RegistryError> {
        if dir.starts_with(&self.root) && dir.is_dir() {
            std::fs::remove_dir_all(dir).map_err(|e| RegistryError::Io(dir.to_path_buf(), e))?;
            info!(path = %dir.display(), "removed checkout");
        }
        Ok(())
    }
}

fn remove_version(entries: &mut IndexMap<String, Versions>, name: &str, version: &str) -> Option<PathBuf> {
    let versions = entries.get_mut(name)?;
    let removed = versions.shift_remove(version)?;
    if versions.is_empty() {
        entries.shift_remove(name);
    }
    Some(removed)
}

impl Registry for FsRegistry {
    fn tool_path(&self, name: &str, version: Option<&str>) -> Result<Option<PathBuf>, RegistryError> {
        Ok(RegistryIndex::lookup(&self.read_index()?.tools, name, version))
    }

    fn all_tools(&self) -> Result<Vec<(String, PathBuf)>, RegistryError> {
        Ok(first_versions(&self.read_index()?.tools))
    }

    fn agent_path(&self, name: &str) -> Result<Option<PathBuf>, RegistryError> {
        Ok(RegistryIndex::lookup(&self.read_index()?.agents, name, None))
    }

    fn agents(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.read_index()?.agents.keys().cloned().collect())
    }

    fn index(&self) -> Result<RegistryIndex, RegistryError> {
        self.read_index()
    }
}

// ── In-memory registry ────────────────────────────────────────────

/// Registry held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    index: RwLock<RegistryIndex>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(self, name: &str, version: &str, dir: impl Into<PathBuf>) -> Self {
        self.insert(|index| &mut index.tools, name, version, dir.into());
        self
    }

    pub fn with_agent(self, name: &str, version: &str, dir: impl Into<PathBuf>) -> Self {
        self.insert(|index| &mut index.agents, name, version, dir.into());
        self
    }

    fn insert(
        &self,
        table: impl FnOnce(&mut RegistryIndex) -> &mut IndexMap<String, Versions>,
        name: &str,
        version: &str,
        dir: PathBuf,
    ) {
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        table(&mut index)
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), dir);
    }

    fn snapshot(&self) -> RegistryIndex {
        self.index.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Registry for MemoryRegistry {
    fn tool_path(&self, name: &str, version: Option<&str>) -> Result<Option<PathBuf>, RegistryError> {
        Ok(RegistryIndex::lookup(&self.snapshot().tools, name, version))
    }

    fn all_tools(&self) -> Result<Vec<(String, PathBuf)>, RegistryError> {
        Ok(first_versions(&self.snapshot().tools))
    }

    fn agent_path(&self, name: &str) -> Result<Option<PathBuf>, RegistryError> {
        Ok(RegistryIndex::lookup(&self.snapshot().agents, name, None))
    }

    fn agents(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.snapshot().agents.keys().cloned().collect())
    }

    fn index(&self) -> Result<RegistryIndex, RegistryError> {
        Ok(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("home");
        let registry = FsRegistry::open(&root).unwrap();
        assert!(root.join("agents").is_dir());
        assert!(root.join("tools").is_dir());
        assert_eq!(std::fs::read_to_string(root.join("config.json")).unwrap(), "{}");
        assert!(registry.agents().unwrap().is_empty());
    }

    #[test]
    fn test_register_and_lookup_versions() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FsRegistry::open(dir.path()).unwrap();
        registry.register_tool("weather", "v2", Path::new("/src/weather-v2")).unwrap();
        registry.register_tool("weather", "v1", Path::new("/src/weather-v1")).unwrap();

        // Unversioned lookups use the first registered version, not the lowest.
        assert_eq!(
            registry.tool_path("weather", None).unwrap(),
            Some(PathBuf::from("/src/weather-v2"))
        );
        assert_eq!(
            registry.tool_path("weather", Some("v1")).unwrap(),
            Some(PathBuf::from("/src/weather-v1"))
        );
        assert_eq!(registry.tool_path("weather", Some("v9")).unwrap(), None);
        assert_eq!(registry.tool_path("ghost", None).unwrap(), None);
        assert_eq!(registry.all_tools().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_removes_checkout_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FsRegistry::open(dir.path()).unwrap();
        let checkout = dir.path().join("tools").join("echo");
        std::fs::create_dir_all(&checkout).unwrap();
        registry.register_tool("echo", "main", &checkout).unwrap();

        registry.delete_tool("echo", "main").unwrap();
        assert!(!checkout.exists());
        assert!(registry.all_tools().unwrap().is_empty());

        let err = registry.delete_tool("echo", "main").unwrap_err();
        assert!(matches!(err, RegistryError::NotRegistered { .. }));
    }

    #[test]
    fn test_corrupt_index() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FsRegistry::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("config.json"), "not json").unwrap();
        assert!(matches!(
            registry.agents().unwrap_err(),
            RegistryError::Corrupt(..)
        ));
    }

    #[test]
    fn test_memory_registry() {
        let registry = MemoryRegistry::new()
            .with_tool("echo_tool", "main", "/tmp/echo")
            .with_agent("helper", "local", "/tmp/helper");
        assert_eq!(
            registry.tool_path("echo_tool", None).unwrap(),
            Some(PathBuf::from("/tmp/echo"))
        );
        assert_eq!(registry.agents().unwrap(), vec!["helper".to_string()]);
        assert_eq!(
            registry.agent_path("helper").unwrap(),
            Some(PathBuf::from("/tmp/helper"))
        );
    }
}
