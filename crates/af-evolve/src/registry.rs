use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// CodeUnit
// ---------------------------------------------------------------------------

/// A named, replaceable capability: a dot-separated module path plus the name
/// of the callable unit inside it.
///
/// The module path maps onto a source file under the project root, e.g.
/// `tools.text_utils` → `tools/text_utils.py`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeUnit {
    pub module_path: String,
    pub unit_name: String,
}

impl CodeUnit {
    pub fn new(module_path: impl Into<String>, unit_name: impl Into<String>) -> Self {
        Self {
            module_path: module_path.into(),
            unit_name: unit_name.into(),
        }
    }

    /// The unit's source file path relative to the project root.
    pub fn relative_source_path(&self, source_ext: &str) -> PathBuf {
        let mut path: PathBuf = self.module_path.split('.').collect();
        path.set_extension(source_ext);
        path
    }
}

impl fmt::Display for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module_path, self.unit_name)
    }
}

// ---------------------------------------------------------------------------
// CapabilityRegistry
// ---------------------------------------------------------------------------

/// A registered capability: the code unit backing it plus a human-readable
/// description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub unit: CodeUnit,
    pub description: String,
}

/// Maps stable capability names to code units.
///
/// Re-registering a name replaces the previous entry; this is the stand-in
/// for hot-reloading a modified unit into the running system.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, Capability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a capability under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        unit: CodeUnit,
        description: impl Into<String>,
    ) {
        let name = name.into();
        let replaced = self
            .entries
            .insert(
                name.clone(),
                Capability {
                    unit,
                    description: description.into(),
                },
            )
            .is_some();
        if replaced {
            info!(capability = %name, "capability re-registered");
        } else {
            debug!(capability = %name, "capability registered");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.entries.get(name)
    }

    /// Update the description of an existing capability. Returns `false` when
    /// the name is unknown.
    pub fn update_description(&mut self, name: &str, description: impl Into<String>) -> bool {
        match self.entries.get_mut(name) {
            Some(capability) => {
                capability.description = description.into();
                info!(capability = %name, "capability description updated");
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Capability> {
        self.entries.remove(name)
    }

    /// All capabilities, sorted by name.
    pub fn list(&self) -> Vec<(&str, &Capability)> {
        let mut entries: Vec<(&str, &Capability)> = self
            .entries
            .iter()
            .map(|(name, cap)| (name.as_str(), cap))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_path_maps_to_source_file() {
        let unit = CodeUnit::new("tools.text_utils", "word_count");
        assert_eq!(
            unit.relative_source_path("py"),
            PathBuf::from("tools/text_utils.py")
        );
    }

    #[test]
    fn single_segment_module_path() {
        let unit = CodeUnit::new("helpers", "greet");
        assert_eq!(unit.relative_source_path("py"), PathBuf::from("helpers.py"));
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = CapabilityRegistry::new();
        registry.register(
            "word_count",
            CodeUnit::new("tools.text_utils", "word_count"),
            "Counts words in a string.",
        );
        let cap = registry.get("word_count").expect("registered");
        assert_eq!(cap.unit.unit_name, "word_count");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn reregister_replaces_entry() {
        let mut registry = CapabilityRegistry::new();
        registry.register("tool", CodeUnit::new("a.b", "f"), "v1");
        registry.register("tool", CodeUnit::new("a.b", "f"), "v2");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("tool").unwrap().description, "v2");
    }

    #[test]
    fn update_description_unknown_name() {
        let mut registry = CapabilityRegistry::new();
        assert!(!registry.update_description("missing", "whatever"));
    }

    #[test]
    fn list_is_sorted() {
        let mut registry = CapabilityRegistry::new();
        registry.register("zeta", CodeUnit::new("z", "z"), "");
        registry.register("alpha", CodeUnit::new("a", "a"), "");
        let names: Vec<&str> = registry.list().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
