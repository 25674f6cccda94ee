//! The module graph built by a pipeline run and consumed by the emitter.
//!
//! Every input reached from an entry point becomes one [`ModuleRecord`]. A
//! record keeps the linked registry form of its output, its specifier to
//! module-id map and, for production source maps, the original source text.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::link::LinkedModule;
use crate::transforms::{asset_url_expr, hashed_asset_name, js_string, EmittedAsset};

/// Where an import specifier points once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepTarget {
    Module(String),
    /// Resolved to a capability the target environment lacks; `require`
    /// yields an empty object
    Unavailable,
}

/// One edge out of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub target: DepTarget,
    /// Only reached through `import()`
    pub dynamic: bool,
}

/// What a module record holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleBody {
    /// Script in registry form
    Linked(LinkedModule),
    /// A module whose transform or resolution failed; it throws when evaluated
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub id: String,
    pub path: PathBuf,
    pub body: ModuleBody,
    /// Specifier to dependency, keyed by the specifier text in the source
    pub deps: BTreeMap<String, Dependency>,
    /// Original source, when it was text
    pub source: Option<String>,
}

impl ModuleRecord {
    pub fn linked(id: impl Into<String>, path: impl Into<PathBuf>, linked: LinkedModule) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            body: ModuleBody::Linked(linked),
            deps: BTreeMap::new(),
            source: None,
        }
    }

    pub fn failed(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            body: ModuleBody::Failed { message: message.into() },
            deps: BTreeMap::new(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.source = source;
        self
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.body, ModuleBody::Failed { .. })
    }
}

/// How one entry's modules split across its artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Modules statically reachable from the entry
    pub primary: BTreeSet<String>,
    /// Modules reachable only through a dynamic import
    pub secondary: BTreeSet<String>,
}

/// All modules and assets of one run.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    modules: BTreeMap<String, ModuleRecord>,
    /// Entry name to module id
    entries: BTreeMap<String, String>,
    /// Files to write next to the bundle, by name
    assets: BTreeMap<String, Vec<u8>>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, name: impl Into<String>, module_id: impl Into<String>) {
        self.entries.insert(name.into(), module_id.into());
    }

    pub fn insert(&mut self, record: ModuleRecord) {
        self.modules.insert(record.id.clone(), record);
    }

    /// Register an emitted file. The same name twice keeps the first.
    pub fn add_asset(&mut self, asset: EmittedAsset) {
        self.assets.entry(asset.name).or_insert(asset.bytes);
    }

    pub fn get(&self, id: &str) -> Option<&ModuleRecord> {
        self.modules.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn assets(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.assets
    }

    /// Split the modules reachable from `entry_id` into the primary artifact
    /// and the secondary chunk.
    pub fn plan(&self, entry_id: &str) -> ChunkPlan {
        let primary = self.closure([entry_id.to_string()], false);

        let dynamic_roots: Vec<String> = primary
            .iter()
            .filter_map(|id| self.modules.get(id))
            .flat_map(|record| record.deps.values())
            .filter(|dep| dep.dynamic)
            .filter_map(|dep| match &dep.target {
                DepTarget::Module(id) => Some(id.clone()),
                DepTarget::Unavailable => None,
            })
            .collect();

        let secondary = self
            .closure(dynamic_roots, true)
            .into_iter()
            .filter(|id| !primary.contains(id))
            .collect();

        ChunkPlan { primary, secondary }
    }

    /// Module ids reachable from `roots`, following dynamic edges only when asked.
    fn closure(
        &self,
        roots: impl IntoIterator<Item = String>,
        follow_dynamic: bool,
    ) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<String> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(record) = self.modules.get(&id) else { continue };
            for dep in record.deps.values() {
                if dep.dynamic && !follow_dynamic {
                    continue;
                }
                if let DepTarget::Module(target) = &dep.target {
                    if !seen.contains(target) {
                        stack.push(target.clone());
                    }
                }
            }
        }
        seen
    }
}

/// ES module source for a JSON document linked without a stage.
pub fn json_module_source(text: &str) -> Result<String, String> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))?;
    Ok(format!("export default {};\n", value))
}

/// ES module source for an opaque file, plus the asset holding its bytes.
pub fn opaque_module_source(file_name: &str, bytes: Vec<u8>) -> (String, EmittedAsset) {
    let name = hashed_asset_name(file_name, &bytes);
    let source = format!("export default {};\n", asset_url_expr(&name));
    (source, EmittedAsset { name, bytes })
}

/// Body of a failed module's stub.
pub fn failed_stub(id: &str, message: &str) -> String {
    format!("throw new Error({});", js_string(&format!("{}: {}", id, message)))
}
