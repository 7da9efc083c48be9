//! Compiled system model: container definitions, container instances and their
//! containment forest.
//!
//! Systems arrive from the external compiler as JSON-shaped data, so every type here
//! round-trips through `serde` with the compiler's camelCase field names. Fields the
//! resolver does not care about are kept in flattened maps and written back untouched.
//!
//! All identity-changing edits go through [`TopologyEditor`], which keeps the
//! definition references, the `containers` map keys and the parent `contains` lists
//! consistent with each other.

pub mod editor;

pub use editor::{Rename, TopologyEditor};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Free-form key/value configuration block (`specific` in definitions and instances).
pub type Settings = serde_json::Map<String, Value>;

/// Compiled systems keyed by system id, as produced by the compiler.
pub type SystemsMap = HashMap<String, System>;

/// A deployable system: its definitions and the placed instances of them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct System {
    /// System id
    pub id: String,

    /// Root of the system's source tree. Only set while identities are being resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,

    /// Placed container instances
    #[serde(default)]
    pub topology: Topology,

    /// Container definitions in declaration order
    #[serde(default)]
    pub container_definitions: Vec<ContainerDefinition>,

    /// Everything else the compiler emitted (name, namespace, ...)
    #[serde(flatten)]
    pub extra: Settings,
}

/// The containment forest of a system.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Topology {
    /// Target name (e.g. `development`), when the compiler records one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Instances keyed by their own id
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerInstance>,
}

/// Template for a deployable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerDefinition {
    /// Id, unique within the system. Gains a `$identity` suffix on resolution.
    pub id: String,

    /// Container type, e.g. `docker` or `process`
    #[serde(rename = "type")]
    pub container_type: String,

    /// Type-specific configuration (`repositoryUrl`, `checkoutDir`, `name`, `commit`, ...)
    #[serde(default)]
    pub specific: Settings,

    #[serde(flatten)]
    pub extra: Settings,
}

impl ContainerDefinition {
    /// Creates a definition with an empty `specific` block.
    pub fn new(id: impl Into<String>, container_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            container_type: container_type.into(),
            specific: Settings::new(),
            extra: Settings::new(),
        }
    }

    /// Git repository backing this definition, if any.
    #[must_use]
    pub fn repository_url(&self) -> Option<&str> {
        non_empty_str(&self.specific, "repositoryUrl")
    }

    /// Registry image name (`name` or `name:tag`), if any.
    #[must_use]
    pub fn image_name(&self) -> Option<&str> {
        non_empty_str(&self.specific, "name")
    }

    /// Explicit checkout directory under the workspace, if configured.
    #[must_use]
    pub fn checkout_dir(&self) -> Option<&str> {
        non_empty_str(&self.specific, "checkoutDir")
    }

    /// Whether this definition references an external, mutable resource.
    #[must_use]
    pub fn has_external_reference(&self) -> bool {
        self.repository_url().is_some() || self.image_name().is_some()
    }
}

/// A placed occurrence of a definition in the topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInstance {
    /// Id, equal to this instance's key in [`Topology::containers`]
    pub id: String,

    /// Id of the definition this instance places
    pub container_definition_id: String,

    /// Parent instance id; `None` for roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contained_by: Option<String>,

    /// Child instance ids
    #[serde(default)]
    pub contains: Vec<String>,

    #[serde(default)]
    pub specific: Settings,

    #[serde(flatten)]
    pub extra: Settings,
}

impl ContainerInstance {
    /// Creates a root instance of `definition_id` with no children.
    pub fn new(id: impl Into<String>, definition_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            container_definition_id: definition_id.into(),
            contained_by: None,
            contains: Vec::new(),
            specific: Settings::new(),
            extra: Settings::new(),
        }
    }
}

impl System {
    /// Creates an empty system with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Pseudo-system used only to ask the config loader for a system's configuration.
    pub fn pseudo(id: impl Into<String>, repo_path: impl Into<String>) -> Self {
        Self {
            repo_path: Some(repo_path.into()),
            ..Self::new(id)
        }
    }

    /// Looks up a definition by its current id.
    #[must_use]
    pub fn definition(&self, id: &str) -> Option<&ContainerDefinition> {
        self.container_definitions.iter().find(|def| def.id == id)
    }

    /// Instances placing the definition with the given id, in ascending instance id order.
    pub fn instances_of<'a>(
        &'a self,
        definition_id: &'a str,
    ) -> impl Iterator<Item = &'a ContainerInstance> + 'a {
        self.topology
            .containers
            .values()
            .filter(move |instance| instance.container_definition_id == definition_id)
    }

    /// Adds `child` under `parent_id` (or as a root when `None`), keeping both sides of
    /// the containment relation in sync.
    pub fn place(&mut self, parent_id: Option<&str>, mut child: ContainerInstance) {
        child.contained_by = parent_id.map(str::to_string);
        if let Some(parent) = parent_id.and_then(|id| self.topology.containers.get_mut(id)) {
            parent.contains.push(child.id.clone());
        }
        self.topology.containers.insert(child.id.clone(), child);
    }
}

fn non_empty_str<'a>(settings: &'a Settings, key: &str) -> Option<&'a str> {
    settings.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
