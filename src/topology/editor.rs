//! In-place identity edits on a compiled system.
//!
//! The editor never creates or destroys topology nodes. It renames a definition,
//! repoints the instances that place it, and re-keys those instances when their own
//! id changes. Each edit is planned on copies first and only applied once it is known
//! not to break the containment forest, so a rejected edit leaves the system untouched.

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;

use super::{ContainerInstance, System};
use crate::core::DeployError;

/// What a single [`TopologyEditor::rename_definition`] call changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    /// Definition id before the edit
    pub old_id: String,
    /// Definition id after the edit
    pub new_id: String,
    /// `(old instance id, new instance id)` for every repointed instance
    pub instances: Vec<(String, String)>,
}

/// Mutable view over a [`System`] that keeps its references consistent.
pub struct TopologyEditor<'a> {
    system: &'a mut System,
}

impl<'a> TopologyEditor<'a> {
    pub fn new(system: &'a mut System) -> Self {
        Self {
            system,
        }
    }

    /// Renames the definition at `index` to `new_id` and repoints its instances.
    ///
    /// `apply` may change an instance's `id` and `specific`; containment fields are
    /// owned by the editor and any change `apply` makes to them is discarded.
    ///
    /// Every instance whose `containerDefinitionId` equals the old id gets the new id,
    /// then `apply` runs on it (usually suffixing the instance's own id and stamping
    /// the resolved identity into `specific`). Instances are visited in ascending id
    /// order. When an instance id changes, its map key moves, its parent's `contains`
    /// entry is removed and the new id appended at the end, and its children are
    /// pointed at the new id.
    ///
    /// # Errors
    ///
    /// [`DeployError::TopologyError`] if `index` is out of range, a new instance id
    /// collides with another instance, or a renamed instance's parent does not exist.
    pub fn rename_definition<F>(
        &mut self,
        index: usize,
        new_id: impl Into<String>,
        mut apply: F,
    ) -> Result<Rename>
    where
        F: FnMut(&mut ContainerInstance),
    {
        let new_id = new_id.into();
        let old_id = match self.system.container_definitions.get(index) {
            Some(definition) => definition.id.clone(),
            None => {
                return Err(topology_error(format!(
                    "no container definition at position {index} in system '{}'",
                    self.system.id
                )));
            }
        };

        // Plan on copies
        let mut planned: Vec<(String, ContainerInstance)> = self
            .system
            .instances_of(&old_id)
            .map(|instance| (instance.id.clone(), instance.clone()))
            .collect();

        for (_, instance) in &mut planned {
            instance.container_definition_id.clone_from(&new_id);
            apply(instance);
        }

        self.check_plan(&planned)?;

        // Apply
        self.system.container_definitions[index].id.clone_from(&new_id);

        let mut instances = Vec::with_capacity(planned.len());
        for (previous_id, mut instance) in planned {
            let containers = &mut self.system.topology.containers;
            // Containment may have moved since planning when a definition nests its own instances
            if let Some(live) = containers.remove(&previous_id) {
                instance.contained_by = live.contained_by;
                instance.contains = live.contains;
            }

            let current_id = instance.id.clone();
            if current_id != previous_id {
                relink(containers, &previous_id, &instance);
            }
            containers.insert(current_id.clone(), instance);
            instances.push((previous_id, current_id));
        }

        Ok(Rename {
            old_id,
            new_id,
            instances,
        })
    }

    /// Checks every invariant of the topology.
    ///
    /// - map keys equal instance ids
    /// - definition ids are unique and every instance references one of them
    /// - `containedBy` and `contains` agree in both directions, each child listed once
    /// - the containment relation has no cycles
    pub fn validate(&self) -> Result<()> {
        let system = &*self.system;
        let containers = &system.topology.containers;

        let mut definition_ids = HashSet::new();
        for definition in &system.container_definitions {
            if !definition_ids.insert(definition.id.as_str()) {
                return Err(topology_error(format!(
                    "duplicate container definition id '{}'",
                    definition.id
                )));
            }
        }

        for (key, instance) in containers {
            if key != &instance.id {
                return Err(topology_error(format!(
                    "instance '{}' is stored under key '{key}'",
                    instance.id
                )));
            }

            if !definition_ids.contains(instance.container_definition_id.as_str()) {
                return Err(topology_error(format!(
                    "instance '{key}' references missing definition '{}'",
                    instance.container_definition_id
                )));
            }

            if let Some(parent_id) = &instance.contained_by {
                let Some(parent) = containers.get(parent_id) else {
                    return Err(topology_error(format!(
                        "instance '{key}' is contained by missing instance '{parent_id}'"
                    )));
                };
                let listed = parent.contains.iter().filter(|id| *id == key).count();
                if listed != 1 {
                    return Err(topology_error(format!(
                        "instance '{parent_id}' lists child '{key}' {listed} times"
                    )));
                }
            }

            for child_id in &instance.contains {
                let parent_of_child =
                    containers.get(child_id).and_then(|child| child.contained_by.as_deref());
                if parent_of_child != Some(key.as_str()) {
                    return Err(topology_error(format!(
                        "instance '{key}' lists '{child_id}' which is not contained by it"
                    )));
                }
            }
        }

        for start in containers.keys() {
            let mut current = start;
            let mut steps = 0;
            while let Some(parent) = containers.get(current).and_then(|i| i.contained_by.as_ref()) {
                steps += 1;
                if steps > containers.len() {
                    return Err(topology_error(format!(
                        "containment cycle through instance '{start}'"
                    )));
                }
                current = parent;
            }
        }

        Ok(())
    }

    fn check_plan(&self, planned: &[(String, ContainerInstance)]) -> Result<()> {
        let containers = &self.system.topology.containers;
        let mut claimed = HashSet::new();

        for (previous_id, instance) in planned {
            if !claimed.insert(instance.id.as_str()) {
                return Err(topology_error(format!(
                    "renaming would give two instances the id '{}'",
                    instance.id
                )));
            }
            if instance.id == *previous_id {
                continue;
            }
            if containers.contains_key(&instance.id) {
                return Err(topology_error(format!(
                    "renaming '{previous_id}' into '{}' collides with an existing instance",
                    instance.id
                )));
            }
            if let Some(parent_id) = &instance.contained_by
                && !containers.contains_key(parent_id)
            {
                return Err(topology_error(format!(
                    "instance '{previous_id}' is contained by missing instance '{parent_id}'"
                )));
            }
        }

        Ok(())
    }
}

/// Points the parent and the children of a re-keyed instance at its new id.
fn relink(
    containers: &mut BTreeMap<String, ContainerInstance>,
    previous_id: &str,
    instance: &ContainerInstance,
) {
    if let Some(parent) = instance.contained_by.as_ref().and_then(|id| containers.get_mut(id)) {
        parent.contains.retain(|id| id != previous_id);
        parent.contains.push(instance.id.clone());
    }

    for child_id in &instance.contains {
        if let Some(child) = containers.get_mut(child_id) {
            child.contained_by = Some(instance.id.clone());
        }
    }
}

fn topology_error(reason: String) -> anyhow::Error {
    DeployError::TopologyError {
        reason,
    }
    .into()
}
