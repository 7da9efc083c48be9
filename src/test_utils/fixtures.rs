//! Sample systems and configurations.

use serde_json::json;

use crate::config::DeployConfig;
use crate::topology::{ContainerDefinition, ContainerInstance, System};

/// Repository of the `api` definition in [`shop_system`].
pub const API_REPOSITORY: &str = "git@github.com:acme/shop-api.git";

/// A small system exercising every kind of definition.
///
/// Definitions, in order:
/// - `machine` (`blank-container`), no external reference
/// - `api` (`process`), git-backed by [`API_REPOSITORY`]
/// - `web` (`docker`), registry image `acme/app`
/// - `db` (`process`), no external reference
///
/// Topology: `root` (machine) contains `api-1`, `web-1`, `web-2` and `db-1`, in that
/// order.
pub fn shop_system() -> System {
    let mut system = System::new("shop");
    system.topology.name = Some("development".to_string());

    let machine = ContainerDefinition::new("machine", "blank-container");
    let mut api = ContainerDefinition::new("api", "process");
    api.specific.insert("repositoryUrl".into(), json!(API_REPOSITORY));
    let mut web = ContainerDefinition::new("web", "docker");
    web.specific.insert("name".into(), json!("acme/app"));
    let db = ContainerDefinition::new("db", "process");
    system.container_definitions = vec![machine, api, web, db];

    system.place(None, ContainerInstance::new("root", "machine"));
    for (id, definition) in [("api-1", "api"), ("web-1", "web"), ("web-2", "web"), ("db-1", "db")] {
        system.place(Some("root"), ContainerInstance::new(id, definition));
    }
    system
}

/// A system whose only external reference is the registry image `image`, placed
/// once as `web-1` under `root`.
pub fn registry_system(id: &str, image: &str) -> System {
    let mut system = System::new(id);

    let mut web = ContainerDefinition::new("web", "docker");
    web.specific.insert("name".into(), json!(image));
    system.container_definitions =
        vec![ContainerDefinition::new("machine", "blank-container"), web];

    system.place(None, ContainerInstance::new("root", "machine"));
    system.place(Some("root"), ContainerInstance::new("web-1", "web"));
    system
}

/// Configuration with only `kernel.systemsRoot` set.
pub fn kernel_config(systems_root: &str) -> DeployConfig {
    let mut config = DeployConfig::default();
    config.kernel.insert("systemsRoot", systems_root);
    config
}
