//! Handler caching driven by on-disk configuration.

use anyhow::Result;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use fleetwright::config::DeployConfig;
use fleetwright::handlers::HandlerRegistry;
use fleetwright::test_utils::{HandlerProbe, shop_system};
use fleetwright::topology::System;

use crate::common::{CONFIG_FILE, FileConfigLoader};

const BASE_CONFIG: &str = r#"
region = "eu-west-1"

[kernel]
systemsRoot = "/srv/fleet/systems"
mode = "preview"

[[containers]]
type = "kafka"
require = "kafka-container"
specific = { brokers = 3 }
"#;

struct Fixture {
    _temp: TempDir,
    system: System,
    probe: Arc<HandlerProbe>,
    registry: HandlerRegistry,
}

impl Fixture {
    fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        std::fs::write(temp.path().join(CONFIG_FILE), BASE_CONFIG)?;

        let mut system = shop_system();
        system.repo_path = Some(temp.path().display().to_string());

        let probe = HandlerProbe::new();
        let registry =
            HandlerRegistry::new(Arc::new(FileConfigLoader), probe.factories(&[("kafka-container", "kafka")]));

        Ok(Self {
            _temp: temp,
            system,
            probe,
            registry,
        })
    }

    fn config_path(&self) -> PathBuf {
        Path::new(self.system.repo_path.as_deref().unwrap_or_default()).join(CONFIG_FILE)
    }

    fn write_config(&self, content: &str) -> Result<()> {
        std::fs::write(self.config_path(), content)?;
        Ok(())
    }
}

#[tokio::test]
async fn test_handlers_survive_until_config_changes() -> Result<()> {
    let fixture = Fixture::new()?;
    let registry = &fixture.registry;

    let kafka = registry.get_handler(&fixture.system, "kafka").await?;
    let docker = registry.get_handler(&fixture.system, "docker").await?;
    assert!(Arc::ptr_eq(&kafka, &registry.get_handler(&fixture.system, "kafka").await?));
    assert_eq!(fixture.probe.builds(), 2);

    let settings = fixture.probe.settings_for("kafka").unwrap();
    assert_eq!(settings["brokers"], json!(3));
    assert_eq!(settings["region"], json!("eu-west-1"));
    assert_eq!(settings["mode"], json!("preview"));
    assert_eq!(settings["systemsRoot"], json!("/srv/fleet/systems"));

    fixture.write_config(&BASE_CONFIG.replace("eu-west-1", "us-east-2"))?;
    let rebuilt = registry.get_handler(&fixture.system, "docker").await?;

    assert!(!Arc::ptr_eq(&docker, &rebuilt));
    assert_eq!(fixture.probe.releases(), vec!["docker", "kafka"]);
    assert_eq!(fixture.probe.settings_for("docker").unwrap()["region"], json!("us-east-2"));
    Ok(())
}

#[tokio::test]
async fn test_logger_section_does_not_invalidate() -> Result<()> {
    let fixture = Fixture::new()?;

    let before = fixture.registry.get_handler(&fixture.system, "process").await?;
    fixture.write_config(&format!("{BASE_CONFIG}\n[logger]\nlevel = \"debug\"\n"))?;
    let after = fixture.registry.get_handler(&fixture.system, "process").await?;

    assert!(Arc::ptr_eq(&before, &after));
    assert!(fixture.probe.releases().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_malformed_config_leaves_cache_alone() -> Result<()> {
    let fixture = Fixture::new()?;

    let before = fixture.registry.get_handler(&fixture.system, "process").await?;
    fixture.write_config("region = ")?;
    assert!(fixture.registry.get_handler(&fixture.system, "process").await.is_err());

    fixture.write_config(BASE_CONFIG)?;
    let after = fixture.registry.get_handler(&fixture.system, "process").await?;
    assert!(Arc::ptr_eq(&before, &after));
    Ok(())
}

#[tokio::test]
async fn test_start_all_services_from_config_file() -> Result<()> {
    let fixture = Fixture::new()?;
    let config = DeployConfig::load_from(&fixture.config_path()).await?;

    fixture.registry.start_all_services(&config).await?;

    let services = fixture.probe.services();
    assert_eq!(services.len(), 7);
    assert!(services.iter().any(|(container_type, _)| container_type == "kafka"));
    assert!(services.iter().all(|(_, root)| root == Path::new("/srv/fleet")));
    assert!(fixture.registry.cache().is_empty());
    Ok(())
}
