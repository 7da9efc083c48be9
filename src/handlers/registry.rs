//! Per-system handler registry.
//!
//! [`HandlerRegistry::get_handler`] hands out one shared handler per
//! `(system, container type)` for as long as the system's merged configuration keeps
//! the same fingerprint. When the fingerprint changes, every handler cached for the
//! system is released (sequentially, stopping at the first failure) and rebuilt on
//! demand.
//!
//! Handler settings are the type's declared `specific` block, with the well-known
//! deployment settings filled in from the system-level configuration and then from
//! the kernel configuration wherever the block leaves them unset.

use anyhow::Result;
use futures::future::try_join_all;
use std::path::Path;
use std::sync::Arc;

use super::{ContainerHandler, HandlerFactories, builtin};
use crate::cache::{HandlerCache, SharedHandler, SystemHandlers};
use crate::config::{ConfigLoader, DeployConfig, is_set};
use crate::core::DeployError;
use crate::topology::{Settings, System};
use crate::utils::resolve_path;

/// Settings copied into every handler's `specific` block unless already set there.
pub const HANDLER_DEFAULT_KEYS: &[&str] = &[
    "root",
    "systemsRoot",
    "buildRoot",
    "targetRoot",
    "mode",
    "region",
    "sshKeyPath",
    "identityFile",
    "accessKeyId",
    "secretAccessKey",
    "defaultSubnetId",
    "defaultVpcId",
];

/// Builds and caches container handlers per system.
pub struct HandlerRegistry {
    config_loader: Arc<dyn ConfigLoader>,
    factories: HandlerFactories,
    cache: Arc<HandlerCache>,
}

impl HandlerRegistry {
    /// Creates a registry with its own, empty cache.
    pub fn new(config_loader: Arc<dyn ConfigLoader>, factories: HandlerFactories) -> Self {
        Self::with_cache(config_loader, factories, Arc::new(HandlerCache::new()))
    }

    /// Creates a registry backed by `cache`, which may be shared or pre-populated.
    pub fn with_cache(
        config_loader: Arc<dyn ConfigLoader>,
        factories: HandlerFactories,
        cache: Arc<HandlerCache>,
    ) -> Self {
        Self {
            config_loader,
            factories,
            cache,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &HandlerCache {
        &self.cache
    }

    #[must_use]
    pub fn factories(&self) -> &HandlerFactories {
        &self.factories
    }

    /// Returns the handler of `container_type` for `system`, building it on first use.
    ///
    /// Loads the system's merged configuration and compares its fingerprint with the
    /// one the cached handlers were built from. On a mismatch the cached handlers are
    /// released before anything is built. Repeated calls with an unchanged
    /// configuration return the same `Arc`.
    ///
    /// # Errors
    ///
    /// - configuration loading errors, verbatim
    /// - [`DeployError::ReleaseError`] when releasing a stale handler fails; the
    ///   remaining stale handlers are not released
    /// - [`DeployError::UnknownTypeError`] and [`DeployError::FactoryNotRegistered`]
    ///   from building the handler
    /// - errors returned by the factory, verbatim
    ///
    /// Overlapping calls for the same system are not serialized. Callers that may
    /// issue them concurrently must serialize per system id.
    pub async fn get_handler(
        &self,
        system: &System,
        container_type: &str,
    ) -> Result<Arc<dyn ContainerHandler>> {
        let config = self.config_loader.load(system).await?;
        let fingerprint = config.fingerprint()?;

        if let Some(stale) = self.cache.take_if_stale(&system.id, &fingerprint) {
            tracing::warn!(
                system = %system.id,
                handlers = stale.handlers.len(),
                "Configuration changed, releasing cached handlers"
            );
            release_handlers(&system.id, stale).await?;
        }

        self.cache.ensure(&system.id, &fingerprint);
        if let Some(handler) = self.cache.handler(&system.id, container_type) {
            tracing::debug!(system = %system.id, module = container_type, "Handler cache hit");
            return Ok(handler);
        }

        tracing::debug!(system = %system.id, module = container_type, "Handler cache miss");
        let handler = self.build_handler(&config, container_type)?;
        Ok(self.cache.insert_handler(&system.id, &fingerprint, container_type, handler))
    }

    /// Evicts every handler cached for `system_id` and releases them in type order.
    ///
    /// Returns `false` when nothing was cached.
    pub async fn release_system(&self, system_id: &str) -> Result<bool> {
        match self.cache.evict(system_id) {
            Some(entry) => {
                release_handlers(system_id, entry).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Builds a fresh, uncached handler of `container_type` from `config`.
    ///
    /// A type declared under `containers` wins over a built-in one of the same name.
    pub fn build_handler(
        &self,
        config: &DeployConfig,
        container_type: &str,
    ) -> Result<SharedHandler> {
        let (require, mut specific) = if let Some(declared) = config.declared(container_type) {
            (declared.require.clone(), declared.specific.clone())
        } else if let Some(builtin) = builtin(container_type) {
            (builtin.require.to_string(), Settings::new())
        } else {
            return Err(DeployError::UnknownTypeError {
                container_type: container_type.to_string(),
            }
            .into());
        };

        apply_defaults(config, &mut specific);

        let factory = self.factories.get(&require).ok_or_else(|| DeployError::FactoryNotRegistered {
            module: require.clone(),
            container_type: container_type.to_string(),
        })?;

        let span = tracing::info_span!("container", module = %container_type);
        let _entered = span.enter();
        tracing::debug!(require = %require, "Building handler");
        factory(specific, span.clone())
    }

    /// Starts the background service of every known container type, concurrently.
    ///
    /// Each type gets a fresh handler that is not cached. Services run with the
    /// normalized parent of `kernel.systemsRoot` as their root.
    ///
    /// # Errors
    ///
    /// - [`DeployError::ConfigError`] when `kernel.systemsRoot` is unset
    /// - any error from building a handler
    /// - [`DeployError::ServiceError`] wrapping the first failing service
    pub async fn start_all_services(&self, config: &DeployConfig) -> Result<()> {
        let systems_root = config.kernel.systems_root().ok_or_else(|| DeployError::ConfigError {
            message: "kernel.systemsRoot is not set".to_string(),
        })?;
        let root = resolve_path(&Path::new(systems_root).join(".."))?;

        let starts = list_types(config).into_iter().map(|container_type| {
            let root = root.as_path();
            async move {
                let handler = self.build_handler(config, &container_type)?;
                tracing::info!(module = %container_type, "Starting service");
                handler
                    .service(root)
                    .await
                    .map_err(|e| e.context(DeployError::ServiceError { container_type }))
            }
        });

        try_join_all(starts).await?;
        Ok(())
    }
}

/// Every container type `config` can resolve: declared types first, in declaration
/// order, then the built-ins not already declared.
#[must_use]
pub fn list_types(config: &DeployConfig) -> Vec<String> {
    let declared = config.containers.iter().map(|def| def.container_type.as_str());
    let builtins = super::BUILTIN_CONTAINER_TYPES.iter().map(|b| b.container_type);

    let mut types: Vec<String> = Vec::new();
    for container_type in declared.chain(builtins) {
        if !types.iter().any(|t| t == container_type) {
            types.push(container_type.to_string());
        }
    }
    types
}

fn apply_defaults(config: &DeployConfig, specific: &mut Settings) {
    for &key in HANDLER_DEFAULT_KEYS {
        if specific.get(key).is_some_and(is_set) {
            continue;
        }
        let fallback = config
            .setting(key)
            .filter(|value| is_set(value))
            .or_else(|| config.kernel.setting(key).filter(|value| is_set(value)));
        if let Some(value) = fallback {
            specific.insert(key.to_string(), value.clone());
        }
    }
}

async fn release_handlers(system_id: &str, entry: SystemHandlers) -> Result<()> {
    for (container_type, handler) in entry.handlers {
        tracing::debug!(system = system_id, module = %container_type, "Releasing handler");
        handler.release().await.map_err(|e| {
            e.context(DeployError::ReleaseError {
                system_id: system_id.to_string(),
                container_type: container_type.clone(),
            })
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContainerTypeDefinition, StaticConfigLoader};
    use crate::test_utils::{HandlerProbe, MutableConfigLoader, kernel_config, shop_system};
    use serde_json::json;
    use std::path::PathBuf;

    fn registry(loader: Arc<dyn ConfigLoader>, probe: &Arc<HandlerProbe>) -> HandlerRegistry {
        HandlerRegistry::new(loader, probe.factories(&[("kafka-container", "kafka")]))
    }

    #[tokio::test]
    async fn test_get_handler_returns_cached_instance() {
        let probe = HandlerProbe::new();
        let loader = Arc::new(StaticConfigLoader::new(kernel_config("/srv/systems")));
        let registry = registry(loader, &probe);
        let system = shop_system();

        let first = registry.get_handler(&system, "docker").await.unwrap();
        let second = registry.get_handler(&system, "docker").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.container_type(), "docker");
        assert_eq!(probe.builds(), 1);
        assert!(probe.releases().is_empty());
    }

    #[tokio::test]
    async fn test_handlers_are_cached_per_system() {
        let probe = HandlerProbe::new();
        let registry = registry(Arc::new(StaticConfigLoader::default()), &probe);
        let shop = shop_system();
        let mut other = shop_system();
        other.id = "blog".to_string();

        let a = registry.get_handler(&shop, "process").await.unwrap();
        let b = registry.get_handler(&other, "process").await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.cache().system_ids(), vec!["blog", "shop"]);
    }

    #[tokio::test]
    async fn test_config_change_releases_stale_handlers_once() {
        let probe = HandlerProbe::new();
        let loader = Arc::new(MutableConfigLoader::new(kernel_config("/srv/systems")));
        let registry = registry(loader.clone(), &probe);
        let system = shop_system();

        let before = registry.get_handler(&system, "docker").await.unwrap();
        registry.get_handler(&system, "process").await.unwrap();

        let mut changed = kernel_config("/srv/systems");
        changed.insert("region", "eu-west-1");
        loader.set(changed);

        let after = registry.get_handler(&system, "docker").await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(probe.releases(), vec!["docker", "process"]);
        // stale handlers are gone before the replacement is built
        assert_eq!(
            probe.events(),
            vec!["build docker", "build process", "release docker", "release process", "build docker"]
        );
        assert_eq!(registry.cache().cached_types(&system.id), vec!["docker"]);

        // unchanged again: no further releases
        registry.get_handler(&system, "docker").await.unwrap();
        assert_eq!(probe.releases().len(), 2);
        assert_eq!(loader.loads(), 4);
    }

    #[tokio::test]
    async fn test_logger_changes_do_not_evict() {
        let probe = HandlerProbe::new();
        let loader = Arc::new(MutableConfigLoader::new(kernel_config("/srv/systems")));
        let registry = registry(loader.clone(), &probe);
        let system = shop_system();

        let before = registry.get_handler(&system, "docker").await.unwrap();
        let mut changed = kernel_config("/srv/systems");
        changed.insert("logger", json!({ "level": "trace" }));
        loader.set(changed);

        let after = registry.get_handler(&system, "docker").await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(probe.releases().is_empty());
    }

    #[tokio::test]
    async fn test_release_failure_aborts_get_handler() {
        let probe = HandlerProbe::new();
        let loader = Arc::new(MutableConfigLoader::new(kernel_config("/srv/systems")));
        let registry = registry(loader.clone(), &probe);
        let system = shop_system();

        registry.get_handler(&system, "docker").await.unwrap();
        probe.fail_releases();
        loader.set(kernel_config("/elsewhere"));

        let err = registry.get_handler(&system, "docker").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<DeployError>(),
            Some(&DeployError::ReleaseError {
                system_id: "shop".to_string(),
                container_type: "docker".to_string(),
            })
        );
        assert_eq!(err.to_string(), "Failed to release 'docker' handler for system 'shop'");
        assert!(format!("{err:#}").contains("docker refused to release"));
        assert_eq!(probe.builds(), 1);
    }

    #[tokio::test]
    async fn test_unknown_type() {
        let probe = HandlerProbe::new();
        let registry = registry(Arc::new(StaticConfigLoader::default()), &probe);

        let err = registry.get_handler(&shop_system(), "quantum").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<DeployError>(),
            Some(&DeployError::UnknownTypeError {
                container_type: "quantum".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_missing_factory_is_reported() {
        let registry = HandlerRegistry::new(
            Arc::new(StaticConfigLoader::default()),
            HandlerFactories::with_builtins(),
        );
        let system = shop_system();

        assert!(registry.get_handler(&system, "blank-container").await.is_ok());
        let err = registry.get_handler(&system, "docker").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<DeployError>(),
            Some(&DeployError::FactoryNotRegistered {
                module: "docker-container".to_string(),
                container_type: "docker".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_declared_type_wins_and_receives_defaults() {
        let probe = HandlerProbe::new();
        let mut config = kernel_config("/srv/systems");
        config.kernel.insert("region", "us-east-1");
        config.kernel.insert("mode", "live");
        config.insert("region", "eu-west-1");
        config.insert("root", "");
        config.kernel.insert("root", "/srv");

        let mut kafka = ContainerTypeDefinition::new("kafka", "kafka-container");
        kafka.specific.insert("brokers".into(), json!(3));
        kafka.specific.insert("mode".into(), json!("preview"));
        kafka.specific.insert("sshKeyPath".into(), json!(""));
        config.containers.push(kafka);
        let mut docker = ContainerTypeDefinition::new("docker", "kafka-container");
        docker.specific.insert("custom".into(), json!(true));
        config.containers.push(docker);

        let registry = registry(Arc::new(StaticConfigLoader::new(config)), &probe);
        let system = shop_system();

        registry.get_handler(&system, "kafka").await.unwrap();
        let settings = probe.settings_for("kafka").unwrap();
        assert_eq!(settings["brokers"], json!(3));
        assert_eq!(settings["mode"], json!("preview"));
        assert_eq!(settings["region"], json!("eu-west-1"));
        assert_eq!(settings["root"], json!("/srv"));
        assert_eq!(settings["systemsRoot"], json!("/srv/systems"));
        assert_eq!(settings["sshKeyPath"], json!(""));
        assert!(settings.get("accessKeyId").is_none());

        // "docker" is declared, so the declaration overrides the built-in module
        registry.get_handler(&system, "docker").await.unwrap();
        assert_eq!(probe.settings_for("kafka").unwrap()["custom"], json!(true));
    }

    #[test]
    fn test_list_types_declared_first_without_duplicates() {
        let mut config = DeployConfig::default();
        assert_eq!(
            list_types(&config),
            vec!["blank-container", "docker", "process", "aws-elb", "aws-sg", "aws-ami"]
        );

        config.containers.push(ContainerTypeDefinition::new("kafka", "kafka-container"));
        config.containers.push(ContainerTypeDefinition::new("docker", "docker-container"));
        assert_eq!(
            list_types(&config),
            vec!["kafka", "docker", "blank-container", "process", "aws-elb", "aws-sg", "aws-ami"]
        );
    }

    #[tokio::test]
    async fn test_start_all_services() {
        let probe = HandlerProbe::new();
        let registry = registry(Arc::new(StaticConfigLoader::default()), &probe);
        let mut config = kernel_config("/srv/fleet/systems/");
        config.containers.push(ContainerTypeDefinition::new("kafka", "kafka-container"));

        registry.start_all_services(&config).await.unwrap();

        let mut started: Vec<String> = probe.services().into_iter().map(|(t, _)| t).collect();
        started.sort();
        assert_eq!(
            started,
            vec!["aws-ami", "aws-elb", "aws-sg", "blank-container", "docker", "kafka", "process"]
        );
        assert!(probe.services().iter().all(|(_, root)| root == &PathBuf::from("/srv/fleet")));
        // services run on fresh handlers, nothing is cached
        assert!(registry.cache().is_empty());
    }

    #[tokio::test]
    async fn test_start_all_services_propagates_failure() {
        let probe = HandlerProbe::new();
        probe.fail_service_of("process");
        let registry = registry(Arc::new(StaticConfigLoader::default()), &probe);

        let err = registry.start_all_services(&kernel_config("/srv/systems")).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<DeployError>(),
            Some(&DeployError::ServiceError {
                container_type: "process".to_string(),
            })
        );
        assert!(format!("{err:#}").contains("process service crashed"));
    }

    #[tokio::test]
    async fn test_start_all_services_requires_systems_root() {
        let probe = HandlerProbe::new();
        let registry = registry(Arc::new(StaticConfigLoader::default()), &probe);

        let err = registry.start_all_services(&DeployConfig::default()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<DeployError>(), Some(DeployError::ConfigError { .. })));
        assert!(probe.services().is_empty());
    }

    #[tokio::test]
    async fn test_release_system_evicts_and_releases() {
        let probe = HandlerProbe::new();
        let registry = registry(Arc::new(StaticConfigLoader::default()), &probe);
        let system = shop_system();

        registry.get_handler(&system, "aws-sg").await.unwrap();
        assert!(registry.release_system("shop").await.unwrap());
        assert!(!registry.release_system("shop").await.unwrap());
        assert_eq!(probe.releases(), vec!["aws-sg"]);
        assert!(registry.cache().is_empty());
    }
}
