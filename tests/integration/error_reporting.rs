use std::sync::Arc;

use fleetwright::config::{DeployConfig, StaticConfigLoader};
use fleetwright::core::{DeployError, user_friendly_error};
use fleetwright::handlers::{HandlerFactories, HandlerRegistry};
use fleetwright::resolver::IdentityResolver;
use fleetwright::test_utils::{
    FixedCommitReader, RecordingOutput, RecordingSynchronizer, ScriptedCompiler, shop_system,
};

#[tokio::test]
async fn test_unknown_type_suggests_declaration() {
    let registry =
        HandlerRegistry::new(Arc::new(StaticConfigLoader::default()), HandlerFactories::with_builtins());

    let err = registry.get_handler(&shop_system(), "kafka").await.unwrap_err();
    let ctx = user_friendly_error(err);

    assert_eq!(ctx.error.to_string(), "No container definition for type 'kafka'");
    assert!(ctx.suggestion.unwrap().contains("[[containers]]"));
}

#[tokio::test]
async fn test_checkout_error_names_the_checkout() {
    let resolver = IdentityResolver::new(
        Arc::new(StaticConfigLoader::default()),
        Arc::new(ScriptedCompiler::returning([shop_system()])),
        Arc::new(RecordingSynchronizer::new()),
        DeployConfig::default(),
    )
    .with_commit_reader(Arc::new(FixedCommitReader::empty()));

    let err = resolver
        .compile("shop", std::path::Path::new("/srv/shop"), &RecordingOutput::new())
        .await
        .unwrap_err();
    let ctx = user_friendly_error(err);

    assert!(matches!(ctx.error, DeployError::CheckoutError { .. }));
    assert!(ctx.to_string().contains("/srv/shop/workspace/shop-api"));
    assert!(ctx.suggestion.is_some());
}

#[tokio::test]
async fn test_sync_error_keeps_cause_in_details() {
    let resolver = IdentityResolver::new(
        Arc::new(StaticConfigLoader::default()),
        Arc::new(ScriptedCompiler::returning([shop_system()])),
        Arc::new(RecordingSynchronizer::failing_on("api")),
        DeployConfig::default(),
    );

    let err = resolver
        .compile("shop", std::path::Path::new("/srv/shop"), &RecordingOutput::new())
        .await
        .unwrap_err();
    let ctx = user_friendly_error(err);

    assert_eq!(ctx.error.to_string(), "Failed to synchronize container definition 'api'");
    assert!(ctx.details.unwrap().contains("remote rejected fetch of api"));
}
