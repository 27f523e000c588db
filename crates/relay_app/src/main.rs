use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_ai::providers::vendors;
use relay_ai::{
    CodeVisibilityVerifier, Model, ModelResolver, VerificationConfig, VerificationStore,
};
use relay_core::logging;
use relay_core::{GatewayConfig, LogSink, TracingSink};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Config file from the first argument, else `~/.relay/config.json`.
fn config_path() -> Result<PathBuf> {
    match std::env::args_os().nth(1) {
        Some(path) => Ok(PathBuf::from(path)),
        None => GatewayConfig::config_path(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path()?;
    let config = GatewayConfig::load_or_default(&path);
    config.validate().context("Invalid configuration")?;

    let _log_guard = logging::init_logging(&config.log_level)?;
    info!("relay v{VERSION} starting (config: {})", path.display());

    let sink: Arc<dyn LogSink> = Arc::new(TracingSink);
    let resolver = ModelResolver::from_config(&config, sink.clone());
    let registered = resolver.register_from_env(|name| std::env::var(name).ok());
    if registered.is_empty() {
        warn!("No vendor API keys found in the environment");
    } else {
        let names: Vec<&str> = registered.iter().map(|id| vendors::label(id)).collect();
        info!("Registered vendors: {}", names.join(", "));
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let resolved = resolver.resolve_all(&cancel).await;

    let store = VerificationStore::new(VerificationConfig::from_gateway(&config), sink);
    if store.config().enabled {
        let verifier = CodeVisibilityVerifier::default();
        for (vendor, models) in &resolved {
            if let Some(adapter) = resolver.adapter(vendor) {
                store
                    .verify_models(&verifier, adapter.as_ref(), models, &cancel)
                    .await;
            }
        }
    }

    let catalogue: BTreeMap<String, Vec<Model>> = resolved
        .into_iter()
        .map(|(vendor, models)| (vendor, store.filter_verified(models)))
        .collect();
    let total: usize = catalogue.values().map(Vec::len).sum();
    info!("Resolved {total} models across {} vendors", catalogue.len());

    let out = serde_json::to_string_pretty(&catalogue).context("Failed to encode models")?;
    println!("{out}");
    Ok(())
}
