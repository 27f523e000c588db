//! Model discovery.
//!
//! Resolves the models a vendor offers through three tiers, first non-empty
//! tier wins:
//!
//! 1. the operator's local model configuration,
//! 2. the vendor's live listing (behind the retry engine),
//! 3. the static fallback registry.
//!
//! Results are tagged with their tier, given display names, de-duplicated,
//! sorted and cached per vendor.

pub mod cache;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::join_all;
use parking_lot::RwLock;
use relay_core::{GatewayConfig, GatewayError, LogLevel, LogSink, RetryConfig};
use tokio_util::sync::CancellationToken;

use crate::display::format_display_name;
use crate::error::ProviderError;
use crate::local_config::{EmptyModelSource, JsonModelConfig, LocalModelSource};
use crate::model_registry::FallbackRegistry;
use crate::providers::{ProviderClient, VendorAdapter, adapter_for, vendors};
use crate::recovery::RecoveryEngine;
use crate::types::{Model, ModelSource, VendorModel};

pub use cache::{CacheEntry, ModelCache};
pub use relay_core::DEFAULT_CACHE_TTL;

// ---------------------------------------------------------------------------
// Registrations
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Registration {
    client: Option<Arc<ProviderClient>>,
    adapter: Arc<dyn VendorAdapter>,
    retry: RetryConfig,
    has_key: bool,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct ModelResolver {
    local: Arc<dyn LocalModelSource>,
    registrations: RwLock<HashMap<String, Registration>>,
    registry: FallbackRegistry,
    cache: ModelCache,
    config: GatewayConfig,
    max_concurrency: Option<usize>,
    sink: Arc<dyn LogSink>,
}

impl ModelResolver {
    /// Resolver with no local configuration, the built-in fallback registry
    /// and a 24h cache.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            local: Arc::new(EmptyModelSource),
            registrations: RwLock::new(HashMap::new()),
            registry: FallbackRegistry::builtin(),
            cache: ModelCache::new(DEFAULT_CACHE_TTL),
            config: GatewayConfig::default(),
            max_concurrency: None,
            sink,
        }
    }

    /// Resolver shaped by `config`: cache TTL, concurrency cap, local model
    /// file and per-vendor retry and transport settings.
    pub fn from_config(config: &GatewayConfig, sink: Arc<dyn LogSink>) -> Self {
        let mut resolver = Self::new(sink.clone())
            .with_cache_ttl(config.cache_ttl())
            .with_max_concurrency(config.max_concurrency);
        if let Some(path) = &config.models_config_path {
            resolver.local = Arc::new(JsonModelConfig::new(path, sink));
        }
        resolver.config = config.clone();
        resolver
    }

    pub fn with_local_source(mut self, local: Arc<dyn LocalModelSource>) -> Self {
        self.local = local;
        self
    }

    pub fn with_registry(mut self, registry: FallbackRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = ModelCache::new(ttl);
        self
    }

    /// `None` or zero resolves every vendor at once.
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit.filter(|n| *n > 0);
        self
    }

    pub fn registry(&self) -> &FallbackRegistry {
        &self.registry
    }

    // -- Registration ------------------------------------------------------

    /// Register `vendor` with its own connection pool and the adapter that
    /// speaks its protocol. Re-registering replaces the previous entry.
    pub fn register_provider(
        &self,
        vendor: &str,
        base_url: &str,
        api_key: &str,
    ) -> Result<(), GatewayError> {
        let client = ProviderClient::new(vendor, base_url, api_key, &self.config.transport_for(vendor))?;
        self.register_client(client)
    }

    /// Register a pre-built client, sharing its connection pool.
    pub fn register_client(&self, client: ProviderClient) -> Result<(), GatewayError> {
        let adapter = adapter_for(&client, self.sink.clone())
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        let vendor = client.vendor.clone();
        let registration = Registration {
            has_key: client.has_api_key(),
            retry: self.config.retry_for(&vendor),
            client: Some(Arc::new(client)),
            adapter,
        };
        self.registrations.write().insert(vendor.clone(), registration);
        self.cache.remove(&vendor);
        self.sink.log(
            LogLevel::Info,
            "vendor registered",
            &relay_core::fields!("vendor" => vendor),
        );
        Ok(())
    }

    /// Register an already-built adapter. It is treated as authenticated.
    pub fn register_adapter(&self, adapter: Arc<dyn VendorAdapter>, retry: RetryConfig) {
        let vendor = adapter.vendor().to_string();
        self.registrations.write().insert(
            vendor.clone(),
            Registration {
                client: None,
                adapter,
                retry,
                has_key: true,
            },
        );
        self.cache.remove(&vendor);
    }

    /// Register every built-in vendor whose API key variable is set, plus
    /// any extra OpenAI-compatible vendor named in the configuration with a
    /// base URL and key variable. `lookup` reads a variable by name.
    ///
    /// Returns the registered vendor ids.
    pub fn register_from_env<F>(&self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut candidates: Vec<(String, String, String)> = Vec::new();
        for profile in vendors::VENDORS {
            let settings = self.config.vendors.get(profile.id);
            if settings.is_some_and(|s| s.disabled) {
                continue;
            }
            let key_env = settings
                .and_then(|s| s.api_key_env.clone())
                .unwrap_or_else(|| profile.api_key_env.to_string());
            let base_url = settings
                .and_then(|s| s.base_url.clone())
                .unwrap_or_else(|| profile.default_base_url.to_string());
            candidates.push((profile.id.to_string(), base_url, key_env));
        }
        for (vendor, settings) in &self.config.vendors {
            if settings.disabled || vendors::profile(vendor).is_some() {
                continue;
            }
            if let (Some(base_url), Some(key_env)) = (&settings.base_url, &settings.api_key_env) {
                candidates.push((vendor.clone(), base_url.clone(), key_env.clone()));
            }
        }

        let mut registered = Vec::new();
        for (vendor, base_url, key_env) in candidates {
            let Some(key) = lookup(&key_env).filter(|k| !k.trim().is_empty()) else {
                continue;
            };
            match self.register_provider(&vendor, &base_url, key.trim()) {
                Ok(()) => registered.push(vendor),
                Err(e) => self.sink.log(
                    LogLevel::Warning,
                    "vendor registration failed",
                    &relay_core::fields!("vendor" => vendor, "error" => e.to_string()),
                ),
            }
        }
        registered
    }

    pub fn registered_vendors(&self) -> Vec<String> {
        let mut vendors: Vec<String> = self.registrations.read().keys().cloned().collect();
        vendors.sort();
        vendors
    }

    pub fn adapter(&self, vendor: &str) -> Option<Arc<dyn VendorAdapter>> {
        self.registrations.read().get(vendor).map(|r| r.adapter.clone())
    }

    pub fn client(&self, vendor: &str) -> Option<Arc<ProviderClient>> {
        self.registrations.read().get(vendor).and_then(|r| r.client.clone())
    }

    // -- Resolution --------------------------------------------------------

    /// Models for `vendor`, from the cache when fresh.
    ///
    /// Never fails: a vendor with nothing configured, no listing and no
    /// fallback entries resolves to an empty list, which is not cached.
    pub async fn resolve(&self, vendor: &str, cancel: &CancellationToken) -> Vec<Model> {
        if let Some(models) = self.cache.get(vendor) {
            self.sink.log(
                LogLevel::Debug,
                "model cache hit",
                &relay_core::fields!("vendor" => vendor, "count" => models.len()),
            );
            return models;
        }

        let (models, source) = self.resolve_tiers(vendor, cancel).await;
        if cancel.is_cancelled() {
            return Vec::new();
        }
        if models.is_empty() {
            self.sink.log(
                LogLevel::Warning,
                "no models resolved",
                &relay_core::fields!("vendor" => vendor),
            );
            return Vec::new();
        }

        let models = finalize(models, source);
        self.sink.log(
            LogLevel::Info,
            "models resolved",
            &relay_core::fields!(
                "vendor" => vendor,
                "source" => source.to_string(),
                "count" => models.len(),
            ),
        );
        self.cache.insert(vendor, models.clone());
        models
    }

    async fn resolve_tiers(&self, vendor: &str, cancel: &CancellationToken) -> (Vec<Model>, ModelSource) {
        let local = self.local.models_for(vendor).await;
        if !local.is_empty() {
            return (local, ModelSource::Config);
        }

        let live = self.list_live(vendor, cancel).await;
        if !live.is_empty() {
            return (live, ModelSource::Api);
        }

        (self.registry.models_for(vendor), ModelSource::Fallback)
    }

    async fn list_live(&self, vendor: &str, cancel: &CancellationToken) -> Vec<Model> {
        let registration = self.registrations.read().get(vendor).cloned();
        let Some(registration) = registration else {
            return Vec::new();
        };
        if !registration.has_key {
            self.sink.log(
                LogLevel::Debug,
                "skipping live listing without API key",
                &relay_core::fields!("vendor" => vendor),
            );
            return Vec::new();
        }

        let engine = RecoveryEngine::new(vendor, registration.retry.clone(), self.sink.clone());
        let adapter: &dyn VendorAdapter = registration.adapter.as_ref();
        match engine.execute(cancel, move || adapter.list_models(cancel)).await {
            Ok(listed) => listed
                .into_iter()
                .filter(|m| !m.id.trim().is_empty())
                .map(|m| self.live_model(vendor, m))
                .collect(),
            Err(e) => {
                self.log_listing_failure(vendor, &e);
                Vec::new()
            }
        }
    }

    fn live_model(&self, vendor: &str, listed: VendorModel) -> Model {
        let mut model = Model::new(vendor, listed.id, ModelSource::Api);
        if let Some(entry) = self.registry.find(vendor, &model.id) {
            entry.apply(&mut model);
        }
        model
    }

    fn log_listing_failure(&self, vendor: &str, err: &ProviderError) {
        let level = if err.is_cancelled() { LogLevel::Debug } else { LogLevel::Warning };
        self.sink.log(
            level,
            "live model listing failed",
            &relay_core::fields!(
                "vendor" => vendor,
                "code" => err.code.clone(),
                "error" => err.to_string(),
            ),
        );
    }

    /// Resolve every registered vendor concurrently.
    pub async fn resolve_all(&self, cancel: &CancellationToken) -> HashMap<String, Vec<Model>> {
        let vendors = self.registered_vendors();
        let tasks = vendors.into_iter().map(|vendor| async move {
            let models = self.resolve(&vendor, cancel).await;
            (vendor, models)
        });

        let results: Vec<(String, Vec<Model>)> = match self.max_concurrency {
            Some(limit) => {
                futures::stream::iter(tasks)
                    .buffer_unordered(limit)
                    .collect::<Vec<_>>()
                    .await
            }
            None => join_all(tasks).await,
        };
        results.into_iter().collect()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop `vendor`'s cached entry and resolve it again.
    pub async fn refresh_vendor(
        &self,
        vendor: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Model>, GatewayError> {
        if !self.registrations.read().contains_key(vendor) {
            return Err(GatewayError::UnknownVendor(vendor.to_string()));
        }
        self.cache.remove(vendor);
        Ok(self.resolve(vendor, cancel).await)
    }

    /// Drop every cached entry and resolve all registered vendors again.
    pub async fn refresh_cache(&self, cancel: &CancellationToken) -> HashMap<String, Vec<Model>> {
        self.cache.clear();
        self.resolve_all(cancel).await
    }

    pub fn cached_vendors(&self) -> Vec<String> {
        self.cache.vendors()
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Tag provenance, format display names, drop repeated `(vendor, id)` pairs
/// keeping the first, and order by display name ignoring case.
fn finalize(models: Vec<Model>, source: ModelSource) -> Vec<Model> {
    let mut seen = HashSet::new();
    let mut out: Vec<Model> = models
        .into_iter()
        .filter(|m| seen.insert((m.vendor.clone(), m.id.clone())))
        .map(|mut m| {
            m.source = source;
            m.display_name = format_display_name(&m);
            m
        })
        .collect();
    out.sort_by_cached_key(|m| m.display_name.to_lowercase());
    out
}
