//! Provider Factory (component H, §4.7): registers adapter constructors,
//! validates configuration, and caches constructed adapters keyed by
//! `(provider kind, hash(credential), organization)` — the model id is
//! deliberately excluded from the cache key.

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::ProviderAdapter;

type Constructor = Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn ProviderAdapter>> + Send + Sync>;

/// Singleton-shaped registry, built with explicit `init`/`shutdown` rather
/// than an ambient global (§9 "Singleton registries"): callers own one
/// instance and inject it into whatever needs to construct adapters.
#[derive(Clone, Default)]
pub struct ProviderFactory {
    constructors: Arc<Mutex<HashMap<ProviderKind, Constructor>>>,
    cache: Arc<Mutex<HashMap<String, Arc<dyn ProviderAdapter>>>>,
}

impl ProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, kind: ProviderKind, constructor: F)
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn ProviderAdapter>> + Send + Sync + 'static,
    {
        self.constructors.lock().unwrap().insert(kind, Arc::new(constructor));
    }

    /// `create(providerKind, config, forceNew?)`. Validates `config` per
    /// §4.7 before ever calling the registered constructor.
    pub fn create(&self, config: &ProviderConfig, force_new: bool) -> Result<Arc<dyn ProviderAdapter>> {
        config.validate()?;

        let key = config.cache_key();
        if !force_new {
            if let Some(existing) = self.cache.lock().unwrap().get(&key) {
                return Ok(existing.clone());
            }
        }

        let constructor = {
            let constructors = self.constructors.lock().unwrap();
            constructors
                .get(&config.kind)
                .cloned()
                .ok_or_else(|| Error::validation(format!("no adapter registered for {:?}", config.kind)))?
        };

        let adapter = constructor(config)?;
        info!(provider = config.kind.as_str(), "constructed provider adapter");
        self.cache.lock().unwrap().insert(key, adapter.clone());
        Ok(adapter)
    }

    /// Calls nothing on the adapters themselves (the trait has no
    /// `destroy()`; adapters are plain `Arc` values here and are simply
    /// dropped), but clears every cached instance so the next `create`
    /// rebuilds from scratch.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Capability, ModelDescriptor, ProviderMetadata};
    use std::time::Duration;

    struct DummyAdapter(ProviderMetadata);

    #[async_trait::async_trait]
    impl ProviderAdapter for DummyAdapter {
        fn metadata(&self) -> &ProviderMetadata {
            &self.0
        }
        async fn test_connection(&self) -> Result<bool> {
            Ok(true)
        }
        async fn send(&self, _params: super::super::ChatParams) -> Result<super::super::ChatResult> {
            unimplemented!()
        }
        async fn stream(
            &self,
            _params: super::super::ChatParams,
            _sink: &mut dyn super::super::StreamSink,
        ) -> Result<super::super::ChatResult> {
            unimplemented!()
        }
    }

    fn metadata() -> ProviderMetadata {
        ProviderMetadata {
            name: "dummy".into(),
            capabilities: vec![Capability::Streaming],
            models: vec![ModelDescriptor {
                id: "m".into(),
                context_window: 1000,
                max_output_tokens: 100,
                input_price_per_million: 1.0,
                output_price_per_million: 1.0,
                deprecated: false,
            }],
        }
    }

    fn valid_config() -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::OpenAiCompatible,
            credential: "sk-test".into(),
            default_model: "m".into(),
            max_output_tokens: 100,
            timeout: Duration::from_secs(10),
            max_retries: 3,
            base_url: None,
            organization: None,
        }
    }

    #[test]
    fn create_fails_validation_before_calling_constructor() {
        let factory = ProviderFactory::new();
        let called = Arc::new(Mutex::new(false));
        let called_clone = called.clone();
        factory.register(ProviderKind::OpenAiCompatible, move |_| {
            *called_clone.lock().unwrap() = true;
            Ok(Arc::new(DummyAdapter(metadata())) as Arc<dyn ProviderAdapter>)
        });

        let mut bad_config = valid_config();
        bad_config.credential.clear();
        assert!(factory.create(&bad_config, false).is_err());
        assert!(!*called.lock().unwrap(), "constructor must not run on invalid config");
    }

    #[test]
    fn create_caches_by_credential_not_model() {
        let factory = ProviderFactory::new();
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();
        factory.register(ProviderKind::OpenAiCompatible, move |_| {
            *calls_clone.lock().unwrap() += 1;
            Ok(Arc::new(DummyAdapter(metadata())) as Arc<dyn ProviderAdapter>)
        });

        let mut config_a = valid_config();
        config_a.default_model = "model-a".into();
        let mut config_b = valid_config();
        config_b.default_model = "model-b".into();

        factory.create(&config_a, false).unwrap();
        factory.create(&config_b, false).unwrap();

        assert_eq!(*calls.lock().unwrap(), 1, "same credential should reuse cached adapter");
        assert_eq!(factory.cached_count(), 1);
    }

    #[test]
    fn force_new_bypasses_cache() {
        let factory = ProviderFactory::new();
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();
        factory.register(ProviderKind::OpenAiCompatible, move |_| {
            *calls_clone.lock().unwrap() += 1;
            Ok(Arc::new(DummyAdapter(metadata())) as Arc<dyn ProviderAdapter>)
        });

        let config = valid_config();
        factory.create(&config, false).unwrap();
        factory.create(&config, true).unwrap();

        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn clear_cache_forces_reconstruction() {
        let factory = ProviderFactory::new();
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = calls.clone();
        factory.register(ProviderKind::OpenAiCompatible, move |_| {
            *calls_clone.lock().unwrap() += 1;
            Ok(Arc::new(DummyAdapter(metadata())) as Arc<dyn ProviderAdapter>)
        });

        let config = valid_config();
        factory.create(&config, false).unwrap();
        factory.clear_cache();
        factory.create(&config, false).unwrap();

        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(factory.cached_count(), 1);
    }

    #[test]
    fn create_fails_for_unregistered_kind() {
        let factory = ProviderFactory::new();
        let config = valid_config();
        assert!(factory.create(&config, false).is_err());
    }
}
