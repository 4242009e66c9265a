use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProviderConfig;

use super::fal::{FalClient, FalEngine, FAL_MODELS};
use super::runway::RunwayEngine;
use super::{Engine, EngineDescriptor, EngineError};

/// Name -> engine mapping, built once at startup.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn Engine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every provider engine this service knows about.
    pub fn with_default_engines(cfg: &ProviderConfig, http: reqwest::Client) -> Self {
        let mut registry = Self::new();

        let fal = Arc::new(FalClient::new(
            http.clone(),
            cfg.fal_queue_url.clone(),
            cfg.fal_key.clone(),
        ));
        for model in FAL_MODELS {
            registry.register(Arc::new(FalEngine::new(model, fal.clone())));
        }

        registry.register(Arc::new(RunwayEngine::new(
            http,
            cfg.runway_api_url.clone(),
            cfg.runway_api_key.clone(),
        )));

        registry
    }

    /// Register an engine under its descriptor key. Returns the engine it
    /// replaced, if any.
    pub fn register(&mut self, engine: Arc<dyn Engine>) -> Option<Arc<dyn Engine>> {
        let key = normalize_name(engine.descriptor().key);
        self.engines.insert(key, engine)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Engine>, EngineError> {
        self.engines
            .get(&normalize_name(name))
            .cloned()
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    /// Descriptors sorted by key.
    pub fn descriptors(&self) -> Vec<EngineDescriptor> {
        let mut out: Vec<EngineDescriptor> = self
            .engines
            .values()
            .map(|e| e.descriptor().clone())
            .collect();
        out.sort_by(|a, b| a.key.cmp(b.key));
        out
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

/// Canonical lookup form of an engine name.
///
/// Lower-cases, drops everything but ASCII letters and digits, then strips the
/// words `engine` and `video`, so `kling-video`, `kling_video` and
/// `KlingVideoEngine` all resolve to `kling`.
pub fn normalize_name(name: &str) -> String {
    let compact: String = name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    compact.replace("engine", "").replace("video", "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::Options;

    fn registry() -> EngineRegistry {
        EngineRegistry::with_default_engines(&ProviderConfig::default(), reqwest::Client::new())
    }

    #[test]
    fn name_forms_resolve_to_the_same_engine() {
        assert_eq!(normalize_name("kling-video"), "kling");
        assert_eq!(normalize_name("KlingVideoEngine"), "kling");
        assert_eq!(normalize_name("kling_text_video"), "klingtext");
        assert_eq!(
            normalize_name("HunyuanImageToVideoEngine"),
            normalize_name("hunyuan-image-to-video")
        );

        let reg = registry();
        let a = reg.get("kling-video").unwrap();
        let b = reg.get("KlingVideoEngine").unwrap();
        assert_eq!(a.descriptor().key, b.descriptor().key);
    }

    #[test]
    fn unknown_engine_fails_loudly() {
        let err = registry().get("sora").err().unwrap();
        assert!(matches!(err, EngineError::NotFound(ref n) if n == "sora"));
    }

    #[test]
    fn every_engine_accepts_an_empty_option_bag() {
        let reg = registry();
        assert_eq!(reg.len(), FAL_MODELS.len() + 1);
        for d in reg.descriptors() {
            let engine = reg.get(d.key).unwrap();
            let validated = engine.validate(&Options::new());
            assert!(validated.is_ok(), "{} rejected defaults: {validated:?}", d.key);
            assert!(engine.price(&Options::new()) > 0);
        }
    }

    #[test]
    fn keys_are_unique_after_normalization() {
        let descriptors = registry().descriptors();
        let mut keys: Vec<String> = descriptors.iter().map(|d| normalize_name(d.key)).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), descriptors.len());
    }

    #[test]
    fn image_only_engines_require_an_image() {
        let reg = registry();
        let runway = reg.get("runway").unwrap();
        assert!(runway.check_inputs(None).is_err());
        assert!(runway.check_inputs(Some("https://cdn/x.png")).is_ok());

        let text = reg.get("kling-text-video").unwrap();
        assert!(text.check_inputs(None).is_ok());
    }

    #[test]
    fn engine_kind_follows_the_model_endpoint() {
        for d in registry().descriptors() {
            if d.application.ends_with("image-to-video") {
                assert!(d.image_to_video && !d.text_to_video, "{} kind mismatch", d.key);
            }
            if d.application.ends_with("text-to-video") {
                assert!(d.text_to_video && !d.image_to_video, "{} kind mismatch", d.key);
            }
        }
        let pro = registry().get("kling-pro-video").unwrap();
        assert!(pro.check_inputs(None).is_err());
    }
}
