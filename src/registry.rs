//! The engine registry.
//!
//! Engines are registered by name at startup. Registration only records how
//! to build an engine. Instances are created, initialized and stored by
//! [`EngineRegistry::initialize_engine`], and there's at most one live
//! instance per name.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, RwLock},
};

use schemars::JsonSchema;

use crate::{
    backends::{AnyBackend, ModelLoader},
    config::EngineConfig,
    engines::{
        Engine,
        document::{DOCUMENT_ENGINE_NAME, DOCUMENT_FORMATS, DocumentEngine},
        generative::{GENERATIVE_ENGINE_NAME, GENERATIVE_FORMATS, GenerativeEngine},
    },
    error::OcrError,
    format::OutputFormat,
    generative::{GenerateContent, GenerativeService},
    prelude::*,
};

/// What we know about an engine before it's built.
#[derive(Clone, Debug, JsonSchema, PartialEq, Eq, Serialize)]
pub struct EngineDescriptor {
    /// The engine's unique name.
    pub name: &'static str,

    /// A short description.
    pub description: &'static str,

    /// Formats the engine can produce.
    pub supported_formats: Vec<OutputFormat>,
}

/// Builds a fresh engine instance.
pub type EngineFactory = Box<dyn Fn() -> Result<Arc<dyn Engine>, OcrError> + Send + Sync>;

struct Registration {
    descriptor: EngineDescriptor,
    factory: EngineFactory,
}

/// All known engines, and the ones which are running.
#[derive(Default)]
pub struct EngineRegistry {
    registrations: BTreeMap<&'static str, Registration>,
    instances: RwLock<HashMap<String, Arc<dyn Engine>>>,
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.registrations.keys().collect::<Vec<_>>())
            .field("initialized", &self.list_initialized())
            .finish()
    }
}

impl EngineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine. Registering the same name twice replaces the
    /// earlier registration.
    pub fn register(&mut self, descriptor: EngineDescriptor, factory: EngineFactory) {
        debug!(engine = descriptor.name, "Registering engine");
        self.registrations
            .insert(descriptor.name, Registration { descriptor, factory });
    }

    /// Look up an engine's descriptor.
    pub fn get_class(&self, name: &str) -> Result<&EngineDescriptor, OcrError> {
        self.registrations
            .get(name)
            .map(|r| &r.descriptor)
            .ok_or_else(|| OcrError::EngineNotFound(name.to_owned()))
    }

    /// Get the live instance of an engine.
    pub fn get_instance(&self, name: &str) -> Result<Arc<dyn Engine>, OcrError> {
        self.instances
            .read()
            .expect("lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| OcrError::EngineNotFound(name.to_owned()))
    }

    /// Build and initialize an engine, and store it as the live instance.
    ///
    /// If two callers race to initialize the same engine, the last one wins.
    /// Startup code should initialize engines one at a time.
    #[instrument(level = "debug", skip(self))]
    pub async fn initialize_engine(&self, name: &str) -> Result<Arc<dyn Engine>, OcrError> {
        let registration = self
            .registrations
            .get(name)
            .ok_or_else(|| OcrError::EngineNotFound(name.to_owned()))?;
        let engine = (registration.factory)()?;
        engine.initialize().await?;
        let replaced = self
            .instances
            .write()
            .expect("lock poisoned")
            .insert(name.to_owned(), engine.clone());
        if replaced.is_some() {
            warn!(engine = name, "Replaced an existing engine instance");
        }
        info!(engine = name, "Engine initialized");
        Ok(engine)
    }

    /// Clean up every live instance, and forget them.
    pub async fn cleanup_all(&self) {
        let instances = self
            .instances
            .write()
            .expect("lock poisoned")
            .drain()
            .collect::<Vec<_>>();
        for (name, engine) in instances {
            debug!(engine = %name, "Cleaning up engine");
            engine.cleanup().await;
        }
    }

    /// Descriptors of all registered engines, sorted by name.
    pub fn list_engines(&self) -> Vec<&EngineDescriptor> {
        self.registrations.values().map(|r| &r.descriptor).collect()
    }

    /// Names of all live instances, sorted.
    pub fn list_initialized(&self) -> Vec<String> {
        let mut names = self
            .instances
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}

/// Build a registry containing our built-in engines.
///
/// `loader` is needed only if the layout engine should use a local model.
pub fn builtin_registry(
    config: &EngineConfig,
    loader: Option<Arc<dyn ModelLoader>>,
) -> EngineRegistry {
    let mut registry = EngineRegistry::new();

    let backend_settings = config.backend_settings();
    registry.register(
        EngineDescriptor {
            name: DOCUMENT_ENGINE_NAME,
            description: "Layout-aware document parsing with a vision-language model",
            supported_formats: DOCUMENT_FORMATS.to_vec(),
        },
        Box::new(move || {
            let backend = AnyBackend::new(&backend_settings, loader.clone())?;
            Ok(Arc::new(DocumentEngine::new(backend)) as Arc<dyn Engine>)
        }),
    );

    let generator: Arc<dyn GenerateContent> = Arc::new(GenerativeService::new(
        config.google_api_key.clone(),
        config.request_timeout(),
    ));
    let generative_settings = config.generative_settings();
    registry.register(
        EngineDescriptor {
            name: GENERATIVE_ENGINE_NAME,
            description: "Whole-page Markdown extraction with a hosted generative model",
            supported_formats: GENERATIVE_FORMATS.to_vec(),
        },
        Box::new(move || {
            Ok(Arc::new(GenerativeEngine::new(
                generative_settings.clone(),
                generator.clone(),
            )) as Arc<dyn Engine>)
        }),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backends::BatchConcurrency, config::tests::parse_config,
        engines::document::tests::ScriptedBackend,
    };

    fn test_registry() -> EngineRegistry {
        let mut registry = EngineRegistry::new();
        registry.register(
            EngineDescriptor {
                name: "layout",
                description: "test",
                supported_formats: DOCUMENT_FORMATS.to_vec(),
            },
            Box::new(|| {
                let backend = ScriptedBackend::new("[0,0,1000,1000], para]", BatchConcurrency::Parallel);
                Ok(Arc::new(DocumentEngine::new(backend)) as Arc<dyn Engine>)
            }),
        );
        registry
    }

    #[tokio::test]
    async fn unknown_names_are_not_found() {
        let registry = test_registry();
        assert!(matches!(
            registry.get_class("nope"),
            Err(OcrError::EngineNotFound(_))
        ));
        assert!(matches!(
            registry.initialize_engine("nope").await,
            Err(OcrError::EngineNotFound(_))
        ));
        // Registered, but not running yet.
        assert!(matches!(
            registry.get_instance("layout"),
            Err(OcrError::EngineNotFound(_))
        ));
    }

    #[tokio::test]
    async fn initialize_then_cleanup_all() {
        let registry = test_registry();
        let engine = registry.initialize_engine("layout").await.unwrap();
        assert!(engine.health_check().await);
        assert_eq!(registry.list_initialized(), vec!["layout"]);
        assert!(registry.get_instance("layout").is_ok());

        registry.cleanup_all().await;
        assert!(registry.list_initialized().is_empty());
        assert!(!engine.health_check().await);
        assert!(registry.get_instance("layout").is_err());
    }

    #[tokio::test]
    async fn builtin_engines_are_registered() {
        let registry = builtin_registry(&parse_config(&[]), None);
        let names = registry
            .list_engines()
            .iter()
            .map(|d| d.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["gemini", "layout"]);
        assert_eq!(
            registry.get_class("gemini").unwrap().supported_formats,
            vec![OutputFormat::Markdown]
        );
    }

    #[tokio::test]
    async fn failed_initialization_stores_nothing() {
        let config = parse_config(&["--layout-backend", "local"]);
        let registry = builtin_registry(&config, None);
        let err = registry.initialize_engine("layout").await.err().unwrap();
        assert!(matches!(err, OcrError::Initialization(_)));
        assert!(registry.list_initialized().is_empty());
    }
}
