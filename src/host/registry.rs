//! Named transformer and validator modules.
//!
//! Configuration refers to modules by name plus an options blob; the
//! registry turns that pair into a ready instance when the host starts.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ModuleConfig;
use crate::error::{HostError, Result};
use crate::host::transform::{
    Base64Transformer, DataTransformer, GzipTransformer, IdentityTransformer, XorTransformer,
};
use crate::host::validator::{AcceptAll, FileValidator, GlobValidator, RedirectValidator};

type TransformerFactory =
    Arc<dyn Fn(&serde_json::Value) -> anyhow::Result<Arc<dyn DataTransformer>> + Send + Sync>;
type ValidatorFactory =
    Arc<dyn Fn(&serde_json::Value) -> anyhow::Result<Arc<dyn FileValidator>> + Send + Sync>;

#[derive(Clone)]
pub struct ModuleRegistry {
    transformers: HashMap<String, TransformerFactory>,
    validators: HashMap<String, ValidatorFactory>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ModuleRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            transformers: HashMap::new(),
            validators: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        registry.register_transformer("identity", |_| Ok(Arc::new(IdentityTransformer)));
        registry.register_transformer("base64", |_| Ok(Arc::new(Base64Transformer)));
        registry.register_transformer("gzip", |options| {
            Ok(Arc::new(GzipTransformer::from_options(options)?))
        });
        registry.register_transformer("xor", |options| {
            Ok(Arc::new(XorTransformer::from_options(options)?))
        });

        registry.register_validator("accept_all", |_| Ok(Arc::new(AcceptAll)));
        registry.register_validator("glob", |options| {
            Ok(Arc::new(GlobValidator::from_options(options)?))
        });
        registry.register_validator("redirect", |options| {
            Ok(Arc::new(RedirectValidator::from_options(options)?))
        });

        registry
    }

    pub fn register_transformer<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<Arc<dyn DataTransformer>>
            + Send
            + Sync
            + 'static,
    {
        self.transformers.insert(name.into(), Arc::new(factory));
    }

    pub fn register_validator<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<Arc<dyn FileValidator>>
            + Send
            + Sync
            + 'static,
    {
        self.validators.insert(name.into(), Arc::new(factory));
    }

    /// Instantiate a transformer; no module configured means identity.
    pub fn transformer(&self, module: Option<&ModuleConfig>) -> Result<Arc<dyn DataTransformer>> {
        let Some(module) = module else {
            return Ok(Arc::new(IdentityTransformer));
        };
        let factory = self.transformers.get(&module.name).ok_or_else(|| {
            HostError::Config(format!("unknown transformer module '{}'", module.name))
        })?;
        factory(&module.options).map_err(|e| {
            HostError::Config(format!("transformer module '{}': {:#}", module.name, e))
        })
    }

    /// Instantiate a validator; no module configured means accept everything.
    pub fn validator(&self, module: Option<&ModuleConfig>) -> Result<Arc<dyn FileValidator>> {
        let Some(module) = module else {
            return Ok(Arc::new(AcceptAll));
        };
        let factory = self.validators.get(&module.name).ok_or_else(|| {
            HostError::Config(format!("unknown validator module '{}'", module.name))
        })?;
        factory(&module.options).map_err(|e| {
            HostError::Config(format!("validator module '{}': {:#}", module.name, e))
        })
    }

    pub fn transformer_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transformers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn validator_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
