//! String key -> processor constructor.
//!
//! Processors are never loaded dynamically. The startup code registers the
//! kinds it knows about and the config only ever names one of those keys.

use super::builtin::{PatternDetector, SeverityHint};
use super::{Processor, ProcessorChain, ProcessorError};
use crate::config::types::ProcessorConfig;
use std::collections::HashMap;

/// Builds a processor from its configured name and options.
pub type ProcessorConstructor = Box<
    dyn Fn(&str, &serde_yaml::Value) -> Result<Box<dyn Processor>, ProcessorError> + Send + Sync,
>;

#[derive(Default)]
pub struct ProcessorRegistry {
    constructors: HashMap<String, ProcessorConstructor>,
}

impl ProcessorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `patterns` and `severity`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("patterns", |name, options| {
            Ok(Box::new(PatternDetector::from_options(name, options)?) as Box<dyn Processor>)
        });
        registry.register("severity", |_, _| {
            Ok(Box::new(SeverityHint::new()?) as Box<dyn Processor>)
        });
        registry
    }

    /// Register a constructor. A second registration for the same kind replaces the first.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&str, &serde_yaml::Value) -> Result<Box<dyn Processor>, ProcessorError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(kind.into(), Box::new(constructor));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn build(&self, config: &ProcessorConfig) -> Result<Box<dyn Processor>, ProcessorError> {
        let constructor = self
            .constructors
            .get(config.kind())
            .ok_or_else(|| ProcessorError::UnknownKind(config.kind().to_string()))?;
        constructor(&config.name, &config.options)
    }

    /// Build a chain in config order.
    pub fn build_chain(&self, configs: &[ProcessorConfig]) -> Result<ProcessorChain, ProcessorError> {
        let mut chain = ProcessorChain::new();
        for config in configs {
            let processor = self.build(config)?;
            chain.register(config.name.clone(), processor);
        }
        Ok(chain)
    }
}
