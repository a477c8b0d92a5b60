#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Source definitions and the registry the orchestrator runs against.
//!
//! Each data provider is described by a TOML [`SourceDefinition`] and turned
//! into a [`RegisteredSource`]: its immutable [`SourceConfig`] plus the
//! [`SourceAdapter`] that knows how to fetch its pages. Custom adapters can be
//! registered directly with [`SourceRegistry::register`].

pub mod progress;
pub mod registry;
pub mod source_def;

use std::sync::Arc;

use harvester_scraper::SourceAdapter;
use harvester_scraper_models::SourceConfig;

pub use source_def::SourceDefinition;

/// Errors that can occur while loading source definitions.
#[derive(Debug, thiserror::Error)]
pub enum SourceDefError {
    /// TOML parsing failed.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error (reading a definitions directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A definition file could not be parsed.
    #[error("{path}: {source}")]
    File {
        /// Offending file.
        path: String,
        /// Underlying parse error.
        source: Box<Self>,
    },
}

/// Errors raised when building a [`SourceRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two sources share a tag.
    #[error("source '{tag}' is already registered")]
    Duplicate {
        /// The repeated tag.
        tag: String,
    },
}

/// A source ready to be paginated.
#[derive(Clone)]
pub struct RegisteredSource {
    /// Immutable configuration.
    pub config: SourceConfig,
    /// Page fetcher for this source.
    pub adapter: Arc<dyn SourceAdapter>,
}

impl std::fmt::Debug for RegisteredSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredSource")
            .field("config", &self.config)
            .field("strategy", &self.adapter.strategy())
            .finish()
    }
}

/// Ordered set of sources keyed by unique tag.
///
/// Registration order is preserved and used for result ordering.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<RegisteredSource>,
}

impl SourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from source definitions.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if two definitions share an id.
    pub fn from_definitions<'a>(
        definitions: impl IntoIterator<Item = &'a SourceDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for def in definitions {
            registry.register(def.config(), def.adapter())?;
        }
        Ok(registry)
    }

    /// Registers an adapter against its config's tag.
    ///
    /// The config is not validated here; malformed configs surface as a
    /// source-level failure when the source is run.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the tag is already taken.
    pub fn register(
        &mut self,
        config: SourceConfig,
        adapter: Arc<dyn SourceAdapter>,
    ) -> Result<(), RegistryError> {
        if self.get(&config.tag).is_some() {
            return Err(RegistryError::Duplicate { tag: config.tag });
        }
        log::debug!(
            "Registered source {} ({})",
            config.tag,
            adapter.strategy()
        );
        self.sources.push(RegisteredSource { config, adapter });
        Ok(())
    }

    /// Looks up a source by tag.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&RegisteredSource> {
        self.sources.iter().find(|s| s.config.tag == tag)
    }

    /// Iterates sources in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredSource> {
        self.sources.iter()
    }

    /// Iterates source configs in registration order.
    pub fn configs(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().map(|s| &s.config)
    }

    /// Returns all tags in registration order.
    #[must_use]
    pub fn tags(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.config.tag.as_str()).collect()
    }

    /// Number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no source is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use harvester_scraper_models::FetchResult;

    use super::*;

    struct Empty;

    #[async_trait]
    impl SourceAdapter for Empty {
        async fn fetch_page(&self, _page: u32) -> FetchResult {
            Ok(Vec::new())
        }

        fn strategy(&self) -> &str {
            "empty"
        }
    }

    #[test]
    fn preserves_registration_order() {
        let mut registry = SourceRegistry::new();
        for tag in ["b", "a", "c"] {
            registry
                .register(SourceConfig::new(tag, "https://e.com"), Arc::new(Empty))
                .unwrap();
        }
        assert_eq!(registry.tags(), vec!["b", "a", "c"]);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("a").unwrap().adapter.strategy(), "empty");
    }

    #[test]
    fn rejects_duplicate_tags() {
        let mut registry = SourceRegistry::new();
        registry
            .register(SourceConfig::new("a", "https://e.com"), Arc::new(Empty))
            .unwrap();
        let err = registry
            .register(SourceConfig::new("a", "https://other.com"), Arc::new(Empty))
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate { tag: "a".to_owned() });
    }

    #[test]
    fn builds_from_embedded_definitions() {
        let defs = registry::all_sources();
        let registry = SourceRegistry::from_definitions(&defs).unwrap();
        assert_eq!(registry.len(), defs.len());
    }
}
