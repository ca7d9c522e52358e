// Per-language model registry: built once at startup, read-only afterwards
//
// Lookups are lock-free because the map never mutates after construction.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::core::errors::{ModelError, RegistryError};
use crate::engine::TextRecognizer;

pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn TextRecognizer>>,
}

impl ModelRegistry {
    /// Build a recognizer for every requested language.
    ///
    /// All-or-nothing: the first load failure aborts the whole build, so a
    /// partially initialized registry is never observable.
    pub fn build<F>(languages: &[String], mut load: F) -> Result<Self, RegistryError>
    where
        F: FnMut(&str) -> Result<Arc<dyn TextRecognizer>, ModelError>,
    {
        let mut models = HashMap::with_capacity(languages.len());

        for lang in languages {
            let recognizer = load(lang).map_err(|source| RegistryError::ModelInit {
                lang: lang.clone(),
                source,
            })?;
            models.insert(lang.clone(), recognizer);
            info!("Registered recognition model for language '{}'", lang);
        }

        Ok(Self { models })
    }

    pub fn lookup(&self, lang: &str) -> Result<Arc<dyn TextRecognizer>, RegistryError> {
        self.models
            .get(lang)
            .cloned()
            .ok_or_else(|| RegistryError::UnsupportedLanguage(lang.to_string()))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
