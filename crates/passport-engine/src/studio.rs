use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use passport_contracts::pipeline::{GeneratedPhoto, ValidationReport};

use crate::{DryrunStudio, GeminiStudio, StudioConfig};

/// Turns an uploaded photo into a compliant passport photo.
pub trait PhotoGenerator: Send + Sync {
    fn generate(&self, base64: &str, source_mime_type: &str) -> Result<GeneratedPhoto>;
}

/// Inspects a generated photo and describes its compliance in free text.
pub trait PhotoValidator: Send + Sync {
    fn validate(&self, base64: &str, mime_type: &str) -> Result<ValidationReport>;
}

/// A backend that can play both collaborator roles.
pub trait Studio: PhotoGenerator + PhotoValidator {
    fn name(&self) -> &str;
}

impl<T: PhotoGenerator + ?Sized> PhotoGenerator for Arc<T> {
    fn generate(&self, base64: &str, source_mime_type: &str) -> Result<GeneratedPhoto> {
        (**self).generate(base64, source_mime_type)
    }
}

impl<T: PhotoValidator + ?Sized> PhotoValidator for Arc<T> {
    fn validate(&self, base64: &str, mime_type: &str) -> Result<ValidationReport> {
        (**self).validate(base64, mime_type)
    }
}

#[derive(Default)]
pub struct StudioRegistry {
    studios: BTreeMap<String, Arc<dyn Studio>>,
}

impl StudioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: Studio + 'static>(&mut self, studio: S) {
        self.studios
            .insert(studio.name().to_string(), Arc::new(studio));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Studio>> {
        self.studios.get(name.trim()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.studios.keys().cloned().collect()
    }
}

pub fn default_studio_registry(config: &StudioConfig) -> StudioRegistry {
    let mut studios = StudioRegistry::new();
    studios.register(DryrunStudio::new());
    studios.register(GeminiStudio::new(config.gemini.clone()));
    studios
}
