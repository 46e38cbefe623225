use std::time::Duration;

use crate::gemini::GeminiConfig;
use crate::non_empty_env;
use crate::pacing::Pacing;

pub const DEFAULT_STUDIO: &str = "gemini";

/// Runtime settings resolved from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct StudioConfig {
    pub studio: String,
    pub gemini: GeminiConfig,
    pub pacing: Pacing,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            studio: DEFAULT_STUDIO.to_string(),
            gemini: GeminiConfig::default(),
            pacing: Pacing::default(),
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let mut gemini = defaults.gemini;
        if let Some(key) = lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY")) {
            gemini.api_key = Some(key);
        }
        if let Some(base) = lookup("GEMINI_API_BASE") {
            gemini.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("GEMINI_IMAGE_MODEL") {
            gemini.image_model = model;
        }
        if let Some(model) = lookup("GEMINI_TEXT_MODEL") {
            gemini.text_model = model;
        }
        match parse_number::<f64>(&lookup, "GEMINI_REQUEST_TIMEOUT_S") {
            Some(timeout) if timeout.is_finite() => {
                gemini.request_timeout = Duration::from_secs_f64(timeout.clamp(5.0, 300.0));
            }
            Some(timeout) => {
                tracing::warn!(value = timeout, "ignoring non-finite GEMINI_REQUEST_TIMEOUT_S");
            }
            None => {}
        }
        if let Some(retries) = parse_number::<usize>(&lookup, "GEMINI_TRANSPORT_RETRIES") {
            gemini.transport_retries = retries.min(4);
        }

        let mut pacing = defaults.pacing;
        if let Some(ms) = parse_number::<u64>(&lookup, "PASSPORT_DETECT_DELAY_MS") {
            pacing.detect = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number::<u64>(&lookup, "PASSPORT_REVEAL_DELAY_MS") {
            pacing.reveal = Duration::from_millis(ms);
        }

        Self {
            studio: lookup("PASSPORT_STUDIO").unwrap_or(defaults.studio),
            gemini,
            pacing,
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
