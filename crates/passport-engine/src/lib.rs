mod config;
mod controller;
mod dryrun;
mod error;
mod gemini;
mod ingest;
mod pacing;
mod studio;

pub use config::{StudioConfig, DEFAULT_STUDIO};
pub use controller::{PipelineObserver, StageController, StateChange, Transition};
pub use dryrun::DryrunStudio;
pub use error::PipelineError;
pub use gemini::{GeminiConfig, GeminiStudio};
pub use ingest::{guess_image_mime, ingest, ingest_bytes, SourceFile, ADVISORY_MAX_BYTES};
pub use pacing::{InstantPacer, Pacer, PacerHandle, Pacing, ThreadPacer};
pub use studio::{default_studio_registry, PhotoGenerator, PhotoValidator, Studio, StudioRegistry};

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        // `context` layers often repeat their source verbatim.
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(": "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{error_chain_text, truncate_text};

    #[test]
    fn error_chain_text_joins_distinct_causes() {
        let err = Err::<(), _>(anyhow::anyhow!("quota exceeded"))
            .context("Gemini request failed")
            .context("Gemini request failed")
            .unwrap_err();
        assert_eq!(
            error_chain_text(&err, 200),
            "Gemini request failed: quota exceeded"
        );
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
