use std::path::PathBuf;

/// Everything that can stop a pipeline run.
///
/// The controller never branches on the variant when recovering; every
/// kind is folded into the same upload-state error message.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Generation(String),

    #[error("{0}")]
    Validation(String),

    #[error("a pipeline run is already in progress")]
    Conflict,

    #[error("{0}")]
    Unknown(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Io { .. } => "io",
            PipelineError::Generation(_) => "generation",
            PipelineError::Validation(_) => "validation",
            PipelineError::Conflict => "conflict",
            PipelineError::Unknown(_) => "unknown",
        }
    }

    /// The text surfaced in the upload view after a failed run.
    pub fn user_message(&self) -> String {
        let cause = self.to_string();
        if cause.trim().is_empty() {
            return "Generation failed: An unknown error occurred.".to_string();
        }
        format!("Generation failed: {cause}")
    }
}

impl From<passport_contracts::pipeline::TransitionError> for PipelineError {
    fn from(err: passport_contracts::pipeline::TransitionError) -> Self {
        PipelineError::Unknown(err.to_string())
    }
}
