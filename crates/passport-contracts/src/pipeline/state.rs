use std::fmt;

use serde::{Deserialize, Serialize};

use super::photo::{GeneratedPhoto, UploadedImage, ValidationReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Upload,
    Processing,
    Result,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Upload => "upload",
            Step::Processing => "processing",
            Step::Result => "result",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStage {
    Detecting,
    Generating,
    Validating,
    Done,
}

pub const PROCESSING_STAGES: [ProcessingStage; 4] = [
    ProcessingStage::Detecting,
    ProcessingStage::Generating,
    ProcessingStage::Validating,
    ProcessingStage::Done,
];

impl ProcessingStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStage::Detecting => "detecting",
            ProcessingStage::Generating => "generating",
            ProcessingStage::Validating => "validating",
            ProcessingStage::Done => "done",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProcessingStage::Detecting => "Detecting Face",
            ProcessingStage::Generating => "Generating Photo",
            ProcessingStage::Validating => "Validating Compliance",
            ProcessingStage::Done => "Done",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<ProcessingStage> {
        PROCESSING_STAGES.get(self.index() + 1).copied()
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {action} while in {from}")]
    Illegal { action: &'static str, from: String },
    #[error("cannot {action}: {missing} is not set")]
    Missing {
        action: &'static str,
        missing: &'static str,
    },
}

/// Snapshot of one pipeline session.
///
/// Each variant carries only the data that may exist in that step, so an
/// error can never coexist with an active run and a result can never be
/// built without a photo and a report. Transitions consume the snapshot
/// and return the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "lowercase")]
pub enum PipelineState {
    Upload {
        error: Option<String>,
    },
    Processing {
        stage: ProcessingStage,
        upload: Option<UploadedImage>,
        photo: Option<GeneratedPhoto>,
        report: Option<ValidationReport>,
    },
    Result {
        upload: UploadedImage,
        photo: GeneratedPhoto,
        report: ValidationReport,
    },
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::initial()
    }
}

impl PipelineState {
    pub fn initial() -> Self {
        PipelineState::Upload { error: None }
    }

    pub fn step(&self) -> Step {
        match self {
            PipelineState::Upload { .. } => Step::Upload,
            PipelineState::Processing { .. } => Step::Processing,
            PipelineState::Result { .. } => Step::Result,
        }
    }

    pub fn processing_stage(&self) -> Option<ProcessingStage> {
        match self {
            PipelineState::Processing { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, PipelineState::Processing { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            PipelineState::Upload { error } => error.as_deref(),
            _ => None,
        }
    }

    pub fn uploaded(&self) -> Option<&UploadedImage> {
        match self {
            PipelineState::Processing { upload, .. } => upload.as_ref(),
            PipelineState::Result { upload, .. } => Some(upload),
            PipelineState::Upload { .. } => None,
        }
    }

    pub fn generated_photo(&self) -> Option<&GeneratedPhoto> {
        match self {
            PipelineState::Processing { photo, .. } => photo.as_ref(),
            PipelineState::Result { photo, .. } => Some(photo),
            PipelineState::Upload { .. } => None,
        }
    }

    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            PipelineState::Processing { report, .. } => report.as_ref(),
            PipelineState::Result { report, .. } => Some(report),
            PipelineState::Upload { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match self.processing_stage() {
            Some(stage) => format!("processing({stage})"),
            None => self.step().to_string(),
        }
    }

    /// Opens a run at `detecting` with no upload yet. Starting over from a
    /// finished result discards it; starting while processing is illegal.
    pub fn begin(self) -> Result<Self, TransitionError> {
        match self {
            PipelineState::Upload { .. } | PipelineState::Result { .. } => {
                Ok(PipelineState::Processing {
                    stage: ProcessingStage::Detecting,
                    upload: None,
                    photo: None,
                    report: None,
                })
            }
            other => Err(other.illegal("start a run")),
        }
    }

    pub fn with_upload(self, image: UploadedImage) -> Result<Self, TransitionError> {
        match self {
            PipelineState::Processing {
                stage: ProcessingStage::Detecting,
                upload: None,
                photo,
                report,
            } => Ok(PipelineState::Processing {
                stage: ProcessingStage::Detecting,
                upload: Some(image),
                photo,
                report,
            }),
            other => Err(other.illegal("store the upload")),
        }
    }

    /// Detection pacing elapsed.
    pub fn detection_finished(self) -> Result<Self, TransitionError> {
        const ACTION: &str = "finish detection";
        match self {
            PipelineState::Processing {
                stage: ProcessingStage::Detecting,
                upload,
                photo,
                report,
            } => {
                if upload.is_none() {
                    return Err(TransitionError::Missing {
                        action: ACTION,
                        missing: "upload",
                    });
                }
                Ok(PipelineState::Processing {
                    stage: ProcessingStage::Generating,
                    upload,
                    photo,
                    report,
                })
            }
            other => Err(other.illegal(ACTION)),
        }
    }

    pub fn photo_generated(self, generated: GeneratedPhoto) -> Result<Self, TransitionError> {
        match self {
            PipelineState::Processing {
                stage: ProcessingStage::Generating,
                upload,
                report,
                ..
            } => Ok(PipelineState::Processing {
                stage: ProcessingStage::Validating,
                upload,
                photo: Some(generated),
                report,
            }),
            other => Err(other.illegal("store the generated photo")),
        }
    }

    pub fn report_received(self, received: ValidationReport) -> Result<Self, TransitionError> {
        match self {
            PipelineState::Processing {
                stage: ProcessingStage::Validating,
                upload,
                photo,
                ..
            } => Ok(PipelineState::Processing {
                stage: ProcessingStage::Done,
                upload,
                photo,
                report: Some(received),
            }),
            other => Err(other.illegal("store the validation report")),
        }
    }

    /// Reveal pacing elapsed; moves `done` to `result`.
    pub fn complete(self) -> Result<Self, TransitionError> {
        const ACTION: &str = "reveal the result";
        match self {
            PipelineState::Processing {
                stage: ProcessingStage::Done,
                upload,
                photo,
                report,
            } => {
                let upload = upload.ok_or(TransitionError::Missing {
                    action: ACTION,
                    missing: "upload",
                })?;
                let photo = photo.ok_or(TransitionError::Missing {
                    action: ACTION,
                    missing: "generated photo",
                })?;
                let report = report.ok_or(TransitionError::Missing {
                    action: ACTION,
                    missing: "validation report",
                })?;
                Ok(PipelineState::Result {
                    upload,
                    photo,
                    report,
                })
            }
            other => Err(other.illegal(ACTION)),
        }
    }

    /// Any failure unwinds to `upload`, dropping every partial artifact.
    pub fn fail(self, message: impl Into<String>) -> Self {
        PipelineState::Upload {
            error: Some(message.into()),
        }
    }

    pub fn reset(self) -> Result<Self, TransitionError> {
        match self {
            PipelineState::Processing { .. } => Err(self.illegal("reset")),
            _ => Ok(PipelineState::initial()),
        }
    }

    fn illegal(&self, action: &'static str) -> TransitionError {
        TransitionError::Illegal {
            action,
            from: self.describe(),
        }
    }
}
