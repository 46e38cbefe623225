mod photo;
mod state;

pub use photo::{
    download_extension, download_filename, encode_data_url, split_data_url, GeneratedPhoto,
    UploadedImage, ValidationReport, DOWNLOAD_STEM,
};
pub use state::{PipelineState, ProcessingStage, Step, TransitionError, PROCESSING_STAGES};
