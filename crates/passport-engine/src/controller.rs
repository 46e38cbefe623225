use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use passport_contracts::pipeline::{PipelineState, ProcessingStage, TransitionError};
use uuid::Uuid;

use crate::error_chain_text;
use crate::ingest::{ingest, SourceFile};
use crate::pacing::{Pacer, Pacing, ThreadPacer};
use crate::studio::{PhotoGenerator, PhotoValidator, Studio};
use crate::PipelineError;

const CAUSE_MAX_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StageEntered(ProcessingStage),
    PreviewReady,
    Completed,
    Failed,
    Reset,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::StageEntered(stage) => write!(f, "stage_entered:{stage}"),
            Transition::PreviewReady => f.write_str("preview_ready"),
            Transition::Completed => f.write_str("completed"),
            Transition::Failed => f.write_str("failed"),
            Transition::Reset => f.write_str("reset"),
        }
    }
}

/// Emitted after every transition with the snapshot it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub transition: Transition,
    pub state: PipelineState,
}

pub trait PipelineObserver: Send + Sync {
    fn on_state_change(&self, change: &StateChange);
}

impl<F> PipelineObserver for F
where
    F: Fn(&StateChange) + Send + Sync,
{
    fn on_state_change(&self, change: &StateChange) {
        self(change)
    }
}

/// Sequences one photo through detection, generation, validation and the
/// result reveal.
///
/// The controller is the only writer of the pipeline state. Observers are
/// called after the state lock is released, so they may read the state or
/// call `start`/`reset` themselves; while a run is in flight both are
/// rejected with [`PipelineError::Conflict`].
pub struct StageController {
    generator: Box<dyn PhotoGenerator>,
    validator: Box<dyn PhotoValidator>,
    pacer: Box<dyn Pacer>,
    pacing: Pacing,
    state: Mutex<PipelineState>,
    observers: Mutex<Vec<Arc<dyn PipelineObserver>>>,
}

impl StageController {
    pub fn new<G, V>(generator: G, validator: V) -> Self
    where
        G: PhotoGenerator + 'static,
        V: PhotoValidator + 'static,
    {
        Self {
            generator: Box::new(generator),
            validator: Box::new(validator),
            pacer: Box::new(ThreadPacer::new()),
            pacing: Pacing::default(),
            state: Mutex::new(PipelineState::initial()),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn from_studio(studio: Arc<dyn Studio>) -> Self {
        Self::new(Arc::clone(&studio), studio)
    }

    pub fn with_pacer<P: Pacer + 'static>(mut self, pacer: P) -> Self {
        self.pacer = Box::new(pacer);
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn subscribe<O: PipelineObserver + 'static>(&self, observer: O) {
        self.lock_observers().push(Arc::new(observer));
    }

    pub fn state(&self) -> PipelineState {
        self.lock_state().clone()
    }

    /// Runs the whole pipeline for `source` and returns the final snapshot.
    ///
    /// A failing stage is not an `Err`: the run unwinds to the upload step
    /// with an error message and that snapshot is returned. `Err` is only
    /// returned when another run is already in flight.
    pub fn start(&self, source: &SourceFile) -> Result<PipelineState, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "pipeline_run",
            run_id = %run_id,
            photo = %source.path.display()
        );
        let _entered = span.enter();

        let started = {
            let mut state = self.lock_state();
            if state.is_processing() {
                tracing::warn!(current = %state.describe(), "rejecting concurrent start");
                return Err(PipelineError::Conflict);
            }
            let next = state.clone().begin()?;
            *state = next.clone();
            next
        };

        // Observers run inside the guard too; the state is already processing.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.notify(Transition::StageEntered(ProcessingStage::Detecting), started);
            self.run_stages(source)
        }))
        .unwrap_or_else(|payload| Err(PipelineError::Unknown(panic_message(payload.as_ref()))));

        match outcome {
            Ok(state) => Ok(state),
            Err(err) => {
                let message = err.user_message();
                tracing::error!(kind = err.kind(), error = %message, "pipeline run failed");
                let failed = {
                    let mut state = self.lock_state();
                    let next = state.clone().fail(message);
                    *state = next.clone();
                    next
                };
                self.notify(Transition::Failed, failed.clone());
                Ok(failed)
            }
        }
    }

    /// Returns to an empty upload step. Only legal outside of a run.
    pub fn reset(&self) -> Result<PipelineState, PipelineError> {
        let next = {
            let mut state = self.lock_state();
            if state.is_processing() {
                return Err(PipelineError::Conflict);
            }
            let next = state.clone().reset()?;
            *state = next.clone();
            next
        };
        tracing::info!("pipeline reset");
        self.notify(Transition::Reset, next.clone());
        Ok(next)
    }

    fn run_stages(&self, source: &SourceFile) -> Result<PipelineState, PipelineError> {
        let upload = ingest(source)?;
        let upload_base64 = upload.base64.clone();
        self.advance(Transition::PreviewReady, |state| state.with_upload(upload))?;

        self.pacer.pause(ProcessingStage::Detecting, self.pacing.detect);
        self.advance(
            Transition::StageEntered(ProcessingStage::Generating),
            PipelineState::detection_finished,
        )?;

        tracing::debug!(mime_type = %source.mime_type, "requesting passport photo");
        let photo = self
            .generator
            .generate(&upload_base64, &source.mime_type)
            .map_err(|err| PipelineError::Generation(error_chain_text(&err, CAUSE_MAX_CHARS)))?;
        let (photo_base64, photo_mime_type) = (photo.base64.clone(), photo.mime_type.clone());
        self.advance(
            Transition::StageEntered(ProcessingStage::Validating),
            |state| state.photo_generated(photo),
        )?;

        tracing::debug!(mime_type = %photo_mime_type, "requesting compliance check");
        let report = self
            .validator
            .validate(&photo_base64, &photo_mime_type)
            .map_err(|err| PipelineError::Validation(error_chain_text(&err, CAUSE_MAX_CHARS)))?;
        self.advance(
            Transition::StageEntered(ProcessingStage::Done),
            |state| state.report_received(report),
        )?;

        self.pacer.pause(ProcessingStage::Done, self.pacing.reveal);
        self.advance(Transition::Completed, PipelineState::complete)
    }

    fn advance<F>(&self, transition: Transition, apply: F) -> Result<PipelineState, PipelineError>
    where
        F: FnOnce(PipelineState) -> Result<PipelineState, TransitionError>,
    {
        let next = {
            let mut state = self.lock_state();
            let next = apply(state.clone())?;
            *state = next.clone();
            next
        };
        tracing::info!(%transition, state = %next.describe(), "pipeline transition");
        self.notify(transition, next.clone());
        Ok(next)
    }

    fn notify(&self, transition: Transition, state: PipelineState) {
        let observers = self.lock_observers().clone();
        if observers.is_empty() {
            return;
        }
        let change = StateChange { transition, state };
        for observer in observers {
            observer.on_state_change(&change);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_observers(&self) -> MutexGuard<'_, Vec<Arc<dyn PipelineObserver>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "An unknown error occurred.".to_string()
}
