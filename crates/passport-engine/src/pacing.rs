use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use passport_contracts::pipeline::ProcessingStage;

/// Fixed delays that give the simulated stages a perceptible duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub detect: Duration,
    pub reveal: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            detect: Duration::from_millis(1500),
            reveal: Duration::from_millis(1000),
        }
    }
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            detect: Duration::ZERO,
            reveal: Duration::ZERO,
        }
    }
}

/// Suspension point for the pacing delays. Implementations decide how (or
/// whether) to wait.
pub trait Pacer: Send + Sync {
    fn pause(&self, stage: ProcessingStage, duration: Duration);
}

/// Waits on the calling thread. Each wait can be cut short from another
/// thread through a [`PacerHandle`].
pub struct ThreadPacer {
    skip_rx: Mutex<Receiver<()>>,
    skip_tx: Sender<()>,
}

#[derive(Debug, Clone)]
pub struct PacerHandle {
    skip_tx: Sender<()>,
}

impl PacerHandle {
    /// Ends the wait in progress. A skip sent while no wait is running is
    /// dropped when the next wait starts.
    pub fn skip(&self) {
        let _ = self.skip_tx.send(());
    }
}

impl Default for ThreadPacer {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPacer {
    pub fn new() -> Self {
        let (skip_tx, skip_rx) = mpsc::channel();
        Self {
            skip_rx: Mutex::new(skip_rx),
            skip_tx,
        }
    }

    pub fn handle(&self) -> PacerHandle {
        PacerHandle {
            skip_tx: self.skip_tx.clone(),
        }
    }
}

impl Pacer for ThreadPacer {
    fn pause(&self, stage: ProcessingStage, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let Ok(skip_rx) = self.skip_rx.lock() else {
            std::thread::sleep(duration);
            return;
        };
        while skip_rx.try_recv().is_ok() {}
        let started = Instant::now();
        match skip_rx.recv_timeout(duration) {
            Ok(()) => tracing::debug!(
                stage = %stage,
                waited_ms = started.elapsed().as_millis() as u64,
                "pacing delay skipped"
            ),
            // The pacer owns a sender, so the channel cannot disconnect.
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
        }
    }
}

/// Never waits; remembers what was asked for.
#[derive(Debug, Default)]
pub struct InstantPacer {
    pauses: Mutex<Vec<(ProcessingStage, Duration)>>,
}

impl InstantPacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pauses(&self) -> Vec<(ProcessingStage, Duration)> {
        self.pauses
            .lock()
            .map(|pauses| pauses.clone())
            .unwrap_or_default()
    }
}

impl Pacer for InstantPacer {
    fn pause(&self, stage: ProcessingStage, duration: Duration) {
        if let Ok(mut pauses) = self.pauses.lock() {
            pauses.push((stage, duration));
        }
    }
}

impl<T: Pacer + ?Sized> Pacer for std::sync::Arc<T> {
    fn pause(&self, stage: ProcessingStage, duration: Duration) {
        (**self).pause(stage, duration)
    }
}
