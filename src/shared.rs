use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use crate::types::{FaceAttributes, Frame};

/// State shared by the capture loop and the analysis worker.
///
/// The frame slot and the result slot have separate locks, and both are only
/// ever read by cloning the value out, so no lock is held across decoding,
/// inference or display.
#[derive(Debug)]
pub struct SharedState {
    latest_frame: Mutex<Option<Frame>>,
    latest_result: Mutex<FaceAttributes>,
    running: AtomicBool,
    interrupted: AtomicBool,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            latest_frame: Mutex::new(None),
            latest_result: Mutex::new(FaceAttributes::empty()),
            running: AtomicBool::new(true),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Replaces whatever frame was published before.
    pub fn publish_frame(&self, frame: Frame) {
        *lock(&self.latest_frame) = Some(frame);
    }

    pub fn snapshot_frame(&self) -> Option<Frame> {
        lock(&self.latest_frame).clone()
    }

    pub fn publish_result(&self, result: FaceAttributes) {
        *lock(&self.latest_result) = result;
    }

    pub fn snapshot_result(&self) -> FaceAttributes {
        lock(&self.latest_result).clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Called from the Ctrl-C handler; the capture loop picks it up.
    pub fn request_interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn interrupt_requested(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

// Each slot holds a plain value that is replaced in one assignment, so a
// poisoned lock still guards a complete value.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
