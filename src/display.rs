use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use thiserror::Error;

use crate::types::AnnotatedFrame;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("display window is closed")]
pub struct DisplayClosed;

/// Where annotated frames go and where key presses come from.
pub trait DisplaySurface {
    fn show(&mut self, frame: AnnotatedFrame) -> Result<(), DisplayClosed>;

    /// Waits at most `timeout` for a key press.
    fn poll_key(&mut self, timeout: Duration) -> Result<Option<char>, DisplayClosed>;
}

/// Capture-side half of the window link.
pub struct WindowDisplay {
    frame_tx: Sender<AnnotatedFrame>,
    key_rx: Receiver<char>,
}

/// Window-side half: the view drains frames and forwards key presses.
pub struct WindowEndpoint {
    pub frame_rx: Receiver<AnnotatedFrame>,
    pub key_tx: Sender<char>,
}

pub fn window_link() -> (WindowDisplay, WindowEndpoint) {
    let (frame_tx, frame_rx) = bounded(1);
    let (key_tx, key_rx) = bounded(16);
    (
        WindowDisplay { frame_tx, key_rx },
        WindowEndpoint { frame_rx, key_tx },
    )
}

impl DisplaySurface for WindowDisplay {
    fn show(&mut self, frame: AnnotatedFrame) -> Result<(), DisplayClosed> {
        match self.frame_tx.try_send(frame) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(DisplayClosed),
        }
    }

    fn poll_key(&mut self, timeout: Duration) -> Result<Option<char>, DisplayClosed> {
        match self.key_rx.recv_timeout(timeout) {
            Ok(key) => Ok(Some(key)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(DisplayClosed),
        }
    }
}
