use crate::{
    config::CaptureSettings,
    console,
    display::DisplaySurface,
    pipeline::{analyzer::InferenceWorker, camera::FrameSource, overlay},
    shared::SharedState,
};

pub const EXIT_KEY: char = 'q';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    QuitKey,
    WindowClosed,
    Interrupted,
    /// The device stopped delivering frames.
    StreamEnded,
}

/// Capture, publish, overlay, show and poll until something ends the session.
///
/// The overlay always reflects whichever result the worker published last,
/// never waiting for a fresh one.
pub fn run_capture_loop<S, D>(
    source: &mut S,
    display: &mut D,
    state: &SharedState,
    settings: &CaptureSettings,
) -> LoopExit
where
    S: FrameSource,
    D: DisplaySurface,
{
    loop {
        if state.interrupt_requested() {
            return LoopExit::Interrupted;
        }

        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("frame read failed: {err:?}");
                console::print_frame_read_failure();
                return LoopExit::StreamEnded;
            }
        };

        state.publish_frame(frame.clone());
        let result = state.snapshot_result();

        if display.show(overlay::annotate(frame, &result)).is_err() {
            return LoopExit::WindowClosed;
        }

        match display.poll_key(settings.key_poll) {
            Ok(Some(EXIT_KEY)) => return LoopExit::QuitKey,
            Ok(_) => {}
            Err(_) => return LoopExit::WindowClosed,
        }
    }
}

/// Runs the loop, then stops and joins the worker before the device is
/// released.
pub fn run_session<S, D>(
    mut source: S,
    display: &mut D,
    state: &SharedState,
    worker: InferenceWorker,
    settings: &CaptureSettings,
) -> LoopExit
where
    S: FrameSource,
    D: DisplaySurface,
{
    let exit = run_capture_loop(&mut source, display, state, settings);
    log::info!("capture loop ended: {exit:?}");

    state.stop();
    worker.stop();
    source.release();
    exit
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::{Duration, Instant},
    };

    use anyhow::{Result, anyhow};
    use rstest::rstest;

    use super::*;
    use crate::{
        config::WorkerSettings,
        display::DisplayClosed,
        pipeline::analyzer::{
            start_worker,
            tests::{ScriptedAnalyzer, happy_woman},
        },
        types::{AnnotatedFrame, FaceAttributes, Frame},
    };

    struct FakeSource {
        frames: VecDeque<Frame>,
        endless: bool,
        released: Arc<AtomicBool>,
        worker_gone_at_release: Option<Arc<AtomicBool>>,
    }

    impl FakeSource {
        fn scripted(count: usize) -> Self {
            Self {
                frames: (0..count).map(|i| tiny_frame(i as u8)).collect(),
                endless: false,
                released: Arc::new(AtomicBool::new(false)),
                worker_gone_at_release: None,
            }
        }

        fn endless() -> Self {
            Self {
                endless: true,
                ..Self::scripted(0)
            }
        }
    }

    impl FrameSource for FakeSource {
        fn read_frame(&mut self) -> Result<Frame> {
            if self.endless {
                return Ok(tiny_frame(0));
            }
            self.frames
                .pop_front()
                .ok_or_else(|| anyhow!("stream ended"))
        }

        fn release(self) {
            if let Some(worker_gone) = &self.worker_gone_at_release {
                assert!(worker_gone.load(Ordering::SeqCst));
            }
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeDisplay {
        shown: Vec<AnnotatedFrame>,
        keys: VecDeque<char>,
        closed: bool,
        on_show: Option<Box<dyn FnMut(usize)>>,
    }

    impl DisplaySurface for FakeDisplay {
        fn show(&mut self, frame: AnnotatedFrame) -> Result<(), DisplayClosed> {
            if self.closed {
                return Err(DisplayClosed);
            }
            self.shown.push(frame);
            if let Some(hook) = self.on_show.as_mut() {
                hook(self.shown.len());
            }
            Ok(())
        }

        fn poll_key(&mut self, _timeout: Duration) -> Result<Option<char>, DisplayClosed> {
            Ok(self.keys.pop_front())
        }
    }

    fn tiny_frame(fill: u8) -> Frame {
        Frame::new(vec![fill; 4 * 3 * 3], 4, 3)
    }

    fn settings() -> CaptureSettings {
        CaptureSettings {
            key_poll: Duration::from_millis(1),
            ..CaptureSettings::default()
        }
    }

    fn worker_settings() -> WorkerSettings {
        WorkerSettings {
            analysis_size: (8, 6),
            idle: Duration::from_millis(1),
            ..WorkerSettings::default()
        }
    }

    #[test]
    fn test_quit_key_ends_loop() {
        let state = SharedState::new();
        let mut source = FakeSource::endless();
        let mut display = FakeDisplay {
            keys: VecDeque::from(vec!['x', 'Q', 'q']),
            ..FakeDisplay::default()
        };

        let exit = run_capture_loop(&mut source, &mut display, &state, &settings());

        assert_eq!(exit, LoopExit::QuitKey);
        assert_eq!(display.shown.len(), 3);
    }

    #[test]
    fn test_stream_end_stops_loop() {
        let state = SharedState::new();
        let mut source = FakeSource::scripted(2);
        let mut display = FakeDisplay::default();

        let exit = run_capture_loop(&mut source, &mut display, &state, &settings());

        assert_eq!(exit, LoopExit::StreamEnded);
        assert_eq!(display.shown.len(), 2);
        assert_eq!(state.snapshot_frame().map(|f| f.rgb[0]), Some(1));
    }

    #[test]
    fn test_interrupt_is_checked_each_iteration() {
        let state = SharedState::new();
        state.request_interrupt();
        let mut source = FakeSource::endless();
        let mut display = FakeDisplay::default();

        let exit = run_capture_loop(&mut source, &mut display, &state, &settings());

        assert_eq!(exit, LoopExit::Interrupted);
        assert!(display.shown.is_empty());
    }

    #[test]
    fn test_closed_window_ends_loop() {
        let state = SharedState::new();
        let mut source = FakeSource::endless();
        let mut display = FakeDisplay {
            closed: true,
            ..FakeDisplay::default()
        };

        let exit = run_capture_loop(&mut source, &mut display, &state, &settings());
        assert_eq!(exit, LoopExit::WindowClosed);
    }

    #[test]
    fn test_overlay_uses_latest_published_result() {
        let state = Arc::new(SharedState::new());
        let mut source = FakeSource::scripted(3);
        let hook_state = state.clone();
        let mut display = FakeDisplay {
            on_show: Some(Box::new(move |shown| {
                if shown == 1 {
                    hook_state.publish_result(happy_woman());
                }
            })),
            ..FakeDisplay::default()
        };

        run_capture_loop(&mut source, &mut display, &state, &settings());

        assert_eq!(display.shown[0].overlay.text, overlay::NO_RESULT_TEXT);
        assert_eq!(
            display.shown[1].overlay.text,
            overlay::overlay_for(&happy_woman()).text
        );
    }

    #[test]
    fn test_cleared_result_returns_to_analyzing() {
        let state = Arc::new(SharedState::new());
        state.publish_result(happy_woman());
        let mut source = FakeSource::scripted(2);
        let hook_state = state.clone();
        let mut display = FakeDisplay {
            on_show: Some(Box::new(move |_| {
                hook_state.publish_result(FaceAttributes::empty())
            })),
            ..FakeDisplay::default()
        };

        run_capture_loop(&mut source, &mut display, &state, &settings());

        assert!(display.shown[0].overlay.text.starts_with("Emotion: happy"));
        assert_eq!(display.shown[1].overlay.text, overlay::NO_RESULT_TEXT);
    }

    #[test]
    fn test_session_joins_worker_before_release() {
        let state = Arc::new(SharedState::new());
        let analyzer = ScriptedAnalyzer::always(happy_woman());
        let dropped = analyzer.dropped.clone();
        let worker = start_worker(move |_| Ok(analyzer), state.clone(), worker_settings()).unwrap();

        let mut source = FakeSource::endless();
        source.worker_gone_at_release = Some(dropped.clone());
        let released = source.released.clone();

        // Keep capturing until the worker has published, then quit.
        let deadline = Instant::now() + Duration::from_secs(5);
        let poll_state = state.clone();
        let mut display = FakeDisplay {
            on_show: Some(Box::new(move |_| {
                while poll_state.snapshot_result().is_empty() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(1));
                }
            })),
            keys: VecDeque::from(vec!['q']),
            ..FakeDisplay::default()
        };

        let exit = run_session(source, &mut display, &state, worker, &settings());

        assert_eq!(exit, LoopExit::QuitKey);
        assert!(!state.is_running());
        assert!(dropped.load(Ordering::SeqCst));
        assert!(released.load(Ordering::SeqCst));
    }

    #[derive(Clone, Copy, Debug)]
    enum Ending {
        StreamRunsOut,
        CtrlC,
        QuitKey,
    }

    #[rstest]
    #[case::failed_read(Ending::StreamRunsOut, LoopExit::StreamEnded)]
    #[case::interrupt(Ending::CtrlC, LoopExit::Interrupted)]
    #[case::quit_key(Ending::QuitKey, LoopExit::QuitKey)]
    fn test_every_exit_runs_full_cleanup(#[case] ending: Ending, #[case] expected: LoopExit) {
        let state = Arc::new(SharedState::new());
        let analyzer = ScriptedAnalyzer::always(happy_woman());
        let dropped = analyzer.dropped.clone();
        let worker = start_worker(move |_| Ok(analyzer), state.clone(), worker_settings()).unwrap();

        let mut source = match ending {
            Ending::StreamRunsOut => FakeSource::scripted(3),
            Ending::CtrlC | Ending::QuitKey => FakeSource::endless(),
        };
        source.worker_gone_at_release = Some(dropped.clone());
        let released = source.released.clone();

        let mut display = FakeDisplay::default();
        match ending {
            Ending::CtrlC => state.request_interrupt(),
            Ending::QuitKey => display.keys = VecDeque::from(vec!['a', 'q']),
            Ending::StreamRunsOut => {}
        }

        let exit = run_session(source, &mut display, &state, worker, &settings());

        assert_eq!(exit, expected);
        assert!(!state.is_running());
        assert!(dropped.load(Ordering::SeqCst));
        assert!(released.load(Ordering::SeqCst));
    }
}
