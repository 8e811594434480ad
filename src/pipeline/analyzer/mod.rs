pub mod common;
mod ort;

use std::{sync::Arc, thread};

use anyhow::Context;
use thiserror::Error;

use crate::{
    config::WorkerSettings,
    shared::SharedState,
    types::{AnalysisRequest, Attribute, FaceAttributes, Frame},
};

pub use self::ort::OrtFaceAnalyzer;

/// Ways a single analysis attempt can come up empty. None of these leave the
/// worker: they all collapse into [`FaceAttributes::empty`].
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("frame could not be prepared for analysis: {0:#}")]
    InvalidFrame(anyhow::Error),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("model returned no detections")]
    EmptyDetections,
    #[error("model left {0:?} undetermined")]
    IncompleteRecord(Attribute),
    #[error(transparent)]
    Model(#[from] anyhow::Error),
}

/// The pretrained attribute model. Returns one record per detected face,
/// dominant face first.
pub trait FaceAnalyzer: Send {
    fn analyze(
        &mut self,
        image: &Frame,
        request: &AnalysisRequest,
    ) -> Result<Vec<FaceAttributes>, AnalysisError>;

    /// Whether the loaded models can produce `attribute` at all.
    fn supports(&self, _attribute: Attribute) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing captured yet; the model was not called.
    NoFrame,
    Published,
    Cleared,
}

pub fn run_cycle(
    analyzer: &mut dyn FaceAnalyzer,
    state: &SharedState,
    settings: &WorkerSettings,
) -> CycleOutcome {
    let Some(frame) = state.snapshot_frame() else {
        return CycleOutcome::NoFrame;
    };

    let result = match analyze_dominant(analyzer, &frame, settings) {
        Ok(record) => record,
        Err(err) => {
            log::debug!("analysis cycle produced no result: {err}");
            FaceAttributes::empty()
        }
    };

    log::trace!(
        "analysed frame captured {:?} ago",
        frame.timestamp.elapsed()
    );

    let outcome = if result.is_empty() {
        CycleOutcome::Cleared
    } else {
        CycleOutcome::Published
    };
    state.publish_result(result);
    outcome
}

/// Only complete records get through: every requested attribute must be set.
fn analyze_dominant(
    analyzer: &mut dyn FaceAnalyzer,
    frame: &Frame,
    settings: &WorkerSettings,
) -> Result<FaceAttributes, AnalysisError> {
    let resized =
        common::resize_frame(frame, settings.analysis_size).map_err(AnalysisError::InvalidFrame)?;
    let mut record = analyzer
        .analyze(&resized, &settings.request)?
        .into_iter()
        .next()
        .ok_or(AnalysisError::EmptyDetections)?;

    if let Some(missing) = settings
        .request
        .attributes
        .iter()
        .find(|attribute| !record.has(**attribute))
    {
        return Err(AnalysisError::IncompleteRecord(*missing));
    }

    // Report the face box in the coordinates of the captured frame.
    record.region = record
        .region
        .map(|region| region.rescale(settings.analysis_size, (frame.width, frame.height)));
    Ok(record)
}

/// Narrows `request` to what the analyzer can actually answer.
pub fn supported_request(analyzer: &dyn FaceAnalyzer, request: &AnalysisRequest) -> AnalysisRequest {
    AnalysisRequest {
        attributes: request
            .attributes
            .iter()
            .copied()
            .filter(|attribute| analyzer.supports(*attribute))
            .collect(),
        enforce_detection: request.enforce_detection,
    }
}

fn run_worker_loop(analyzer: &mut dyn FaceAnalyzer, state: &SharedState, settings: &WorkerSettings) {
    let settings = WorkerSettings {
        request: supported_request(analyzer, &settings.request),
        ..settings.clone()
    };
    log::info!("analysing {:?}", settings.request.attributes);

    let mut cycles: u64 = 0;
    while state.is_running() {
        if run_cycle(analyzer, state, &settings) != CycleOutcome::NoFrame {
            cycles += 1;
        }
        thread::sleep(settings.idle);
    }
    log::info!("analysis worker finished after {cycles} cycles");
}

/// Without models there is nothing to analyse; keep the overlay on its
/// no-result text until shutdown.
fn idle_until_stopped(state: &SharedState, settings: &WorkerSettings) {
    state.publish_result(FaceAttributes::empty());
    while state.is_running() {
        thread::sleep(settings.idle);
    }
}

/// Handle to the long-lived analysis thread.
#[derive(Debug)]
pub struct InferenceWorker {
    state: Arc<SharedState>,
    handle: Option<thread::JoinHandle<()>>,
}

impl InferenceWorker {
    /// Clears the running flag and waits for the current cycle to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.state.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("analysis worker panicked");
            }
        }
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns the worker. The analyzer is built on the worker thread so that model
/// download and session setup never delay the capture loop. `make_analyzer`
/// gets the shared state so it can give up once shutdown starts; if it fails
/// the worker idles with an empty result until stopped.
pub fn start_worker<F, A>(
    make_analyzer: F,
    state: Arc<SharedState>,
    settings: WorkerSettings,
) -> anyhow::Result<InferenceWorker>
where
    F: FnOnce(&SharedState) -> anyhow::Result<A> + Send + 'static,
    A: FaceAnalyzer + 'static,
{
    let worker_state = state.clone();
    let handle = thread::Builder::new()
        .name("face-analysis".into())
        .spawn(move || match make_analyzer(&worker_state) {
            Ok(mut analyzer) => run_worker_loop(&mut analyzer, &worker_state, &settings),
            Err(err) if !worker_state.is_running() => {
                log::info!("model loading abandoned at shutdown: {err:#}");
            }
            Err(err) => {
                log::error!("failed to load face analysis models: {err:?}");
                idle_until_stopped(&worker_state, &settings);
            }
        })
        .context("failed to spawn analysis worker")?;

    Ok(InferenceWorker {
        state,
        handle: Some(handle),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::{Duration, Instant},
    };

    use anyhow::anyhow;

    use super::*;
    use crate::types::FaceRegion;

    /// Replays scripted responses, repeating the last one once exhausted.
    pub(crate) struct ScriptedAnalyzer {
        responses: VecDeque<Result<Vec<FaceAttributes>, AnalysisError>>,
        pub(crate) calls: Arc<AtomicUsize>,
        pub(crate) seen_sizes: Arc<Mutex<Vec<(u32, u32)>>>,
        pub(crate) dropped: Arc<AtomicBool>,
        unsupported: Vec<Attribute>,
    }

    impl ScriptedAnalyzer {
        pub(crate) fn new(responses: Vec<Result<Vec<FaceAttributes>, AnalysisError>>) -> Self {
            Self {
                responses: responses.into(),
                calls: Arc::new(AtomicUsize::new(0)),
                seen_sizes: Arc::new(Mutex::new(Vec::new())),
                dropped: Arc::new(AtomicBool::new(false)),
                unsupported: Vec::new(),
            }
        }

        pub(crate) fn without(mut self, attribute: Attribute) -> Self {
            self.unsupported.push(attribute);
            self
        }

        pub(crate) fn always(record: FaceAttributes) -> Self {
            Self::new(vec![Ok(vec![record])])
        }
    }

    impl FaceAnalyzer for ScriptedAnalyzer {
        fn analyze(
            &mut self,
            image: &Frame,
            _request: &AnalysisRequest,
        ) -> Result<Vec<FaceAttributes>, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_sizes
                .lock()
                .unwrap()
                .push((image.width, image.height));
            if self.responses.len() > 1 {
                return self.responses.pop_front().unwrap();
            }
            match self.responses.front() {
                Some(Ok(records)) => Ok(records.clone()),
                Some(Err(_)) => Err(AnalysisError::Model(anyhow!("scripted failure"))),
                None => Ok(Vec::new()),
            }
        }

        fn supports(&self, attribute: Attribute) -> bool {
            !self.unsupported.contains(&attribute)
        }
    }

    impl Drop for ScriptedAnalyzer {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn happy_woman() -> FaceAttributes {
        FaceAttributes {
            dominant_emotion: Some("happy".into()),
            dominant_gender: Some("Woman".into()),
            dominant_race: Some("asian".into()),
            age: Some(29),
            region: None,
        }
    }

    fn small_settings() -> WorkerSettings {
        WorkerSettings {
            analysis_size: (12, 10),
            idle: Duration::from_millis(1),
            ..WorkerSettings::default()
        }
    }

    fn publish_blank_frame(state: &SharedState) {
        state.publish_frame(Frame::new(vec![128; 16 * 9 * 3], 16, 9));
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_no_frame_skips_model_and_keeps_result() {
        let state = SharedState::new();
        let previous = FaceAttributes {
            dominant_emotion: Some("neutral".into()),
            ..FaceAttributes::empty()
        };
        state.publish_result(previous.clone());
        let mut analyzer = ScriptedAnalyzer::always(happy_woman());

        let outcome = run_cycle(&mut analyzer, &state, &small_settings());

        assert_eq!(outcome, CycleOutcome::NoFrame);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.snapshot_result(), previous);
    }

    #[test]
    fn test_no_frame_at_startup_leaves_empty_result() {
        let state = SharedState::new();
        let mut analyzer = ScriptedAnalyzer::always(happy_woman());
        run_cycle(&mut analyzer, &state, &small_settings());
        assert!(state.snapshot_result().is_empty());
    }

    #[test]
    fn test_success_publishes_first_record() {
        let state = SharedState::new();
        publish_blank_frame(&state);
        let second = FaceAttributes {
            dominant_emotion: Some("angry".into()),
            ..FaceAttributes::empty()
        };
        let mut analyzer = ScriptedAnalyzer::new(vec![Ok(vec![happy_woman(), second])]);

        let outcome = run_cycle(&mut analyzer, &state, &small_settings());

        assert_eq!(outcome, CycleOutcome::Published);
        assert_eq!(state.snapshot_result(), happy_woman());
    }

    #[test]
    fn test_model_sees_analysis_resolution() {
        let state = SharedState::new();
        publish_blank_frame(&state);
        let mut analyzer = ScriptedAnalyzer::always(happy_woman());
        run_cycle(&mut analyzer, &state, &small_settings());
        assert_eq!(*analyzer.seen_sizes.lock().unwrap(), vec![(12, 10)]);
    }

    #[test]
    fn test_region_is_reported_in_frame_pixels() {
        let state = SharedState::new();
        publish_blank_frame(&state);
        let mut analyzer = ScriptedAnalyzer::always(FaceAttributes {
            region: Some(FaceRegion {
                x: 3,
                y: 0,
                w: 6,
                h: 10,
            }),
            ..happy_woman()
        });

        run_cycle(&mut analyzer, &state, &small_settings());

        assert_eq!(
            state.snapshot_result().region,
            Some(FaceRegion {
                x: 4,
                y: 0,
                w: 8,
                h: 9
            })
        );
    }

    #[test]
    fn test_incomplete_record_is_never_published() {
        let state = SharedState::new();
        publish_blank_frame(&state);
        state.publish_result(happy_woman());
        let mut analyzer = ScriptedAnalyzer::always(FaceAttributes {
            dominant_emotion: Some("happy".into()),
            ..FaceAttributes::empty()
        });

        let outcome = run_cycle(&mut analyzer, &state, &small_settings());

        assert_eq!(outcome, CycleOutcome::Cleared);
        assert_eq!(state.snapshot_result(), FaceAttributes::empty());
    }

    #[test]
    fn test_unrequested_attribute_may_be_missing() {
        let state = SharedState::new();
        publish_blank_frame(&state);
        let without_race = FaceAttributes {
            dominant_race: None,
            ..happy_woman()
        };
        let mut analyzer = ScriptedAnalyzer::always(without_race.clone()).without(Attribute::Race);
        let settings = WorkerSettings {
            request: supported_request(&analyzer, &AnalysisRequest::default()),
            ..small_settings()
        };

        let outcome = run_cycle(&mut analyzer, &state, &settings);

        assert_eq!(outcome, CycleOutcome::Published);
        assert_eq!(state.snapshot_result(), without_race);
    }

    #[test]
    fn test_supported_request_drops_unloaded_attributes() {
        let analyzer = ScriptedAnalyzer::always(happy_woman()).without(Attribute::Race);
        let request = supported_request(
            &analyzer,
            &AnalysisRequest {
                attributes: Attribute::ALL.to_vec(),
                enforce_detection: true,
            },
        );
        assert_eq!(
            request.attributes,
            vec![Attribute::Emotion, Attribute::Age, Attribute::Gender]
        );
        assert!(request.enforce_detection);
    }

    #[test]
    fn test_failures_clear_previous_result() {
        let failures: Vec<Result<Vec<FaceAttributes>, AnalysisError>> = vec![
            Err(AnalysisError::Model(anyhow!("model exploded"))),
            Err(AnalysisError::NoFaceDetected),
            Ok(Vec::new()),
        ];

        for failure in failures {
            let state = SharedState::new();
            publish_blank_frame(&state);
            state.publish_result(happy_woman());
            let mut analyzer = ScriptedAnalyzer::new(vec![failure]);

            let outcome = run_cycle(&mut analyzer, &state, &small_settings());

            assert_eq!(outcome, CycleOutcome::Cleared);
            assert_eq!(state.snapshot_result(), FaceAttributes::empty());
        }
    }

    #[test]
    fn test_malformed_frame_clears_without_model_call() {
        let state = SharedState::new();
        state.publish_result(happy_woman());
        state.publish_frame(Frame::new(vec![0; 7], 16, 9));
        let mut analyzer = ScriptedAnalyzer::always(happy_woman());

        let outcome = run_cycle(&mut analyzer, &state, &small_settings());

        assert_eq!(outcome, CycleOutcome::Cleared);
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
        assert!(state.snapshot_result().is_empty());
    }

    #[test]
    fn test_worker_publishes_and_stops() {
        let state = Arc::new(SharedState::new());
        let analyzer = ScriptedAnalyzer::always(happy_woman());
        let calls = analyzer.calls.clone();
        let dropped = analyzer.dropped.clone();

        let worker = start_worker(move |_| Ok(analyzer), state.clone(), small_settings()).unwrap();
        publish_blank_frame(&state);

        assert!(wait_until(|| state.snapshot_result() == happy_woman()));

        worker.stop();
        assert!(!state.is_running());
        assert!(dropped.load(Ordering::SeqCst));

        let calls_after_stop = calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::SeqCst), calls_after_stop);
    }

    #[test]
    fn test_worker_idles_without_frames() {
        let state = Arc::new(SharedState::new());
        let analyzer = ScriptedAnalyzer::always(happy_woman());
        let calls = analyzer.calls.clone();

        let worker = start_worker(move |_| Ok(analyzer), state.clone(), small_settings()).unwrap();
        thread::sleep(Duration::from_millis(20));
        worker.stop();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(state.snapshot_result().is_empty());
    }

    #[test]
    fn test_worker_survives_model_load_failure() {
        let state = Arc::new(SharedState::new());
        state.publish_result(happy_woman());
        publish_blank_frame(&state);

        let worker = start_worker(
            |_: &SharedState| -> anyhow::Result<ScriptedAnalyzer> { Err(anyhow!("no model files")) },
            state.clone(),
            small_settings(),
        )
        .unwrap();

        assert!(wait_until(|| state.snapshot_result().is_empty()));
        worker.stop();
    }

    #[test]
    fn test_worker_without_race_model_publishes_other_attributes() {
        let state = Arc::new(SharedState::new());
        let without_race = FaceAttributes {
            dominant_race: None,
            ..happy_woman()
        };
        let analyzer = ScriptedAnalyzer::always(without_race.clone()).without(Attribute::Race);

        let worker = start_worker(move |_| Ok(analyzer), state.clone(), small_settings()).unwrap();
        publish_blank_frame(&state);

        assert!(wait_until(|| state.snapshot_result() == without_race));
        worker.stop();
    }

    #[test]
    fn test_stop_abandons_slow_model_loading() {
        let state = Arc::new(SharedState::new());
        let worker = start_worker(
            |state: &SharedState| -> anyhow::Result<ScriptedAnalyzer> {
                let deadline = Instant::now() + Duration::from_secs(3);
                while state.is_running() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(1));
                }
                Err(anyhow!("download cancelled"))
            },
            state.clone(),
            small_settings(),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        worker.stop();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(state.snapshot_result().is_empty());
    }

    #[test]
    fn test_dropping_handle_joins_worker() {
        let state = Arc::new(SharedState::new());
        let analyzer = ScriptedAnalyzer::always(happy_woman());
        let dropped = analyzer.dropped.clone();

        let worker = start_worker(move |_| Ok(analyzer), state.clone(), small_settings()).unwrap();
        drop(worker);

        assert!(!state.is_running());
        assert!(dropped.load(Ordering::SeqCst));
    }
}
