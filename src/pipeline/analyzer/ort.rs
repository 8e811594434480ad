use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ndarray::Array4;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    AnalysisError, FaceAnalyzer,
    common::{self, Detection},
};
use crate::{
    config::ModelSettings,
    model_download::{ModelDownloadEvent, ModelKind, ensure_model_ready, model_path},
    types::{AnalysisRequest, Attribute, FaceAttributes, FaceRegion, Frame},
};

const DETECTOR_INPUT: (u32, u32) = (320, 240);
const DETECTOR_NMS_IOU: f32 = 0.3;
const EMOTION_INPUT: u32 = 64;
const AGE_GENDER_INPUT: u32 = 224;
const AGE_GENDER_BGR_MEAN: [f32; 3] = [104.0, 117.0, 123.0];
const RACE_INPUT: u32 = 224;

const EMOTION_LABELS: [&str; 8] = [
    "neutral", "happy", "surprise", "sad", "angry", "disgust", "fear", "contempt",
];
const GENDER_LABELS: [&str; 2] = ["Man", "Woman"];
const RACE_LABELS: [&str; 6] = [
    "asian",
    "indian",
    "black",
    "white",
    "middle eastern",
    "latino hispanic",
];
/// Midpoints of the age buckets (0-2, 4-6, 8-12, 15-20, 25-32, 38-43, 48-53, 60-100).
const AGE_BUCKET_MIDPOINTS: [f32; 8] = [1.0, 5.0, 10.0, 17.5, 28.5, 40.5, 50.5, 80.0];

/// Face detector plus one classifier per attribute, all on ONNX Runtime.
pub struct OrtFaceAnalyzer {
    detector: Session,
    emotion: Session,
    age: Session,
    gender: Session,
    race: Option<Session>,
    face_confidence: f32,
}

impl OrtFaceAnalyzer {
    /// Makes sure every model file is on disk (downloading if needed) and
    /// builds the sessions. Gives up as soon as `keep_running` turns false.
    pub fn load<K>(settings: &ModelSettings, keep_running: K) -> Result<Self>
    where
        K: Fn() -> bool,
    {
        let mut sessions = Vec::with_capacity(ModelKind::DOWNLOADABLE.len());
        for kind in ModelKind::DOWNLOADABLE {
            if !keep_running() {
                return Err(anyhow!("model loading stopped before the {} model", kind.label()));
            }
            let path = model_path(&settings.model_dir, kind);
            ensure_model_ready(kind, &path, &keep_running, log_download_event)
                .with_context(|| format!("failed to prepare {} model", kind.label()))?;
            sessions.push(build_session(&path)?);
        }

        let race = match &settings.race_model {
            Some(path) => match build_session(path) {
                Ok(session) => Some(session),
                Err(err) => {
                    log::warn!("race model unavailable, race will be left blank: {err:?}");
                    None
                }
            },
            None => {
                log::info!("no race model configured, race will be left blank");
                None
            }
        };

        let [detector, emotion, age, gender]: [Session; 4] = sessions
            .try_into()
            .map_err(|_| anyhow!("unexpected number of model sessions"))?;

        log::info!(
            "face analysis ready using models in {}",
            settings.model_dir.display()
        );

        Ok(Self {
            detector,
            emotion,
            age,
            gender,
            race,
            face_confidence: settings.face_confidence,
        })
    }

    fn detect_faces(&mut self, image: &Frame) -> Result<Vec<Detection>> {
        let input = common::rgb_nchw(image, DETECTOR_INPUT, 127.0, 1.0 / 128.0)?;
        let outputs = run_flat(&mut self.detector, input)?;
        if outputs.len() < 2 {
            return Err(anyhow!(
                "face detector expected 2 outputs, got {}",
                outputs.len()
            ));
        }
        Ok(decode_detections(
            &outputs[0],
            &outputs[1],
            (image.width, image.height),
            self.face_confidence,
        ))
    }

    fn classify_face(
        &mut self,
        face: &Frame,
        region: Option<FaceRegion>,
        request: &AnalysisRequest,
    ) -> Result<FaceAttributes> {
        let mut attributes = FaceAttributes {
            region,
            ..FaceAttributes::empty()
        };

        if request.wants(Attribute::Emotion) {
            let logits = first_output(run_flat(
                &mut self.emotion,
                common::gray_nchw(face, EMOTION_INPUT)?,
            )?)?;
            attributes.dominant_emotion = label_for(&common::softmax(&logits), &EMOTION_LABELS);
        }

        if request.wants(Attribute::Age) || request.wants(Attribute::Gender) {
            let input = common::bgr_mean_nchw(face, AGE_GENDER_INPUT, AGE_GENDER_BGR_MEAN)?;
            if request.wants(Attribute::Age) {
                let probs = first_output(run_flat(&mut self.age, input.clone())?)?;
                attributes.age = apparent_age(&probs);
            }
            if request.wants(Attribute::Gender) {
                let probs = first_output(run_flat(&mut self.gender, input)?)?;
                attributes.dominant_gender = label_for(&probs, &GENDER_LABELS);
            }
        }

        if request.wants(Attribute::Race) {
            if let Some(race) = self.race.as_mut() {
                let probs = first_output(run_flat(race, common::rgb_unit_nhwc(face, RACE_INPUT)?)?)?;
                attributes.dominant_race = label_for(&probs, &RACE_LABELS);
            }
        }

        Ok(attributes)
    }
}

impl FaceAnalyzer for OrtFaceAnalyzer {
    fn analyze(
        &mut self,
        image: &Frame,
        request: &AnalysisRequest,
    ) -> Result<Vec<FaceAttributes>, AnalysisError> {
        let detections = self.detect_faces(image)?;
        let bounds = (image.width, image.height);

        // Only the dominant face is classified; it is the only one shown.
        let detected = common::dominant(&detections).and_then(|d| d.to_region(bounds));
        let region = match detected {
            Some(region) => region,
            None if request.enforce_detection => return Err(AnalysisError::NoFaceDetected),
            None => FaceRegion {
                x: 0,
                y: 0,
                w: image.width,
                h: image.height,
            },
        };

        let face = common::crop(image, &region).map_err(AnalysisError::InvalidFrame)?;
        // A whole-image fallback is not a face box, so it is not reported.
        let attributes = self.classify_face(&face, detected, request)?;
        Ok(vec![attributes])
    }

    fn supports(&self, attribute: Attribute) -> bool {
        attribute != Attribute::Race || self.race.is_some()
    }
}

fn log_download_event(event: ModelDownloadEvent) {
    match event {
        ModelDownloadEvent::AlreadyPresent { model } => {
            log::debug!("{} model already present", model.label())
        }
        ModelDownloadEvent::Started { model, total } => match total {
            Some(bytes) => log::info!("fetching {} model ({bytes} bytes)", model.label()),
            None => log::info!("fetching {} model", model.label()),
        },
        ModelDownloadEvent::Progress { .. } => {}
        ModelDownloadEvent::Finished { model } => log::debug!("{} model ready", model.label()),
    }
}

fn build_session(model_path: &Path) -> Result<Session> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ORT session from {}", model_path.display()))
}

/// Runs a single-input model and copies every output out as a flat vector.
fn run_flat(session: &mut Session, input: Array4<f32>) -> Result<Vec<Vec<f32>>> {
    let tensor = Tensor::from_array(input)?;
    let outputs = session
        .run(ort::inputs![tensor])
        .context("failed to run ORT session")?;

    let mut flat = Vec::with_capacity(outputs.len());
    for idx in 0..outputs.len() {
        let values = outputs[idx].try_extract_array::<f32>()?;
        flat.push(values.iter().copied().collect());
    }
    Ok(flat)
}

fn first_output(outputs: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    outputs
        .into_iter()
        .next()
        .filter(|values| !values.is_empty())
        .ok_or_else(|| anyhow!("model returned no outputs"))
}

/// `scores` is `N x 2` (background, face), `boxes` is `N x 4` normalised corners.
fn decode_detections(
    scores: &[f32],
    boxes: &[f32],
    bounds: (u32, u32),
    threshold: f32,
) -> Vec<Detection> {
    let (w, h) = (bounds.0 as f32, bounds.1 as f32);
    let candidates = scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(score, _)| score[1] >= threshold)
        .map(|(score, corners)| Detection {
            x1: corners[0] * w,
            y1: corners[1] * h,
            x2: corners[2] * w,
            y2: corners[3] * h,
            score: score[1],
        })
        .collect();
    common::nms(candidates, DETECTOR_NMS_IOU)
}

fn label_for(probs: &[f32], labels: &[&str]) -> Option<String> {
    common::argmax(probs)
        .and_then(|idx| labels.get(idx))
        .map(|label| label.to_string())
}

/// Probability-weighted bucket midpoint.
fn apparent_age(probs: &[f32]) -> Option<u32> {
    let weights: Vec<f32> = probs
        .iter()
        .take(AGE_BUCKET_MIDPOINTS.len())
        .map(|p| if p.is_finite() { p.max(0.0) } else { 0.0 })
        .collect();
    let total: f32 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let age: f32 = weights
        .iter()
        .zip(AGE_BUCKET_MIDPOINTS)
        .map(|(p, mid)| p * mid)
        .sum::<f32>()
        / total;
    Some(age.round() as u32)
}
