use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::types::{AnalysisRequest, Attribute};

/// Live webcam emotion, age, gender and race overlay.
#[derive(Parser, Debug, Clone)]
#[command(name = "emotion-lens", version)]
pub struct Cli {
    /// Index of the video capture device.
    #[arg(long = "camera", default_value_t = 0)]
    pub camera_index: u32,

    /// Preferred capture width; the device may ignore it.
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Preferred capture height; the device may ignore it.
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Width frames are resized to before analysis.
    #[arg(long, default_value_t = 1200)]
    pub analysis_width: u32,

    /// Height frames are resized to before analysis.
    #[arg(long, default_value_t = 1060)]
    pub analysis_height: u32,

    /// Worker pause between analysis cycles, in milliseconds.
    #[arg(long, default_value_t = 10)]
    pub idle_ms: u64,

    /// How long each loop iteration waits for a key press, in milliseconds.
    #[arg(long, default_value_t = 1)]
    pub key_poll_ms: u64,

    /// Directory holding (or receiving) the pretrained model files.
    #[arg(long, default_value = "models")]
    pub model_dir: PathBuf,

    /// ONNX race classifier. Race is left blank when not given.
    #[arg(long)]
    pub race_model: Option<PathBuf>,

    /// Face detector confidence threshold (0.0-1.0).
    #[arg(long, default_value_t = 0.7)]
    pub face_confidence: f32,

    /// Treat frames without a detected face as analysis failures.
    #[arg(long)]
    pub enforce_detection: bool,
}

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub camera_index: u32,
    pub preferred_resolution: (u32, u32),
    pub key_poll: Duration,
}

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub analysis_size: (u32, u32),
    pub idle: Duration,
    pub request: AnalysisRequest,
}

#[derive(Clone, Debug)]
pub struct ModelSettings {
    pub model_dir: PathBuf,
    pub race_model: Option<PathBuf>,
    pub face_confidence: f32,
}

impl Cli {
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            camera_index: self.camera_index,
            preferred_resolution: (self.width, self.height),
            key_poll: Duration::from_millis(self.key_poll_ms),
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            analysis_size: (self.analysis_width.max(1), self.analysis_height.max(1)),
            idle: Duration::from_millis(self.idle_ms),
            request: AnalysisRequest {
                attributes: Attribute::ALL.to_vec(),
                enforce_detection: self.enforce_detection,
            },
        }
    }

    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            model_dir: self.model_dir.clone(),
            race_model: self.race_model.clone(),
            face_confidence: self.face_confidence.clamp(0.0, 1.0),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            analysis_size: (1200, 1060),
            idle: Duration::from_millis(10),
            request: AnalysisRequest::default(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            camera_index: 0,
            preferred_resolution: (1280, 720),
            key_poll: Duration::from_millis(1),
        }
    }
}
