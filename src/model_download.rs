use std::{
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    FaceDetector,
    Emotion,
    Age,
    Gender,
}

impl ModelKind {
    /// Models fetched automatically, in the order the analyzer loads them.
    pub const DOWNLOADABLE: [ModelKind; 4] = [
        ModelKind::FaceDetector,
        ModelKind::Emotion,
        ModelKind::Age,
        ModelKind::Gender,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            ModelKind::FaceDetector => "version-RFB-320.onnx",
            ModelKind::Emotion => "emotion-ferplus-8.onnx",
            ModelKind::Age => "age_googlenet.onnx",
            ModelKind::Gender => "gender_googlenet.onnx",
        }
    }

    pub fn url(&self) -> &'static str {
        match self {
            ModelKind::FaceDetector => {
                "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx"
            }
            ModelKind::Emotion => {
                "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/emotion_ferplus/model/emotion-ferplus-8.onnx"
            }
            ModelKind::Age => {
                "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/age_gender/models/age_googlenet.onnx"
            }
            ModelKind::Gender => {
                "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/age_gender/models/gender_googlenet.onnx"
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::FaceDetector => "face detector",
            ModelKind::Emotion => "emotion",
            ModelKind::Age => "age",
            ModelKind::Gender => "gender",
        }
    }
}

pub fn model_path(model_dir: &Path, kind: ModelKind) -> PathBuf {
    model_dir.join(kind.file_name())
}

#[derive(Error, Debug)]
pub enum ModelDownloadError {
    #[error("failed to create model directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download failed for {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download of {model:?} model cancelled")]
    Cancelled { model: ModelKind },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelDownloadEvent {
    AlreadyPresent {
        model: ModelKind,
    },
    Started {
        model: ModelKind,
        total: Option<u64>,
    },
    Progress {
        model: ModelKind,
        downloaded: u64,
        total: Option<u64>,
    },
    Finished {
        model: ModelKind,
    },
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Makes sure `model_path` exists, downloading the model with a console
/// progress bar when it does not. `keep_running` is polled between chunks;
/// once it returns false the download stops with
/// [`ModelDownloadError::Cancelled`].
pub fn ensure_model_ready<K, F>(
    model: ModelKind,
    model_path: &Path,
    keep_running: K,
    mut on_event: F,
) -> Result<(), ModelDownloadError>
where
    K: Fn() -> bool,
    F: FnMut(ModelDownloadEvent),
{
    if model_path.exists() {
        on_event(ModelDownloadEvent::AlreadyPresent { model });
        on_event(ModelDownloadEvent::Finished { model });
        return Ok(());
    }

    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent).map_err(|source| ModelDownloadError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut progress: Option<ProgressBar> = None;
    let result = download_to_path(model, model.url(), model_path, &keep_running, &mut |event| {
        match &event {
            ModelDownloadEvent::Started { total, .. } => {
                progress = Some(create_progress_bar(*total));
            }
            ModelDownloadEvent::Progress { downloaded, .. } => {
                if let Some(pb) = progress.as_ref() {
                    pb.set_position(*downloaded);
                }
            }
            ModelDownloadEvent::Finished { model } => {
                if let Some(pb) = progress.take() {
                    pb.finish_with_message(format!("{} model ready", model.label()));
                }
            }
            ModelDownloadEvent::AlreadyPresent { .. } => {}
        }
        on_event(event);
    });

    if let Some(pb) = progress.take() {
        pb.abandon();
    }
    result
}

fn download_to_path<K, F>(
    model: ModelKind,
    url: &str,
    dest: &Path,
    keep_running: &K,
    on_event: &mut F,
) -> Result<(), ModelDownloadError>
where
    K: Fn() -> bool,
    F: FnMut(ModelDownloadEvent),
{
    if !keep_running() {
        return Err(ModelDownloadError::Cancelled { model });
    }

    log::info!(
        "downloading {} model from {url} to {}",
        model.label(),
        dest.display()
    );

    let request_err = |source| ModelDownloadError::Request {
        url: url.to_string(),
        source,
    };
    let response = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .and_then(|client| client.get(url).send())
        .and_then(|response| response.error_for_status())
        .map_err(request_err)?;

    let total_size = response.content_length();
    on_event(ModelDownloadEvent::Started {
        model,
        total: total_size,
    });

    write_model(model, response, total_size, dest, keep_running, on_event)?;

    on_event(ModelDownloadEvent::Finished { model });
    Ok(())
}

/// Streams `reader` into `<dest>.download` and renames it into place. Nothing
/// is left at either path when this fails.
fn write_model<R, K, F>(
    model: ModelKind,
    reader: R,
    total: Option<u64>,
    dest: &Path,
    keep_running: &K,
    on_event: &mut F,
) -> Result<(), ModelDownloadError>
where
    R: Read,
    K: Fn() -> bool,
    F: FnMut(ModelDownloadEvent),
{
    let tmp_path = dest.with_extension("download");
    let result = copy_to_file(model, reader, total, &tmp_path, keep_running, on_event).and_then(
        |()| {
            fs::rename(&tmp_path, dest).map_err(|source| ModelDownloadError::Write {
                path: dest.to_path_buf(),
                source,
            })
        },
    );

    if result.is_err() && tmp_path.exists() {
        if let Err(err) = fs::remove_file(&tmp_path) {
            log::warn!("failed to remove partial download {}: {err}", tmp_path.display());
        }
    }
    result
}

fn copy_to_file<R, K, F>(
    model: ModelKind,
    mut reader: R,
    total: Option<u64>,
    tmp_path: &Path,
    keep_running: &K,
    on_event: &mut F,
) -> Result<(), ModelDownloadError>
where
    R: Read,
    K: Fn() -> bool,
    F: FnMut(ModelDownloadEvent),
{
    let write_err = |source| ModelDownloadError::Write {
        path: tmp_path.to_path_buf(),
        source,
    };
    let mut file = fs::File::create(tmp_path).map_err(write_err)?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 16 * 1024];
    loop {
        if !keep_running() {
            return Err(ModelDownloadError::Cancelled { model });
        }

        let bytes_read = reader.read(&mut buffer).map_err(write_err)?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read]).map_err(write_err)?;
        downloaded += bytes_read as u64;
        on_event(ModelDownloadEvent::Progress {
            model,
            downloaded,
            total,
        });
    }

    file.sync_all().map_err(write_err)
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} downloading model") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}
