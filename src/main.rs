mod config;
mod console;
mod display;
mod model_download;
mod pipeline;
mod shared;
mod types;
mod ui;

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use crossbeam_channel::{Sender, bounded};
use gpui::Application;

use config::Cli;
use display::WindowDisplay;
use pipeline::{
    LoopExit, NokhwaCamera, OrtFaceAnalyzer, camera::FrameSource, run_session, start_worker,
};
use shared::SharedState;

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    console::print_banner();

    let state = Arc::new(SharedState::new());
    let handler_state = state.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_state.request_interrupt()) {
        log::warn!("failed to install Ctrl-C handler: {err}");
    }

    let (display, endpoint) = display::window_link();
    let (opened_tx, opened_rx) = bounded(1);
    let capture = spawn_capture(cli, state, display, opened_tx)?;

    let opened = opened_rx
        .recv()
        .unwrap_or_else(|_| Err(anyhow!("capture thread exited before opening the camera")));
    if let Err(err) = opened {
        console::print_camera_open_failure();
        join_capture(capture)?;
        return Err(err.context("could not open webcam"));
    }

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            if let Err(err) = ui::launch_ui(app, endpoint) {
                log::error!("failed to launch ui: {err:?}");
                app.quit();
            }
        });

    join_capture(capture)
}

/// The capture thread owns the camera for its whole life. It reports whether
/// the device opened, then runs the session until it ends.
fn spawn_capture(
    cli: Cli,
    state: Arc<SharedState>,
    mut display: WindowDisplay,
    opened_tx: Sender<Result<()>>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("capture".into())
        .spawn(move || {
            let capture_settings = cli.capture_settings();
            let camera = match NokhwaCamera::open(
                capture_settings.camera_index,
                capture_settings.preferred_resolution,
            ) {
                Ok(camera) => {
                    let _ = opened_tx.send(Ok(()));
                    camera
                }
                Err(err) => {
                    let _ = opened_tx.send(Err(err));
                    return;
                }
            };

            let models = cli.model_settings();
            let worker = match start_worker(
                move |shared: &SharedState| OrtFaceAnalyzer::load(&models, || shared.is_running()),
                state.clone(),
                cli.worker_settings(),
            ) {
                Ok(worker) => worker,
                Err(err) => {
                    log::error!("{err:?}");
                    camera.release();
                    return;
                }
            };

            let exit = run_session(camera, &mut display, &state, worker, &capture_settings);
            if exit == LoopExit::Interrupted {
                console::print_interrupted();
            }
            console::print_shutdown(chrono::Local::now().naive_local());
        })
        .context("failed to spawn capture thread")
}

fn join_capture(capture: JoinHandle<()>) -> Result<()> {
    capture
        .join()
        .map_err(|_| anyhow!("capture thread panicked"))
}
