use anyhow::{Result, anyhow};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    utils::{
        CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
    },
};

use super::rgb_converter;
use crate::types::Frame;

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

const PREFERRED_FRAME_RATE: u32 = 30;

/// Anything that yields frames to the capture loop.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame>;

    /// Gives the device back. Only called once the analysis worker is gone.
    fn release(self)
    where
        Self: Sized;
}

fn requested_formats(preferred: (u32, u32)) -> [RequestedFormat<'static>; 6] {
    let resolution = Resolution::new(preferred.0, preferred.1);
    [
        RequestedFormat::with_formats(
            RequestedFormatType::Closest(CameraFormat::new(
                resolution,
                FrameFormat::MJPEG,
                PREFERRED_FRAME_RATE,
            )),
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::Closest(CameraFormat::new(
                resolution,
                FrameFormat::YUYV,
                PREFERRED_FRAME_RATE,
            )),
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        // Fall back to any format Nokhwa can decode.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

pub struct NokhwaCamera {
    camera: Camera,
}

impl NokhwaCamera {
    /// Opens the device, asking for `preferred` resolution first. The device
    /// is free to pick something else.
    pub fn open(index: u32, preferred: (u32, u32)) -> Result<Self> {
        let index = CameraIndex::Index(index);
        let mut last_err = None;

        for requested in requested_formats(preferred) {
            match Camera::new(index.clone(), requested) {
                Ok(mut camera) => match camera.open_stream() {
                    Ok(()) => {
                        let format = camera.camera_format();
                        log::info!(
                            "camera {index} streaming {}x{} {:?} @ {}fps",
                            format.resolution().width_x,
                            format.resolution().height_y,
                            format.format(),
                            format.frame_rate()
                        );
                        if format.resolution() != Resolution::new(preferred.0, preferred.1) {
                            log::debug!(
                                "camera ignored preferred resolution {}x{}",
                                preferred.0,
                                preferred.1
                            );
                        }
                        return Ok(Self { camera });
                    }
                    Err(err) => last_err = Some(err.into()),
                },
                Err(err) => last_err = Some(err.into()),
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
    }
}

impl FrameSource for NokhwaCamera {
    fn read_frame(&mut self) -> Result<Frame> {
        let buffer = self.camera.frame()?;
        rgb_converter::convert_camera_frame(&buffer)
    }

    fn release(mut self) {
        if let Err(err) = self.camera.stop_stream() {
            log::warn!("failed to stop camera stream: {err:?}");
        }
    }
}
