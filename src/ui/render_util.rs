use std::sync::Arc;

use gpui::RenderImage;
use image::{Frame as ImageFrame, ImageBuffer, Rgba};

use crate::types::Frame;

/// Packs an RGB frame as the BGRA texture gpui renders directly.
pub(super) fn frame_to_image(frame: &Frame) -> Option<Arc<RenderImage>> {
    let bgra = rgb_to_bgra(frame)?;
    let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(frame.width, frame.height, bgra)?;
    Some(Arc::new(RenderImage::new(vec![ImageFrame::new(buffer)])))
}

fn rgb_to_bgra(frame: &Frame) -> Option<Vec<u8>> {
    if !frame.is_well_formed() {
        return None;
    }
    let mut bgra = Vec::with_capacity(frame.rgb.len() / 3 * 4);
    for px in frame.rgb.chunks_exact(3) {
        bgra.extend_from_slice(&[px[2], px[1], px[0], 255]);
    }
    Some(bgra)
}
