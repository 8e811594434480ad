use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{FaceRegion, Frame};

/// Resizes without keeping aspect ratio, matching the fixed analysis input.
pub fn resize_frame(frame: &Frame, size: (u32, u32)) -> Result<Frame> {
    if !frame.is_well_formed() {
        return Err(anyhow!(
            "frame buffer size mismatch: got {} bytes for {}x{}",
            frame.rgb.len(),
            frame.width,
            frame.height
        ));
    }

    let (target_w, target_h) = (size.0.max(1), size.1.max(1));
    if frame.width == target_w && frame.height == target_h {
        return Ok(frame.clone());
    }

    let rgb = resize_rgb(&frame.rgb, frame.width, frame.height, target_w, target_h)?;
    Ok(Frame {
        rgb,
        width: target_w,
        height: target_h,
        timestamp: frame.timestamp,
    })
}

fn resize_rgb(rgb: &[u8], width: u32, height: u32, new_w: u32, new_h: u32) -> Result<Vec<u8>> {
    let src_image =
        fir::images::Image::from_vec_u8(width, height, rgb.to_vec(), fir::PixelType::U8x3)?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x3);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    Ok(dst_image.into_vec())
}

/// Copies `region` (clamped to the frame) into a new frame.
pub fn crop(frame: &Frame, region: &FaceRegion) -> Result<Frame> {
    let x = region.x.min(frame.width.saturating_sub(1));
    let y = region.y.min(frame.height.saturating_sub(1));
    let w = region.w.min(frame.width.saturating_sub(x));
    let h = region.h.min(frame.height.saturating_sub(y));
    if w == 0 || h == 0 {
        return Err(anyhow!("empty crop region {region:?}"));
    }

    let src_stride = frame.width as usize * 3;
    let row_len = w as usize * 3;
    let mut rgb = Vec::with_capacity(row_len * h as usize);
    for row in y..y + h {
        let offset = row as usize * src_stride + x as usize * 3;
        rgb.extend_from_slice(&frame.rgb[offset..offset + row_len]);
    }

    Ok(Frame {
        rgb,
        width: w,
        height: h,
        timestamp: frame.timestamp,
    })
}

/// `1x3xHxW`, each channel mapped through `(px - mean) * scale`, RGB order.
pub fn rgb_nchw(frame: &Frame, size: (u32, u32), mean: f32, scale: f32) -> Result<Array4<f32>> {
    let (w, h) = (size.0 as usize, size.1 as usize);
    let resized = resize_frame(frame, size)?;
    let plane = w * h;
    let mut data = vec![0f32; plane * 3];
    for (i, px) in resized.rgb.chunks_exact(3).enumerate() {
        for c in 0..3 {
            data[c * plane + i] = (px[c] as f32 - mean) * scale;
        }
    }
    Array4::from_shape_vec((1, 3, h, w), data)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))
}

/// `1x3xSxS` in BGR order with per-channel mean subtraction (Caffe style).
pub fn bgr_mean_nchw(frame: &Frame, size: u32, bgr_mean: [f32; 3]) -> Result<Array4<f32>> {
    let s = size as usize;
    let resized = resize_frame(frame, (size, size))?;
    let plane = s * s;
    let mut data = vec![0f32; plane * 3];
    for (i, px) in resized.rgb.chunks_exact(3).enumerate() {
        data[i] = px[2] as f32 - bgr_mean[0];
        data[plane + i] = px[1] as f32 - bgr_mean[1];
        data[2 * plane + i] = px[0] as f32 - bgr_mean[2];
    }
    Array4::from_shape_vec((1, 3, s, s), data)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))
}

/// `1x1xSxS` luma in 0..255.
pub fn gray_nchw(frame: &Frame, size: u32) -> Result<Array4<f32>> {
    let s = size as usize;
    let resized = resize_frame(frame, (size, size))?;
    let luma: Vec<f32> = resized
        .rgb
        .par_chunks_exact(3)
        .map(|px| 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
        .collect();
    Array4::from_shape_vec((1, 1, s, s), luma)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))
}

/// `1xSxSx3` RGB scaled to 0..1.
pub fn rgb_unit_nhwc(frame: &Frame, size: u32) -> Result<Array4<f32>> {
    let s = size as usize;
    let resized = resize_frame(frame, (size, size))?;
    let normalized: Vec<f32> = resized.rgb.par_iter().map(|&v| v as f32 / 255.0).collect();
    Array4::from_shape_vec((1, s, s, 3), normalized)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|v| v / sum).collect()
}

pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx)
}

/// Face candidate in analysis image pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

impl Detection {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn to_region(&self, bounds: (u32, u32)) -> Option<FaceRegion> {
        let x1 = self.x1.clamp(0.0, bounds.0 as f32);
        let y1 = self.y1.clamp(0.0, bounds.1 as f32);
        let x2 = self.x2.clamp(0.0, bounds.0 as f32);
        let y2 = self.y2.clamp(0.0, bounds.1 as f32);
        let w = (x2 - x1).round() as u32;
        let h = (y2 - y1).round() as u32;
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceRegion {
            x: x1.round() as u32,
            y: y1.round() as u32,
            w,
            h,
        })
    }
}

pub fn nms(mut dets: Vec<Detection>, iou_thresh: f32) -> Vec<Detection> {
    dets.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for det in dets {
        if keep.iter().all(|kept| iou(kept, &det) <= iou_thresh) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }
    inter / (a.area() + b.area() - inter)
}

/// Highest score wins; among equal scores the larger face does.
pub fn dominant(dets: &[Detection]) -> Option<&Detection> {
    dets.iter().max_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then_with(|| a.area().total_cmp(&b.area()))
    })
}
