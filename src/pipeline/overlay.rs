use crate::types::{AnnotatedFrame, FaceAttributes, FaceRegion, Frame, OverlayText};

pub const OVERLAY_ORIGIN: (f32, f32) = (10.0, 30.0);
pub const OVERLAY_COLOR: [u8; 3] = [255, 0, 0];
pub const NO_RESULT_TEXT: &str = "Analyzing... or no face detected.";

const ATTRIBUTES_SCALE: f32 = 0.5;
const NO_RESULT_SCALE: f32 = 0.6;
const REGION_BOX_THICKNESS: i32 = 3;

pub fn overlay_for(result: &FaceAttributes) -> OverlayText {
    if result.is_empty() {
        return OverlayText {
            text: NO_RESULT_TEXT.to_string(),
            origin: OVERLAY_ORIGIN,
            scale: NO_RESULT_SCALE,
            color: OVERLAY_COLOR,
        };
    }

    let age = result.age.map(|age| age.to_string()).unwrap_or_default();
    let text = format!(
        "Emotion: {} | Gender: {} | Race: {} | Age: {} (NOT SO Accurate)",
        result.dominant_emotion.as_deref().unwrap_or_default(),
        result.dominant_gender.as_deref().unwrap_or_default(),
        result.dominant_race.as_deref().unwrap_or_default(),
        age,
    );

    OverlayText {
        text,
        origin: OVERLAY_ORIGIN,
        scale: ATTRIBUTES_SCALE,
        color: OVERLAY_COLOR,
    }
}

/// Builds the displayable frame. The result's region is in frame pixels.
pub fn annotate(mut frame: Frame, result: &FaceAttributes) -> AnnotatedFrame {
    if let Some(region) = result.region.filter(|region| !covers_frame(region, &frame)) {
        draw_region(&mut frame, &region);
    }

    AnnotatedFrame {
        overlay: overlay_for(result),
        frame,
    }
}

/// A box around the whole frame marks no face in particular.
fn covers_frame(region: &FaceRegion, frame: &Frame) -> bool {
    region.x == 0 && region.y == 0 && region.w >= frame.width && region.h >= frame.height
}

fn draw_region(frame: &mut Frame, region: &FaceRegion) {
    let x1 = region.x as f32;
    let y1 = region.y as f32;
    let x2 = region.x.saturating_add(region.w) as f32;
    let y2 = region.y.saturating_add(region.h) as f32;
    let (width, height) = (frame.width, frame.height);
    let buffer = frame.rgb.as_mut_slice();

    for (p0, p1) in [
        ((x1, y1), (x2, y1)),
        ((x2, y1), (x2, y2)),
        ((x2, y2), (x1, y2)),
        ((x1, y2), (x1, y1)),
    ] {
        draw_line(
            buffer,
            width,
            height,
            &p0,
            &p1,
            OVERLAY_COLOR,
            REGION_BOX_THICKNESS,
        );
    }
}

fn draw_line(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    p0: &(f32, f32),
    p1: &(f32, f32),
    color: [u8; 3],
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        for ox in -radius..=radius {
            for oy in -radius..=radius {
                if ox.abs() + oy.abs() <= radius {
                    put_pixel_safe(buffer, width, height, x0 + ox, y0 + oy, color);
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn put_pixel_safe(buffer: &mut [u8], width: u32, height: u32, x: i32, y: i32, color: [u8; 3]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= width || uy >= height {
        return;
    }
    let idx = ((uy * width + ux) as usize) * 3;
    if idx + 2 < buffer.len() {
        buffer[idx..idx + 3].copy_from_slice(&color);
    }
}
