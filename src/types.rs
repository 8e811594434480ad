use std::time::Instant;

/// Tightly packed RGB pixels (`width * height * 3` bytes, row-major).
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgb: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgb,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    pub fn expected_len(width: u32, height: u32) -> usize {
        (width as usize)
            .saturating_mul(height as usize)
            .saturating_mul(3)
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgb.len() == Self::expected_len(self.width, self.height)
    }
}

/// Axis-aligned face box in the pixel space of the image it was detected in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl FaceRegion {
    /// Maps the region from an image of `from` size onto an image of `to` size.
    pub fn rescale(&self, from: (u32, u32), to: (u32, u32)) -> FaceRegion {
        let sx = to.0 as f32 / from.0.max(1) as f32;
        let sy = to.1 as f32 / from.1.max(1) as f32;
        FaceRegion {
            x: (self.x as f32 * sx).round() as u32,
            y: (self.y as f32 * sy).round() as u32,
            w: (self.w as f32 * sx).round() as u32,
            h: (self.h as f32 * sy).round() as u32,
        }
    }
}

/// Attribute record for the dominant face, or the empty record when the
/// last analysis produced nothing usable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaceAttributes {
    pub dominant_emotion: Option<String>,
    pub dominant_gender: Option<String>,
    pub dominant_race: Option<String>,
    pub age: Option<u32>,
    pub region: Option<FaceRegion>,
}

impl FaceAttributes {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.dominant_emotion.is_none()
            && self.dominant_gender.is_none()
            && self.dominant_race.is_none()
            && self.age.is_none()
            && self.region.is_none()
    }

    /// Whether the record carries a value for `attribute`.
    pub fn has(&self, attribute: Attribute) -> bool {
        match attribute {
            Attribute::Emotion => self.dominant_emotion.is_some(),
            Attribute::Age => self.age.is_some(),
            Attribute::Gender => self.dominant_gender.is_some(),
            Attribute::Race => self.dominant_race.is_some(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    Emotion,
    Age,
    Gender,
    Race,
}

impl Attribute {
    pub const ALL: [Attribute; 4] = [
        Attribute::Emotion,
        Attribute::Age,
        Attribute::Gender,
        Attribute::Race,
    ];
}

/// What the worker asks of the analyzer on every cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub attributes: Vec<Attribute>,
    pub enforce_detection: bool,
}

impl AnalysisRequest {
    pub fn wants(&self, attribute: Attribute) -> bool {
        self.attributes.contains(&attribute)
    }
}

impl Default for AnalysisRequest {
    fn default() -> Self {
        Self {
            attributes: Attribute::ALL.to_vec(),
            enforce_detection: false,
        }
    }
}

/// A frame ready for display along with the text drawn over it.
#[derive(Clone, Debug)]
pub struct AnnotatedFrame {
    pub frame: Frame,
    pub overlay: OverlayText,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OverlayText {
    pub text: String,
    pub origin: (f32, f32),
    pub scale: f32,
    pub color: [u8; 3],
}
