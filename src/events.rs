use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::RenderableImage;
use crate::error::ErrorKind;
use crate::indexer::InteractionMode;

/// Opaque, server-assigned identifier for one uploaded source image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageHandle(String);

impl ImageHandle {
    /// Returns `None` for blank identifiers; a handle is never empty.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generation parameters of one variant, nominally in `[0, 1]` each.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariantSetting {
    #[serde(rename = "b")]
    pub brightness: f64,
    #[serde(rename = "c")]
    pub contrast: f64,
}

impl VariantSetting {
    pub const NEUTRAL: VariantSetting = VariantSetting {
        brightness: 0.5,
        contrast: 0.5,
    };

    pub fn new(brightness: f64, contrast: f64) -> Self {
        Self {
            brightness,
            contrast,
        }
    }

    pub fn distance_to(&self, other: &VariantSetting) -> f64 {
        let db = self.brightness - other.brightness;
        let dc = self.contrast - other.contrast;
        (db * db + dc * dc).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedVariant {
    pub settings: VariantSetting,
    pub image: RenderableImage,
}

/// Ordered variants of one generate call, in upstream response order.
///
/// Cloning is cheap; the variants are shared.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariantMatrix {
    variants: Arc<[NormalizedVariant]>,
}

impl VariantMatrix {
    pub fn new(variants: Vec<NormalizedVariant>) -> Self {
        Self {
            variants: variants.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NormalizedVariant> {
        self.variants.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NormalizedVariant> {
        self.variants.iter()
    }

    /// Side of the square grid the variants are laid out on.
    pub fn grid_side(&self) -> usize {
        crate::indexer::grid_side(self.len())
    }
}

const SHRINK_STEP: f64 = 1.0 - f64::EPSILON;

/// One instantaneous pointer position.
///
/// Drag samples live in `[-1, 1]²` with y pointing up; orbit samples carry
/// two normalized rotation angles in `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerSample {
    pub x: f64,
    pub y: f64,
}

/// Screen-space bounding box of the drag surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl PointerSample {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Projects the sample onto the unit circle when it lies outside it.
    ///
    /// The result always satisfies `distance() <= 1.0`, so a sample clamped
    /// here is never rejected as out of bounds afterwards.
    pub fn clamped_to_disk(self) -> Self {
        let d = self.distance();
        if !(d > 1.0 && d.is_finite()) {
            return self;
        }
        let mut clamped = Self::new(self.x / d, self.y / d);
        // the division can land one ulp outside the circle
        while clamped.distance() > 1.0 {
            clamped = Self::new(clamped.x * SHRINK_STEP, clamped.y * SHRINK_STEP);
        }
        clamped
    }

    /// Converts a screen position into disk coordinates relative to the
    /// centre of `rect`, clamping onto the boundary when outside.
    pub fn from_screen(client_x: f64, client_y: f64, rect: SurfaceRect) -> Self {
        let half_w = rect.width / 2.0;
        let half_h = rect.height / 2.0;
        let center_x = rect.left + half_w;
        let center_y = rect.top + half_h;
        let x = (client_x - center_x) / half_w;
        // screen y grows downwards
        let y = -(client_y - center_y) / half_h;
        Self::new(x, y).clamped_to_disk()
    }

    /// Builds an orbit sample, wrapping each angle into `[0, 1)`.
    pub fn from_orbit(rx: f64, ry: f64) -> Self {
        Self::new(rx.rem_euclid(1.0), ry.rem_euclid(1.0))
    }
}

/// Requests accepted by the session task.
#[derive(Debug)]
pub enum SessionCommand {
    Upload {
        bytes: Vec<u8>,
        mime_hint: Option<String>,
    },
    /// `None` uses the configured placeholder target.
    Generate { target: Option<String> },
    Pointer(PointerSample),
    SetMode(InteractionMode),
}

/// Notifications emitted by the session task.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Uploaded {
        handle: ImageHandle,
        preview: Option<RenderableImage>,
    },
    GenerationStarted {
        generation: u64,
    },
    /// A generate call completed and its variants are now selectable.
    Populated {
        generation: u64,
        matrix: VariantMatrix,
        index: usize,
    },
    /// The visible variant changed in response to a pointer sample.
    Selected {
        index: usize,
        settings: VariantSetting,
        image: RenderableImage,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}
