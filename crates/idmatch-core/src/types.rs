use std::path::Path;

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Fixed-length face feature vector produced by an [`EmbeddingProvider`].
///
/// The values are private so an embedding cannot be altered after the
/// provider hands it out.
///
/// [`EmbeddingProvider`]: crate::provider::EmbeddingProvider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// Axis-aligned face region in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One face as reported by the detector, in detector order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub embedding: Embedding,
}

/// A packed RGB8 image plus the sequence number assigned by its source.
///
/// Document images carry sequence 0; live frames are numbered from 1.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub sequence: u64,
}

impl Frame {
    /// A black frame of the given size.
    pub fn blank(width: u32, height: u32, sequence: u64) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 3],
            sequence,
        }
    }

    pub fn from_rgb_image(image: RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
            sequence,
        }
    }

    /// Decode any raster format supported by the `image` crate.
    pub fn open(path: &Path, sequence: u64) -> Result<Self, image::ImageError> {
        let image = image::open(path)?.to_rgb8();
        Ok(Self::from_rgb_image(image, sequence))
    }

    /// Copy into an `RgbImage`. `None` when the buffer length does not match
    /// `width * height * 3`.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }
}
