//! Grayscale frame type and the luminance statistics used for quality scoring.

use crate::types::BoundingBox;
use std::path::Path;

/// A decoded grayscale image.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap raw grayscale pixels, checking the buffer length.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Decode an image file of any format the `image` crate supports and
    /// convert it to 8-bit luminance.
    pub fn open(path: &Path) -> Result<Self, FrameError> {
        let gray = image::open(path)
            .map_err(|source| FrameError::Decode {
                path: path.display().to_string(),
                source,
            })?
            .to_luma8();
        let (width, height) = gray.dimensions();
        Ok(Self {
            data: gray.into_raw(),
            width,
            height,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Pixel count.
    pub fn area(&self) -> f32 {
        self.width as f32 * self.height as f32
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Copy out the region covered by `bbox`, clipped to the frame.
    ///
    /// A box entirely outside the frame yields an empty 0×0 frame.
    pub fn crop(&self, bbox: &BoundingBox) -> Frame {
        let x0 = (bbox.x.floor().max(0.0) as u32).min(self.width);
        let y0 = (bbox.y.floor().max(0.0) as u32).min(self.height);
        let x1 = ((bbox.x + bbox.width).ceil().max(0.0) as u32).min(self.width);
        let y1 = ((bbox.y + bbox.height).ceil().max(0.0) as u32).min(self.height);

        if x1 <= x0 || y1 <= y0 {
            return Frame {
                data: Vec::new(),
                width: 0,
                height: 0,
            };
        }

        let w = self.width as usize;
        let mut data = Vec::with_capacity(((x1 - x0) * (y1 - y0)) as usize);
        for y in y0 as usize..y1 as usize {
            data.extend_from_slice(&self.data[y * w + x0 as usize..y * w + x1 as usize]);
        }

        Frame {
            data,
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    /// Variance of the 4-neighbour Laplacian over interior pixels.
    ///
    /// A focus measure: blurred images have few strong second derivatives and
    /// score low. Frames narrower or shorter than 3 pixels return 0.
    pub fn laplacian_variance(&self) -> f32 {
        let w = self.width as usize;
        let h = self.height as usize;
        if w < 3 || h < 3 {
            return 0.0;
        }

        let px = |x: usize, y: usize| self.data[y * w + x] as f64;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let lap = px(x, y - 1) + px(x, y + 1) + px(x - 1, y) + px(x + 1, y)
                    - 4.0 * px(x, y);
                sum += lap;
                sum_sq += lap * lap;
            }
        }

        let n = ((w - 2) * (h - 2)) as f64;
        let mean = sum / n;
        (sum_sq / n - mean * mean).max(0.0) as f32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
