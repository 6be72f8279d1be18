use anyhow::Result;
use image::{imageops, RgbImage};
use ndarray::Array4;

/// Grey value used to pad the letterboxed input
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Mapping between source-image pixels and letterboxed model-input pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub ratio: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Model-input coordinate to source-image coordinate
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.ratio, (y - self.pad_y) / self.ratio)
    }

    /// Source-image coordinate to model-input coordinate
    pub fn to_input(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.ratio + self.pad_x, y * self.ratio + self.pad_y)
    }
}

/// Preprocessor for converting RGB images to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Scale factor and resized dimensions that fit `(w, h)` into the target
    pub fn fit(&self, w: u32, h: u32) -> (f32, u32, u32) {
        let ratio = (self.target_width as f32 / w as f32).min(self.target_height as f32 / h as f32);
        let new_w = ((w as f32 * ratio).round() as u32).clamp(1, self.target_width);
        let new_h = ((h as f32 * ratio).round() as u32).clamp(1, self.target_height);
        (ratio, new_w, new_h)
    }

    /// Letterbox an RGB image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize keeping aspect ratio so the image fits the target
    /// 2. Center it on a grey canvas
    /// 3. Normalize to [0, 1] and transpose from HWC to NCHW
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width] and the letterbox
    /// mapping needed to bring predictions back to source coordinates
    pub fn preprocess(&self, image: &RgbImage) -> Result<(Array4<f32>, Letterbox)> {
        let _span = tracing::debug_span!("preprocess").entered();

        let (w0, h0) = image.dimensions();
        anyhow::ensure!(w0 > 0 && h0 > 0, "cannot preprocess an empty image");

        let (ratio, new_w, new_h) = self.fit(w0, h0);

        // Resize if needed
        let resized = if (w0, h0) != (new_w, new_h) {
            imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle)
        } else {
            image.clone()
        };

        let pad_x = ((self.target_width - new_w) / 2) as usize;
        let pad_y = ((self.target_height - new_h) / 2) as usize;

        let mut tensor = Array4::<f32>::from_elem(
            (1, 3, self.target_height as usize, self.target_width as usize),
            PAD_VALUE,
        );

        for (x, y, pixel) in resized.enumerate_pixels() {
            let tx = x as usize + pad_x;
            let ty = y as usize + pad_y;
            tensor[[0, 0, ty, tx]] = pixel[0] as f32 / 255.0;
            tensor[[0, 1, ty, tx]] = pixel[1] as f32 / 255.0;
            tensor[[0, 2, ty, tx]] = pixel[2] as f32 / 255.0;
        }

        Ok((
            tensor,
            Letterbox {
                ratio,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        ))
    }
}
