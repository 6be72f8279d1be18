use anyhow::Result;
use image::RgbImage;

/// Axis-aligned box in source image pixels (top-left / bottom-right corners)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Center x, center y, aspect ratio (w/h), height
    pub fn to_xyah(&self) -> [f32; 4] {
        let w = self.width();
        let h = self.height();
        let aspect = if h > 0.0 { w / h } else { 0.0 };
        [self.x1 + w / 2.0, self.y1 + h / 2.0, aspect, h]
    }

    pub fn from_xyah(cx: f32, cy: f32, aspect: f32, h: f32) -> Self {
        let w = aspect * h;
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    /// Clamp to an image of the given dimensions
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self::new(
            self.x1.clamp(0.0, w),
            self.y1.clamp(0.0, h),
            self.x2.clamp(0.0, w),
            self.y2.clamp(0.0, h),
        )
    }
}

/// Binary segmentation mask covering a rectangular region of the source image.
///
/// Only the region under the detection box is stored; pixels outside it are
/// background by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Row-major, `width * height` entries
    pub data: Vec<bool>,
}

impl Mask {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        if x < self.x || y < self.y || x >= self.x + self.width || y >= self.y + self.height {
            return false;
        }
        let idx = ((y - self.y) * self.width + (x - self.x)) as usize;
        self.data.get(idx).copied().unwrap_or(false)
    }
}

/// One located instance of the target class
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: u32,
    pub mask: Option<Mask>,
    /// Stable identifier assigned by the tracker; `None` on the image path
    pub track_id: Option<u32>,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32, class_id: u32) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
            mask: None,
            track_id: None,
        }
    }

    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }
}

/// Trait for instance segmentation models
///
/// Implementations are constructed once and shared read-only across every
/// request, so `detect` takes `&self`.
pub trait SegmentationModel: Send + Sync {
    /// Detect objects in a frame
    ///
    /// # Arguments
    /// * `frame` - Input RGB frame
    /// * `confidence` - Candidates scoring below this are suppressed by the model
    ///
    /// # Returns
    /// * Detections in source-frame pixel coordinates, without track ids
    fn detect(&self, frame: &RgbImage, confidence: f32) -> Result<Vec<Detection>>;

    /// Get the model's input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);

    /// Class labels, indexed by `Detection::class_id`
    fn class_names(&self) -> &[String];
}
