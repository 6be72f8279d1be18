mod preprocess;
pub mod types;
mod yolo;

pub use preprocess::{Letterbox, Preprocessor};
pub use types::{BBox, Detection, Mask, SegmentationModel};
pub use yolo::YoloSegmentation;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Default square input resolution of YOLOv8 exports
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Create the default segmentation model (YOLOv8-seg), ready to share
pub fn create_default_model<P: AsRef<Path>>(
    model_path: P,
    input_size: u32,
) -> Result<Arc<dyn SegmentationModel>> {
    let model = YoloSegmentation::new(model_path, input_size)?;
    Ok(Arc::new(model))
}
