use super::preprocess::{Letterbox, Preprocessor};
use super::types::{BBox, Detection, Mask, SegmentationModel};
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;

/// IoU above which a lower-scoring box of the same class is suppressed
const IOU_THRESHOLD: f32 = 0.7;
/// Upper bound on detections kept per frame after NMS
const MAX_DETECTIONS: usize = 300;

/// YOLOv8 instance segmentation model exported to ONNX
///
/// Expects the standard export layout:
/// - `output0`: `[1, 4 + nc + nm, anchors]` boxes (cx, cy, w, h), class
///   scores, mask coefficients
/// - `output1`: `[1, nm, mh, mw]` mask prototypes
pub struct YoloSegmentation {
    // A run needs `&mut Session`; the lock serializes inference calls
    session: Mutex<Session>,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,
    class_names: Vec<String>,
}

impl YoloSegmentation {
    /// Create a new model from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `input_size` - Square input resolution the model was exported at
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading YOLOv8-seg model from {}", path.display());

        let session = Session::builder()
            .context("Failed to create ONNX Runtime session builder")?
            .with_execution_providers([
                ort::execution_providers::CUDAExecutionProvider::default().build(),
            ])
            .context("Failed to register execution providers")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .with_intra_threads(4)
            .context("Failed to set intra-op threads")?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let class_names = session
            .metadata()
            .ok()
            .and_then(|meta| meta.custom("names").ok().flatten())
            .map(|raw| parse_class_names(&raw))
            .filter(|names| !names.is_empty())
            .unwrap_or_else(|| vec!["pothole".to_string()]);

        tracing::info!(
            input_size,
            classes = ?class_names,
            "YOLOv8-seg model loaded successfully"
        );

        Ok(Self {
            session: Mutex::new(session),
            preprocessor: Preprocessor::new(input_size, input_size),
            width: input_size,
            height: input_size,
            class_names,
        })
    }
}

impl SegmentationModel for YoloSegmentation {
    fn detect(&self, frame: &RgbImage, confidence: f32) -> Result<Vec<Detection>> {
        let _span = tracing::debug_span!("yolo_detect").entered();

        let (input, letterbox) = self.preprocessor.preprocess(frame)?;
        let shape = [1usize, 3, self.height as usize, self.width as usize];
        let input = Tensor::from_array((shape, input.into_raw_vec_and_offset().0.into_boxed_slice()))
            .context("Failed to build input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("model session lock poisoned"))?;

        let infer_span = tracing::debug_span!("inference").entered();
        let outputs = session
            .run(ort::inputs![input])
            .context("Failed to run inference")?;
        drop(infer_span);

        let mut preds: Option<Array2<f32>> = None;
        let mut protos: Option<Array3<f32>> = None;
        for (name, value) in outputs.iter() {
            let (shape, data) = value
                .try_extract_tensor::<f32>()
                .with_context(|| format!("Failed to extract output '{name}'"))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            match dims.as_slice() {
                [1, a, b] => {
                    let array = Array2::from_shape_vec((*a, *b), data.to_vec())?;
                    // Some exports emit [anchors, channels]; channels is the short axis
                    preds = Some(if a > b { array.reversed_axes() } else { array });
                }
                [1, nm, mh, mw] => {
                    protos = Some(Array3::from_shape_vec((*nm, *mh, *mw), data.to_vec())?);
                }
                other => tracing::debug!("Ignoring output '{}' with shape {:?}", name, other),
            }
        }

        let preds = preds.context("model produced no [1, C, N] prediction tensor")?;

        let _post_span = tracing::debug_span!("postprocess").entered();
        decode_predictions(
            preds.view(),
            protos.as_ref().map(|p| p.view()),
            &letterbox,
            (self.width, self.height),
            frame.dimensions(),
            confidence,
        )
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }
}

/// Turn raw YOLOv8-seg tensors into detections in source coordinates
///
/// `preds` is `[4 + nc + nm, anchors]`, `protos` is `[nm, mh, mw]`.
pub(crate) fn decode_predictions(
    preds: ArrayView2<f32>,
    protos: Option<ArrayView3<f32>>,
    letterbox: &Letterbox,
    input_size: (u32, u32),
    source_size: (u32, u32),
    confidence: f32,
) -> Result<Vec<Detection>> {
    let nm = protos.map(|p| p.dim().0).unwrap_or(0);
    let channels = preds.dim().0;
    anyhow::ensure!(
        channels > 4 + nm,
        "prediction tensor has {channels} channels, need more than {}",
        4 + nm
    );
    let nc = channels - 4 - nm;
    let (src_w, src_h) = source_size;

    let mut candidates: Vec<(Detection, Vec<f32>)> = Vec::new();
    for anchor in preds.axis_iter(Axis(1)) {
        let (class_id, score) = (0..nc)
            .map(|k| (k, anchor[4 + k]))
            .fold((0, f32::MIN), |best, x| if x.1 > best.1 { x } else { best });

        if score <= confidence {
            continue;
        }

        let (cx, cy, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
        let (x1, y1) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);
        let bbox = BBox::new(x1, y1, x2, y2).clamp_to(src_w, src_h);
        if bbox.area() <= 0.0 {
            continue;
        }

        let coefs = (0..nm).map(|m| anchor[4 + nc + m]).collect();
        candidates.push((Detection::new(bbox, score, class_id as u32), coefs));
    }

    let kept = non_max_suppression(candidates, IOU_THRESHOLD, MAX_DETECTIONS);

    let mut detections = Vec::with_capacity(kept.len());
    for (mut detection, coefs) in kept {
        if let Some(protos) = protos {
            detection.mask = Some(build_mask(
                &coefs,
                protos,
                &detection.bbox,
                letterbox,
                input_size,
                source_size,
            )?);
        }
        detections.push(detection);
    }

    tracing::debug!(count = detections.len(), "Decoded detections");
    Ok(detections)
}

/// Greedy class-aware NMS, highest score first
fn non_max_suppression<T>(
    mut candidates: Vec<(Detection, T)>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<(Detection, T)> {
    candidates.sort_by(|a, b| b.0.confidence.total_cmp(&a.0.confidence));

    let mut kept: Vec<(Detection, T)> = Vec::new();
    for candidate in candidates {
        let overlaps = kept.iter().any(|(k, _)| {
            k.class_id == candidate.0.class_id && k.bbox.iou(&candidate.0.bbox) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
            if kept.len() == max_detections {
                break;
            }
        }
    }
    kept
}

/// Assemble the mask for one detection from its prototype coefficients
///
/// The linear combination is evaluated at prototype resolution, then sampled
/// bilinearly for every source pixel under the box. A positive logit is a
/// sigmoid above 0.5.
fn build_mask(
    coefs: &[f32],
    protos: ArrayView3<f32>,
    bbox: &BBox,
    letterbox: &Letterbox,
    input_size: (u32, u32),
    source_size: (u32, u32),
) -> Result<Mask> {
    let (nm, mh, mw) = protos.dim();
    let coefs = ndarray::ArrayView2::from_shape((1, nm), coefs)?;
    let flat = protos.to_shape((nm, mh * mw))?;
    let logits = coefs.dot(&flat);
    let logits = logits.to_shape((mh, mw))?;

    let x0 = (bbox.x1.floor() as u32).min(source_size.0);
    let y0 = (bbox.y1.floor() as u32).min(source_size.1);
    let x1 = (bbox.x2.ceil() as u32).min(source_size.0);
    let y1 = (bbox.y2.ceil() as u32).min(source_size.1);
    let width = x1.saturating_sub(x0);
    let height = y1.saturating_sub(y0);

    let sx = mw as f32 / input_size.0 as f32;
    let sy = mh as f32 / input_size.1 as f32;

    let mut data = Vec::with_capacity((width * height) as usize);
    for y in y0..y1 {
        for x in x0..x1 {
            let (ix, iy) = letterbox.to_input(x as f32 + 0.5, y as f32 + 0.5);
            let value = sample_bilinear(&logits.view(), ix * sx - 0.5, iy * sy - 0.5);
            data.push(value > 0.0);
        }
    }

    Ok(Mask {
        x: x0,
        y: y0,
        width,
        height,
        data,
    })
}

fn sample_bilinear(grid: &ArrayView2<f32>, x: f32, y: f32) -> f32 {
    let (h, w) = grid.dim();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let xl = x.floor() as usize;
    let yl = y.floor() as usize;
    let xh = (xl + 1).min(w - 1);
    let yh = (yl + 1).min(h - 1);
    let fx = x - xl as f32;
    let fy = y - yl as f32;

    let top = grid[[yl, xl]] * (1.0 - fx) + grid[[yl, xh]] * fx;
    let bottom = grid[[yh, xl]] * (1.0 - fx) + grid[[yh, xh]] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Parse the `names` metadata Ultralytics writes into exported models,
/// e.g. `{0: 'pothole', 1: 'crack'}`
fn parse_class_names(raw: &str) -> Vec<String> {
    let mut entries: Vec<(usize, String)> = raw
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .filter_map(|entry| {
            let (index, name) = entry.split_once(':')?;
            let index = index.trim().parse().ok()?;
            let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
            Some((index, name.to_string()))
        })
        .collect();
    entries.sort_by_key(|(index, _)| *index);
    entries.into_iter().map(|(_, name)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    const IDENTITY: Letterbox = Letterbox {
        ratio: 1.0,
        pad_x: 0.0,
        pad_y: 0.0,
    };

    /// One class, no mask channels: rows are cx, cy, w, h, score
    fn preds(anchors: &[[f32; 5]]) -> Array2<f32> {
        let mut array = Array2::zeros((5, anchors.len()));
        for (j, a) in anchors.iter().enumerate() {
            for (i, v) in a.iter().enumerate() {
                array[[i, j]] = *v;
            }
        }
        array
    }

    #[test]
    fn suppresses_candidates_at_or_below_confidence() {
        let p = preds(&[[20.0, 20.0, 10.0, 10.0, 0.9], [50.0, 50.0, 10.0, 10.0, 0.2]]);
        let dets = decode_predictions(p.view(), None, &IDENTITY, (64, 64), (64, 64), 0.3).unwrap();
        assert_eq!(dets.len(), 1);
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(dets[0].bbox, BBox::new(15.0, 15.0, 25.0, 25.0));
        assert!(dets[0].mask.is_none());
    }

    #[test]
    fn higher_threshold_never_yields_more_detections() {
        let p = preds(&[
            [10.0, 10.0, 8.0, 8.0, 0.95],
            [40.0, 40.0, 8.0, 8.0, 0.5],
            [20.0, 50.0, 8.0, 8.0, 0.15],
        ]);
        let low = decode_predictions(p.view(), None, &IDENTITY, (64, 64), (64, 64), 0.1).unwrap();
        let high = decode_predictions(p.view(), None, &IDENTITY, (64, 64), (64, 64), 1.0).unwrap();
        assert_eq!(low.len(), 3);
        assert!(high.len() <= low.len());
        assert!(high.is_empty());
    }

    #[test]
    fn overlapping_boxes_are_suppressed() {
        let p = preds(&[[20.0, 20.0, 10.0, 10.0, 0.8], [20.5, 20.0, 10.0, 10.0, 0.9]]);
        let dets = decode_predictions(p.view(), None, &IDENTITY, (64, 64), (64, 64), 0.3).unwrap();
        assert_eq!(dets.len(), 1);
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn mask_follows_prototype_sign() {
        // One class, one mask channel; prototype positive on the left half
        let mut p = Array2::zeros((6, 1));
        for (i, v) in [8.0, 8.0, 16.0, 16.0, 0.9, 1.0].iter().enumerate() {
            p[[i, 0]] = *v;
        }
        let protos = Array3::from_shape_fn((1, 4, 4), |(_, _, x)| if x < 2 { 5.0 } else { -5.0 });

        let dets =
            decode_predictions(p.view(), Some(protos.view()), &IDENTITY, (16, 16), (16, 16), 0.3)
                .unwrap();
        let mask = dets[0].mask.as_ref().unwrap();
        assert_eq!((mask.width, mask.height), (16, 16));
        assert!(mask.contains(1, 8));
        assert!(!mask.contains(14, 8));
    }

    #[test]
    fn parses_ultralytics_names_metadata() {
        assert_eq!(
            parse_class_names("{1: 'crack', 0: 'pothole'}"),
            vec!["pothole".to_string(), "crack".to_string()]
        );
        assert!(parse_class_names("").is_empty());
    }
}
