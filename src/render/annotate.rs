use crate::detection::Detection;
use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;

/// Overlay colours, indexed by track id (or class id when untracked)
const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [146, 204, 23],
    [61, 219, 134],
    [26, 147, 52],
    [0, 212, 187],
];

const MASK_ALPHA: f32 = 0.5;

/// Draws detection overlays (mask fill, box, label) onto frames
#[derive(Clone)]
pub struct Annotator {
    class_names: Vec<String>,
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(class_names: Vec<String>) -> Self {
        Self {
            class_names,
            font: None,
        }
    }

    /// Enable text labels
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    /// Load a TrueType/OpenType font for labels
    pub fn load_font<P: AsRef<Path>>(path: P) -> Result<FontArc> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read font {}", path.display()))?;
        FontArc::try_from_vec(bytes)
            .with_context(|| format!("Failed to parse font {}", path.display()))
    }

    pub fn color_for(detection: &Detection) -> Rgb<u8> {
        let key = detection.track_id.unwrap_or(detection.class_id) as usize;
        Rgb(PALETTE[key % PALETTE.len()])
    }

    /// Label text, e.g. `id:3 pothole 0.87`
    pub fn label_for(&self, detection: &Detection) -> String {
        let name = self
            .class_names
            .get(detection.class_id as usize)
            .map(String::as_str)
            .unwrap_or("object");
        match detection.track_id {
            Some(id) => format!("id:{} {} {:.2}", id, name, detection.confidence),
            None => format!("{} {:.2}", name, detection.confidence),
        }
    }

    /// Return a copy of `image` with every detection drawn on it
    pub fn annotate(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
        let _span = tracing::debug_span!("annotate", count = detections.len()).entered();

        let mut canvas = image.clone();
        let (width, height) = canvas.dimensions();
        let line_width = (((width + height) as f32 / 2.0 * 0.003).round() as u32).max(2);

        for detection in detections {
            let color = Self::color_for(detection);

            if let Some(mask) = &detection.mask {
                blend_mask(&mut canvas, mask, color);
            }

            let bbox = detection.bbox.clamp_to(width, height);
            let x = bbox.x1.round() as i32;
            let y = bbox.y1.round() as i32;
            let w = bbox.width().round() as u32;
            let h = bbox.height().round() as u32;
            for offset in 0..line_width {
                let ow = w.saturating_sub(2 * offset);
                let oh = h.saturating_sub(2 * offset);
                if ow == 0 || oh == 0 {
                    break;
                }
                let rect = Rect::at(x + offset as i32, y + offset as i32).of_size(ow, oh);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }

            if let Some(font) = &self.font {
                let label = self.label_for(detection);
                let scale = PxScale::from((line_width * 8) as f32);
                let (tw, th) = text_size(scale, font, &label);
                let ty = if y >= th as i32 + 3 { y - th as i32 - 3 } else { y };
                draw_filled_rect_mut(
                    &mut canvas,
                    Rect::at(x, ty).of_size(tw.max(1) + 4, th.max(1) + 3),
                    color,
                );
                draw_text_mut(&mut canvas, Rgb([255, 255, 255]), x + 2, ty + 1, scale, font, &label);
            }
        }

        canvas
    }
}

fn blend_mask(canvas: &mut RgbImage, mask: &crate::detection::Mask, color: Rgb<u8>) {
    let (width, height) = canvas.dimensions();
    for my in 0..mask.height {
        for mx in 0..mask.width {
            if !mask.data[(my * mask.width + mx) as usize] {
                continue;
            }
            let (x, y) = (mask.x + mx, mask.y + my);
            if x >= width || y >= height {
                continue;
            }
            let pixel = canvas.get_pixel_mut(x, y);
            for c in 0..3 {
                pixel[c] = (pixel[c] as f32 * (1.0 - MASK_ALPHA) + color[c] as f32 * MASK_ALPHA)
                    .round() as u8;
            }
        }
    }
}
