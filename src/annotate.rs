//! Box and caption rendering.
//!
//! Pure presentation: nothing is carried between frames, and a frame with
//! no annotations is left untouched.

use std::fs;
use std::path::PathBuf;

use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, Rgb, RgbImage, Rgba, imageops};
use imageproc::drawing::{Blend, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect as PixelRect;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::tracker::Rect;

/// Padding around caption text, in pixels.
const CAPTION_PAD: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Class label drawn in `hazard_color`, compared case-insensitively.
    pub hazard_label: String,
    pub hazard_color: [u8; 3],
    pub default_color: [u8; 3],
    /// Box color for tracked objects in speed mode.
    pub speed_color: [u8; 3],
    pub text_color: [u8; 3],
    /// Box outline width in pixels.
    pub thickness: u32,
    /// Opacity of the caption background.
    pub caption_alpha: f32,
    /// TrueType/OpenType font for captions. Without one only boxes are drawn.
    pub font_path: Option<PathBuf>,
    pub font_scale: f32,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            hazard_label: "accident".to_string(),
            hazard_color: [255, 0, 0],
            default_color: [0, 0, 255],
            speed_color: [0, 255, 0],
            text_color: [255, 255, 255],
            thickness: 2,
            caption_alpha: 0.6,
            font_path: None,
            font_scale: 16.0,
        }
    }
}

/// One box to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub bbox: Rect,
    /// Class label; picks the box color unless `color` is set.
    pub class_label: String,
    pub caption: String,
    pub color: Option<Rgb<u8>>,
}

pub struct Annotator {
    config: AnnotationConfig,
    font: Option<FontArc>,
}

impl Annotator {
    /// Load the configured font, if any.
    pub fn new(config: AnnotationConfig) -> Result<Self> {
        let font = match &config.font_path {
            Some(path) => {
                let bytes = fs::read(path).map_err(|e| Error::input(path, e))?;
                Some(FontArc::try_from_vec(bytes).map_err(|e| Error::input(path, e))?)
            }
            None => {
                warn!("no caption font configured, drawing boxes only");
                None
            }
        };
        Ok(Self { config, font })
    }

    pub fn with_font(config: AnnotationConfig, font: Option<FontArc>) -> Self {
        Self { config, font }
    }

    pub fn is_hazard(&self, class_label: &str) -> bool {
        class_label.eq_ignore_ascii_case(&self.config.hazard_label)
    }

    pub fn color_for(&self, class_label: &str) -> Rgb<u8> {
        if self.is_hazard(class_label) {
            Rgb(self.config.hazard_color)
        } else {
            Rgb(self.config.default_color)
        }
    }

    pub fn speed_color(&self) -> Rgb<u8> {
        Rgb(self.config.speed_color)
    }

    pub fn draw(&self, image: &mut RgbImage, annotations: &[Annotation]) {
        for annotation in annotations {
            let color = annotation
                .color
                .unwrap_or_else(|| self.color_for(&annotation.class_label));
            self.draw_box(image, &annotation.bbox, color);
            if let Some(font) = &self.font {
                if !annotation.caption.is_empty() {
                    self.draw_caption(image, font, &annotation.bbox, &annotation.caption, color);
                }
            }
        }
    }

    fn draw_box(&self, image: &mut RgbImage, bbox: &Rect, color: Rgb<u8>) {
        let left = bbox.left.round() as i32;
        let top = bbox.top.round() as i32;
        let width = bbox.width.round().max(1.0) as u32;
        let height = bbox.height.round().max(1.0) as u32;

        for t in 0..self.config.thickness.max(1) {
            let rect = PixelRect::at(left - t as i32, top - t as i32).of_size(width + 2 * t, height + 2 * t);
            draw_hollow_rect_mut(image, rect, color);
        }
    }

    fn draw_caption(&self, image: &mut RgbImage, font: &FontArc, bbox: &Rect, caption: &str, color: Rgb<u8>) {
        let scale = PxScale::from(self.config.font_scale);
        let (text_w, text_h) = text_size(scale, font, caption);
        let bg_w = text_w + 2 * CAPTION_PAD;
        let bg_h = text_h + 2 * CAPTION_PAD;

        let left = bbox.left.round() as i32;
        // above the box, or just inside it at the top edge of the frame
        let above = bbox.top.round() as i32 - bg_h as i32;
        let top = if above >= 0 { above } else { bbox.top.round().max(0.0) as i32 };

        blend_rect(image, left, top, bg_w, bg_h, color, self.config.caption_alpha);
        draw_text_mut(
            image,
            Rgb(self.config.text_color),
            left + CAPTION_PAD as i32,
            top + CAPTION_PAD as i32,
            scale,
            font,
            caption,
        );
    }
}

/// Alpha-blend a solid rectangle over the image, clipped to its bounds.
fn blend_rect(image: &mut RgbImage, left: i32, top: i32, width: u32, height: u32, color: Rgb<u8>, alpha: f32) {
    let x0 = left.clamp(0, image.width() as i32) as u32;
    let y0 = top.clamp(0, image.height() as i32) as u32;
    let x1 = (left + width as i32).clamp(0, image.width() as i32) as u32;
    let y1 = (top + height as i32).clamp(0, image.height() as i32) as u32;
    if x1 <= x0 || y1 <= y0 {
        return;
    }

    let region = imageops::crop_imm(&*image, x0, y0, x1 - x0, y1 - y0).to_image();
    let mut patch = Blend(DynamicImage::ImageRgb8(region).to_rgba8());
    let [r, g, b] = color.0;
    let fill = Rgba([r, g, b, (alpha.clamp(0.0, 1.0) * 255.0).round() as u8]);
    draw_filled_rect_mut(&mut patch, PixelRect::at(0, 0).of_size(x1 - x0, y1 - y0), fill);

    let blended = DynamicImage::ImageRgba8(patch.0).to_rgb8();
    imageops::replace(image, &blended, x0 as i64, y0 as i64);
}
