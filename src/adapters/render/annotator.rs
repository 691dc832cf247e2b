use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use std::sync::Arc;
use tracing::warn;

use crate::domain::{detection::ClassifiedDetection, detection::TrashClass, model::ClassTable};

pub const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";
const LABEL_SCALE: f32 = 16.0;
const BANNER_SCALE: f32 = 22.0;
const BOX_THICKNESS: i32 = 2;

/// Draws detection boxes, label tags and the overload banner onto frames.
/// Without a font only the boxes are drawn.
pub struct Annotator {
    classes: Arc<ClassTable>,
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(classes: Arc<ClassTable>, font: Option<FontArc>) -> Self {
        Self { classes, font }
    }

    /// Loads the label font from `font_path` (or the DejaVu default).
    pub fn load(classes: Arc<ClassTable>, font_path: Option<&str>) -> Self {
        let path = font_path.unwrap_or(DEFAULT_FONT_PATH);
        let font = match std::fs::read(path) {
            Ok(bytes) => match FontArc::try_from_vec(bytes) {
                Ok(font) => Some(font),
                Err(e) => {
                    warn!(path, error = %e, "Invalid font; labels disabled");
                    None
                }
            },
            Err(e) => {
                warn!(path, error = %e, "Font not readable; labels disabled");
                None
            }
        };
        Self::new(classes, font)
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn draw(&self, frame: &mut RgbImage, detections: &[ClassifiedDetection], overload: bool) {
        for det in detections {
            self.draw_detection(frame, det);
        }
        if overload {
            self.draw_banner(frame);
        }
    }

    fn draw_detection(&self, frame: &mut RgbImage, det: &ClassifiedDetection) {
        let (fw, fh) = frame.dimensions();
        let d = &det.detection;
        let x1 = (d.x1.max(0.0) as i32).min(fw as i32 - 1);
        let y1 = (d.y1.max(0.0) as i32).min(fh as i32 - 1);
        let x2 = (d.x2 as i32).clamp(x1 + 1, fw as i32);
        let y2 = (d.y2 as i32).clamp(y1 + 1, fh as i32);
        if x1 < 0 || y1 < 0 {
            return;
        }

        let rule = self.classes.rule(det.class);
        let color = Rgb(rule.color);
        for inset in 0..BOX_THICKNESS {
            let w = (x2 - x1 - 2 * inset).max(1) as u32;
            let h = (y2 - y1 - 2 * inset).max(1) as u32;
            draw_hollow_rect_mut(frame, Rect::at(x1 + inset, y1 + inset).of_size(w, h), color);
        }

        let Some(font) = &self.font else { return };
        let text = format!("{} {:.2}", rule.label, d.score);
        let scale = PxScale::from(LABEL_SCALE);
        let (tw, th) = text_size(scale, font, &text);
        let tag_h = th as i32 + 8;
        let tag_y = (y1 - tag_h).max(0);
        draw_filled_rect_mut(frame, Rect::at(x1, tag_y).of_size(tw + 10, tag_h as u32), color);
        draw_text_mut(frame, Rgb(rule.text_color), x1 + 5, tag_y + 4, scale, font, &text);
    }

    fn draw_banner(&self, frame: &mut RgbImage) {
        let rule = self.classes.rule(TrashClass::Overload);
        let fw = frame.width() as i32;
        match &self.font {
            Some(font) => {
                let scale = PxScale::from(BANNER_SCALE);
                let (tw, th) = text_size(scale, font, &rule.label);
                let x = (fw - tw as i32 - 20).max(0);
                draw_filled_rect_mut(frame, Rect::at(x - 6, 14).of_size(tw + 12, th + 12), Rgb(rule.color));
                draw_text_mut(frame, Rgb(rule.text_color), x, 20, scale, font, &rule.label);
            }
            None => {
                // plain marker in the top-right corner
                let w = (fw / 6).max(1) as u32;
                let x = (fw - w as i32 - 10).max(0);
                draw_filled_rect_mut(frame, Rect::at(x, 10).of_size(w, 12), Rgb(rule.color));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::detection::Detection;

    fn classified(class: TrashClass, x1: f32, y1: f32, x2: f32, y2: f32) -> ClassifiedDetection {
        ClassifiedDetection {
            detection: Detection { x1, y1, x2, y2, score: 0.8, class_id: 39, label: "bottle".into() },
            class,
        }
    }

    #[test]
    fn draws_box_in_class_color() {
        let classes = Arc::new(ClassTable::default());
        let color = classes.rule(TrashClass::ScatteredTrash).color;
        let annotator = Annotator::new(classes, None);
        let mut frame = RgbImage::new(100, 80);
        annotator.draw(&mut frame, &[classified(TrashClass::ScatteredTrash, 10.0, 20.0, 50.0, 60.0)], false);
        assert_eq!(frame.get_pixel(10, 20).0, color);
        assert_eq!(frame.get_pixel(30, 40).0, [0, 0, 0]);
    }

    #[test]
    fn boxes_outside_the_frame_are_clamped() {
        let annotator = Annotator::new(Arc::new(ClassTable::default()), None);
        let mut frame = RgbImage::new(32, 32);
        annotator.draw(&mut frame, &[classified(TrashClass::Container, -20.0, -5.0, 400.0, 400.0)], true);
        assert_eq!(frame.dimensions(), (32, 32));
    }

    #[test]
    fn missing_font_degrades_to_boxes() {
        let annotator = Annotator::load(Arc::new(ClassTable::default()), Some("/nonexistent/font.ttf"));
        assert!(annotator.font.is_none());
    }
}
