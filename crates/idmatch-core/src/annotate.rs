//! Presentation overlay for live frames.
//!
//! Reads a [`Progress`] snapshot and draws on a copy of the frame; it never
//! feeds back into the session. Instruction text is left to the display
//! layer, which has fonts.

use image::{Rgb, RgbImage};

use crate::session::Progress;
use crate::types::{BoundingBox, Frame};

const MATCH: Rgb<u8> = Rgb([0, 255, 0]);
const NO_MATCH: Rgb<u8> = Rgb([255, 0, 0]);
const BAR_FILL: Rgb<u8> = Rgb([0, 120, 255]);
const BAR_TRACK: Rgb<u8> = Rgb([40, 40, 40]);

#[derive(Debug, Clone, Copy)]
pub struct FrameAnnotator {
    pub box_thickness: u32,
    pub bar_height: u32,
}

impl Default for FrameAnnotator {
    fn default() -> Self {
        Self {
            box_thickness: 2,
            bar_height: 8,
        }
    }
}

impl FrameAnnotator {
    /// Face boxes (green on match, red otherwise) and an overall progress bar.
    ///
    /// Returns `None` if the frame buffer does not match its dimensions.
    pub fn annotate(&self, frame: &Frame, progress: &Progress) -> Option<RgbImage> {
        let mut image = frame.to_rgb_image()?;

        if let Some(report) = &progress.frame {
            for face in &report.faces {
                let color = if face.matched { MATCH } else { NO_MATCH };
                self.draw_box(&mut image, &face.bbox, color);
            }
        }
        self.draw_progress_bar(&mut image, progress.percent);

        Some(image)
    }

    fn draw_box(&self, image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return;
        }
        let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max - 1);
        let left = clamp(bbox.x, w);
        let top = clamp(bbox.y, h);
        let right = clamp(bbox.x + bbox.width, w);
        let bottom = clamp(bbox.y + bbox.height, h);

        for t in 0..self.box_thickness {
            for x in left..=right {
                put(image, x, top + t, color);
                put(image, x, bottom.saturating_sub(t), color);
            }
            for y in top..=bottom {
                put(image, left + t, y, color);
                put(image, right.saturating_sub(t), y, color);
            }
        }
    }

    fn draw_progress_bar(&self, image: &mut RgbImage, percent: f32) {
        let (w, h) = image.dimensions();
        let bar = self.bar_height.min(h);
        let filled = ((percent.clamp(0.0, 100.0) / 100.0) * w as f32).round() as u32;
        for y in h - bar..h {
            for x in 0..w {
                image.put_pixel(x, y, if x < filled { BAR_FILL } else { BAR_TRACK });
            }
        }
    }
}

fn put(image: &mut RgbImage, x: u32, y: u32, color: Rgb<u8>) {
    if x < image.width() && y < image.height() {
        image.put_pixel(x, y, color);
    }
}
