//! Debug rendering of detections.

use crate::types::DetectedFace;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

/// Copy of `image` with every box outlined and every landmark marked.
///
/// `thickness` is the outline width in pixels, drawn inwards.
pub fn draw_faces(image: &RgbImage, faces: &[DetectedFace], color: [u8; 3], thickness: u32) -> RgbImage {
    let mut canvas = image.clone();
    let color = Rgb(color);

    for face in faces {
        let b = &face.bbox;
        for inset in 0..thickness.max(1) {
            let w = b.w as i64 - 2 * inset as i64;
            let h = b.h as i64 - 2 * inset as i64;
            if w < 1 || h < 1 {
                break;
            }
            let rect = Rect::at(b.x as i32 + inset as i32, b.y as i32 + inset as i32).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }

        if let Some(landmarks) = &face.landmarks {
            let radius = thickness.max(1) as i32;
            for [x, y] in landmarks.points() {
                draw_filled_circle_mut(&mut canvas, (x as i32, y as i32), radius, color);
            }
        }
    }
    canvas
}
