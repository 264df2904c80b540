//! Face alignment via 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the canonical ArcFace reference
//! positions and warps the face into a 112×112 RGB crop. Both recognizers
//! (SFace and ArcFace) are trained on crops produced this way.

use crate::types::{Landmarks, Point};
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
pub const REFERENCE_LANDMARKS_112: [Point; 5] = [
    [38.2946, 51.6963], // left eye
    [73.5318, 51.5014], // right eye
    [56.0252, 71.7366], // nose
    [41.5493, 92.3655], // left mouth
    [70.7299, 92.2041], // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Estimate a 2×3 similarity transform (scale, rotation, translation)
/// from `src` to `dst` by least squares.
///
/// Returns `[a, -b, tx, b, a, ty]`:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn estimate_similarity_transform(src: &[Point; 5], dst: &[Point; 5]) -> [f32; 6] {
    // Normal equations for the unknowns [a, b, tx, ty]. Each point pair
    // contributes two rows:
    //   [sx, -sy, 1, 0] . u = dx
    //   [sy,  sx, 0, 1] . u = dy
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for ([sx, sy], [dx, dy]) in src.iter().zip(dst.iter()) {
        let rows = [([*sx, -*sy, 1.0, 0.0], *dx), ([*sy, *sx, 0.0, 1.0], *dy)];
        for (row, rhs) in rows {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += row[j] * row[k];
                }
                atb[j] += row[j] * rhs;
            }
        }
    }

    let [a, b, tx, ty] = solve_4x4(ata, atb);
    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system by Gaussian elimination with partial pivoting.
///
/// A singular system yields the identity-scale solution `[1, 0, 0, 0]`.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(a: [[f32; 4]; 4], b: [f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&a[i]);
        m[i][4] = b[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (m[i][4] - tail) / m[i][i];
    }
    x
}

/// Warp `image` through a similarity `matrix` into an `out_size`² RGB crop.
///
/// Bilinear sampling; pixels that map outside the source are black.
fn warp_affine(image: &RgbImage, matrix: &[f32; 6], out_size: u32) -> RgbImage {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);
    let mut output = RgbImage::new(out_size, out_size);

    // M = [[a, -b], [b, a]] is invertible iff a² + b² > 0.
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return output;
    }
    let ia = a / det;
    let ib = b / det;

    let (src_w, src_h) = (image.width() as i64, image.height() as i64);
    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < src_w && y >= 0 && y < src_h {
            image.get_pixel(x as u32, y as u32)[c] as f32
        } else {
            0.0
        }
    };

    for (ox, oy, pixel) in output.enumerate_pixels_mut() {
        // src = M⁻¹ · (dst − t)
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let mut rgb = [0u8; 3];
        for (c, out) in rgb.iter_mut().enumerate() {
            let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, c) * fx * fy;
            *out = val.round().clamp(0.0, 255.0) as u8;
        }
        *pixel = Rgb(rgb);
    }

    output
}

/// Align a face to the canonical 112×112 crop used by the recognizers.
pub fn align_face(image: &RgbImage, landmarks: &Landmarks) -> RgbImage {
    let matrix = estimate_similarity_transform(&landmarks.points(), &REFERENCE_LANDMARKS_112);
    warp_affine(image, &matrix, ALIGNED_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let m = estimate_similarity_transform(&pts, &pts);

        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_scaled_transform() {
        // Landmarks at 2x the reference → scale ≈ 0.5
        let src: [Point; 5] = REFERENCE_LANDMARKS_112.map(|[x, y]| [x * 2.0, y * 2.0]);
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 0.5).abs() < 0.01, "a = {}, expected ~0.5", m[0]);
        assert!(m[3].abs() < 1e-3, "b = {}, expected ~0", m[3]);
    }

    #[test]
    fn test_align_output_size() {
        let image = RgbImage::from_pixel(640, 480, Rgb([128, 64, 32]));
        let landmarks = Landmarks::from_points(REFERENCE_LANDMARKS_112);
        let aligned = align_face(&image, &landmarks);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
    }

    #[test]
    fn test_align_preserves_color_of_uniform_image() {
        let image = RgbImage::from_pixel(300, 300, Rgb([200, 100, 50]));
        let landmarks = Landmarks::from_points(
            REFERENCE_LANDMARKS_112.map(|[x, y]| [x * 1.5 + 40.0, y * 1.5 + 30.0]),
        );
        let aligned = align_face(&image, &landmarks);
        // Crop center is well inside the source
        assert_eq!(*aligned.get_pixel(56, 56), Rgb([200, 100, 50]));
    }

    #[test]
    fn test_landmark_roundtrip() {
        // A bright patch at the left eye lands near the reference left eye.
        let mut image = RgbImage::new(200, 200);
        let src: [Point; 5] = [
            [80.0, 60.0],
            [120.0, 60.0],
            [100.0, 85.0],
            [85.0, 110.0],
            [115.0, 110.0],
        ];
        for y in 58..63 {
            for x in 78..83 {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }

        let aligned = align_face(&image, &Landmarks::from_points(src));

        let ref_x = REFERENCE_LANDMARKS_112[0][0].round() as u32;
        let ref_y = REFERENCE_LANDMARKS_112[0][1].round() as u32;
        let max_val = (ref_y - 1..=ref_y + 1)
            .flat_map(|y| (ref_x - 1..=ref_x + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y)[0])
            .max()
            .unwrap_or(0);
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_val}");
    }

    #[test]
    fn test_out_of_bounds_is_black() {
        let image = RgbImage::from_pixel(50, 50, Rgb([255, 255, 255]));
        // Landmarks far outside the image
        let landmarks = Landmarks::from_points(
            REFERENCE_LANDMARKS_112.map(|[x, y]| [x + 1000.0, y + 1000.0]),
        );
        let aligned = align_face(&image, &landmarks);
        assert!(aligned.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
