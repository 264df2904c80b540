use crate::types::DetectedFace;

/// Greedy Non-Maximum Suppression.
///
/// Sorts by confidence (highest first), keeps at most `top_k` candidates,
/// then drops every face whose IoU with an already kept face exceeds
/// `iou_threshold`. The result stays sorted by confidence.
pub(crate) fn nms(mut faces: Vec<DetectedFace>, iou_threshold: f32, top_k: usize) -> Vec<DetectedFace> {
    faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    faces.truncate(top_k);

    let mut keep: Vec<DetectedFace> = Vec::with_capacity(faces.len());
    for face in faces {
        if keep.iter().all(|kept| kept.bbox.iou(&face.bbox) <= iou_threshold) {
            keep.push(face);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    fn make_face(x: f32, y: f32, w: f32, h: f32, conf: f32) -> DetectedFace {
        DetectedFace::new(BoundingBox { x, y, w, h }, None, conf)
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let faces = vec![
            make_face(5.0, 5.0, 100.0, 100.0, 0.8),
            make_face(0.0, 0.0, 100.0, 100.0, 0.9),
            make_face(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(faces, 0.4, usize::MAX);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_no_suppression() {
        let faces = vec![
            make_face(0.0, 0.0, 10.0, 10.0, 0.9),
            make_face(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        assert_eq!(nms(faces, 0.4, usize::MAX).len(), 2);
    }

    #[test]
    fn test_nms_top_k() {
        let faces = (0..10)
            .map(|i| make_face(i as f32 * 20.0, 0.0, 10.0, 10.0, 0.5 + i as f32 * 0.01))
            .collect();
        let result = nms(faces, 0.3, 3);
        assert_eq!(result.len(), 3);
        assert!((result[0].confidence - 0.59).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4, usize::MAX).is_empty());
    }
}
