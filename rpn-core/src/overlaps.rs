use crate::common::*;

/// Pairwise IoU between two box sets, shape `[a.len(), b.len()]`.
///
/// Exact O(|a|·|b|) evaluation; rows or columns belonging to zero-area boxes
/// are 0 rather than a division by zero.
pub fn iou_matrix(a: &[PixelBox<f32>], b: &[PixelBox<f32>]) -> Array2<f32> {
    let mut matrix = Array2::zeros((a.len(), b.len()));

    // areas of b are reused across every row
    let b_areas: Vec<f32> = b.iter().map(|r| r.area()).collect();

    for (i, box_a) in a.iter().enumerate() {
        let area_a = box_a.area();
        if area_a <= 0.0 {
            continue;
        }
        for (j, box_b) in b.iter().enumerate() {
            if b_areas[j] <= 0.0 {
                continue;
            }
            let inter = box_a.intersection_area_with(box_b);
            matrix[[i, j]] = inter / (area_a + b_areas[j] - inter);
        }
    }

    matrix
}
