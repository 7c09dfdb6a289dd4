use crate::common::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonMaxSuppressionInit {
    pub iou_threshold: R64,
    /// Maximum number of kept boxes; 0 keeps nothing.
    pub max_keep: usize,
}

impl Default for NonMaxSuppressionInit {
    fn default() -> Self {
        Self {
            iou_threshold: r64(0.7),
            max_keep: usize::MAX,
        }
    }
}

impl NonMaxSuppressionInit {
    pub fn build(self) -> Result<NonMaxSuppression> {
        let Self {
            iou_threshold,
            max_keep,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&iou_threshold.raw()),
            "iou_threshold must lie in [0, 1]"
        );

        Ok(NonMaxSuppression {
            iou_threshold: iou_threshold.raw() as f32,
            max_keep,
        })
    }
}

/// Greedy non-maximum suppression.
#[derive(Debug, Clone)]
pub struct NonMaxSuppression {
    iou_threshold: f32,
    max_keep: usize,
}

impl NonMaxSuppression {
    /// Returns the kept indices in descending score order.
    ///
    /// The highest-scoring remaining box is kept and every remaining box
    /// whose IoU with it exceeds the threshold is dropped, until no boxes
    /// remain or `max_keep` is reached. Score ties break toward the earlier
    /// input index (stable sort).
    pub fn suppress(&self, boxes: &[PixelBox<f32>], scores: &[f32]) -> Result<Vec<usize>> {
        ensure!(
            boxes.len() == scores.len(),
            "box/score length mismatch: {} vs {}",
            boxes.len(),
            scores.len()
        );

        if boxes.is_empty() || self.max_keep == 0 {
            return Ok(vec![]);
        }

        let mut order: Vec<usize> = (0..boxes.len()).collect();
        order.sort_by_key(|&i| cmp::Reverse(r32(scores[i])));

        let mut suppressed = vec![false; boxes.len()];
        let mut keep = Vec::new();

        for (rank, &i) in order.iter().enumerate() {
            if suppressed[i] {
                continue;
            }
            keep.push(i);
            if keep.len() >= self.max_keep {
                break;
            }

            let kept_box = &boxes[i];
            for &j in &order[rank + 1..] {
                if !suppressed[j] && kept_box.iou_with(&boxes[j]) > self.iou_threshold {
                    suppressed[j] = true;
                }
            }
        }

        Ok(keep)
    }
}
