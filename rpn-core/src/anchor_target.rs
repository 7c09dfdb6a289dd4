use crate::{
    common::*,
    overlaps::iou_matrix,
    types::{ImageInfo, LabeledBox},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorTargetAssignerInit {
    /// Best IoU at or above this labels an anchor positive.
    pub fg_iou_threshold: R64,
    /// Best IoU below this labels an anchor negative.
    pub bg_iou_threshold: R64,
    /// Total labeled anchors per image.
    pub batch_size: usize,
    /// Fraction of the budget reserved for positives.
    pub fg_fraction: R64,
    /// How far an anchor may poke outside the image and still be labeled.
    pub allowed_border: R64,
}

impl Default for AnchorTargetAssignerInit {
    fn default() -> Self {
        Self {
            fg_iou_threshold: r64(0.7),
            bg_iou_threshold: r64(0.3),
            batch_size: 256,
            fg_fraction: r64(0.5),
            allowed_border: r64(0.0),
        }
    }
}

impl AnchorTargetAssignerInit {
    pub fn build(self) -> Result<AnchorTargetAssigner> {
        let Self {
            fg_iou_threshold,
            bg_iou_threshold,
            batch_size,
            fg_fraction,
            allowed_border,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&bg_iou_threshold.raw())
                && (0.0..=1.0).contains(&fg_iou_threshold.raw()),
            "IoU thresholds must lie in [0, 1]"
        );
        ensure!(
            bg_iou_threshold <= fg_iou_threshold,
            "bg_iou_threshold must not exceed fg_iou_threshold"
        );
        ensure!(batch_size > 0, "batch_size must be positive");
        ensure!(
            (0.0..=1.0).contains(&fg_fraction.raw()),
            "fg_fraction must lie in [0, 1]"
        );
        ensure!(allowed_border >= 0.0, "allowed_border must be non-negative");

        Ok(AnchorTargetAssigner {
            fg_iou_threshold: fg_iou_threshold.raw() as f32,
            bg_iou_threshold: bg_iou_threshold.raw() as f32,
            batch_size,
            fg_fraction: fg_fraction.raw(),
            allowed_border: allowed_border.raw() as f32,
        })
    }
}

/// Per-anchor supervision for the proposal-generation loss.
///
/// All fields span the full anchor count; anchors outside the image or left
/// out of the sampling budget keep label −1 and zero weights, never shrink
/// the tensors.
#[derive(Debug, Clone)]
pub struct AnchorTargets {
    /// −1 ignore, 0 negative, 1 positive.
    pub labels: Vec<i64>,
    pub bbox_targets: Array2<f32>,
    pub inside_weights: Array2<f32>,
    pub outside_weights: Array2<f32>,
}

/// Labels every anchor against ground truth and produces regression targets
/// and loss weights for the proposal generator.
#[derive(Debug, Clone)]
pub struct AnchorTargetAssigner {
    fg_iou_threshold: f32,
    bg_iou_threshold: f32,
    batch_size: usize,
    fg_fraction: f64,
    allowed_border: f32,
}

impl AnchorTargetAssigner {
    /// `score_shape` is the raw RPN score tensor shape `(H, W, 2A)`; it must
    /// agree with the anchor count exactly.
    pub fn assign<R>(
        &self,
        score_shape: (usize, usize, usize),
        anchors: &[PixelBox<f32>],
        ground_truth: &[LabeledBox],
        image: &ImageInfo,
        rng: &mut R,
    ) -> Result<AnchorTargets>
    where
        R: Rng,
    {
        let (height, width, channels) = score_shape;
        ensure!(
            channels % 2 == 0 && height * width * (channels / 2) == anchors.len(),
            "score tensor shape {}x{}x{} does not match {} anchors",
            height,
            width,
            channels,
            anchors.len()
        );

        // anchors partially outside the image (beyond the border allowance)
        // are permanently ignored
        let border = self.allowed_border;
        let inside: Vec<usize> = anchors
            .iter()
            .enumerate()
            .filter(|(_, a)| {
                a.x1() >= -border
                    && a.y1() >= -border
                    && a.x2() < image.width + border
                    && a.y2() < image.height + border
            })
            .map(|(index, _)| index)
            .collect();
        let inside_boxes: Vec<_> = inside.iter().map(|&i| anchors[i]).collect();

        let (mut labels, matched_gt) = self.label_inside(&inside_boxes, ground_truth);
        self.subsample(&mut labels, rng);

        // scatter back to the full anchor count
        let total = anchors.len();
        let mut full_labels = vec![-1i64; total];
        let mut bbox_targets = Array2::zeros((total, 4));
        let mut inside_weights = Array2::zeros((total, 4));
        let mut outside_weights = Array2::zeros((total, 4));

        let num_examples = labels.iter().filter(|&&l| l >= 0).count();
        let uniform = if num_examples > 0 {
            1.0 / num_examples as f32
        } else {
            0.0
        };

        for (pos, &index) in inside.iter().enumerate() {
            let label = labels[pos];
            full_labels[index] = label;

            if label == 1 {
                let gt = &ground_truth[matched_gt[pos]];
                let delta = encode(&gt.rect, &anchors[index]);
                bbox_targets
                    .row_mut(index)
                    .assign(&Array1::from(delta.to_array().to_vec()));
                inside_weights.row_mut(index).fill(1.0);
            }
            if label >= 0 {
                outside_weights.row_mut(index).fill(uniform);
            }
        }

        Ok(AnchorTargets {
            labels: full_labels,
            bbox_targets,
            inside_weights,
            outside_weights,
        })
    }

    /// Labels the inside anchors −1/0/1 and records each anchor's best
    /// ground-truth match.
    fn label_inside(
        &self,
        inside_boxes: &[PixelBox<f32>],
        ground_truth: &[LabeledBox],
    ) -> (Vec<i64>, Vec<usize>) {
        let count = inside_boxes.len();

        if ground_truth.is_empty() || count == 0 {
            // with no ground truth every inside anchor is a negative
            // candidate
            return (vec![0; count], vec![0; count]);
        }

        let gt_boxes: Vec<_> = ground_truth.iter().map(|gt| gt.rect).collect();
        let overlaps = iou_matrix(inside_boxes, &gt_boxes);

        let mut max_overlaps = vec![0.0f32; count];
        let mut matched_gt = vec![0usize; count];
        for i in 0..count {
            for j in 0..gt_boxes.len() {
                if overlaps[[i, j]] > max_overlaps[i] {
                    max_overlaps[i] = overlaps[[i, j]];
                    matched_gt[i] = j;
                }
            }
        }

        let mut labels = vec![-1i64; count];

        // negatives first so that forced positives below can override them
        for i in 0..count {
            if max_overlaps[i] < self.bg_iou_threshold {
                labels[i] = 0;
            }
        }

        // every ground-truth box with any overlap at all promotes its
        // best-matching anchors, ties included, regardless of threshold
        for j in 0..gt_boxes.len() {
            let column_max = (0..count)
                .map(|i| overlaps[[i, j]])
                .fold(0.0f32, f32::max);
            if column_max <= 0.0 {
                continue;
            }
            // the regression target stays the anchor's own best match, which
            // may differ from the box that forced the promotion
            for i in 0..count {
                if overlaps[[i, j]] == column_max {
                    labels[i] = 1;
                }
            }
        }

        for i in 0..count {
            if max_overlaps[i] >= self.fg_iou_threshold {
                labels[i] = 1;
            }
        }

        (labels, matched_gt)
    }

    /// Flips randomly chosen excess labels back to −1 so that at most
    /// `fg_fraction * batch_size` positives and `batch_size` total examples
    /// remain.
    fn subsample<R>(&self, labels: &mut [i64], rng: &mut R)
    where
        R: Rng,
    {
        let fg_cap = (self.fg_fraction * self.batch_size as f64) as usize;
        let fg_inds: Vec<usize> = indices_of(labels, 1);
        if fg_inds.len() > fg_cap {
            let disable = fg_inds.choose_multiple(rng, fg_inds.len() - fg_cap);
            for &i in disable {
                labels[i] = -1;
            }
        }

        let num_fg = labels.iter().filter(|&&l| l == 1).count();
        let bg_cap = self.batch_size.saturating_sub(num_fg);
        let bg_inds: Vec<usize> = indices_of(labels, 0);
        if bg_inds.len() > bg_cap {
            let disable = bg_inds.choose_multiple(rng, bg_inds.len() - bg_cap);
            for &i in disable {
                labels[i] = -1;
            }
        }
    }
}

fn indices_of(labels: &[i64], value: i64) -> Vec<usize> {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &l)| l == value)
        .map(|(i, _)| i)
        .collect()
}
