use crate::{common::*, overlaps::iou_matrix, proposal::Proposals, types::LabeledBox};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalTargetAssignerInit {
    /// Best IoU at or above this makes a proposal foreground.
    pub fg_iou_threshold: R64,
    /// Background band upper bound (exclusive).
    pub bg_iou_threshold_hi: R64,
    /// Background band lower bound (inclusive).
    pub bg_iou_threshold_lo: R64,
    /// Proposals sampled per image.
    pub batch_size: usize,
    /// Fraction of the sample allowed to be foreground.
    pub fg_fraction: R64,
}

impl Default for ProposalTargetAssignerInit {
    fn default() -> Self {
        Self {
            fg_iou_threshold: r64(0.5),
            bg_iou_threshold_hi: r64(0.5),
            bg_iou_threshold_lo: r64(0.0),
            batch_size: 128,
            fg_fraction: r64(0.25),
        }
    }
}

impl ProposalTargetAssignerInit {
    pub fn build(self) -> Result<ProposalTargetAssigner> {
        let Self {
            fg_iou_threshold,
            bg_iou_threshold_hi,
            bg_iou_threshold_lo,
            batch_size,
            fg_fraction,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&fg_iou_threshold.raw()),
            "fg_iou_threshold must lie in [0, 1]"
        );
        ensure!(
            bg_iou_threshold_lo <= bg_iou_threshold_hi,
            "background band is inverted"
        );
        ensure!(batch_size > 0, "batch_size must be positive");
        ensure!(
            (0.0..=1.0).contains(&fg_fraction.raw()),
            "fg_fraction must lie in [0, 1]"
        );

        Ok(ProposalTargetAssigner {
            fg_iou_threshold: fg_iou_threshold.raw() as f32,
            bg_iou_threshold_hi: bg_iou_threshold_hi.raw() as f32,
            bg_iou_threshold_lo: bg_iou_threshold_lo.raw() as f32,
            batch_size,
            fg_fraction: fg_fraction.raw(),
        })
    }
}

/// The fixed-size training batch for the final classification head.
///
/// Regression targets are class-specific: the 4 values of a foreground row
/// sit at column offset `4 * class_id` of a `4 * num_classes`-wide row, and
/// the inside/outside weights mark the same 4 slots.
#[derive(Debug, Clone)]
pub struct ProposalTargets {
    /// Sampled rois, `[batch_size, 5]` with leading batch index 0.
    pub rois: Array2<f32>,
    /// Scores of the sampled proposals.
    pub scores: Array1<f32>,
    /// 0 for background, otherwise the matched foreground class.
    pub labels: Vec<i64>,
    pub bbox_targets: Array2<f32>,
    pub inside_weights: Array2<f32>,
    pub outside_weights: Array2<f32>,
}

/// Samples a class-balanced set of proposals and assigns per-class labels
/// and regression targets for the final classification loss.
#[derive(Debug, Clone)]
pub struct ProposalTargetAssigner {
    fg_iou_threshold: f32,
    bg_iou_threshold_hi: f32,
    bg_iou_threshold_lo: f32,
    batch_size: usize,
    fg_fraction: f64,
}

impl ProposalTargetAssigner {
    pub fn assign<R>(
        &self,
        proposals: &Proposals,
        ground_truth: &[LabeledBox],
        num_classes: usize,
        rng: &mut R,
    ) -> Result<ProposalTargets>
    where
        R: Rng,
    {
        ensure!(num_classes >= 2, "need background plus at least one class");
        ensure!(
            ground_truth
                .iter()
                .all(|gt| (1..num_classes as i64).contains(&gt.class_id)),
            "ground-truth class id out of range"
        );
        ensure!(
            proposals.rois.ncols() == 5 || proposals.is_empty(),
            "rois must be 5 columns wide"
        );

        // ground-truth boxes join the candidate pool as their own proposals
        // so they are trainable as positives from the first iteration
        let mut boxes: Vec<PixelBox<f32>> =
            (0..proposals.len()).map(|i| proposals.rect(i)).collect();
        let mut scores: Vec<f32> = proposals.scores.to_vec();
        for gt in ground_truth {
            boxes.push(gt.rect);
            scores.push(0.0);
        }
        ensure!(
            !boxes.is_empty(),
            "cannot sample a batch from zero proposals and zero ground truth"
        );

        let gt_boxes: Vec<_> = ground_truth.iter().map(|gt| gt.rect).collect();
        let overlaps = iou_matrix(&boxes, &gt_boxes);

        let mut max_overlaps = vec![0.0f32; boxes.len()];
        let mut matched_gt = vec![0usize; boxes.len()];
        for i in 0..boxes.len() {
            for j in 0..gt_boxes.len() {
                if overlaps[[i, j]] > max_overlaps[i] {
                    max_overlaps[i] = overlaps[[i, j]];
                    matched_gt[i] = j;
                }
            }
        }

        let fg_pool: Vec<usize> = (0..boxes.len())
            .filter(|&i| max_overlaps[i] >= self.fg_iou_threshold)
            .collect();
        let mut bg_pool: Vec<usize> = (0..boxes.len())
            .filter(|&i| {
                max_overlaps[i] >= self.bg_iou_threshold_lo
                    && max_overlaps[i] < self.bg_iou_threshold_hi
            })
            .collect();

        if fg_pool.is_empty() && bg_pool.is_empty() {
            // nothing lands in either band (e.g. a raised bg floor with no
            // ground truth); degrade to treating everything as background
            warn!("empty foreground and background pools, sampling background from all proposals");
            bg_pool = (0..boxes.len()).collect();
        }

        let (sampled, fg_count) = self.sample_rois(&fg_pool, &bg_pool, rng);
        debug_assert_eq!(sampled.len(), self.batch_size);

        // assemble the fixed-size batch
        let mut rois = Array2::zeros((self.batch_size, 5));
        let mut sampled_scores = Array1::zeros(self.batch_size);
        let mut labels = vec![0i64; self.batch_size];
        let width = 4 * num_classes;
        let mut bbox_targets = Array2::zeros((self.batch_size, width));
        let mut inside_weights = Array2::zeros((self.batch_size, width));

        for (row, &index) in sampled.iter().enumerate() {
            let rect = boxes[index];
            rois[[row, 0]] = 0.0;
            let [x1, y1, x2, y2] = rect.corners();
            rois[[row, 1]] = x1;
            rois[[row, 2]] = y1;
            rois[[row, 3]] = x2;
            rois[[row, 4]] = y2;
            sampled_scores[row] = scores[index];

            if row < fg_count {
                let gt = &ground_truth[matched_gt[index]];
                labels[row] = gt.class_id;

                let delta = encode(&gt.rect, &rect);
                let offset = 4 * gt.class_id as usize;
                for (slot, value) in delta.to_array().into_iter().enumerate() {
                    bbox_targets[[row, offset + slot]] = value;
                    inside_weights[[row, offset + slot]] = 1.0;
                }
            }
        }

        // no extra normalization constant at this stage
        let outside_weights = inside_weights.clone();

        Ok(ProposalTargets {
            rois,
            scores: sampled_scores,
            labels,
            bbox_targets,
            inside_weights,
            outside_weights,
        })
    }

    /// Draws exactly `batch_size` indices, foreground first. Shortfalls
    /// degrade to replacement sampling instead of failing.
    fn sample_rois<R>(&self, fg_pool: &[usize], bg_pool: &[usize], rng: &mut R) -> (Vec<usize>, usize)
    where
        R: Rng,
    {
        let fg_quota = (self.fg_fraction * self.batch_size as f64).round() as usize;

        if !fg_pool.is_empty() && !bg_pool.is_empty() {
            let fg_count = cmp::min(fg_quota, fg_pool.len());
            let mut sampled: Vec<usize> =
                fg_pool.choose_multiple(rng, fg_count).copied().collect();

            let bg_needed = self.batch_size - fg_count;
            if bg_pool.len() >= bg_needed {
                sampled.extend(bg_pool.choose_multiple(rng, bg_needed).copied());
            } else {
                warn!(
                    "background pool of {} short of {}, sampling with replacement",
                    bg_pool.len(),
                    bg_needed
                );
                sampled.extend((0..bg_needed).map(|_| bg_pool[rng.gen_range(0..bg_pool.len())]));
            }
            (sampled, fg_count)
        } else if !fg_pool.is_empty() {
            // no background at all: the whole batch is foreground, repeated
            // as needed
            let sampled = sample_with_replacement(fg_pool, self.batch_size, rng);
            (sampled, self.batch_size)
        } else {
            let sampled = sample_with_replacement(bg_pool, self.batch_size, rng);
            (sampled, 0)
        }
    }
}

fn sample_with_replacement<R>(pool: &[usize], amount: usize, rng: &mut R) -> Vec<usize>
where
    R: Rng,
{
    if pool.len() >= amount {
        pool.choose_multiple(rng, amount).copied().collect()
    } else {
        (0..amount).map(|_| pool[rng.gen_range(0..pool.len())]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn assigner() -> ProposalTargetAssigner {
        ProposalTargetAssignerInit::default().build().unwrap()
    }

    fn proposals_from(corners: &[[f32; 4]]) -> Proposals {
        let mut data = Vec::new();
        for c in corners {
            data.push(0.0);
            data.extend_from_slice(c);
        }
        Proposals {
            rois: Array2::from_shape_vec((corners.len(), 5), data).unwrap(),
            scores: Array1::from(vec![0.9; corners.len()]),
        }
    }

    fn gt(corners: [f32; 4], class_id: i64) -> LabeledBox {
        LabeledBox::new(PixelBox::from_corners(corners), class_id).unwrap()
    }

    #[test]
    fn sample_count_and_fg_quota() {
        // a grid of proposals around two ground-truth boxes
        let corners: Vec<[f32; 4]> = (0..40)
            .map(|i| {
                let offset = (i % 10) as f32 * 10.0;
                [offset, offset, offset + 49.0, offset + 49.0]
            })
            .collect();
        let proposals = proposals_from(&corners);
        let truth = vec![gt([0.0, 0.0, 49.0, 49.0], 1), gt([50.0, 50.0, 99.0, 99.0], 2)];

        let mut rng = StdRng::seed_from_u64(5);
        let targets = assigner()
            .assign(&proposals, &truth, 3, &mut rng)
            .unwrap();

        assert_eq!(targets.rois.nrows(), 128);
        assert_eq!(targets.labels.len(), 128);
        let fg_count = targets.labels.iter().filter(|&&l| l > 0).count();
        assert!(fg_count <= 32);
        // foreground rows come first
        assert!(targets.labels[fg_count..].iter().all(|&l| l == 0));
    }

    #[test]
    fn class_specific_target_layout() {
        let proposals = proposals_from(&[[0.0, 0.0, 49.0, 49.0]]);
        let truth = vec![gt([2.0, 2.0, 51.0, 51.0], 2)];
        let num_classes = 4;

        let mut rng = StdRng::seed_from_u64(1);
        let targets = assigner()
            .assign(&proposals, &truth, num_classes, &mut rng)
            .unwrap();

        assert_eq!(targets.bbox_targets.ncols(), 4 * num_classes);

        let fg_rows: Vec<usize> = (0..targets.labels.len())
            .filter(|&r| targets.labels[r] == 2)
            .collect();
        assert!(!fg_rows.is_empty());

        for &row in &fg_rows {
            for class in 0..num_classes {
                for slot in 0..4 {
                    let col = 4 * class + slot;
                    let expected_weight = if class == 2 { 1.0 } else { 0.0 };
                    assert_abs_diff_eq!(targets.inside_weights[[row, col]], expected_weight);
                    assert_abs_diff_eq!(
                        targets.outside_weights[[row, col]],
                        targets.inside_weights[[row, col]]
                    );
                    if class != 2 {
                        assert_abs_diff_eq!(targets.bbox_targets[[row, col]], 0.0);
                    }
                }
            }
        }

        // background rows carry no regression signal
        for row in 0..targets.labels.len() {
            if targets.labels[row] == 0 {
                assert_abs_diff_eq!(targets.inside_weights.row(row).sum(), 0.0);
            }
        }
    }

    #[test]
    fn ground_truth_joins_the_pool_as_positive() {
        // proposals nowhere near the ground truth: the appended gt box is
        // the only possible foreground example
        let proposals = proposals_from(&[[200.0, 200.0, 249.0, 249.0]]);
        let truth = vec![gt([0.0, 0.0, 49.0, 49.0], 1)];

        let mut rng = StdRng::seed_from_u64(9);
        let targets = assigner()
            .assign(&proposals, &truth, 2, &mut rng)
            .unwrap();

        let fg_count = targets.labels.iter().filter(|&&l| l > 0).count();
        assert!(fg_count >= 1);
        // the foreground roi is the ground-truth box itself
        assert_eq!(targets.labels[0], 1);
        assert_eq!(
            [
                targets.rois[[0, 1]],
                targets.rois[[0, 2]],
                targets.rois[[0, 3]],
                targets.rois[[0, 4]]
            ],
            [0.0, 0.0, 49.0, 49.0]
        );
        // a perfect match encodes to the zero delta
        assert_abs_diff_eq!(targets.bbox_targets[[0, 4]], 0.0);
        assert_abs_diff_eq!(targets.bbox_targets[[0, 6]], 0.0);
    }

    #[test]
    fn empty_ground_truth_yields_all_background() {
        let proposals = proposals_from(&[
            [0.0, 0.0, 49.0, 49.0],
            [10.0, 10.0, 59.0, 59.0],
            [20.0, 20.0, 69.0, 69.0],
        ]);

        let mut rng = StdRng::seed_from_u64(2);
        let targets = assigner().assign(&proposals, &[], 2, &mut rng).unwrap();

        assert_eq!(targets.labels.len(), 128);
        assert!(targets.labels.iter().all(|&l| l == 0));
        assert_eq!(targets.bbox_targets.sum(), 0.0);
        assert_eq!(targets.inside_weights.sum(), 0.0);
    }

    #[test]
    fn raised_bg_floor_never_fails() {
        // with bg_lo above every overlap both pools start empty; the
        // assigner must still return a full batch
        let proposals = proposals_from(&[[0.0, 0.0, 49.0, 49.0]]);
        let assigner = ProposalTargetAssignerInit {
            bg_iou_threshold_lo: r64(0.1),
            ..Default::default()
        }
        .build()
        .unwrap();

        let mut rng = StdRng::seed_from_u64(4);
        let targets = assigner.assign(&proposals, &[], 2, &mut rng).unwrap();
        assert_eq!(targets.labels.len(), 128);
        assert!(targets.labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn no_candidates_at_all_is_an_error() {
        let proposals = Proposals {
            rois: Array2::zeros((0, 5)),
            scores: Array1::zeros(0),
        };
        let mut rng = StdRng::seed_from_u64(0);
        assert!(assigner().assign(&proposals, &[], 2, &mut rng).is_err());
    }
}
