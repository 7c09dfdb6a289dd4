use crate::{anchor_target::AnchorTargets, common::*, proposal_target::ProposalTargets};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LossReduction {
    /// Average the per-row sums over the rows.
    Mean,
    /// Plain sum; normalization is expected to live in the outside weights.
    Sum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothL1LossInit {
    pub sigma: R64,
    pub reduction: LossReduction,
}

impl Default for SmoothL1LossInit {
    fn default() -> Self {
        Self {
            sigma: r64(1.0),
            reduction: LossReduction::Mean,
        }
    }
}

impl SmoothL1LossInit {
    pub fn build(self) -> Result<SmoothL1Loss> {
        let Self { sigma, reduction } = self;
        ensure!(sigma > 0.0, "sigma must be positive");
        Ok(SmoothL1Loss {
            sigma_sq: (sigma.raw() * sigma.raw()) as f32,
            reduction,
        })
    }
}

/// Robust box-regression loss: quadratic for `|d| < 1/σ²`, linear beyond.
#[derive(Debug, Clone)]
pub struct SmoothL1Loss {
    sigma_sq: f32,
    reduction: LossReduction,
}

impl SmoothL1Loss {
    /// All four arrays must share one shape. The difference is gated by the
    /// inside weights, the per-element losses scaled by the outside weights
    /// and summed over the trailing dimension.
    pub fn forward(
        &self,
        pred: ArrayView2<f32>,
        target: ArrayView2<f32>,
        inside_weights: ArrayView2<f32>,
        outside_weights: ArrayView2<f32>,
    ) -> Result<f32> {
        ensure!(
            pred.dim() == target.dim()
                && pred.dim() == inside_weights.dim()
                && pred.dim() == outside_weights.dim(),
            "prediction/target/weight shapes disagree"
        );

        let rows = pred.nrows();
        if rows == 0 {
            return Ok(0.0);
        }

        let breakpoint = 1.0 / self.sigma_sq;
        let total: f32 = izip!(pred.iter(), target.iter(), inside_weights.iter(), outside_weights.iter())
            .map(|(&p, &t, &wi, &wo)| {
                let diff = wi * (p - t);
                let abs_diff = diff.abs();
                let loss = if abs_diff < breakpoint {
                    0.5 * self.sigma_sq * diff * diff
                } else {
                    abs_diff - 0.5 / self.sigma_sq
                };
                wo * loss
            })
            .sum();

        Ok(match self.reduction {
            LossReduction::Mean => total / rows as f32,
            LossReduction::Sum => total,
        })
    }
}

/// Multi-class cross-entropy over logits with sparse labels; rows labeled
/// −1 are excluded from the batch, not zero-weighted.
#[derive(Debug, Clone, Default)]
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    pub fn forward(&self, logits: ArrayView2<f32>, labels: &[i64]) -> Result<f32> {
        ensure!(
            logits.nrows() == labels.len(),
            "logit rows {} do not match {} labels",
            logits.nrows(),
            labels.len()
        );
        let num_classes = logits.ncols() as i64;
        ensure!(
            labels.iter().all(|&l| l >= -1 && l < num_classes),
            "label out of range"
        );

        let mut total = 0.0f32;
        let mut count = 0usize;

        for (row, &label) in izip!(logits.rows(), labels) {
            if label < 0 {
                continue;
            }
            // numerically stable log-sum-exp
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let log_sum: f32 = row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln() + max;
            total += log_sum - row[label as usize];
            count += 1;
        }

        // an all-ignored batch contributes no loss
        if count == 0 {
            return Ok(0.0);
        }
        Ok(total / count as f32)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionLossInit {
    /// Smooth-L1 sigma of the proposal-generation head.
    pub rpn_sigma: R64,
    /// Smooth-L1 sigma of the classification head.
    pub head_sigma: R64,
}

impl Default for DetectionLossInit {
    fn default() -> Self {
        Self {
            rpn_sigma: r64(3.0),
            head_sigma: r64(1.0),
        }
    }
}

impl DetectionLossInit {
    pub fn build(self) -> Result<DetectionLoss> {
        let Self {
            rpn_sigma,
            head_sigma,
        } = self;

        // the RPN loss is normalized by the outside weights (1/num_examples),
        // so its reduction is a plain sum
        let rpn_box = SmoothL1LossInit {
            sigma: rpn_sigma,
            reduction: LossReduction::Sum,
        }
        .build()?;
        let head_box = SmoothL1LossInit {
            sigma: head_sigma,
            reduction: LossReduction::Mean,
        }
        .build()?;

        Ok(DetectionLoss {
            rpn_box,
            head_box,
            class: CrossEntropyLoss,
        })
    }
}

/// The four loss terms of one training step, returned as plain values and
/// passed forward by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionLosses {
    pub rpn_class_loss: f32,
    pub rpn_box_loss: f32,
    pub class_loss: f32,
    pub box_loss: f32,
    pub total: f32,
}

/// Combines the two cross-entropy and two smooth-L1 terms that supervise the
/// proposal generator and the classification head.
#[derive(Debug, Clone)]
pub struct DetectionLoss {
    rpn_box: SmoothL1Loss,
    head_box: SmoothL1Loss,
    class: CrossEntropyLoss,
}

impl DetectionLoss {
    /// `rpn_logits` is `[num_anchors, 2]`, `rpn_deltas` `[num_anchors, 4]`,
    /// `class_logits` `[batch, num_classes]` and `head_deltas`
    /// `[batch, 4·num_classes]`, all paired positionally with the targets.
    pub fn forward(
        &self,
        rpn_logits: ArrayView2<f32>,
        rpn_deltas: ArrayView2<f32>,
        anchor_targets: &AnchorTargets,
        class_logits: ArrayView2<f32>,
        head_deltas: ArrayView2<f32>,
        proposal_targets: &ProposalTargets,
    ) -> Result<DetectionLosses> {
        let rpn_class_loss = self.class.forward(rpn_logits, &anchor_targets.labels)?;
        let rpn_box_loss = self.rpn_box.forward(
            rpn_deltas,
            anchor_targets.bbox_targets.view(),
            anchor_targets.inside_weights.view(),
            anchor_targets.outside_weights.view(),
        )?;

        let class_loss = self.class.forward(class_logits, &proposal_targets.labels)?;
        let box_loss = self.head_box.forward(
            head_deltas,
            proposal_targets.bbox_targets.view(),
            proposal_targets.inside_weights.view(),
            proposal_targets.outside_weights.view(),
        )?;

        Ok(DetectionLosses {
            rpn_class_loss,
            rpn_box_loss,
            class_loss,
            box_loss,
            total: rpn_class_loss + rpn_box_loss + class_loss + box_loss,
        })
    }
}
