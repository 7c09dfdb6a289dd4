use crate::{
    common::*,
    nms::{NonMaxSuppression, NonMaxSuppressionInit},
    types::ImageInfo,
};

/// Proposal selection policy, fixed once per run by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalMode {
    /// Score-ranked decoding with greedy suppression.
    Nms,
    /// Plain top-scoring selection, no suppression. Faster, lower quality.
    Top,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalDecoderInit {
    pub mode: ProposalMode,
    /// Candidates entering NMS; 0 means unlimited.
    pub pre_nms_top_n: usize,
    /// Survivors kept after NMS.
    pub post_nms_top_n: usize,
    pub nms_iou_threshold: R64,
    /// Minimum box side in raw-image pixels; scaled by the resize ratio
    /// before filtering.
    pub min_box_size: R64,
    /// Fixed output count of the `Top` policy.
    pub top_n: usize,
}

impl Default for ProposalDecoderInit {
    fn default() -> Self {
        Self {
            mode: ProposalMode::Nms,
            pre_nms_top_n: 12000,
            post_nms_top_n: 2000,
            nms_iou_threshold: r64(0.7),
            min_box_size: r64(16.0),
            top_n: 5000,
        }
    }
}

impl ProposalDecoderInit {
    pub fn build(self) -> Result<ProposalDecoder> {
        let Self {
            mode,
            pre_nms_top_n,
            post_nms_top_n,
            nms_iou_threshold,
            min_box_size,
            top_n,
        } = self;

        ensure!(min_box_size >= 0.0, "min_box_size must be non-negative");
        ensure!(post_nms_top_n > 0, "post_nms_top_n must be positive");
        ensure!(top_n > 0, "top_n must be positive");

        let nms = NonMaxSuppressionInit {
            iou_threshold: nms_iou_threshold,
            max_keep: post_nms_top_n,
        }
        .build()?;

        Ok(ProposalDecoder {
            mode,
            pre_nms_top_n,
            min_box_size: min_box_size.raw() as f32,
            top_n,
            nms,
        })
    }
}

/// Ranked candidate regions.
///
/// `rois` rows are `[batch_index, x1, y1, x2, y2]` with the batch index
/// fixed at 0; `scores` is paired row-by-row.
#[derive(Debug, Clone)]
pub struct Proposals {
    pub rois: Array2<f32>,
    pub scores: Array1<f32>,
}

impl Proposals {
    pub fn len(&self) -> usize {
        self.rois.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.rois.nrows() == 0
    }

    /// The box of row `index`, without the batch column.
    pub fn rect(&self, index: usize) -> PixelBox<f32> {
        let row = self.rois.row(index);
        PixelBox::from_corners([row[1], row[2], row[3], row[4]])
    }

    fn from_parts(boxes: &[PixelBox<f32>], scores: Vec<f32>) -> Result<Self> {
        let mut data = Vec::with_capacity(boxes.len() * 5);
        for rect in boxes {
            data.push(0.0);
            data.extend(rect.corners());
        }
        Ok(Self {
            rois: Array2::from_shape_vec((boxes.len(), 5), data)?,
            scores: Array1::from(scores),
        })
    }
}

/// Turns anchors plus raw score/offset tensors into ranked, clipped,
/// size-filtered candidate boxes.
#[derive(Debug, Clone)]
pub struct ProposalDecoder {
    mode: ProposalMode,
    pre_nms_top_n: usize,
    min_box_size: f32,
    top_n: usize,
    nms: NonMaxSuppression,
}

impl ProposalDecoder {
    /// `scores` has shape `(H, W, 2A)` with the foreground channels last;
    /// `deltas` has shape `(H, W, 4A)`. Both pair positionally with
    /// `anchors`, which must hold exactly `H·W·A` boxes.
    pub fn decode(
        &self,
        scores: ArrayView3<f32>,
        deltas: ArrayView3<f32>,
        anchors: &[PixelBox<f32>],
        image: &ImageInfo,
    ) -> Result<Proposals> {
        let (boxes, fg_scores) = decode_all(scores, deltas, anchors, image)?;

        match self.mode {
            ProposalMode::Nms => self.select_nms(boxes, fg_scores, image.scale),
            ProposalMode::Top => self.select_top(boxes, fg_scores),
        }
    }

    fn select_nms(
        &self,
        boxes: Vec<PixelBox<f32>>,
        scores: Vec<f32>,
        image_scale: f32,
    ) -> Result<Proposals> {
        let min_side = self.min_box_size * image_scale;

        // drop boxes that collapsed below the minimum size
        let (boxes, scores): (Vec<_>, Vec<_>) = izip!(boxes, scores)
            .filter(|(rect, _)| rect.w() >= min_side && rect.h() >= min_side)
            .unzip();

        let mut order: Vec<usize> = (0..boxes.len()).collect();
        order.sort_by_key(|&i| cmp::Reverse(r32(scores[i])));
        if self.pre_nms_top_n > 0 {
            order.truncate(self.pre_nms_top_n);
        }

        let candidate_boxes: Vec<_> = order.iter().map(|&i| boxes[i]).collect();
        let candidate_scores: Vec<_> = order.iter().map(|&i| scores[i]).collect();

        let keep = self.nms.suppress(&candidate_boxes, &candidate_scores)?;

        let kept_boxes: Vec<_> = keep.iter().map(|&i| candidate_boxes[i]).collect();
        let kept_scores: Vec<_> = keep.iter().map(|&i| candidate_scores[i]).collect();
        Proposals::from_parts(&kept_boxes, kept_scores)
    }

    fn select_top(&self, boxes: Vec<PixelBox<f32>>, scores: Vec<f32>) -> Result<Proposals> {
        if boxes.is_empty() {
            return Proposals::from_parts(&[], vec![]);
        }

        let mut order: Vec<usize> = (0..boxes.len()).collect();
        order.sort_by_key(|&i| cmp::Reverse(r32(scores[i])));
        order.truncate(self.top_n);

        // pad by repeating the last valid box so the downstream head always
        // sees a fixed-size batch; repetitions are intentional and must not
        // be deduplicated
        if let Some(&last) = order.last() {
            while order.len() < self.top_n {
                order.push(last);
            }
        }

        let kept_boxes: Vec<_> = order.iter().map(|&i| boxes[i]).collect();
        let kept_scores: Vec<_> = order.iter().map(|&i| scores[i]).collect();
        Proposals::from_parts(&kept_boxes, kept_scores)
    }
}

/// Decodes every anchor with its paired delta and clips to image bounds.
fn decode_all(
    scores: ArrayView3<f32>,
    deltas: ArrayView3<f32>,
    anchors: &[PixelBox<f32>],
    image: &ImageInfo,
) -> Result<(Vec<PixelBox<f32>>, Vec<f32>)> {
    let (height, width, score_channels) = scores.dim();
    ensure!(
        score_channels % 2 == 0,
        "score tensor must carry background/foreground channel pairs, got {} channels",
        score_channels
    );
    let num_anchors = score_channels / 2;
    ensure!(
        deltas.dim() == (height, width, num_anchors * 4),
        "delta tensor shape {:?} does not pair with score tensor shape {:?}",
        deltas.dim(),
        scores.dim()
    );
    ensure!(
        anchors.len() == height * width * num_anchors,
        "anchor count {} does not match tensor geometry {}x{}x{}",
        anchors.len(),
        height,
        width,
        num_anchors
    );

    let mut boxes = Vec::with_capacity(anchors.len());
    let mut fg_scores = Vec::with_capacity(anchors.len());

    for (index, anchor) in anchors.iter().enumerate() {
        let k = index % num_anchors;
        let col = (index / num_anchors) % width;
        let row = index / (num_anchors * width);

        let delta = BoxDelta::new(
            deltas[(row, col, 4 * k)],
            deltas[(row, col, 4 * k + 1)],
            deltas[(row, col, 4 * k + 2)],
            deltas[(row, col, 4 * k + 3)],
        );

        boxes.push(decode(anchor, &delta).clip(image.height, image.width));
        fg_scores.push(scores[(row, col, num_anchors + k)]);
    }

    Ok((boxes, fg_scores))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::generate_anchors;
    use ndarray::Array3;

    fn image(h: f32, w: f32) -> ImageInfo {
        ImageInfo::new(h, w, 1.0).unwrap()
    }

    /// 1x2 grid of 128-sized anchors whose neighbors overlap above 0.7.
    fn wide_anchor_fixture() -> (Vec<PixelBox<f32>>, Array3<f32>, Array3<f32>) {
        let anchors = generate_anchors(1, 2, 16, &[r64(8.0)], &[r64(1.0)]).unwrap();
        let mut scores = Array3::zeros((1, 2, 2));
        scores[(0, 0, 1)] = 0.9;
        scores[(0, 1, 1)] = 0.8;
        let deltas = Array3::zeros((1, 2, 4));
        (anchors, scores, deltas)
    }

    #[test]
    fn nms_mode_suppresses_overlapping_neighbor() {
        let (anchors, scores, deltas) = wide_anchor_fixture();
        let decoder = ProposalDecoderInit::default().build().unwrap();

        let proposals = decoder
            .decode(scores.view(), deltas.view(), &anchors, &image(600.0, 600.0))
            .unwrap();

        // clipped copies of the two anchors overlap above 0.7, so only the
        // higher-scoring one survives
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals.scores[0], 0.9);
        assert_eq!(proposals.rois[[0, 0]], 0.0);
        // the kept box is the clipped first anchor
        assert_eq!(proposals.rect(0).corners(), [0.0, 0.0, 72.0, 72.0]);
    }

    #[test]
    fn nms_mode_filters_small_boxes() {
        let anchors = generate_anchors(1, 1, 16, &[r64(8.0)], &[r64(1.0)]).unwrap();
        let mut scores = Array3::zeros((1, 1, 2));
        scores[(0, 0, 1)] = 0.5;
        let mut deltas = Array3::zeros((1, 1, 4));
        // shrink the decoded box well under min_box_size
        deltas[(0, 0, 2)] = -3.0;
        deltas[(0, 0, 3)] = -3.0;

        let decoder = ProposalDecoderInit::default().build().unwrap();
        let proposals = decoder
            .decode(scores.view(), deltas.view(), &anchors, &image(600.0, 600.0))
            .unwrap();
        assert!(proposals.is_empty());
    }

    #[test]
    fn min_size_filter_scales_with_resize_ratio() {
        let (anchors, scores, deltas) = wide_anchor_fixture();
        let decoder = ProposalDecoderInit::default().build().unwrap();

        // the clipped anchors are 73 pixels on their shortest side; at resize
        // ratio 5 the threshold becomes 80 and both are dropped
        let resized = ImageInfo::new(600.0, 600.0, 5.0).unwrap();
        let proposals = decoder
            .decode(scores.view(), deltas.view(), &anchors, &resized)
            .unwrap();
        assert!(proposals.is_empty());
    }

    #[test]
    fn top_mode_pads_by_repeating_last_box() {
        let (anchors, scores, deltas) = wide_anchor_fixture();
        let decoder = ProposalDecoderInit {
            mode: ProposalMode::Top,
            top_n: 5,
            ..Default::default()
        }
        .build()
        .unwrap();

        let proposals = decoder
            .decode(scores.view(), deltas.view(), &anchors, &image(600.0, 600.0))
            .unwrap();

        assert_eq!(proposals.len(), 5);
        // descending scores, then the padded repeats of the weakest box
        assert_eq!(proposals.scores.to_vec(), vec![0.9, 0.8, 0.8, 0.8, 0.8]);
        for i in 2..5 {
            assert_eq!(proposals.rect(i).corners(), proposals.rect(1).corners());
        }
    }

    #[test]
    fn decoded_boxes_are_clipped() {
        let (anchors, scores, deltas) = wide_anchor_fixture();
        let decoder = ProposalDecoderInit {
            mode: ProposalMode::Top,
            top_n: 2,
            ..Default::default()
        }
        .build()
        .unwrap();

        let proposals = decoder
            .decode(scores.view(), deltas.view(), &anchors, &image(50.0, 50.0))
            .unwrap();
        for i in 0..proposals.len() {
            let [x1, y1, x2, y2] = proposals.rect(i).corners();
            assert!(x1 >= 0.0 && y1 >= 0.0 && x2 <= 49.0 && y2 <= 49.0);
        }
    }

    #[test]
    fn tensor_anchor_mismatch_is_fatal() {
        let (anchors, scores, deltas) = wide_anchor_fixture();
        let decoder = ProposalDecoderInit::default().build().unwrap();

        let result = decoder.decode(
            scores.view(),
            deltas.view(),
            &anchors[..1],
            &image(600.0, 600.0),
        );
        assert!(result.is_err());
    }
}
