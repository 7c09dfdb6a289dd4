use crate::common::*;

/// Builds an [`AnchorGenerator`].
///
/// `stride` is both the feature-map stride and the anchor base size; every
/// (scale, ratio) pair yields one canonical anchor of area
/// `(stride * scale)^2` with `width / height == ratio`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorGeneratorInit {
    pub stride: usize,
    pub scales: Vec<R64>,
    pub ratios: Vec<R64>,
}

impl Default for AnchorGeneratorInit {
    fn default() -> Self {
        Self {
            stride: 16,
            scales: vec![r64(8.0), r64(16.0), r64(32.0)],
            ratios: vec![r64(0.5), r64(1.0), r64(2.0)],
        }
    }
}

impl AnchorGeneratorInit {
    pub fn build(self) -> Result<AnchorGenerator> {
        let Self {
            stride,
            scales,
            ratios,
        } = self;

        ensure!(stride > 0, "stride must be positive");
        ensure!(
            !scales.is_empty() && !ratios.is_empty(),
            "scales and ratios must be non-empty"
        );
        ensure!(
            scales.iter().all(|&s| s > 0.0) && ratios.iter().all(|&r| r > 0.0),
            "scales and ratios must be positive"
        );

        // Canonical anchors centered at the origin, ratio-major then
        // scale-minor; this ordering pairs positionally with the raw
        // score/offset channels.
        let canonical: Vec<_> = ratios
            .iter()
            .cartesian_product(scales.iter())
            .map(|(&ratio, &scale)| {
                let area = (stride as f64 * scale.raw()).powi(2);
                let w = (area * ratio.raw()).sqrt() as f32;
                let h = (area / ratio.raw()).sqrt() as f32;
                PixelBox::from_center_size(0.0, 0.0, w, h)
            })
            .collect();

        Ok(AnchorGenerator {
            stride,
            canonical,
            cache: HashMap::new(),
        })
    }
}

/// Generates the dense anchor grid for a feature map.
///
/// Grids are cached by `(height, width)`; the stride, scales and ratios are
/// fixed at construction, so a distinct feature-map size is the only thing
/// that forces a recomputation.
#[derive(Debug, Clone)]
pub struct AnchorGenerator {
    stride: usize,
    canonical: Vec<PixelBox<f32>>,
    cache: HashMap<(usize, usize), Arc<Vec<PixelBox<f32>>>>,
}

impl AnchorGenerator {
    /// Number of anchors per spatial cell.
    pub fn num_anchors(&self) -> usize {
        self.canonical.len()
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Tiles the canonical set across an `height`×`width` grid.
    ///
    /// Anchors are centered at `(stride * col + stride/2,
    /// stride * row + stride/2)` and ordered anchor-fastest within a cell,
    /// then by column, then by row — the same ordering the raw score/offset
    /// tensors flatten to.
    pub fn generate(&self, height: usize, width: usize) -> Vec<PixelBox<f32>> {
        let stride = self.stride as f32;
        let mut anchors = Vec::with_capacity(height * width * self.canonical.len());

        for row in 0..height {
            for col in 0..width {
                let cx = stride * col as f32 + stride / 2.0;
                let cy = stride * row as f32 + stride / 2.0;
                anchors.extend(self.canonical.iter().map(|a| a.shift(cx, cy)));
            }
        }

        anchors
    }

    /// Cached variant of [`generate`](Self::generate).
    pub fn grid(&mut self, height: usize, width: usize) -> Arc<Vec<PixelBox<f32>>> {
        if let Some(anchors) = self.cache.get(&(height, width)) {
            return anchors.clone();
        }
        let anchors = Arc::new(self.generate(height, width));
        self.cache.insert((height, width), anchors.clone());
        anchors
    }
}

/// One-shot anchor generation without a reusable generator.
pub fn generate_anchors(
    height: usize,
    width: usize,
    stride: usize,
    scales: &[R64],
    ratios: &[R64],
) -> Result<Vec<PixelBox<f32>>> {
    let generator = AnchorGeneratorInit {
        stride,
        scales: scales.to_vec(),
        ratios: ratios.to_vec(),
    }
    .build()?;
    Ok(generator.generate(height, width))
}
