use crate::common::*;

/// Image geometry as seen by the network: post-resize height and width in
/// pixels, plus the resize ratio relative to the raw image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageInfo {
    pub height: f32,
    pub width: f32,
    pub scale: f32,
}

impl ImageInfo {
    pub fn new(height: f32, width: f32, scale: f32) -> Result<Self> {
        ensure!(
            height > 0.0 && width > 0.0 && scale > 0.0,
            "image dimensions and scale must be positive: got {}x{} at scale {}",
            height,
            width,
            scale
        );
        Ok(Self {
            height,
            width,
            scale,
        })
    }
}

/// Normalization constants an external trainer may have applied to the
/// regression targets. Consumed at inference time only, to denormalize raw
/// regression outputs before the final boxes are reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BboxNormalizeConfig {
    pub means: [R64; 4],
    pub stds: [R64; 4],
}

impl Default for BboxNormalizeConfig {
    fn default() -> Self {
        Self {
            means: [r64(0.0); 4],
            stds: [r64(0.1), r64(0.1), r64(0.2), r64(0.2)],
        }
    }
}

impl BboxNormalizeConfig {
    pub fn denormalize(&self, delta: &BoxDelta<f32>) -> BoxDelta<f32> {
        let cast = |v: [R64; 4]| v.map(|x| x.raw() as f32);
        delta.denormalize(cast(self.means), cast(self.stds))
    }
}

/// A ground-truth box with its foreground class.
///
/// `class_id` lies in `[1, num_classes - 1]`; 0 is reserved for background.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledBox {
    pub rect: PixelBox<f32>,
    pub class_id: i64,
}

impl LabeledBox {
    pub fn new(rect: PixelBox<f32>, class_id: i64) -> Result<Self> {
        ensure!(class_id >= 1, "class_id 0 is reserved for background");
        Ok(Self { rect, class_id })
    }
}
