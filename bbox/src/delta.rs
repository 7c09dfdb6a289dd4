use crate::{common::*, PixelBox};

/// The 4-parameter box regression encoding: center offsets relative to the
/// anchor size and log-space size ratios.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxDelta<T> {
    pub dx: T,
    pub dy: T,
    pub dw: T,
    pub dh: T,
}

impl<T> BoxDelta<T> {
    pub fn new(dx: T, dy: T, dw: T, dh: T) -> Self {
        Self { dx, dy, dw, dh }
    }
}

impl<T> BoxDelta<T>
where
    T: Float,
{
    pub fn to_array(&self) -> [T; 4] {
        [self.dx, self.dy, self.dw, self.dh]
    }

    pub fn from_array(a: [T; 4]) -> Self {
        let [dx, dy, dw, dh] = a;
        Self { dx, dy, dw, dh }
    }

    /// Undoes the target normalization applied by an external trainer:
    /// `delta * std + mean`, component-wise.
    pub fn denormalize(&self, means: [T; 4], stds: [T; 4]) -> Self {
        Self {
            dx: self.dx * stds[0] + means[0],
            dy: self.dy * stds[1] + means[1],
            dw: self.dw * stds[2] + means[2],
            dh: self.dh * stds[3] + means[3],
        }
    }
}

/// Encodes `target` relative to `anchor`.
///
/// The anchor must have positive width and height; degenerate anchors are a
/// caller defect, filtered upstream.
pub fn encode<T>(target: &PixelBox<T>, anchor: &PixelBox<T>) -> BoxDelta<T>
where
    T: Float,
{
    let zero = T::zero();
    debug_assert!(
        anchor.w() > zero && anchor.h() > zero,
        "degenerate anchor reached the codec"
    );

    BoxDelta {
        dx: (target.cx() - anchor.cx()) / anchor.w(),
        dy: (target.cy() - anchor.cy()) / anchor.h(),
        dw: (target.w() / anchor.w()).ln(),
        dh: (target.h() / anchor.h()).ln(),
    }
}

/// Exact inverse of [`encode`]: reconstructs the box whose encoding against
/// `anchor` is `delta`.
pub fn decode<T>(anchor: &PixelBox<T>, delta: &BoxDelta<T>) -> PixelBox<T>
where
    T: Float,
{
    let zero = T::zero();
    debug_assert!(
        anchor.w() > zero && anchor.h() > zero,
        "degenerate anchor reached the codec"
    );

    let one = T::one();
    let two = one + one;

    let cx = delta.dx * anchor.w() + anchor.cx();
    let cy = delta.dy * anchor.h() + anchor.cy();
    let w = delta.dw.exp() * anchor.w();
    let h = delta.dh.exp() * anchor.h();

    // Corners from center and +1-convention size; (w - 1)/2 on each side
    // makes decode(encode(b)) reproduce b exactly.
    PixelBox::from_corners([
        cx - (w - one) / two,
        cy - (h - one) / two,
        cx + (w - one) / two,
        cy + (h - one) / two,
    ])
}
