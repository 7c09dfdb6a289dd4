use crate::common::*;

/// Axis-aligned box in corner form with inclusive corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox<T> {
    pub(crate) x1: T,
    pub(crate) y1: T,
    pub(crate) x2: T,
    pub(crate) y2: T,
}

impl<T> PixelBox<T> {
    pub fn try_cast<V>(self) -> Option<PixelBox<V>>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        Some(PixelBox {
            x1: V::from(self.x1)?,
            y1: V::from(self.y1)?,
            x2: V::from(self.x2)?,
            y2: V::from(self.y2)?,
        })
    }

    pub fn cast<V>(self) -> PixelBox<V>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        self.try_cast().unwrap()
    }
}

impl<T> PixelBox<T>
where
    T: Float,
{
    /// Builds a box from corners, rejecting boxes flipped beyond the
    /// degenerate empty box (`x2 == x1 - 1`).
    pub fn try_from_corners(corners: [T; 4]) -> Result<Self> {
        let [x1, y1, x2, y2] = corners;
        let one = T::one();
        ensure!(
            x2 >= x1 - one && y2 >= y1 - one,
            "corners are flipped: x2 >= x1 - 1 and y2 >= y1 - 1 must hold"
        );
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn from_corners(corners: [T; 4]) -> Self {
        let [x1, y1, x2, y2] = corners;
        Self { x1, y1, x2, y2 }
    }

    /// Builds a box of size `w`×`h` centered at `(cx, cy)`.
    pub fn from_center_size(cx: T, cy: T, w: T, h: T) -> Self {
        let two = T::one() + T::one();
        Self {
            x1: cx - w / two,
            y1: cy - h / two,
            x2: cx + w / two,
            y2: cy + h / two,
        }
    }

    pub fn x1(&self) -> T {
        self.x1
    }

    pub fn y1(&self) -> T {
        self.y1
    }

    pub fn x2(&self) -> T {
        self.x2
    }

    pub fn y2(&self) -> T {
        self.y2
    }

    pub fn corners(&self) -> [T; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn w(&self) -> T {
        self.x2 - self.x1 + T::one()
    }

    pub fn h(&self) -> T {
        self.y2 - self.y1 + T::one()
    }

    pub fn cx(&self) -> T {
        let two = T::one() + T::one();
        (self.x1 + self.x2) / two
    }

    pub fn cy(&self) -> T {
        let two = T::one() + T::one();
        (self.y1 + self.y2) / two
    }

    pub fn area(&self) -> T {
        self.w() * self.h()
    }

    /// Translates the box by `(dx, dy)`.
    pub fn shift(&self, dx: T, dy: T) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    /// Clamps the corners to `[0, im_w - 1] × [0, im_h - 1]`.
    pub fn clip(&self, im_h: T, im_w: T) -> Self {
        let zero = T::zero();
        let one = T::one();
        Self {
            x1: self.x1.max(zero).min(im_w - one),
            y1: self.y1.max(zero).min(im_h - one),
            x2: self.x2.max(zero).min(im_w - one),
            y2: self.y2.max(zero).min(im_h - one),
        }
    }

    pub fn intersect_with(&self, other: &Self) -> Option<Self> {
        let one = T::one();
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        (x2 - x1 + one > T::zero() && y2 - y1 + one > T::zero())
            .then(|| Self { x1, y1, x2, y2 })
    }

    pub fn intersection_area_with(&self, other: &Self) -> T {
        self.intersect_with(other)
            .map(|b| b.area())
            .unwrap_or_else(T::zero)
    }

    /// Intersection over union. Zero-area operands yield 0 rather than a
    /// division by zero.
    pub fn iou_with(&self, other: &Self) -> T {
        let zero = T::zero();
        let self_area = self.area();
        let other_area = other.area();
        if self_area <= zero || other_area <= zero {
            return zero;
        }
        let inter_area = self.intersection_area_with(other);
        let union_area = self_area + other_area - inter_area;
        inter_area / union_area
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn pixel_convention() {
        let b = PixelBox::from_corners([0.0_f64, 0.0, 0.0, 0.0]);
        assert_abs_diff_eq!(b.w(), 1.0);
        assert_abs_diff_eq!(b.area(), 1.0);

        let b = PixelBox::from_corners([10.0_f64, 10.0, 100.0, 100.0]);
        assert_abs_diff_eq!(b.w(), 91.0);
        assert_abs_diff_eq!(b.cx(), 55.0);
    }

    #[test]
    fn iou_identical_boxes_is_one() {
        let b = PixelBox::from_corners([3.0_f64, 4.0, 17.0, 21.0]);
        assert_abs_diff_eq!(b.iou_with(&b), 1.0);
    }

    #[test]
    fn iou_disjoint_boxes_is_zero() {
        let a = PixelBox::from_corners([0.0_f64, 0.0, 4.0, 4.0]);
        let b = PixelBox::from_corners([10.0_f64, 10.0, 14.0, 14.0]);
        assert_abs_diff_eq!(a.iou_with(&b), 0.0);
    }

    #[test]
    fn iou_zero_area_box_is_no_match() {
        // x2 == x1 - 1 encodes the empty box
        let degenerate = PixelBox::from_corners([5.0_f64, 5.0, 4.0, 4.0]);
        let b = PixelBox::from_corners([0.0_f64, 0.0, 9.0, 9.0]);
        assert_abs_diff_eq!(degenerate.iou_with(&b), 0.0);
        assert_abs_diff_eq!(b.iou_with(&degenerate), 0.0);
    }

    #[test]
    fn clip_to_image() {
        let b = PixelBox::from_corners([-56.0_f64, -56.0, 72.0, 72.0]).clip(64.0, 64.0);
        assert_eq!(b.corners(), [0.0, 0.0, 63.0, 63.0]);
    }

    #[test]
    fn flipped_corners_are_rejected() {
        assert!(PixelBox::try_from_corners([5.0_f64, 0.0, 2.0, 4.0]).is_err());
        // the empty box is the boundary case and is allowed
        assert!(PixelBox::try_from_corners([5.0_f64, 5.0, 4.0, 4.0]).is_ok());
    }
}
