//! Safe pixel-space bounding box types and functions.
//!
//! Boxes are axis-aligned corner-form rectangles `(x1, y1, x2, y2)` with
//! inclusive corners: a box covering a single pixel has `x2 == x1` and
//! width 1. All width/height arithmetic uses the `x2 - x1 + 1` convention;
//! callers must not mix conventions.

mod common;

pub use rect::*;
pub mod rect;

pub use delta::*;
pub mod delta;

pub mod prelude {
    pub use crate::delta::BoxDelta;
    pub use crate::rect::PixelBox;
}
