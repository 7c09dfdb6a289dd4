//! Spatial training targets and candidate regions for a two-stage object
//! detector.
//!
//! Starting from a dense grid of anchor boxes and the raw score/offset
//! tensors of a region-proposal network, this crate produces ranked region
//! proposals and the supervised labels and regression targets that train
//! both the proposal generator and the final classifier.
//!
//! Everything here is deterministic geometry and sampling over plain
//! [`ndarray`] tensors: no layer internals, no gradients, no I/O. Results
//! are returned as explicit owned structs, fresh per forward pass; the only
//! state kept across calls is the [`AnchorGenerator`] grid cache. All random
//! subsampling takes the RNG by parameter so tests can pin a seed.

mod common;

pub use anchor::*;
pub mod anchor;

pub use overlaps::*;
pub mod overlaps;

pub use nms::*;
pub mod nms;

pub use proposal::*;
pub mod proposal;

pub use anchor_target::*;
pub mod anchor_target;

pub use proposal_target::*;
pub mod proposal_target;

pub use loss::*;
pub mod loss;

pub use types::*;
pub mod types;
