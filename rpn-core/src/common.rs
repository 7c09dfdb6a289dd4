pub use anyhow::{bail, ensure, format_err, Error, Result};
pub use bbox::{decode, encode, BoxDelta, PixelBox};
pub use itertools::{izip, Itertools as _};
pub use log::{debug, warn};
pub use ndarray::{Array1, Array2, ArrayView2, ArrayView3, Axis};
pub use noisy_float::prelude::*;
pub use rand::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    cmp::{self, Ordering},
    collections::HashMap,
    sync::Arc,
};
