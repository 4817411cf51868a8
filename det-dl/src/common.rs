pub use anyhow::{bail, ensure, format_err, Error, Result};
pub use getset::{CopyGetters, Getters};
pub use indexmap::IndexMap;
pub use itertools::{izip, Itertools};
pub use log::{debug, info, warn};
pub use ndarray::{
    concatenate, s, Array1, Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView3,
    ArrayView4, Axis, Ix4,
};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{cmp::Reverse, collections::HashMap, str::FromStr};
