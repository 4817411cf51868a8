//! Reference-box generation over feature-map grids.

use crate::common::*;

/// Entries beyond this count are generated but not cached; there is no
/// eviction.
pub const MAX_CACHE_ANCHOR: usize = 1000;
pub const CACHE_REPORT_PERIOD: usize = 100;

#[derive(Debug, Clone)]
struct CacheEntry {
    hits: usize,
    anchors: ndarray::ArcArray<f32, Ix4>,
}

/// Creates anchors for an image size `(H, W)` and a feature grid `(h, w)`.
///
/// The output has shape `[4, V, h, w]` with `V = scales x ratios`, one box
/// per (scale, ratio) pair centered on each grid cell. Generation is a pure
/// function of the constructor parameters and the two sizes, so results are
/// cached under a string key of those sizes.
///
/// The cache is plain mutable state; share a generator across threads only
/// behind external synchronization.
#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct AnchorGenerator {
    #[getset(get_copy = "pub")]
    base: f32,
    #[getset(get = "pub")]
    scales: Vec<f32>,
    #[getset(get = "pub")]
    ratios: Vec<f32>,
    anchor_ws: Vec<f32>,
    anchor_hs: Vec<f32>,
    cache: HashMap<String, CacheEntry>,
    count: usize,
}

impl AnchorGenerator {
    pub fn new(base: f32, scales: Vec<f32>, ratios: Vec<f32>) -> Result<Self> {
        ensure!(base > 0.0, "anchor base size must be positive");
        ensure!(
            !scales.is_empty() && !ratios.is_empty(),
            "scales and ratios must not be empty"
        );

        let (anchor_ws, anchor_hs): (Vec<_>, Vec<_>) = scales
            .iter()
            .flat_map(|&s| ratios.iter().map(move |&ar| (s, ar)))
            .map(|(s, ar)| (base * s * ar.sqrt(), base * s / ar.sqrt()))
            .unzip();

        Ok(Self {
            base,
            scales,
            ratios,
            anchor_ws,
            anchor_hs,
            cache: HashMap::new(),
            count: 0,
        })
    }

    pub fn num_variants(&self) -> usize {
        self.anchor_ws.len()
    }

    pub fn generate(
        &mut self,
        image_size: (usize, usize),
        grid: (usize, usize),
    ) -> Result<ndarray::ArcArray<f32, Ix4>> {
        ensure!(
            image_size.0 > 0 && image_size.1 > 0 && grid.0 > 0 && grid.1 > 0,
            "image size {:?} and grid size {:?} must be positive",
            image_size,
            grid
        );

        let key = format!(
            "{},{}|{},{}",
            image_size.0, image_size.1, grid.0, grid.1
        );
        if let Some(entry) = self.cache.get_mut(&key) {
            entry.hits += 1;
            return Ok(entry.anchors.clone());
        }

        let anchors = self.create(image_size, grid).into_shared();
        if self.cache.len() < MAX_CACHE_ANCHOR {
            self.cache.insert(
                key,
                CacheEntry {
                    hits: 1,
                    anchors: anchors.clone(),
                },
            );
        }
        self.count += 1;
        if self.count % CACHE_REPORT_PERIOD == 0 {
            self.report_cache();
        }
        Ok(anchors)
    }

    fn create(&self, image_size: (usize, usize), grid: (usize, usize)) -> Array4<f32> {
        let (grid_h, grid_w) = grid;
        let step_y = image_size.0 as f32 / grid_h as f32;
        let step_x = image_size.1 as f32 / grid_w as f32;

        let mut anchors = Array4::<f32>::zeros((4, self.num_variants(), grid_h, grid_w));
        for (k, (&aw, &ah)) in izip!(&self.anchor_ws, &self.anchor_hs).enumerate() {
            for row in 0..grid_h {
                let cy = row as f32 * step_y + step_y / 2.0;
                for col in 0..grid_w {
                    let cx = col as f32 * step_x + step_x / 2.0;
                    anchors[[0, k, row, col]] = cx - aw / 2.0;
                    anchors[[1, k, row, col]] = cy - ah / 2.0;
                    anchors[[2, k, row, col]] = cx + aw / 2.0;
                    anchors[[3, k, row, col]] = cy + ah / 2.0;
                }
            }
        }
        anchors
    }

    /// Anchors whose width and height come from a side network's predicted
    /// shape map of shape `[2, h, w]`, one box per location.
    pub fn guided(
        &self,
        image_size: (usize, usize),
        grid: (usize, usize),
        shapes: ArrayView3<f32>,
    ) -> Result<Array4<f32>> {
        ensure!(
            image_size.0 > 0 && image_size.1 > 0 && grid.0 > 0 && grid.1 > 0,
            "image size {:?} and grid size {:?} must be positive",
            image_size,
            grid
        );
        let (grid_h, grid_w) = grid;
        ensure!(
            shapes.dim() == (2, grid_h, grid_w),
            "shape prediction must have shape [2, {}, {}], got {:?}",
            grid_h,
            grid_w,
            shapes.dim()
        );

        let step_y = image_size.0 as f32 / grid_h as f32;
        let step_x = image_size.1 as f32 / grid_w as f32;

        let mut anchors = Array4::<f32>::zeros((4, 1, grid_h, grid_w));
        for row in 0..grid_h {
            let cy = row as f32 * step_y + step_y / 2.0;
            for col in 0..grid_w {
                let cx = col as f32 * step_x + step_x / 2.0;
                let aw = shapes[[0, row, col]];
                let ah = shapes[[1, row, col]];
                anchors[[0, 0, row, col]] = cx - aw / 2.0;
                anchors[[1, 0, row, col]] = cy - ah / 2.0;
                anchors[[2, 0, row, col]] = cx + aw / 2.0;
                anchors[[3, 0, row, col]] = cy + ah / 2.0;
            }
        }
        Ok(anchors)
    }

    fn report_cache(&self) {
        let top: Vec<_> = self
            .cache
            .iter()
            .map(|(key, entry)| (key.as_str(), entry.hits))
            .sorted_by_key(|&(_, hits)| Reverse(hits))
            .take(10)
            .map(|(key, hits)| format!("{}:{}", key, hits))
            .collect();
        info!(
            "anchor generator count: {}, cache size: {}, top used: {}",
            self.count,
            self.cache.len(),
            top.join(", ")
        );
    }
}

/// Flatten a `[4, V, h, w]` anchor block into `[4, V * h * w]`.
pub fn flatten_anchors(anchors: ArrayView4<f32>) -> Result<Array2<f32>> {
    let (c, v, h, w) = anchors.dim();
    ensure!(c == 4, "anchor block must have 4 leading channels, got {}", c);
    Ok(anchors.to_owned().into_shape((4, v * h * w))?)
}
