//! Balanced subsampling of assignment labels.

use crate::{common::*, config::SamplerCfg};
use rand::Rng;

/// Demotes excess positives and negatives to ignore so that at most
/// `max_pos` positives and `max_total` entries survive for the loss.
///
/// The demoted subset is drawn uniformly at random from the injected
/// random source; callers wanting reproducibility seed the source
/// themselves.
#[derive(Debug, Clone, CopyGetters)]
pub struct RandomSampler {
    #[getset(get_copy = "pub")]
    max_pos: usize,
    #[getset(get_copy = "pub")]
    max_total: usize,
}

impl RandomSampler {
    pub fn new(cfg: SamplerCfg) -> Result<Self> {
        let SamplerCfg { max_pos, max_total } = cfg;
        ensure!(
            max_pos <= max_total,
            "max_pos {} must not exceed max_total {}",
            max_pos,
            max_total
        );
        Ok(Self { max_pos, max_total })
    }

    pub fn sample<R>(&self, labels: &mut Array1<i32>, rng: &mut R)
    where
        R: Rng,
    {
        let pos_idx: Vec<usize> = labels.iter().positions(|&l| l == 1).collect();
        if pos_idx.len() > self.max_pos {
            let excess = pos_idx.len() - self.max_pos;
            for k in rand::seq::index::sample(rng, pos_idx.len(), excess) {
                labels[pos_idx[k]] = -1;
            }
        }

        let kept_pos = pos_idx.len().min(self.max_pos);
        let neg_budget = self.max_total - kept_pos;
        let neg_idx: Vec<usize> = labels.iter().positions(|&l| l == 0).collect();
        if neg_idx.len() > neg_budget {
            let excess = neg_idx.len() - neg_budget;
            for k in rand::seq::index::sample(rng, neg_idx.len(), excess) {
                labels[neg_idx[k]] = -1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn counts(labels: &Array1<i32>) -> (usize, usize, usize) {
        let pos = labels.iter().filter(|&&l| l == 1).count();
        let neg = labels.iter().filter(|&&l| l == 0).count();
        let ign = labels.iter().filter(|&&l| l == -1).count();
        (pos, neg, ign)
    }

    #[test]
    fn caps_hold_on_mixed_labels() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(42);
        let sampler = RandomSampler::new(SamplerCfg {
            max_pos: 128,
            max_total: 256,
        })?;

        let mut labels = Array1::from_elem(1000, -1i32);
        labels.slice_mut(s![..300]).fill(1);
        labels.slice_mut(s![300..900]).fill(0);
        sampler.sample(&mut labels, &mut rng);

        let (pos, neg, _) = counts(&labels);
        assert_eq!(pos, 128);
        assert_eq!(neg, 128);
        Ok(())
    }

    #[test]
    fn caps_hold_at_all_positive_extreme() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let sampler = RandomSampler::new(SamplerCfg {
            max_pos: 32,
            max_total: 128,
        })?;

        let mut labels = Array1::from_elem(500, 1i32);
        sampler.sample(&mut labels, &mut rng);

        let (pos, neg, ign) = counts(&labels);
        assert_eq!(pos, 32);
        assert_eq!(neg, 0);
        assert_eq!(ign, 468);
        Ok(())
    }

    #[test]
    fn caps_hold_at_all_negative_extreme() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let sampler = RandomSampler::new(SamplerCfg {
            max_pos: 32,
            max_total: 128,
        })?;

        let mut labels = Array1::from_elem(500, 0i32);
        sampler.sample(&mut labels, &mut rng);

        let (pos, neg, _) = counts(&labels);
        assert_eq!(pos, 0);
        assert_eq!(neg, 128);
        Ok(())
    }

    #[test]
    fn within_budget_is_a_no_op() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        let sampler = RandomSampler::new(SamplerCfg {
            max_pos: 128,
            max_total: 256,
        })?;

        let mut labels = Array1::from_elem(100, -1i32);
        labels.slice_mut(s![..10]).fill(1);
        labels.slice_mut(s![10..50]).fill(0);
        let before = labels.clone();
        sampler.sample(&mut labels, &mut rng);
        assert_eq!(labels, before);
        Ok(())
    }

    #[test]
    fn invalid_caps_are_rejected() {
        assert!(RandomSampler::new(SamplerCfg {
            max_pos: 300,
            max_total: 256,
        })
        .is_err());
    }
}
