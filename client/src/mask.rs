use comms::FeatureMap;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{ClientErr, Result};

/// Half width of the interval mask values are drawn from.
const MASK_RANGE: f32 = 1.0;

/// An additive mask hiding a single submission from the server until it reveals the seed.
///
/// The mask values are expanded from the seed, so sharing `seed` and `len` is enough for the
/// server to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationMask {
    seed: u64,
    len: usize,
}

impl AggregationMask {
    /// Creates a new `AggregationMask` over `len` parameters.
    pub fn new(seed: u64, len: usize) -> Self {
        Self { seed, len }
    }

    /// Draws a fresh seed.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Self {
        Self::new(rng.random(), len)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Expands the seed into the mask values.
    pub fn values(&self) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        (0..self.len)
            .map(|_| rng.random_range(-MASK_RANGE..MASK_RANGE))
            .collect()
    }

    /// Adds the mask to every parameter, in key order.
    ///
    /// # Errors
    /// `ClientErr::FeatureShape` if the map doesn't hold exactly `len` parameters.
    pub fn apply(&self, features: &mut FeatureMap) -> Result<()> {
        self.combine(features, 1.0)
    }

    fn combine(&self, features: &mut FeatureMap, sign: f32) -> Result<()> {
        if features.num_params() != self.len {
            return Err(ClientErr::FeatureShape);
        }

        let mut mask = self.values().into_iter();
        for (_, values) in features.iter_mut() {
            for (v, m) in values.iter_mut().zip(mask.by_ref()) {
                *v += sign * m;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl AggregationMask {
        fn remove(&self, features: &mut FeatureMap) -> Result<()> {
            self.combine(features, -1.0)
        }
    }

    fn features() -> FeatureMap {
        let mut features = FeatureMap::new();
        features.insert("dense.weight", vec![0.5, -1.5, 2.0, 0.0]);
        features.insert("dense.bias", vec![3.0]);
        features
    }

    #[test]
    fn the_seed_alone_removes_the_mask() {
        let original = features();
        let mut masked = original.clone();

        let mask = AggregationMask::new(1234, original.num_params());
        mask.apply(&mut masked).unwrap();
        assert_ne!(masked, original);

        AggregationMask::new(mask.seed(), mask.len())
            .remove(&mut masked)
            .unwrap();

        for ((_, a), (_, b)) in masked.iter().zip(original.iter()) {
            for (x, y) in a.iter().zip(b) {
                assert!((x - y).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn seeds_pick_different_masks() {
        assert_ne!(
            AggregationMask::new(1, 8).values(),
            AggregationMask::new(2, 8).values()
        );
        assert_eq!(
            AggregationMask::new(1, 8).values(),
            AggregationMask::new(1, 8).values()
        );
    }

    #[test]
    fn wrong_length_is_rejected() {
        let mut map = features();
        let err = AggregationMask::new(1, 3).apply(&mut map).unwrap_err();
        assert!(matches!(err, ClientErr::FeatureShape));
        assert_eq!(map, features());
    }
}
