//! Adaptive clip bound for differentially private updates.
//!
//! After every round the participant measures how far the global model moved and derives the
//! clip bound of the next submission from it. The bound only ever tightens after the first
//! round.

use comms::FeatureMap;
use log::warn;

/// Computes the L2 norm of the difference between two snapshots of the same model.
///
/// # Arguments
/// * `old` - The snapshot before the update.
/// * `new` - The snapshot after it.
///
/// # Returns
/// `sqrt(Σ (old - new)²)` over every name and position.
///
/// # Panics
/// If the maps hold different names or lengths. Both snapshots come from the same model, a
/// mismatch is a bug in the caller.
pub fn update_norm(old: &FeatureMap, new: &FeatureMap) -> f32 {
    assert!(
        old.same_shape(new),
        "update norm between feature maps of different shapes"
    );

    let sum: f64 = old
        .iter()
        .zip(new.iter())
        .flat_map(|((_, a), (_, b))| a.iter().zip(b))
        .map(|(a, b)| {
            let diff = (*a - *b) as f64;
            diff * diff
        })
        .sum();

    sum.sqrt() as f32
}

/// Tracks the clip bound across the rounds of a job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdaptiveClipTracker {
    bound: Option<f32>,
}

impl AdaptiveClipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current bound, `None` until the first round has been observed.
    pub fn bound(&self) -> Option<f32> {
        self.bound
    }

    /// Folds a round's observed update norm into the bound.
    ///
    /// # Arguments
    /// * `round` - The 1-based round the norm was observed in.
    /// * `norm` - The observed global update norm.
    /// * `factor` - Scales `norm` into a candidate bound.
    ///
    /// # Returns
    /// The bound after the update. Round 1 takes the candidate as is, later rounds keep the
    /// smaller of the two. A candidate that isn't finite leaves the bound untouched.
    pub fn update_bound(&mut self, round: u32, norm: f32, factor: f32) -> f32 {
        let candidate = factor * norm;

        if !candidate.is_finite() {
            warn!(round = round; "ignoring non finite clip candidate {candidate}");
            return self.bound.unwrap_or(candidate);
        }

        let bound = match self.bound {
            Some(bound) if round > 1 && bound <= candidate => bound,
            _ => candidate,
        };

        self.bound = Some(bound);
        bound
    }
}
