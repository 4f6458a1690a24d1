use comms::FeatureMap;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{ClientErr, Result, clip::update_norm, config::DpConfig};

/// The standard deviation of the gaussian mechanism for an update clipped to `bound`.
///
/// # Returns
/// `bound · sqrt(2 ln(1.25 / δ)) / ε`.
pub fn noise_sigma(bound: f32, eps: f64, delta: f64) -> f64 {
    bound as f64 * (2.0 * (1.25 / delta).ln()).sqrt() / eps
}

/// Clips the local update to `bound` and adds gaussian noise to every parameter.
///
/// # Arguments
/// * `old` - The model before local training.
/// * `trained` - The model after it.
/// * `bound` - The L2 bound the update `trained - old` is scaled down to.
/// * `dp` - The privacy budget.
/// * `rng` - The noise source.
///
/// # Returns
/// `old + clip(trained - old) + noise`, ready to be submitted.
///
/// # Errors
/// If the maps differ in shape or the noise scale isn't a valid standard deviation.
pub fn privatize<R: Rng + ?Sized>(
    old: &FeatureMap,
    trained: &FeatureMap,
    bound: f32,
    dp: &DpConfig,
    rng: &mut R,
) -> Result<FeatureMap> {
    if !old.same_shape(trained) {
        return Err(ClientErr::FeatureShape);
    }

    let norm = update_norm(old, trained);
    let scale = if norm > bound { bound / norm } else { 1.0 };
    let noise = Normal::new(0.0, noise_sigma(bound, dp.eps, dp.delta) as f32)?;

    let features = old
        .iter()
        .zip(trained.iter())
        .map(|((name, before), (_, after))| {
            let values = before
                .iter()
                .zip(after)
                .map(|(b, a)| b + (a - b) * scale + noise.sample(&mut *rng))
                .collect();

            (name.to_string(), values)
        })
        .collect();

    Ok(features)
}
