//! Synthetic CPU usage for running pods
//!
//! There is no real workload to measure, so each Running pod gets a random
//! walk bounded by its own request. Samples are informational only and never
//! feed back into placement or scaling.

use rand::Rng;

use super::store::ClusterState;

/// Fraction of the request used for the first sample
const INITIAL_RANGE: std::ops::RangeInclusive<f64> = 0.3..=0.9;

/// Maximum per-tick step, as a fraction of the request
const STEP: f64 = 0.1;

/// Lower bound of a sample, as a fraction of the request
const FLOOR: f64 = 0.1;

/// Advance the usage sample of every Running pod by one tick.
///
/// Returns the number of pods sampled. Failed pods keep their last sample.
pub fn update_usage<R: Rng>(state: &mut ClusterState, rng: &mut R) -> usize {
    let samples = state.running_samples();
    let count = samples.len();

    for (pod, request, current) in samples {
        let next = match current {
            None => rng.random_range(INITIAL_RANGE) * request,
            Some(value) => {
                let step = rng.random_range(-STEP..=STEP) * request;
                (value + step).clamp(FLOOR * request, request)
            }
        };
        state.set_usage(pod, next);
    }

    count
}
