use rand::{rngs::StdRng, Rng, SeedableRng};

use super::{round2, SensorSource, CHANNELS};
use crate::error::SensorError;

const MIN_C: f64 = 18.0;
const MAX_C: f64 = 32.0;

/// Independent pseudo-random readings, used when `debug_mode` is on.
pub struct SimulatedSource {
    rng: StdRng,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic sequence for tests.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self { rng }
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SimulatedSource {
    fn poll(&mut self) -> Result<[f64; CHANNELS], SensorError> {
        let mut values = [0.0; CHANNELS];
        for value in values.iter_mut() {
            *value = round2(self.rng.gen_range(MIN_C..MAX_C));
        }
        Ok(values)
    }

    fn describe(&self) -> String {
        format!("simulated sensors ({MIN_C:.1}..{MAX_C:.1} °C)")
    }
}
