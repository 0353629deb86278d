//! Simulated receive-side packet loss
//!
//! Either endpoint can be told to discard a fraction of the datagrams it
//! receives, which exercises gap detection and retransmission on a clean
//! network.

use crate::config::LossConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Bernoulli packet dropper
#[derive(Debug)]
pub struct LossSimulator {
    rate: f64,
    rng: StdRng,
}

impl LossSimulator {
    /// Build a dropper from config, or `None` when loss is disabled
    pub fn from_config(config: &LossConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Some(LossSimulator {
            rate: config.rate,
            rng,
        })
    }

    /// Decide whether the next datagram is lost
    pub fn should_drop(&mut self) -> bool {
        self.rng.gen::<f64>() < self.rate
    }

    /// Configured drop probability
    pub fn rate(&self) -> f64 {
        self.rate
    }
}
