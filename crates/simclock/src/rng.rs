//! Per-host random number streams.
//!
//! Every simulated human owns a [`LocalRng`] seeded from a [`MasterRng`] at
//! creation, so stochastic results are independent of thread scheduling when
//! the host loop runs in parallel. The stream state serialises with the rest
//! of the host, giving byte-equal streams across a checkpoint round trip.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Beta, Distribution, Gamma, LogNormal, Normal, Poisson};
use serde::{Deserialize, Serialize};

/// The master sequence from which host streams are drawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterRng(ChaCha8Rng);

impl MasterRng {
    pub fn seed(seed: u64) -> Self {
        MasterRng(ChaCha8Rng::seed_from_u64(seed))
    }

    /// Draw a fresh, independent stream for one host.
    pub fn spawn_host_rng(&mut self) -> LocalRng {
        let mut seed = <ChaCha8Rng as SeedableRng>::Seed::default();
        self.0.fill_bytes(&mut seed);
        LocalRng(ChaCha8Rng::from_seed(seed))
    }
}

/// A host-owned random stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRng(ChaCha8Rng);

impl LocalRng {
    pub fn seed(seed: u64) -> Self {
        LocalRng(ChaCha8Rng::seed_from_u64(seed))
    }

    /// Uniform sample in `[0, 1)`.
    pub fn uniform_01(&mut self) -> f64 {
        self.0.gen::<f64>()
    }

    /// Normal sample with the given mean and standard deviation.
    pub fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        Normal::new(mean, std_dev)
            .expect("normal std_dev must be finite and non-negative")
            .sample(&mut self.0)
    }

    /// Log-normal sample parameterised by the underlying normal.
    pub fn log_normal(&mut self, mu: f64, sigma: f64) -> f64 {
        LogNormal::new(mu, sigma)
            .expect("log-normal sigma must be finite and non-negative")
            .sample(&mut self.0)
    }

    /// Gamma sample with shape `a` and scale `b`.
    pub fn gamma(&mut self, shape: f64, scale: f64) -> f64 {
        Gamma::new(shape, scale)
            .expect("gamma parameters must be positive")
            .sample(&mut self.0)
    }

    /// Beta sample with the given shape parameters.
    pub fn beta(&mut self, alpha: f64, beta: f64) -> f64 {
        Beta::new(alpha, beta)
            .expect("beta parameters must be positive")
            .sample(&mut self.0)
    }

    /// Bernoulli trial; `p` is clamped to `[0, 1]`.
    pub fn bernoulli(&mut self, p: f64) -> bool {
        self.uniform_01() < p
    }

    /// Poisson sample with the given mean.
    pub fn poisson(&mut self, lambda: f64) -> u64 {
        if lambda <= 0.0 {
            return 0;
        }
        Poisson::new(lambda)
            .expect("poisson mean must be positive and finite")
            .sample(&mut self.0) as u64
    }

    /// Uniform integer in `[0, bound)`.
    pub fn uniform_usize(&mut self, bound: usize) -> usize {
        self.0.gen_range(0..bound)
    }
}
