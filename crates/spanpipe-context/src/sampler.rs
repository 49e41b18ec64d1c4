//! Sampling decision input.
//!
//! An external sampler decides, once per root span, whether recording is
//! active for that transaction; the recording core only consumes the
//! boolean. Events and async continuations inherit the root's decision.

use std::sync::atomic::{AtomicU64, Ordering};

pub trait Sampler: Send + Sync {
    fn is_sampled(&self) -> bool;
}

/// Keeps one transaction in every `rate`. A rate of zero disables sampling
/// entirely; a rate of one keeps everything.
#[derive(Debug)]
pub struct RatioSampler {
    rate: u64,
    counter: AtomicU64,
}

impl RatioSampler {
    pub fn new(rate: u64) -> Self {
        RatioSampler {
            rate,
            counter: AtomicU64::new(0),
        }
    }
}

impl Sampler for RatioSampler {
    fn is_sampled(&self) -> bool {
        if self.rate == 0 {
            return false;
        }
        self.counter.fetch_add(1, Ordering::Relaxed) % self.rate == 0
    }
}

/// Samples every transaction.
#[derive(Debug, Default)]
pub struct AlwaysSampler;

impl Sampler for AlwaysSampler {
    fn is_sampled(&self) -> bool {
        true
    }
}
