//! Turns the configured [`DelayModel`](super::DelayModel) for a category into
//! an actual wait and an optional injected fault.

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use std::sync::{Arc, Mutex};

use super::model::{ErrorCode, OperationCategory};
use super::store::ConfigStore;
use crate::error::{Error, Result};

/// Source of uniform samples in `[0, 1)`.
///
/// Injected so tests can pin the sequence or force the failure branch.
pub trait RandomSource: Send + Sync {
    /// Next uniform sample in `[0, 1)`.
    fn next_f64(&self) -> f64;
}

/// [`RandomSource`] backed by the standard seedable generator.
pub struct StdRandom {
    rng: Mutex<StdRng>,
}

impl StdRandom {
    /// Reproducible stream for `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Stream seeded from the thread-local generator.
    pub fn from_entropy() -> Self {
        Self::seeded(rand::rng().random::<u64>())
    }
}

impl RandomSource for StdRandom {
    fn next_f64(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.random::<f64>()
    }
}

/// Result of consulting the engine for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Perform the real operation.
    Proceed,
    /// Return this error without touching the backing store.
    Fail(ErrorCode),
}

/// Applies the live configuration to individual operations.
#[derive(Clone)]
pub struct DelayEngine {
    store: Arc<ConfigStore>,
    random: Arc<dyn RandomSource>,
}

impl DelayEngine {
    /// Engine reading `store`, sampling from `random`.
    pub fn new(store: Arc<ConfigStore>, random: Arc<dyn RandomSource>) -> Self {
        Self { store, random }
    }

    /// Engine with an entropy-seeded [`StdRandom`].
    pub fn with_store(store: Arc<ConfigStore>) -> Self {
        Self::new(store, Arc::new(StdRandom::from_entropy()))
    }

    /// The store this engine reads.
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Wait as configured for `category`, then decide whether to fail.
    ///
    /// Only the calling task is suspended. Dropping the returned future
    /// cancels the wait.
    pub async fn apply(&self, category: OperationCategory) -> Outcome {
        if !self.store.is_enabled() {
            return Outcome::Proceed;
        }
        let model = self.store.get(category);

        if model.max_delay_seconds > 0.0 {
            let delay = model.delay_for(self.random.next_f64());
            tracing::trace!(%category, delay_ms = delay.as_millis() as u64, "injecting delay");
            tokio::time::sleep(delay).await;
        }

        if model.failure_probability > 0.0 && self.random.next_f64() < model.failure_probability {
            let code = model.failure_error_code.unwrap_or(ErrorCode::Io);
            tracing::debug!(%category, %code, "injecting fault");
            return Outcome::Fail(code);
        }
        Outcome::Proceed
    }

    /// [`DelayEngine::apply`] with the fault mapped to
    /// [`Error::InjectedFault`].
    pub async fn check(&self, category: OperationCategory) -> Result<()> {
        match self.apply(category).await {
            Outcome::Proceed => Ok(()),
            Outcome::Fail(code) => Err(Error::InjectedFault(code)),
        }
    }
}
