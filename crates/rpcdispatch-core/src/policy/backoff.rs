//! Backoff manager: delay and attempt bookkeeping for one retry loop.
//!
//! Delays are clamped into `[initial_delay_ms, max_delay_ms]`. The first
//! computed raw delay is zero, so the first retry always waits exactly
//! `initial_delay_ms`; later delays walk from the previous one by a jitter
//! drawn from `[-0.5, 0.5)` ms.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::RpcError;

/// Backoff strategy. Only exponential is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffMode {
    #[default]
    Exponential,
}

/// Immutable backoff configuration.
///
/// Built through [`BackoffConfig::new`] or deserialized; both paths
/// validate that `max_delay_ms >= initial_delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBackoffConfig", into = "RawBackoffConfig")]
pub struct BackoffConfig {
    mode: BackoffMode,
    max_retries: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
}

impl BackoffConfig {
    pub fn new(
        mode: BackoffMode,
        max_retries: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
    ) -> Result<Self, RpcError> {
        if max_delay_ms < initial_delay_ms {
            return Err(RpcError::InvalidConfig(format!(
                "max_delay_ms ({max_delay_ms}) must be >= initial_delay_ms ({initial_delay_ms})"
            )));
        }
        Ok(Self {
            mode,
            max_retries,
            initial_delay_ms,
            max_delay_ms,
        })
    }

    /// Exponential backoff with the given bounds.
    pub fn exponential(
        max_retries: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
    ) -> Result<Self, RpcError> {
        Self::new(BackoffMode::Exponential, max_retries, initial_delay_ms, max_delay_ms)
    }

    pub fn mode(&self) -> BackoffMode {
        self.mode
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn initial_delay_ms(&self) -> u64 {
        self.initial_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            mode: BackoffMode::Exponential,
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawBackoffConfig {
    #[serde(default)]
    mode: BackoffMode,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    max_delay_ms: u64,
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_delay_ms() -> u64 { 100 }
fn default_max_delay_ms() -> u64 { 10_000 }

impl TryFrom<RawBackoffConfig> for BackoffConfig {
    type Error = RpcError;

    fn try_from(raw: RawBackoffConfig) -> Result<Self, Self::Error> {
        Self::new(raw.mode, raw.max_retries, raw.initial_delay_ms, raw.max_delay_ms)
    }
}

impl From<BackoffConfig> for RawBackoffConfig {
    fn from(cfg: BackoffConfig) -> Self {
        Self {
            mode: cfg.mode,
            max_retries: cfg.max_retries,
            initial_delay_ms: cfg.initial_delay_ms,
            max_delay_ms: cfg.max_delay_ms,
        }
    }
}

/// Internal signal of the retry loop. Never returned to RPC callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackoffError {
    #[error("retries exhausted after {retries} attempts")]
    RetriesExhausted { retries: u32 },
}

enum JitterSource {
    /// Per-thread generator, seeded once per thread.
    Thread,
    /// Injected generator for reproducible delays.
    Seeded(StdRng),
}

impl JitterSource {
    fn sample(&mut self) -> f64 {
        match self {
            Self::Thread => rand::thread_rng().gen_range(-0.5..0.5),
            Self::Seeded(rng) => rng.gen_range(-0.5..0.5),
        }
    }
}

struct BackoffState {
    retries: u32,
    last_delay: f64,
    jitter: JitterSource,
}

/// Stateful delay/attempt counter for one logical call.
///
/// Counters live behind a mutex so one manager can be shared between
/// tasks; the lock is released before sleeping.
pub struct BackoffManager {
    config: BackoffConfig,
    state: Mutex<BackoffState>,
}

impl BackoffManager {
    pub fn new(config: BackoffConfig) -> Self {
        Self::with_jitter(config, JitterSource::Thread)
    }

    /// Create a manager whose jitter sequence is fixed by `seed`.
    pub fn with_seed(config: BackoffConfig, seed: u64) -> Self {
        Self::with_jitter(config, JitterSource::Seeded(StdRng::seed_from_u64(seed)))
    }

    fn with_jitter(config: BackoffConfig, jitter: JitterSource) -> Self {
        Self {
            config,
            state: Mutex::new(BackoffState {
                retries: 0,
                last_delay: 0.0,
                jitter,
            }),
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Number of backoffs taken since creation or the last reset.
    pub fn retries(&self) -> u32 {
        self.lock().retries
    }

    /// The last computed delay in milliseconds (0 after reset).
    pub fn last_delay(&self) -> f64 {
        self.lock().last_delay
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.retries = 0;
        state.last_delay = 0.0;
    }

    /// Advance the counters and return the next delay without waiting.
    pub fn next_delay(&self) -> Result<Duration, BackoffError> {
        let mut state = self.lock();
        if state.retries >= self.config.max_retries {
            return Err(BackoffError::RetriesExhausted {
                retries: state.retries,
            });
        }

        let raw = if state.retries == 0 {
            0.0
        } else {
            state.last_delay + state.jitter.sample()
        };
        let delay = raw.clamp(
            self.config.initial_delay_ms as f64,
            self.config.max_delay_ms as f64,
        );
        state.last_delay = delay;
        state.retries += 1;

        Ok(Duration::from_micros((delay * 1_000.0).round() as u64))
    }

    /// Wait out the next delay.
    ///
    /// Fails with [`BackoffError::RetriesExhausted`], without waiting, once
    /// `max_retries` backoffs have been taken.
    pub async fn backoff(&self) -> Result<Duration, BackoffError> {
        let delay = self.next_delay()?;
        tracing::debug!(
            retries = self.retries(),
            delay_ms = delay.as_millis() as u64,
            "backing off"
        );
        tokio::time::sleep(delay).await;
        Ok(delay)
    }

    fn lock(&self) -> MutexGuard<'_, BackoffState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for BackoffManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("BackoffManager")
            .field("config", &self.config)
            .field("retries", &state.retries)
            .field("last_delay", &state.last_delay)
            .finish()
    }
}
