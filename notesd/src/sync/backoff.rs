use rand::Rng;
use std::time::Duration;

const RETRY_BASE: Duration = Duration::from_millis(250);
const RETRY_CAP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    // Delays between failed sync passes while the remote stays reachable.
    pub fn for_sync_retries() -> Self {
        Self::new(RETRY_BASE, RETRY_CAP, true)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    // Full jitter: uniform in `[0, min(base * 2^attempt, max)]`.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(attempt);
        if !self.jitter {
            return ceiling;
        }
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rng.gen_range(0..=ceiling_ms))
    }

    fn ceiling(&self, attempt: u32) -> Duration {
        self.base
            .checked_mul(1u32 << attempt.min(16))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

#[derive(Debug, Clone)]
pub struct RetryState {
    backoff: Backoff,
    failures: u32,
}

impl RetryState {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_failure(&mut self) -> Duration {
        let delay = self.backoff.delay(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }
}
