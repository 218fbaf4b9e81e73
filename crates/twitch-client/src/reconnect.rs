//! Reconnection supervisor: capped exponential backoff with jitter.
//!
//! The supervisor is a plain state machine. It never sleeps itself; callers
//! ask it how long to wait, which keeps transitions testable with a manual
//! clock.

use std::time::{Duration, Instant};

use rand::Rng;

/// Time source for backoff deadlines.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Backoff parameters shared by every managed connection.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub ceiling: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Fraction of each delay that may be shaved off at random (0.0..=1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            ceiling: Duration::from_secs(30),
            max_attempts: None,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.ceiling)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        let cut = rand::thread_rng().gen_range(0.0..=jitter);
        delay.mul_f64(1.0 - cut)
    }
}

/// Externally observable supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Active,
    Backoff { attempt: u32, next_retry_at: Instant },
    GivenUp { attempts: u32 },
}

/// Per-connection reconnection state machine.
#[derive(Debug)]
pub struct Supervisor<C = SystemClock> {
    policy: BackoffPolicy,
    clock: C,
    state: SupervisorState,
}

impl Supervisor<SystemClock> {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_clock(policy, SystemClock)
    }
}

impl<C: Clock> Supervisor<C> {
    pub fn with_clock(policy: BackoffPolicy, clock: C) -> Self {
        Self {
            policy,
            clock,
            state: SupervisorState::Active,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Connection (re-)established.
    pub fn on_connected(&mut self) {
        self.state = SupervisorState::Active;
    }

    /// A retryable failure occurred. Returns the new state.
    pub fn on_failure(&mut self) -> SupervisorState {
        let attempt = match self.state {
            SupervisorState::Active => 1,
            SupervisorState::Backoff { attempt, .. } => attempt.saturating_add(1),
            SupervisorState::GivenUp { .. } => return self.state,
        };

        if self.policy.max_attempts.is_some_and(|max| attempt > max) {
            self.state = SupervisorState::GivenUp {
                attempts: attempt - 1,
            };
            return self.state;
        }

        let delay = self.policy.jittered(self.policy.delay(attempt));
        self.state = SupervisorState::Backoff {
            attempt,
            next_retry_at: self.clock.now() + delay,
        };
        self.state
    }

    /// Time left until the next retry is due. `None` unless backing off.
    pub fn retry_in(&self) -> Option<Duration> {
        match self.state {
            SupervisorState::Backoff { next_retry_at, .. } => {
                Some(next_retry_at.saturating_duration_since(self.clock.now()))
            }
            _ => None,
        }
    }

    pub fn is_given_up(&self) -> bool {
        matches!(self.state, SupervisorState::GivenUp { .. })
    }
}
