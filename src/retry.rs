//! Retry orchestration for one logical request.
//!
//! [`RetryExecutor`] replays a request against a transport while the outcome
//! matches the request's enrolled retry conditions, up to
//! [`Request::max_retries`] extra attempts. [`RetryStrategy`] decides how
//! long to wait between attempts; tests inject their own [`RetryDelayer`].

use crate::instrument::execute_attempt;
use crate::profiling::{AttemptContext, ProfilingSink};
use crate::transport::Transport;
use crate::{AsyncHandler, ErrorKind, Request, Result};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Defines how long to wait before each retry.
///
/// # Examples
///
/// ```
/// use callgate::RetryStrategy;
/// use std::time::Duration;
///
/// // Retry immediately
/// let immediate = RetryStrategy::None;
///
/// // Exponential backoff: 100ms, 200ms, 400ms, 800ms...
/// let exponential = RetryStrategy::ExponentialBackoff {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(30),
///     jitter: true,
/// };
///
/// // Linear backoff: 1s, 1s, 1s...
/// let linear = RetryStrategy::Linear {
///     delay: Duration::from_secs(1),
/// };
/// assert_eq!(linear.delay_for_attempt(3), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Default)]
pub enum RetryStrategy {
    /// Retry without waiting.
    #[default]
    None,

    /// Retry with exponentially increasing delays.
    ///
    /// Each retry waits for `initial_delay * 2^(attempt - 1)` (capped at `max_delay`).
    /// Optional jitter adds randomness to prevent thundering herd.
    ExponentialBackoff {
        /// The delay before the first retry.
        initial_delay: Duration,
        /// The maximum delay between retries.
        max_delay: Duration,
        /// Whether to add random jitter to delays.
        jitter: bool,
    },

    /// Retry with a fixed delay between attempts.
    Linear {
        /// The delay between attempts.
        delay: Duration,
    },

    /// Custom delay logic.
    Custom {
        /// Takes the retry number (1-indexed) and returns the delay before it.
        delay_fn: fn(attempt: usize) -> Duration,
    },
}

impl RetryStrategy {
    /// A fixed delay, or no delay for `None` and zero.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            RetryStrategy::None
        } else {
            RetryStrategy::Linear { delay: interval }
        }
    }

    /// Returns the delay before the given retry.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The retry number (1-indexed, so 1 = first retry)
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            RetryStrategy::None => Duration::ZERO,
            RetryStrategy::ExponentialBackoff {
                initial_delay,
                max_delay,
                jitter,
            } => {
                let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                let multiplier = 2u32.saturating_pow(exponent);
                let delay = initial_delay.saturating_mul(multiplier).min(*max_delay);

                if *jitter {
                    // Somewhere between 50% and 100% of the delay
                    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
                    delay.mul_f64(jitter_factor)
                } else {
                    delay
                }
            }
            RetryStrategy::Linear { delay } => *delay,
            RetryStrategy::Custom { delay_fn } => delay_fn(attempt),
        }
    }
}

/// Future returned by [`RetryDelayer::delay`].
pub type DelayFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Suspends a retry loop between attempts.
pub trait RetryDelayer: Send + Sync {
    /// Waits before retry number `attempt` (1-indexed).
    fn delay(&self, attempt: usize) -> DelayFuture;
}

impl RetryDelayer for RetryStrategy {
    fn delay(&self, attempt: usize) -> DelayFuture {
        let delay = self.delay_for_attempt(attempt);
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        })
    }
}

/// What a retry loop observed, attempt by attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    response_codes: Vec<i32>,
    last_error: Option<ErrorKind>,
}

impl RetryState {
    /// Number of attempts made.
    pub fn attempts(&self) -> usize {
        self.response_codes.len()
    }

    /// Raw response code of every attempt, `-1` for failed ones.
    pub fn response_codes(&self) -> &[i32] {
        &self.response_codes
    }

    /// Kind of the most recent error, if any attempt failed.
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    fn next_context(&self) -> AttemptContext {
        match self.response_codes.last() {
            None => AttemptContext::first(),
            Some(&code) => {
                let attempt = u32::try_from(self.response_codes.len()).unwrap_or(u32::MAX);
                AttemptContext::retry(attempt, code)
            }
        }
    }
}

/// Drives the attempts of one logical request.
pub struct RetryExecutor<'a> {
    transport: &'a dyn Transport,
    delayer: &'a dyn RetryDelayer,
    sink: &'a dyn ProfilingSink,
}

impl<'a> RetryExecutor<'a> {
    /// Creates an executor over the given collaborators.
    pub fn new(
        transport: &'a dyn Transport,
        delayer: &'a dyn RetryDelayer,
        sink: &'a dyn ProfilingSink,
    ) -> Self {
        Self {
            transport,
            delayer,
            sink,
        }
    }

    /// Runs attempts until one is not retryable or retries are exhausted.
    ///
    /// A successful output is retried only if the handler exposes a status
    /// and that exact status is enrolled. A failure is retried only if its
    /// root [`ErrorKind`] is enrolled; any other failure ends the loop at
    /// once. When retries run out, the last outcome is returned as is.
    pub async fn run<H: AsyncHandler>(
        &self,
        request: &Request,
        handler: &mut H,
    ) -> (Result<H::Output>, RetryState) {
        let mut state = RetryState::default();
        loop {
            let context = state.next_context();
            if context.attempt > 0 {
                tracing::info!(
                    attempt = context.attempt,
                    last_status = context.last_status,
                    url = %request.url(),
                    "Retrying request"
                );
                self.delayer.delay(context.attempt as usize).await;
            }

            tracing::debug!(
                attempt = context.attempt,
                method = %request.method(),
                url = %request.url(),
                "Starting attempt"
            );
            let (result, code) =
                execute_attempt(self.transport, request, handler, context, self.sink).await;
            state.response_codes.push(code);

            let retryable = match &result {
                Ok(output) => handler
                    .status_of(output)
                    .is_some_and(|status| request.retry_status_codes().contains(&status)),
                Err(error) => {
                    let kind = error.kind();
                    state.last_error = Some(kind);
                    request.retry_error_kinds().contains(&kind)
                }
            };

            if !retryable {
                return (result, state);
            }
            if context.attempt >= request.max_retries() {
                tracing::debug!(
                    attempts = state.attempts(),
                    url = %request.url(),
                    "Retries exhausted"
                );
                return (result, state);
            }
        }
    }
}
