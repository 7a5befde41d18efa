//! Retry with exponential backoff, jitter and error classification.
//!
//! Errors are classified from their rendered message, so anything that
//! implements `Display` can be retried: provider adapters fold the HTTP
//! status code into their error text and the classifier picks it up here.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const AUTH_PATTERNS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "invalid api key",
    "invalid_api_key",
    "invalid key",
    "incorrect api key",
    "authentication",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "quota exceeded",
    "resource exhausted",
    "resource_exhausted",
];

const NETWORK_PATTERNS: &[&str] = &[
    "econnreset",
    "econnrefused",
    "connection reset",
    "connection refused",
    "connection closed",
    "timed out",
    "timeout",
    "fetch failed",
    "error sending request",
    "socket hang up",
    "network",
];

const SERVER_PATTERNS: &[&str] = &[
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
];

const TRANSIENT_PATTERNS: &[&str] = &[
    "overloaded",
    "temporarily",
    "try again",
    "transient",
    "unavailable",
];

/// Coarse error class used to decide whether an attempt is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Auth,
    RateLimit,
    Network,
    Server,
    Transient,
    Other,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorClass::RateLimit | ErrorClass::Network | ErrorClass::Server | ErrorClass::Transient
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorClass::Auth => "auth",
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::Network => "network",
            ErrorClass::Server => "server",
            ErrorClass::Transient => "transient",
            ErrorClass::Other => "other",
        };
        f.write_str(label)
    }
}

/// Three-digit numbers standing on their own in the message ("HTTP 503", "(429 Too Many…)").
fn status_codes(message: &str) -> impl Iterator<Item = u16> + '_ {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| part.len() == 3)
        .filter_map(|part| part.parse::<u16>().ok())
}

/// Classify an error message. Authentication always wins so that a
/// "401 ... timeout" message is never retried.
pub fn classify_error(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    let codes: Vec<u16> = status_codes(&lower).collect();

    if codes.iter().any(|c| *c == 401 || *c == 403)
        || AUTH_PATTERNS.iter().any(|p| lower.contains(p))
    {
        return ErrorClass::Auth;
    }
    if codes.contains(&429) || RATE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::RateLimit;
    }
    if NETWORK_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::Network;
    }
    if codes.iter().any(|c| (500..600).contains(c))
        || SERVER_PATTERNS.iter().any(|p| lower.contains(p))
    {
        return ErrorClass::Server;
    }
    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::Transient;
    }
    ErrorClass::Other
}

/// Backoff parameters. `max_retries` counts retries after the first attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fractional spread applied to every delay, e.g. 0.2 for ±20%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// `base * 2^attempt`, capped at `max_delay_ms`. `attempt` is zero-based.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let millis = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Backoff delay with the configured jitter applied.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_delay(attempt).as_millis() as f64;
        let spread = base * self.jitter.clamp(0.0, 1.0);
        if spread <= 0.0 {
            return Duration::from_millis(base as u64);
        }
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis((base + offset).max(0.0).round() as u64)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("operation aborted after {attempts} attempt(s)")]
    Aborted { attempts: u32 },

    #[error("{error}")]
    Failed {
        error: E,
        attempts: u32,
        class: ErrorClass,
    },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Aborted { attempts } => *attempts,
            RetryError::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RetryError::Aborted { .. })
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// exhausts the policy. The token aborts both an in-flight attempt and the
/// wait between attempts.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Aborted { attempts: attempt });
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Aborted { attempts: attempt + 1 }),
            outcome = operation(attempt) => outcome,
        };
        attempt += 1;

        let error = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        let message = error.to_string();
        let class = classify_error(&message);

        if !class.is_retryable() {
            debug!(label, %class, error = %message, "Error is not retryable");
            return Err(RetryError::Failed { error, attempts: attempt, class });
        }
        if attempt > policy.max_retries {
            warn!(label, attempts = attempt, %class, error = %message, "Retries exhausted");
            return Err(RetryError::Failed { error, attempts: attempt, class });
        }

        let delay = policy.jittered_delay(attempt - 1);
        warn!(
            label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            %class,
            error = %message,
            "Retrying after backoff"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(label, "Cancelled while waiting to retry");
                return Err(RetryError::Aborted { attempts: attempt });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter: 0.2,
        }
    }

    #[test]
    fn test_classify_auth_errors() {
        assert_eq!(classify_error("LLM API error (401 Unauthorized): bad key"), ErrorClass::Auth);
        assert_eq!(classify_error("HTTP 403"), ErrorClass::Auth);
        assert_eq!(classify_error("Invalid API key provided"), ErrorClass::Auth);
        // auth wins over network wording
        assert_eq!(classify_error("401 after timeout"), ErrorClass::Auth);
    }

    #[test]
    fn test_classify_retryable_errors() {
        assert_eq!(classify_error("status 429"), ErrorClass::RateLimit);
        assert_eq!(classify_error("Quota exceeded for project"), ErrorClass::RateLimit);
        assert_eq!(classify_error("ECONNRESET"), ErrorClass::Network);
        assert_eq!(classify_error("fetch failed"), ErrorClass::Network);
        assert_eq!(classify_error("Request timed out after 30s"), ErrorClass::Network);
        assert_eq!(classify_error("LLM API error (503 Service Unavailable)"), ErrorClass::Server);
        assert_eq!(classify_error("HTTP 500"), ErrorClass::Server);
        assert_eq!(classify_error("model is overloaded"), ErrorClass::Transient);
        assert!(ErrorClass::Server.is_retryable());
    }

    #[test]
    fn test_classify_other_errors() {
        assert_eq!(classify_error("invalid JSON in body"), ErrorClass::Other);
        // numbers that merely contain 401 are not status codes
        assert_eq!(classify_error("record 14012 missing"), ErrorClass::Other);
        assert!(!ErrorClass::Other.is_retryable());
        assert!(!ErrorClass::Auth.is_retryable());
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
            jitter: 0.0,
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(2_000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(4_000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(5_000));
        assert_eq!(policy.backoff_delay(63), Duration::from_millis(5_000));
        assert_eq!(policy.jittered_delay(1), Duration::from_millis(2_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = fast_policy();
        for _ in 0..200 {
            let delay = policy.jittered_delay(2).as_millis() as u64;
            assert!((320..=480).contains(&delay), "delay {delay} out of bounds");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried_with_growing_delays() {
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let mut stamps = Vec::new();

        let result: Result<(), _> = retry_with_backoff(&policy, &cancel, "test", |_| {
            stamps.push(Instant::now());
            async { Err::<(), _>("LLM API error (429 Too Many Requests)".to_string()) }
        })
        .await;

        match result {
            Err(RetryError::Failed { attempts, class, .. }) => {
                assert_eq!(attempts, 4);
                assert_eq!(class, ErrorClass::RateLimit);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert_eq!(stamps.len(), 4);
        let gaps: Vec<u64> = stamps
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect();
        assert!((80..=121).contains(&gaps[0]), "gaps {gaps:?}");
        assert!((160..=241).contains(&gaps[1]), "gaps {gaps:?}");
        assert!((320..=481).contains(&gaps[2]), "gaps {gaps:?}");
        assert!(gaps[0] < gaps[1] && gaps[1] < gaps[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_is_never_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = retry_with_backoff(&fast_policy(), &cancel, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("401 Unauthorized".to_string()) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(RetryError::Failed { class: ErrorClass::Auth, attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let cancel = CancellationToken::new();

        let result = retry_with_backoff(&fast_policy(), &cancel, "test", |attempt| async move {
            if attempt < 2 {
                Err("HTTP 502 Bad Gateway".to_string())
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay_aborts() {
        let policy = RetryPolicy {
            base_delay_ms: 1_000,
            ..fast_policy()
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = retry_with_backoff(&policy, &cancel, "test", |_| async {
            Err::<(), _>("connection refused".to_string())
        })
        .await;

        match result {
            Err(err) => {
                assert!(err.is_aborted());
                assert_eq!(err.attempts(), 1);
            }
            Ok(()) => panic!("expected abort"),
        }
    }

    #[test]
    fn test_no_retry_policy_fails_fast() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> = tokio_test::block_on(retry_with_backoff(
            &RetryPolicy::no_retry(),
            &cancel,
            "test",
            |_| async { Err::<(), _>("HTTP 500".to_string()) },
        ));
        assert_eq!(result.unwrap_err().attempts(), 1);
    }
}
