use std::fmt;
use std::time::Duration;

use crate::task_queue::envelope::Envelope;
use crate::task_queue::error::{HandlerError, QueueError};

/// Bound on redelivery attempts and the optional delay between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// A failed envelope whose retry count has reached this value is dead-lettered
    pub max_retries: u32,

    /// When set, retries stay invisible for this long after being republished
    pub retry_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_delay: None,
        }
    }

    /// Delay each retry by `delay` (builder pattern)
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// Why a message ended in the dead-letter queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// Body could not be decoded into an envelope
    Malformed(String),

    /// Handler failed with the retry count already at the bound
    RetriesExhausted { retry_count: u32, error: String },
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterReason::Malformed(detail) => write!(f, "malformed envelope: {}", detail),
            DeadLetterReason::RetriesExhausted { retry_count, error } => {
                write!(f, "retries exhausted after {} attempts: {}", retry_count, error)
            }
        }
    }
}

/// Terminal decision for one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Handler succeeded; remove the message
    Ack,

    /// Republish this envelope to the same queue, then remove the original
    Retry(Envelope),

    /// Reject without requeue so the broker routes it to the dead-letter queue
    DeadLetter(DeadLetterReason),
}

impl Outcome {
    /// Outcome for a delivery whose body failed to decode
    pub fn malformed(err: &QueueError) -> Self {
        Outcome::DeadLetter(DeadLetterReason::Malformed(err.to_string()))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Ack => "ack",
            Outcome::Retry(_) => "retry",
            Outcome::DeadLetter(_) => "dead_letter",
        }
    }
}

/// Decide what happens to a decoded envelope given its handler result
///
/// The retry count is read from the envelope itself, so replaying a
/// dead-lettered envelope never pushes its count past the bound.
///
/// # Example
///
/// ```
/// use chatq::task_queue::consumer::{decide, Outcome, RetryPolicy};
/// use chatq::task_queue::envelope::Envelope;
/// use chatq::task_queue::error::HandlerError;
/// use serde_json::json;
/// use uuid::Uuid;
///
/// let envelope = Envelope::new(Uuid::new_v4(), json!({}));
/// let outcome = decide(&envelope, Err(HandlerError::new("boom")), &RetryPolicy::default());
///
/// match outcome {
///     Outcome::Retry(next) => assert_eq!(next.retry_count(), 1),
///     other => panic!("unexpected {:?}", other),
/// }
/// ```
pub fn decide(
    envelope: &Envelope,
    handler_result: Result<(), HandlerError>,
    policy: &RetryPolicy,
) -> Outcome {
    match handler_result {
        Ok(()) => Outcome::Ack,
        Err(_) if policy.allows_retry(envelope.retry_count()) => {
            Outcome::Retry(envelope.next_attempt())
        }
        Err(e) => Outcome::DeadLetter(DeadLetterReason::RetriesExhausted {
            retry_count: envelope.retry_count(),
            error: e.message().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope_with_retries(n: u32) -> Envelope {
        let mut envelope = Envelope::new(Uuid::new_v4(), json!({"content": "hi"}));
        for _ in 0..n {
            envelope = envelope.next_attempt();
        }
        envelope
    }

    #[test]
    fn test_success_acks() {
        let envelope = envelope_with_retries(2);
        assert_eq!(decide(&envelope, Ok(()), &RetryPolicy::default()), Outcome::Ack);
    }

    #[test]
    fn test_failure_below_bound_retries_with_incremented_count() {
        let policy = RetryPolicy::default();
        for count in 0..3 {
            let envelope = envelope_with_retries(count);
            match decide(&envelope, Err(HandlerError::new("boom")), &policy) {
                Outcome::Retry(next) => {
                    assert_eq!(next.retry_count(), count + 1);
                    assert_eq!(next.id(), envelope.id());
                    assert_eq!(next.payload, envelope.payload);
                }
                other => panic!("expected retry, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_failure_at_bound_dead_letters() {
        let envelope = envelope_with_retries(3);
        let outcome = decide(&envelope, Err(HandlerError::new("boom")), &RetryPolicy::default());

        assert_eq!(
            outcome,
            Outcome::DeadLetter(DeadLetterReason::RetriesExhausted {
                retry_count: 3,
                error: "boom".to_string(),
            })
        );
    }

    #[test]
    fn test_replayed_envelope_past_bound_is_not_incremented() {
        let envelope = envelope_with_retries(7);
        let outcome = decide(&envelope, Err(HandlerError::new("boom")), &RetryPolicy::new(3));
        assert_eq!(outcome.label(), "dead_letter");
    }

    #[test]
    fn test_zero_retries_dead_letters_first_failure() {
        let envelope = envelope_with_retries(0);
        let outcome = decide(&envelope, Err(HandlerError::new("boom")), &RetryPolicy::new(0));
        assert!(matches!(outcome, Outcome::DeadLetter(_)));
    }

    #[test]
    fn test_malformed_reason_display() {
        let outcome = Outcome::malformed(&QueueError::MalformedEnvelope("missing field `id`".into()));
        match outcome {
            Outcome::DeadLetter(reason) => {
                assert!(reason.to_string().starts_with("malformed envelope"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
