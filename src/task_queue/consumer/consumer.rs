use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::task_queue::broker::{Broker, Delivery};
use crate::task_queue::consumer::backoff::Backoff;
use crate::task_queue::consumer::outcome::{decide, Outcome, RetryPolicy};
use crate::task_queue::envelope::{decode, Envelope};
use crate::task_queue::error::{HandlerError, QueueError, Result};
use crate::task_queue::publisher::Publisher;

/// Type alias for task handler functions
///
/// Handlers receive the decoded envelope and may run more than once for the
/// same message id, so they must be idempotent.
pub type TaskHandler = Arc<
    dyn Fn(Envelope) -> Pin<Box<dyn Future<Output = std::result::Result<(), HandlerError>> + Send>>
        + Send
        + Sync,
>;

/// Configuration for a consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Queue to consume from; retries are republished here
    pub queue: String,

    /// Identifies this consumer's leases to the broker
    pub consumer_tag: String,

    /// Failed deliveries are retried until the envelope's count reaches this
    pub max_retries: u32,

    /// Maximum unacknowledged deliveries held at once
    pub prefetch: usize,

    /// Delay applied to retries when `delay_retries` is set
    pub retry_delay: Duration,

    /// Publish retries with delayed visibility instead of immediately
    pub delay_retries: bool,

    /// Wait time when no messages are available (milliseconds)
    pub polling_interval_ms: u64,

    /// How long in-flight handlers may run after shutdown is requested
    pub shutdown_timeout: Duration,
}

impl ConsumerConfig {
    /// Create a new consumer configuration
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use chatq::task_queue::consumer::ConsumerConfig;
    ///
    /// let config = ConsumerConfig::new("llm_requests", "worker-1")
    ///     .with_prefetch(4)
    ///     .with_max_retries(5)
    ///     .with_shutdown_timeout(Duration::from_secs(10));
    /// assert_eq!(config.retry_policy().max_retries, 5);
    /// ```
    pub fn new(queue: impl Into<String>, consumer_tag: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            consumer_tag: consumer_tag.into(),
            max_retries: 3,
            prefetch: 10,
            retry_delay: Duration::from_secs(5),
            delay_retries: false,
            polling_interval_ms: 100,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    /// Set the retry bound (builder pattern)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the prefetch bound, at least 1 (builder pattern)
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Set the retry delay (builder pattern)
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Honor the retry delay when republishing (builder pattern)
    pub fn with_delayed_retries(mut self, enabled: bool) -> Self {
        self.delay_retries = enabled;
        self
    }

    /// Set the polling interval in milliseconds (builder pattern)
    pub fn with_polling_interval_ms(mut self, interval_ms: u64) -> Self {
        self.polling_interval_ms = interval_ms;
        self
    }

    /// Set the shutdown drain timeout (builder pattern)
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: self.delay_retries.then_some(self.retry_delay),
        }
    }
}

/// State shared by the consume loop and every spawned delivery task
struct Engine {
    broker: Arc<dyn Broker>,
    publisher: Publisher,
    handler: TaskHandler,
    policy: RetryPolicy,
}

impl Engine {
    async fn process(&self, delivery: &Delivery) -> Outcome {
        let envelope = match decode(&delivery.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    message_id = %delivery.message_id,
                    queue = %delivery.queue,
                    error = %e,
                    "Malformed envelope"
                );
                return Outcome::malformed(&e);
            }
        };

        if delivery.retry_count_header() != Some(u64::from(envelope.retry_count())) {
            debug!(
                message_id = %envelope.id(),
                header = ?delivery.retry_count_header(),
                envelope = envelope.retry_count(),
                "Retry header disagrees with envelope, using envelope"
            );
        }

        let handler = Arc::clone(&self.handler);
        let result = match AssertUnwindSafe(handler(envelope.clone())).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::new("handler panicked")),
        };

        if let Err(e) = &result {
            warn!(
                message_id = %envelope.id(),
                retry_count = envelope.retry_count(),
                error = %e,
                "Handler failed"
            );
        }

        decide(&envelope, result, &self.policy)
    }

    async fn apply(&self, delivery: &Delivery, outcome: &Outcome) -> Result<()> {
        match outcome {
            Outcome::Ack => {
                self.broker.ack(delivery).await?;
                debug!(message_id = %delivery.message_id, "Acked");
            }
            Outcome::Retry(next) => {
                let not_before = self
                    .policy
                    .retry_delay
                    .and_then(|delay| chrono::Duration::from_std(delay).ok())
                    .map(|delay| Utc::now() + delay);

                // Republish before acking: a crash in between duplicates, never loses
                self.publisher
                    .publish_envelope(&delivery.queue, next, not_before)
                    .await?;
                self.broker.ack(delivery).await?;

                info!(
                    message_id = %next.id(),
                    retry_count = next.retry_count(),
                    delayed = not_before.is_some(),
                    "Scheduled retry"
                );
            }
            Outcome::DeadLetter(reason) => {
                self.broker.reject(delivery, false).await?;
                error!(message_id = %delivery.message_id, reason = %reason, "Dead-lettered message");
            }
        }
        Ok(())
    }

    async fn handle(&self, delivery: Delivery) -> Result<Outcome> {
        let outcome = self.process(&delivery).await;
        self.apply(&delivery, &outcome).await?;
        Ok(outcome)
    }
}

enum Wake {
    Tick,
    Shutdown,
    Finished(std::result::Result<Result<Outcome>, JoinError>),
}

/// Consumer and retry engine for one queue
///
/// Deliveries are handled concurrently, never more than `prefetch` at once.
/// Each one ends in exactly one [`Outcome`]:
///
/// - handler success: ack
/// - handler failure with retry count below the bound: republish with
///   count + 1 to the same queue, then ack the original
/// - handler failure at the bound, or an undecodable body: reject without
///   requeue so the broker dead-letters it
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use chatq::task_queue::broker::{Broker, MemoryBroker, QueueTopology};
/// use chatq::task_queue::consumer::{Consumer, ConsumerConfig};
/// use chatq::task_queue::publisher::Publisher;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let broker = Arc::new(MemoryBroker::new());
/// broker.declare(&QueueTopology::new("llm_requests", "llm_dead_letter")).await.unwrap();
///
/// Publisher::new(broker.clone(), "llm_requests")
///     .publish(&json!({"content": "hi"}))
///     .await
///     .unwrap();
///
/// let mut consumer = Consumer::new(
///     broker.clone(),
///     ConsumerConfig::new("llm_requests", "worker-1"),
///     |envelope| Box::pin(async move {
///         println!("Processing {}", envelope.payload["content"]);
///         Ok(())
///     }),
/// );
///
/// assert_eq!(consumer.poll_once().await.unwrap(), 1);
/// consumer.drain(std::time::Duration::from_secs(1)).await;
/// assert_eq!(broker.queue_len("llm_requests"), 0);
/// # });
/// ```
pub struct Consumer {
    engine: Arc<Engine>,
    config: ConsumerConfig,
    permits: Arc<Semaphore>,
    in_flight: JoinSet<Result<Outcome>>,
    backoff: Backoff,
}

impl Consumer {
    pub fn new<F>(broker: Arc<dyn Broker>, config: ConsumerConfig, handler: F) -> Self
    where
        F: Fn(Envelope) -> Pin<Box<dyn Future<Output = std::result::Result<(), HandlerError>> + Send>>
            + Send
            + Sync
            + 'static,
    {
        let engine = Engine {
            publisher: Publisher::new(Arc::clone(&broker), config.queue.clone()),
            broker,
            handler: Arc::new(handler),
            policy: config.retry_policy(),
        };

        Self {
            engine: Arc::new(engine),
            permits: Arc::new(Semaphore::new(config.prefetch.max(1))),
            config,
            in_flight: JoinSet::new(),
            backoff: Backoff::default(),
        }
    }

    /// Use a custom reconnect backoff (builder pattern)
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Deliveries currently being handled
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Decode a delivery, run the handler and decide its outcome. No broker I/O.
    pub async fn process(&self, delivery: &Delivery) -> Outcome {
        self.engine.process(delivery).await
    }

    /// Carry out an outcome against the broker
    pub async fn apply(&self, delivery: &Delivery, outcome: &Outcome) -> Result<()> {
        self.engine.apply(delivery, outcome).await
    }

    /// Process and apply a single delivery inline
    pub async fn handle(&self, delivery: Delivery) -> Result<Outcome> {
        self.engine.handle(delivery).await
    }

    /// Fetch as many deliveries as there are free prefetch slots and start
    /// handling them in the background
    ///
    /// Returns the number of deliveries fetched. A broker connection error
    /// from this fetch, or from settling an earlier delivery, is returned so
    /// the caller can reconnect.
    pub async fn poll_once(&mut self) -> Result<usize> {
        self.reap_finished()?;

        let capacity = self.permits.available_permits();
        if capacity == 0 {
            return Ok(0);
        }

        let deliveries = self
            .engine
            .broker
            .fetch(&self.config.queue, &self.config.consumer_tag, capacity)
            .await?;
        self.backoff.reset();

        let fetched = deliveries.len();
        for delivery in deliveries {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|_| QueueError::BrokerError("prefetch semaphore closed".to_string()))?;
            let engine = Arc::clone(&self.engine);

            self.in_flight.spawn(async move {
                let _permit = permit;
                engine.handle(delivery).await
            });
        }

        if fetched > 0 {
            debug!(queue = %self.config.queue, fetched, in_flight = self.in_flight.len(), "Fetched batch");
        }
        Ok(fetched)
    }

    /// Wait for in-flight deliveries to settle, aborting whatever is still
    /// running after `timeout`. Returns the number of aborted deliveries.
    pub async fn drain(&mut self, timeout: Duration) -> usize {
        let deadline = time::Instant::now() + timeout;

        loop {
            match time::timeout_at(deadline, self.in_flight.join_next()).await {
                Ok(Some(joined)) => {
                    if let Err(e) = Self::check_task(joined) {
                        warn!(error = %e, "In-flight delivery could not be settled");
                    }
                }
                Ok(None) => return 0,
                Err(_) => {
                    let aborted = self.in_flight.len();
                    self.in_flight.abort_all();
                    while self.in_flight.join_next().await.is_some() {}
                    return aborted;
                }
            }
        }
    }

    /// Consume until `shutdown` turns true (or its sender is dropped)
    ///
    /// On shutdown, stops fetching, gives in-flight handlers up to
    /// `shutdown_timeout` to finish, then releases anything still
    /// unacknowledged back to the broker for redelivery.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            queue = %self.config.queue,
            consumer_tag = %self.config.consumer_tag,
            prefetch = self.config.prefetch,
            max_retries = self.config.max_retries,
            "Consumer started"
        );
        let idle = Duration::from_millis(self.config.polling_interval_ms);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let fetched = match self.poll_once().await {
                Ok(fetched) => fetched,
                Err(e) => {
                    self.abandon().await;
                    return Err(e);
                }
            };
            if fetched > 0 {
                continue;
            }

            let wake = tokio::select! {
                _ = time::sleep(idle) => Wake::Tick,
                changed = shutdown.changed() => match changed {
                    Ok(()) => Wake::Tick,
                    Err(_) => Wake::Shutdown,
                },
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    Wake::Finished(joined)
                }
            };

            match wake {
                Wake::Tick => {}
                Wake::Shutdown => break,
                Wake::Finished(joined) => {
                    if let Err(e) = Self::check_task(joined) {
                        self.abandon().await;
                        return Err(e);
                    }
                }
            }
        }

        self.stop(self.config.shutdown_timeout).await
    }

    /// [`run`](Consumer::run) under a supervisor that reconnects after broker
    /// connection loss, sleeping per the exponential backoff between attempts
    pub async fn run_with_reconnect(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            match self.run(shutdown.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_connection_error() => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = self.backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Broker connection lost, reconnecting"
                    );

                    tokio::select! {
                        _ = time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn stop(&mut self, timeout: Duration) -> Result<()> {
        let aborted = self.drain(timeout).await;
        if aborted > 0 {
            warn!(aborted, "Handlers still running at shutdown timeout were aborted");
        }

        let released = self.engine.broker.recover(&self.config.consumer_tag).await?;
        info!(consumer_tag = %self.config.consumer_tag, released, "Consumer stopped");
        Ok(())
    }

    /// Drop in-flight work after a connection failure; the broker redelivers it
    async fn abandon(&mut self) {
        let aborted = self.drain(Duration::ZERO).await;
        match self.engine.broker.recover(&self.config.consumer_tag).await {
            Ok(released) => debug!(aborted, released, "Released deliveries after failure"),
            Err(e) => debug!(aborted, error = %e, "Could not release deliveries, leases will expire"),
        }
    }

    fn reap_finished(&mut self) -> Result<()> {
        while let Some(joined) = self.in_flight.try_join_next() {
            Self::check_task(joined)?;
        }
        Ok(())
    }

    fn check_task(joined: std::result::Result<Result<Outcome>, JoinError>) -> Result<()> {
        match joined {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) if e.is_connection_error() => Err(e),
            Ok(Err(e)) => {
                warn!(error = %e, "Delivery could not be settled");
                Ok(())
            }
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => {
                error!(error = %e, "Delivery task panicked");
                Ok(())
            }
        }
    }
}
