//! Generic keyed stage worker.
//!
//! ```text
//! queue(key) ──► in-flight[key] += 1 ──► spawn ──► permit ──► spawn_blocking(compute)
//!                                                                   │
//!                                             in-flight[key] -= 1 ◄─┘
//!                                                   │
//!                    feeds.send(event).await ◄──────┤
//!                                                   └──► sink.send((out_key, output))
//! ```
//!
//! The in-flight count drops before the result is sent, so a caller that
//! subscribes first and then sees the key as busy always gets the result.
//! Attached feeds are bounded and awaited, so a slow consumer slows the
//! stage down instead of losing outcomes.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use swatchbook_core::{PipelineError, SwatchbookResult};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, Semaphore};

use crate::contract::StageEvent;

/// A single pure computation step.
pub trait Stage: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Clone + Send + 'static;

    /// Stage name used in logs and errors.
    const NAME: &'static str;

    /// Run the computation. Called on the blocking thread pool.
    fn compute(&self, key: &str, input: Self::Input) -> SwatchbookResult<Self::Output>;
}

/// Worker limits for a [`StagePipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageConfig {
    /// Maximum computations running at once.
    pub max_concurrency: usize,
    /// Capacity of the broadcast sink and of each attached feed. Slow
    /// subscribers lag past this; attached feeds apply backpressure.
    pub output_capacity: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            output_capacity: 64,
        }
    }
}

type Feeds<T> = Arc<Mutex<Vec<mpsc::Sender<StageEvent<T>>>>>;

/// Runs a [`Stage`] on the tokio runtime and multicasts its results.
pub struct StagePipeline<S: Stage> {
    stage: Arc<S>,
    in_flight: Arc<DashMap<String, usize>>,
    sink: broadcast::Sender<(String, S::Output)>,
    feeds: Feeds<S::Output>,
    feed_capacity: usize,
    permits: Arc<Semaphore>,
}

impl<S: Stage> StagePipeline<S> {
    pub fn new(stage: S, config: StageConfig) -> Self {
        let capacity = config.output_capacity.max(1);
        let (sink, _) = broadcast::channel(capacity);
        Self {
            stage: Arc::new(stage),
            in_flight: Arc::new(DashMap::new()),
            sink,
            feeds: Arc::new(Mutex::new(Vec::new())),
            feed_capacity: capacity,
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
        }
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn subscribe_output(&self) -> broadcast::Receiver<(String, S::Output)> {
        self.sink.subscribe()
    }

    /// Attach a bounded feed that receives every later outcome, failures
    /// included. Dropping the receiver detaches it.
    pub fn attach_feed(&self) -> mpsc::Receiver<StageEvent<S::Output>> {
        let (tx, rx) = mpsc::channel(self.feed_capacity);
        self.feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Stop accepting work. Queued tasks that have not started are dropped.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Queue `input`, tracked under `in_flight_key` and published as
    /// `(out_key, output)`.
    ///
    /// The in-flight mark is visible before this returns.
    pub fn submit(&self, in_flight_key: String, out_key: String, input: S::Input) {
        *self.in_flight.entry(in_flight_key.clone()).or_insert(0) += 1;

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(stage = S::NAME, key = %out_key, error = %e, "no tokio runtime, dropping work");
                release(&self.in_flight, &in_flight_key);
                for feed in live_feeds(&self.feeds) {
                    if feed
                        .try_send(StageEvent::Failed {
                            key: in_flight_key.clone(),
                        })
                        .is_err()
                    {
                        tracing::warn!(stage = S::NAME, key = %in_flight_key, "failure not reported on feed");
                    }
                }
                return;
            }
        };

        let stage = Arc::clone(&self.stage);
        let in_flight = Arc::clone(&self.in_flight);
        let sink = self.sink.clone();
        let feeds = Arc::clone(&self.feeds);
        let permits = Arc::clone(&self.permits);

        handle.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => {
                    let key = out_key.clone();
                    tokio::task::spawn_blocking(move || stage.compute(&key, input))
                        .await
                        .unwrap_or_else(|e| {
                            Err(PipelineError::StageFailed {
                                stage: S::NAME.to_string(),
                                key: out_key.clone(),
                                reason: e.to_string(),
                            }
                            .into())
                        })
                }
                Err(_) => Err(PipelineError::Closed {
                    stage: S::NAME.to_string(),
                }
                .into()),
            };

            release(&in_flight, &in_flight_key);

            match result {
                Ok(output) => {
                    tracing::debug!(stage = S::NAME, key = %out_key, "stage completed");
                    deliver::<S>(
                        &feeds,
                        StageEvent::Completed {
                            key: out_key.clone(),
                            output: output.clone(),
                        },
                    )
                    .await;
                    if sink.send((out_key, output)).is_err() {
                        tracing::debug!(stage = S::NAME, "no subscribers for stage output");
                    }
                }
                Err(e) => {
                    tracing::warn!(stage = S::NAME, key = %out_key, error = %e, "stage failed, no output emitted");
                    deliver::<S>(&feeds, StageEvent::Failed { key: in_flight_key }).await;
                }
            }
        });
    }
}

/// Open feeds; closed ones are dropped from the list.
fn live_feeds<T>(
    feeds: &Mutex<Vec<mpsc::Sender<StageEvent<T>>>>,
) -> Vec<mpsc::Sender<StageEvent<T>>> {
    let mut feeds = feeds.lock().unwrap_or_else(PoisonError::into_inner);
    feeds.retain(|tx| !tx.is_closed());
    feeds.clone()
}

async fn deliver<S: Stage>(
    feeds: &Mutex<Vec<mpsc::Sender<StageEvent<S::Output>>>>,
    event: StageEvent<S::Output>,
) {
    for feed in live_feeds(feeds) {
        if feed.send(event.clone()).await.is_err() {
            tracing::debug!(stage = S::NAME, "feed detached before delivery");
        }
    }
}

fn release(in_flight: &DashMap<String, usize>, key: &str) {
    in_flight.remove_if_mut(key, |_, count| {
        *count = count.saturating_sub(1);
        *count == 0
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use swatchbook_core::SwatchbookError;

    /// Doubles its input; fails on negative numbers; sleeps on 99.
    struct Doubler {
        calls: AtomicUsize,
    }

    impl Stage for Doubler {
        type Input = i64;
        type Output = i64;
        const NAME: &'static str = "doubler";

        fn compute(&self, key: &str, input: i64) -> SwatchbookResult<i64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if input == 99 {
                std::thread::sleep(Duration::from_millis(100));
            }
            if input < 0 {
                return Err(SwatchbookError::Pipeline(PipelineError::StageFailed {
                    stage: Self::NAME.to_string(),
                    key: key.to_string(),
                    reason: "negative".to_string(),
                }));
            }
            Ok(input * 2)
        }
    }

    fn pipeline() -> StagePipeline<Doubler> {
        StagePipeline::new(
            Doubler {
                calls: AtomicUsize::new(0),
            },
            StageConfig::default(),
        )
    }

    async fn recv(rx: &mut broadcast::Receiver<(String, i64)>) -> (String, i64) {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("stage output within timeout")
            .expect("sink open")
    }

    #[tokio::test]
    async fn test_publishes_result() {
        let p = pipeline();
        let mut rx = p.subscribe_output();
        p.submit("a".into(), "a".into(), 21);
        assert_eq!(recv(&mut rx).await, ("a".to_string(), 42));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_in_flight_visible_until_publication() {
        let p = pipeline();
        let mut rx = p.subscribe_output();
        p.submit("slow".into(), "slow".into(), 99);
        assert!(p.is_in_flight("slow"));

        recv(&mut rx).await;
        assert!(!p.is_in_flight("slow"));
        assert_eq!(p.in_flight_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_refcount_keeps_key_busy() {
        let p = pipeline();
        let mut rx = p.subscribe_output();
        p.submit("k".into(), "k".into(), 99);
        p.submit("k".into(), "k".into(), 1);

        let mut seen = 0;
        while seen < 2 {
            recv(&mut rx).await;
            seen += 1;
        }
        assert!(!p.is_in_flight("k"));
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_keys() {
        let p = pipeline();
        let mut rx = p.subscribe_output();
        p.submit("bad".into(), "bad".into(), -1);
        p.submit("good".into(), "good".into(), 5);

        assert_eq!(recv(&mut rx).await, ("good".to_string(), 10));
        // The failed key is released without publishing.
        tokio::time::timeout(Duration::from_secs(5), async {
            while p.is_in_flight("bad") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("failed key released");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_pipeline_releases_key() {
        let p = pipeline();
        p.close();
        p.submit("a".into(), "a".into(), 1);
        tokio::time::timeout(Duration::from_secs(5), async {
            while p.is_in_flight("a") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("closed pipeline releases key");
        assert_eq!(p.stage().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_submit_without_runtime_is_dropped() {
        let p = pipeline();
        let mut feed = p.attach_feed();
        p.submit("a".into(), "a".into(), 1);
        assert!(!p.is_in_flight("a"));
        assert_eq!(
            feed.try_recv().unwrap(),
            StageEvent::Failed {
                key: "a".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_feed_reports_failures_under_tracking_key() {
        let p = pipeline();
        let mut feed = p.attach_feed();
        p.submit("bad#params".into(), "bad".into(), -3);

        let event = tokio::time::timeout(Duration::from_secs(5), feed.recv())
            .await
            .expect("feed event within timeout")
            .expect("feed open");
        assert_eq!(
            event,
            StageEvent::Failed {
                key: "bad#params".to_string()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_feed_consumer_loses_nothing() {
        let p = StagePipeline::new(
            Doubler {
                calls: AtomicUsize::new(0),
            },
            StageConfig {
                max_concurrency: 4,
                output_capacity: 1,
            },
        );
        let mut feed = p.attach_feed();
        let mut lagging = p.subscribe_output();

        for i in 0..40 {
            p.submit(format!("k{i}"), format!("k{i}"), i);
        }
        // Let the workers pile up against the full feed.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut outputs = Vec::new();
        while outputs.len() < 40 {
            match tokio::time::timeout(Duration::from_secs(5), feed.recv()).await {
                Ok(Some(StageEvent::Completed { key, output })) => outputs.push((key, output)),
                other => panic!("unexpected feed state: {other:?}"),
            }
        }
        outputs.sort();
        let mut expected: Vec<_> = (0..40).map(|i| (format!("k{i}"), i * 2)).collect();
        expected.sort();
        assert_eq!(outputs, expected);

        // The broadcast sink is best effort and has dropped most of them.
        assert!(matches!(
            lagging.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_feed_is_detached() {
        let p = pipeline();
        let feed = p.attach_feed();
        drop(feed);
        let mut rx = p.subscribe_output();

        p.submit("a".into(), "a".into(), 4);
        assert_eq!(recv(&mut rx).await, ("a".to_string(), 8));
        assert!(live_feeds(&p.feeds).is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use proptest::test_runner::TestCaseError;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// Every submission produces exactly one feed event, and no key
            /// stays busy once all events are in.
            #[test]
            fn prop_every_submission_is_accounted_for(
                inputs in prop::collection::vec((0usize..4, -5i64..50), 1..40),
            ) {
                let rt = tokio::runtime::Runtime::new()
                    .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))?;
                rt.block_on(async {
                    let p = StagePipeline::new(
                        Doubler {
                            calls: AtomicUsize::new(0),
                        },
                        StageConfig {
                            max_concurrency: 2,
                            output_capacity: 2,
                        },
                    );
                    let mut feed = p.attach_feed();
                    for (slot, value) in &inputs {
                        let key = format!("k{slot}");
                        p.submit(key.clone(), key, *value);
                    }

                    let mut completed = 0;
                    let mut failed = 0;
                    for _ in 0..inputs.len() {
                        let event = tokio::time::timeout(Duration::from_secs(5), feed.recv())
                            .await
                            .map_err(|_| TestCaseError::fail("feed stalled"))?;
                        match event {
                            Some(StageEvent::Completed { .. }) => completed += 1,
                            Some(StageEvent::Failed { .. }) => failed += 1,
                            None => return Err(TestCaseError::fail("feed closed")),
                        }
                    }

                    let negatives = inputs.iter().filter(|(_, v)| *v < 0).count();
                    prop_assert_eq!(failed, negatives);
                    prop_assert_eq!(completed, inputs.len() - negatives);
                    prop_assert_eq!(p.in_flight_count(), 0);
                    Ok::<(), TestCaseError>(())
                })?;
            }
        }
    }
}
