use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::error::{Action, FeedError};
use super::events::{emit, FeedEvent};
use crate::api::ApiError;

/// Tuning for [`RequestCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Minimum spacing between request issues on one channel.
    pub min_interval: Duration,
    /// Backoff unit; the n-th retry waits `backoff_base * n`.
    pub backoff_base: Duration,
    /// Retries after the first rate-limited attempt.
    pub max_retries: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            backoff_base: Duration::from_secs(2),
            max_retries: 3,
        }
    }
}

/// A successful execution tagged with the channel generation it ran under.
#[derive(Debug)]
pub struct Flight<T> {
    pub generation: u64,
    pub value: T,
}

#[derive(Debug, Default)]
struct ChannelState {
    /// Bumped by `cancel`; results from older generations are discarded.
    generation: u64,
    /// Generation of the request currently in flight.
    in_flight: Option<u64>,
    /// When the last request on this channel was (or will be) issued.
    last_issued: Option<Instant>,
}

/// Single-flight, throttled, cancellable request execution per channel.
///
/// One coordinator is owned by each feed controller; channel state lives
/// here rather than in globals so independent feeds never interfere.
pub struct RequestCoordinator {
    config: CoordinatorConfig,
    channels: Mutex<HashMap<String, ChannelState>>,
    event_tx: Option<mpsc::Sender<FeedEvent>>,
}

/// Frees the single-flight slot when an execution ends, including when
/// its future is dropped mid-await.
struct FlightGuard<'a> {
    coordinator: &'a RequestCoordinator,
    key: &'a str,
    generation: u64,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut channels = self.coordinator.channels();
        if let Some(state) = channels.get_mut(self.key) {
            if state.in_flight == Some(self.generation) {
                state.in_flight = None;
            }
        }
    }
}

impl RequestCoordinator {
    pub fn new(config: CoordinatorConfig, event_tx: Option<mpsc::Sender<FeedEvent>>) -> Self {
        Self {
            config,
            channels: Mutex::new(HashMap::new()),
            event_tx,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, ChannelState>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True while a request on `key` is outstanding.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.channels()
            .get(key)
            .is_some_and(|s| s.in_flight.is_some())
    }

    pub fn generation(&self, key: &str) -> u64 {
        self.channels().get(key).map_or(0, |s| s.generation)
    }

    pub fn is_current(&self, key: &str, generation: u64) -> bool {
        self.generation(key) == generation
    }

    /// Supersede whatever is in flight on `key`.
    ///
    /// The outstanding request is not aborted; its result is discarded when
    /// it arrives and the slot is immediately free for a new request.
    /// Returns the new generation.
    pub fn cancel(&self, key: &str) -> u64 {
        let mut channels = self.channels();
        let state = channels.entry(key.to_string()).or_default();
        if let Some(old) = state.in_flight.take() {
            tracing::debug!(channel = key, generation = old, "Superseding in-flight request");
        }
        state.generation += 1;
        state.generation
    }

    /// Run `fetch` on channel `key`.
    ///
    /// - Rejects with [`FeedError::Busy`] if the channel already has a
    ///   request in flight.
    /// - Waits out the remainder of the minimum interval since the previous
    ///   issue on this channel instead of dropping the call.
    /// - Retries rate-limited attempts up to `max_retries` times, waiting
    ///   `backoff_base * attempt` (or the server's `Retry-After` if longer),
    ///   then fails with [`FeedError::RateLimited`].
    /// - Returns [`FeedError::Superseded`] if [`cancel`](Self::cancel) was
    ///   called on the channel while this request was pending.
    pub async fn execute<T, F, Fut>(&self, key: &str, fetch: F) -> Result<Flight<T>, FeedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let generation = self.generation(key);
        self.execute_at(key, generation, fetch).await
    }

    /// Like [`execute`](Self::execute), but on behalf of a caller that
    /// obtained `generation` earlier (typically from [`cancel`](Self::cancel)).
    ///
    /// Returns [`FeedError::Superseded`] without issuing anything if the
    /// channel has moved past `generation` in the meantime, so a newer
    /// caller is never locked out by an older one.
    pub async fn execute_at<T, F, Fut>(
        &self,
        key: &str,
        generation: u64,
        mut fetch: F,
    ) -> Result<Flight<T>, FeedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let wait = {
            let mut channels = self.channels();
            let state = channels.entry(key.to_string()).or_default();
            if state.generation != generation {
                tracing::debug!(
                    channel = key,
                    generation,
                    current = state.generation,
                    "Request superseded before issue"
                );
                return Err(FeedError::Superseded);
            }
            if state.in_flight.is_some() {
                tracing::debug!(channel = key, "Request already in flight, rejecting duplicate");
                return Err(FeedError::Busy);
            }
            state.in_flight = Some(state.generation);

            let now = Instant::now();
            let issue_at = state
                .last_issued
                .map_or(now, |last| (last + self.config.min_interval).max(now));
            state.last_issued = Some(issue_at);
            issue_at - now
        };
        let _guard = FlightGuard {
            coordinator: self,
            key,
            generation,
        };

        if !wait.is_zero() {
            tracing::debug!(channel = key, wait_ms = wait.as_millis() as u64, "Throttling request");
            tokio::time::sleep(wait).await;
            self.ensure_current(key, generation)?;
        }

        let mut attempt: u32 = 0;
        let value = loop {
            match fetch().await {
                Ok(value) => break value,
                Err(ApiError::RateLimited { retry_after }) => {
                    if attempt >= self.config.max_retries {
                        tracing::warn!(channel = key, attempts = attempt + 1, "Rate limit retries exhausted");
                        self.ensure_current(key, generation)?;
                        return Err(FeedError::RateLimited {
                            attempts: attempt + 1,
                        });
                    }
                    attempt += 1;

                    let backoff = self.config.backoff_base * attempt; // 2s, 4s, 6s
                    let delay = retry_after.map_or(backoff, |ra| ra.max(backoff));
                    tracing::warn!(
                        channel = key,
                        retry = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    emit(
                        self.event_tx.as_ref(),
                        FeedEvent::RateLimited {
                            channel: key.to_string(),
                            attempt,
                            delay,
                        },
                    );

                    tokio::time::sleep(delay).await;
                    self.ensure_current(key, generation)?;
                    self.mark_issued(key);
                }
                Err(e) => {
                    self.ensure_current(key, generation)?;
                    return Err(FeedError::request(Action::LoadFeed, e));
                }
            }
        };

        self.ensure_current(key, generation)?;
        Ok(Flight { generation, value })
    }

    fn ensure_current(&self, key: &str, generation: u64) -> Result<(), FeedError> {
        if self.is_current(key, generation) {
            Ok(())
        } else {
            tracing::debug!(channel = key, generation, "Discarding superseded request");
            Err(FeedError::Superseded)
        }
    }

    fn mark_issued(&self, key: &str) {
        if let Some(state) = self.channels().get_mut(key) {
            state.last_issued = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    fn coordinator() -> RequestCoordinator {
        RequestCoordinator::new(
            CoordinatorConfig {
                min_interval: Duration::from_millis(500),
                backoff_base: Duration::from_secs(2),
                max_retries: 3,
            },
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_returns_value_with_generation() {
        let c = coordinator();
        let flight = c.execute("feed:all", || async { Ok::<_, ApiError>(7) }).await.unwrap();
        assert_eq!(flight.value, 7);
        assert_eq!(flight.generation, 0);
        assert!(!c.is_in_flight("feed:all"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_call_rejected_busy() {
        let c = coordinator();
        let (tx, rx) = oneshot::channel::<u32>();
        let mut rx = Some(rx);

        let first = c.execute("feed:all", move || {
            let rx = rx.take();
            async move {
                match rx {
                    Some(rx) => rx.await.map_err(|_| ApiError::Network("closed".into())),
                    None => Err(ApiError::Network("called twice".into())),
                }
            }
        });
        let second = async {
            tokio::task::yield_now().await;
            let result = c.execute("feed:all", || async { Ok::<u32, ApiError>(2) }).await;
            let _ = tx.send(1);
            result
        };

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap().value, 1);
        assert!(matches!(second, Err(FeedError::Busy)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_are_independent() {
        let c = coordinator();
        let (tx, rx) = oneshot::channel::<u32>();
        let mut rx = Some(rx);

        let slow = c.execute("feed:all", move || {
            let rx = rx.take();
            async move {
                match rx {
                    Some(rx) => rx.await.map_err(|_| ApiError::Network("closed".into())),
                    None => Err(ApiError::Network("called twice".into())),
                }
            }
        });
        let other = async {
            tokio::task::yield_now().await;
            let result = c.execute("feed:popular", || async { Ok::<u32, ApiError>(2) }).await;
            let _ = tx.send(1);
            result
        };

        let (slow, other) = tokio::join!(slow, other);
        assert!(slow.is_ok());
        assert_eq!(other.unwrap().value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_delays_rather_than_drops() {
        let c = coordinator();
        let start = Instant::now();
        c.execute("feed:all", || async { Ok::<_, ApiError>(()) }).await.unwrap();
        c.execute("feed:all", || async { Ok::<_, ApiError>(()) }).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_throttle_after_interval_elapsed() {
        let c = coordinator();
        c.execute("feed:all", || async { Ok::<_, ApiError>(()) }).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let start = Instant::now();
        c.execute("feed:all", || async { Ok::<_, ApiError>(()) }).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_then_succeeds() {
        let c = coordinator();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        let flight = c
            .execute("feed:all", move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ApiError::RateLimited { retry_after: None })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(flight.value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 2s + 4s of backoff
        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhausted_after_three_retries() {
        let c = coordinator();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        let result = c
            .execute("feed:all", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ApiError::RateLimited { retry_after: None }) }
            })
            .await;

        assert!(matches!(result, Err(FeedError::RateLimited { attempts: 4 })));
        assert_eq!(calls.load(Ordering::SeqCst), 4); // initial + 3 retries
        assert!(start.elapsed() >= Duration::from_secs(12)); // 2 + 4 + 6
        assert!(!c.is_in_flight("feed:all"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_longer_than_backoff_is_honored() {
        let c = coordinator();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        c.execute("feed:all", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ApiError::RateLimited {
                        retry_after: Some(Duration::from_secs(10)),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_not_retried() {
        let c = coordinator();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = c
            .execute("feed:all", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ApiError::Status(500)) }
            })
            .await;

        assert!(matches!(
            result,
            Err(FeedError::Request {
                action: Action::LoadFeed,
                source: ApiError::Status(500)
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_late_result_and_frees_slot() {
        let c = coordinator();
        let (tx, rx) = oneshot::channel::<u32>();
        let mut rx = Some(rx);

        let stale = c.execute("feed:all", move || {
            let rx = rx.take();
            async move {
                match rx {
                    Some(rx) => rx.await.map_err(|_| ApiError::Network("closed".into())),
                    None => Err(ApiError::Network("called twice".into())),
                }
            }
        });
        let newer = async {
            tokio::task::yield_now().await;
            assert_eq!(c.cancel("feed:all"), 1);
            let result = c.execute("feed:all", || async { Ok::<u32, ApiError>(2) }).await;
            let _ = tx.send(1);
            result
        };

        let (stale, newer) = tokio::join!(stale, newer);
        assert!(matches!(stale, Err(FeedError::Superseded)));
        let newer = newer.unwrap();
        assert_eq!(newer.value, 2);
        assert_eq!(newer.generation, 1);
        assert!(!c.is_in_flight("feed:all"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_future_releases_slot() {
        let c = coordinator();
        {
            let pending = c.execute("feed:all", || std::future::pending::<Result<(), ApiError>>());
            let _ = tokio::time::timeout(Duration::from_millis(10), pending).await;
        }
        assert!(!c.is_in_flight("feed:all"));
        assert!(c.execute("feed:all", || async { Ok::<_, ApiError>(()) }).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_caller_cannot_take_newer_generation_slot() {
        let c = coordinator();
        let older = c.cancel("feed:all");
        let newer = c.cancel("feed:all");
        assert_eq!((older, newer), (1, 2));

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let stale = c
            .execute_at("feed:all", older, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<u32, ApiError>(1) }
            })
            .await;
        assert!(matches!(stale, Err(FeedError::Superseded)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!c.is_in_flight("feed:all"));

        let flight = c
            .execute_at("feed:all", newer, || async { Ok::<u32, ApiError>(2) })
            .await
            .unwrap();
        assert_eq!(flight.generation, 2);
        assert_eq!(flight.value, 2);
    }
}
