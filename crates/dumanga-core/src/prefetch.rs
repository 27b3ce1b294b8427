//! Directional prefetch cache for page images.
//!
//! On every navigation the cache is handed the page ids in the order they
//! should be fetched ([`prefetch_order`]). Ids that are neither cached nor
//! in flight are queued; a fixed set of workers drain the queue with at most
//! `fan_out` fetches in flight. A later [`PrefetchCache::preload`] replaces
//! the queue, so the order always reflects the latest position.
//!
//! [`PrefetchCache::fetch_now`] serves the page the reader is looking at:
//! it returns a cached image, joins an in-flight fetch, or fetches directly.
//! At most one fetch per page id is ever outstanding.
//!
//! [`PrefetchCache::unload`] cancels everything and drops all entries; the
//! cache can be reused afterwards. Completions that arrive after an unload
//! are discarded.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ImageBytes;
use crate::remote::{ArchiveClient, ClientError};
use crate::retry::{self, FetchPolicy};

/// Fetch order for the page at `current`: the pages before it nearest
/// first, then the current page and everything after it.
///
/// ```
/// use dumanga_core::prefetch_order;
/// let pages: Vec<String> = (0..7).map(|i| format!("p{i}")).collect();
/// assert_eq!(
///     prefetch_order(&pages, 3),
///     ["p2", "p1", "p0", "p3", "p4", "p5", "p6"]
/// );
/// ```
pub fn prefetch_order(pages: &[String], current: usize) -> Vec<String> {
    let (before, after) = pages.split_at(current.min(pages.len()));
    before.iter().rev().chain(after).cloned().collect()
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrefetchError {
    #[error("prefetch cache was unloaded")]
    Unloaded,
    #[error("page fetch failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct PrefetchConfig {
    /// Maximum concurrent page fetches.
    pub fan_out: usize,
    pub policy: FetchPolicy,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            fan_out: 4,
            policy: FetchPolicy::default(),
        }
    }
}

type Outcome = Option<Result<ImageBytes, PrefetchError>>;

enum Slot {
    InFlight(watch::Sender<Outcome>),
    Ready(ImageBytes),
}

/// Workers and cancellation for one load cycle.
struct Generation {
    cancel: CancellationToken,
    tickets: async_channel::Sender<()>,
    workers: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<String, Slot>,
    /// Ids waiting for a worker, in fetch order.
    queue: VecDeque<String>,
    generation: Option<Generation>,
}

struct Shared {
    client: Arc<dyn ArchiveClient>,
    config: PrefetchConfig,
    permits: Semaphore,
    state: Mutex<CacheState>,
    fetches: AtomicUsize,
}

pub struct PrefetchCache {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PrefetchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchCache")
            .field("fan_out", &self.shared.config.fan_out)
            .field("cached", &self.cached_len())
            .field("in_flight", &self.in_flight())
            .field("queued", &self.queued())
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop the next queued id that nobody has started yet and mark it in flight.
    fn claim_next(&self, cancel: &CancellationToken) -> Option<String> {
        let mut state = self.lock();
        if cancel.is_cancelled() {
            return None;
        }
        while let Some(page_id) = state.queue.pop_front() {
            if !state.slots.contains_key(&page_id) {
                let (tx, _) = watch::channel(None);
                state.slots.insert(page_id.clone(), Slot::InFlight(tx));
                return Some(page_id);
            }
        }
        None
    }

    async fn fetch(
        &self,
        page_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ImageBytes, PrefetchError> {
        let work = async {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            // Permit per attempt: backoff sleeps do not hold a fan-out slot.
            retry::with_policy(&self.config.policy, "page", || async move {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|e| ClientError::Other(e.to_string()))?;
                self.client.fetch_page_image(page_id).await
            })
            .await
            .map_err(|e| PrefetchError::Failed(e.to_string()))
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(PrefetchError::Unloaded),
            result = work => result,
        }
    }

    /// Record a completed fetch and wake anyone waiting on it.
    fn finish(
        &self,
        page_id: &str,
        cancel: &CancellationToken,
        result: &Result<ImageBytes, PrefetchError>,
    ) {
        let mut state = self.lock();
        if cancel.is_cancelled() {
            tracing::debug!(page_id, "discarding completion after unload");
            return;
        }
        let Some(Slot::InFlight(done)) = state.slots.remove(page_id) else {
            return;
        };
        match result {
            Ok(bytes) => {
                state
                    .slots
                    .insert(page_id.to_string(), Slot::Ready(bytes.clone()));
            }
            Err(e) => tracing::debug!(page_id, error = %e, "page fetch failed"),
        }
        done.send_replace(Some(result.clone()));
    }
}

/// One prefetch worker. Each ticket stands for one queued id; the id itself
/// is taken from the shared queue so a re-derived order applies immediately.
async fn worker_loop(
    shared: Arc<Shared>,
    tickets: async_channel::Receiver<()>,
    cancel: CancellationToken,
) {
    while let Ok(()) = tickets.recv().await {
        if cancel.is_cancelled() {
            break;
        }
        let Some(page_id) = shared.claim_next(&cancel) else {
            continue;
        };
        let result = shared.fetch(&page_id, &cancel).await;
        shared.finish(&page_id, &cancel, &result);
    }
}

enum Role {
    Ready(ImageBytes),
    Wait(watch::Receiver<Outcome>),
    Fetch,
}

impl PrefetchCache {
    pub fn new(client: Arc<dyn ArchiveClient>, config: PrefetchConfig) -> Self {
        let fan_out = config.fan_out.max(1);
        Self {
            shared: Arc::new(Shared {
                client,
                config: PrefetchConfig { fan_out, ..config },
                permits: Semaphore::new(fan_out),
                state: Mutex::new(CacheState::default()),
                fetches: AtomicUsize::new(0),
            }),
        }
    }

    /// Start workers for a new load cycle if none are running.
    /// Returns the cycle's token and ticket sender, or `None` outside a runtime.
    fn ensure_generation(
        &self,
        state: &mut CacheState,
    ) -> Option<(CancellationToken, async_channel::Sender<()>)> {
        if let Some(generation) = &state.generation {
            return Some((generation.cancel.clone(), generation.tickets.clone()));
        }
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let cancel = CancellationToken::new();
        let (tickets, rx) = async_channel::unbounded();
        let workers = (0..self.shared.config.fan_out)
            .map(|_| {
                runtime.spawn(worker_loop(
                    Arc::clone(&self.shared),
                    rx.clone(),
                    cancel.clone(),
                ))
            })
            .collect();
        tracing::debug!(workers = self.shared.config.fan_out, "prefetch workers started");
        state.generation = Some(Generation {
            cancel: cancel.clone(),
            tickets: tickets.clone(),
            workers,
        });
        Some((cancel, tickets))
    }

    /// Replace the prefetch queue with `order`, skipping ids already cached
    /// or in flight. Calling it again with the same ids issues no new fetches.
    pub fn preload(&self, order: &[String]) {
        let mut state = self.shared.lock();
        let Some((_, tickets)) = self.ensure_generation(&mut state) else {
            tracing::warn!("no tokio runtime, skipping preload");
            return;
        };
        let previous = state.queue.len();
        let queue: VecDeque<String> = order
            .iter()
            .filter(|id| !state.slots.contains_key(id.as_str()))
            .cloned()
            .collect();
        // Outstanding tickets already cover `previous` entries.
        for _ in previous..queue.len() {
            if tickets.try_send(()).is_err() {
                break;
            }
        }
        tracing::debug!(requested = order.len(), queued = queue.len(), "preload");
        state.queue = queue;
    }

    /// The image for `page_id`, waiting on an in-flight fetch or fetching
    /// it now.
    pub async fn fetch_now(&self, page_id: &str) -> Result<ImageBytes, PrefetchError> {
        let (cancel, role) = {
            let mut state = self.shared.lock();
            let Some((cancel, _)) = self.ensure_generation(&mut state) else {
                return Err(PrefetchError::Unloaded);
            };
            let role = match state.slots.get(page_id) {
                Some(Slot::Ready(bytes)) => Role::Ready(bytes.clone()),
                Some(Slot::InFlight(done)) => Role::Wait(done.subscribe()),
                None => {
                    state.queue.retain(|queued| queued != page_id);
                    let (tx, _) = watch::channel(None);
                    state.slots.insert(page_id.to_string(), Slot::InFlight(tx));
                    Role::Fetch
                }
            };
            (cancel, role)
        };

        match role {
            Role::Ready(bytes) => Ok(bytes),
            Role::Wait(mut done) => {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => None,
                    seen = done.wait_for(Option::is_some) => seen.ok().and_then(|v| (*v).clone()),
                };
                outcome.unwrap_or(Err(PrefetchError::Unloaded))
            }
            Role::Fetch => {
                let result = self.shared.fetch(page_id, &cancel).await;
                self.shared.finish(page_id, &cancel, &result);
                result
            }
        }
    }

    /// Cached image for `page_id`, if any.
    pub fn get(&self, page_id: &str) -> Option<ImageBytes> {
        match self.shared.lock().slots.get(page_id) {
            Some(Slot::Ready(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Cancel all fetches and drop every entry.
    pub fn unload(&self) {
        let generation = {
            let mut state = self.shared.lock();
            let generation = state.generation.take();
            if let Some(generation) = &generation {
                generation.cancel.cancel();
            }
            state.slots.clear();
            state.queue.clear();
            generation
        };
        if let Some(generation) = generation {
            generation.tickets.close();
            for worker in generation.workers {
                worker.abort();
            }
            tracing::info!("prefetch cache unloaded");
        }
    }

    pub fn cached_len(&self) -> usize {
        self.shared
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn in_flight(&self) -> usize {
        self.shared
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::InFlight(_)))
            .count()
    }

    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Network fetches started since creation.
    pub fn fetch_count(&self) -> usize {
        self.shared.fetches.load(Ordering::Relaxed)
    }
}

impl Drop for PrefetchCache {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::MockClient;
    use std::time::Duration;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}/p{i}")).collect()
    }

    fn cache(mock: &Arc<MockClient>, fan_out: usize) -> PrefetchCache {
        PrefetchCache::new(
            mock.clone(),
            PrefetchConfig {
                fan_out,
                policy: FetchPolicy {
                    timeout: Duration::from_secs(5),
                    max_retries: 0,
                    backoff: Duration::from_millis(10),
                },
            },
        )
    }

    async fn settle(cache: &PrefetchCache) {
        for _ in 0..400 {
            if cache.in_flight() == 0 && cache.queued() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("prefetch never settled");
    }

    #[test]
    fn order_is_before_reversed_then_rest() {
        let pages = ids("a", 7);
        let order = prefetch_order(&pages, 3);
        assert_eq!(order, ["a/p2", "a/p1", "a/p0", "a/p3", "a/p4", "a/p5", "a/p6"]);
    }

    #[test]
    fn order_is_a_permutation_at_every_index() {
        let pages = ids("a", 6);
        for i in 0..=pages.len() {
            let mut order = prefetch_order(&pages, i);
            assert_eq!(order.len(), pages.len());
            order.sort();
            let mut sorted = pages.clone();
            sorted.sort();
            assert_eq!(order, sorted);
        }
        assert!(prefetch_order(&[], 0).is_empty());
        assert_eq!(prefetch_order(&pages, 0), pages);
        // Past the end clamps.
        assert_eq!(prefetch_order(&pages, 99)[0], "a/p5");
    }

    #[tokio::test]
    async fn preload_is_idempotent() {
        let mock = Arc::new(MockClient::new().with_delay(Duration::from_millis(10)));
        let cache = cache(&mock, 2);
        let order = ids("a", 3);
        cache.preload(&order);
        cache.preload(&order);
        settle(&cache).await;
        cache.preload(&order);
        settle(&cache).await;

        for id in &order {
            assert_eq!(mock.page_calls(id), 1, "{id}");
        }
        assert_eq!(cache.cached_len(), 3);
        assert_eq!(cache.fetch_count(), 3);
    }

    #[tokio::test]
    async fn fan_out_bounds_concurrency() {
        let mock = Arc::new(MockClient::new().with_delay(Duration::from_millis(10)));
        let cache = cache(&mock, 2);
        cache.preload(&ids("a", 8));
        let direct = cache.fetch_now("b/p0");
        assert!(direct.await.is_ok());
        settle(&cache).await;
        assert!(mock.peak_in_flight() <= 2, "peak {}", mock.peak_in_flight());
        assert_eq!(cache.cached_len(), 9);
    }

    #[tokio::test]
    async fn fetch_now_joins_in_flight_fetch() {
        let mock = Arc::new(MockClient::new().with_delay(Duration::from_millis(20)));
        let cache = cache(&mock, 1);
        cache.preload(&ids("a", 1));
        // Give the worker time to claim the id.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.in_flight(), 1);

        let image = cache.fetch_now("a/p0").await.unwrap();
        assert_eq!(&*image, b"a/p0");
        assert_eq!(mock.page_calls("a/p0"), 1);

        // Served from cache now.
        assert_eq!(cache.fetch_now("a/p0").await.unwrap(), image);
        assert_eq!(mock.page_calls("a/p0"), 1);
    }

    #[tokio::test]
    async fn later_preload_reorders_queue() {
        let mock = Arc::new(MockClient::new().with_delay(Duration::from_millis(10)));
        let cache = cache(&mock, 1);
        cache.preload(&ids("a", 6));
        cache.preload(&prefetch_order(&ids("a", 6), 5));
        settle(&cache).await;
        assert_eq!(cache.cached_len(), 6);
        for id in ids("a", 6) {
            assert_eq!(mock.page_calls(&id), 1);
        }
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let mock = Arc::new(MockClient::new().failing_page("a/p1"));
        let cache = cache(&mock, 2);
        let err = cache.fetch_now("a/p1").await.unwrap_err();
        assert!(matches!(err, PrefetchError::Failed(_)));
        assert!(cache.get("a/p1").is_none());
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backoff_frees_the_fan_out_slot() {
        let mock = Arc::new(MockClient::new().flaky_page("a/p0", 1));
        let cache = PrefetchCache::new(
            mock.clone(),
            PrefetchConfig {
                fan_out: 1,
                policy: FetchPolicy {
                    timeout: Duration::from_secs(5),
                    max_retries: 1,
                    backoff: Duration::from_secs(10),
                },
            },
        );
        cache.preload(&ids("a", 1));
        while mock.page_calls("a/p0") == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // The prefetch of a/p0 is now sleeping before its retry.
        let start = tokio::time::Instant::now();
        let image = cache.fetch_now("b/p0").await.unwrap();
        assert_eq!(&*image, b"b/p0");
        assert!(start.elapsed() < Duration::from_secs(1), "{:?}", start.elapsed());
        assert_eq!(mock.page_calls("a/p0"), 1);
    }

    #[tokio::test]
    async fn unload_cancels_and_clears() {
        let mock = Arc::new(MockClient::new().with_delay(Duration::from_millis(50)));
        let cache = Arc::new(cache(&mock, 2));
        cache.preload(&ids("a", 4));
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.fetch_now("a/p3").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        cache.unload();
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.cached_len(), 0);
        assert_eq!(cache.queued(), 0);
        assert_eq!(waiter.await.unwrap(), Err(PrefetchError::Unloaded));

        // Late completions from the cancelled cycle are discarded.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.cached_len(), 0);

        // Reusable afterwards.
        cache.preload(&ids("b", 1));
        settle(&cache).await;
        assert!(cache.get("b/p0").is_some());
    }
}
