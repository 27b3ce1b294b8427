//! Unidirectional state container.
//!
//! [`Store::dispatch`] is the only way to change [`AppState`]. Dispatched
//! actions are queued and drained by whichever caller currently holds the
//! drain flag, so the reducer never runs concurrently with itself even when
//! network completions dispatch from background tasks. Dispatching from a
//! listener or middleware is allowed; the action is processed right after
//! the current one.
//!
//! Per action: middleware chain (sees the pre-action state), then the pure
//! reducer, then every subscriber is called synchronously with the new
//! snapshot.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::action::Action;
use crate::reducer::reduce;
use crate::state::AppState;

/// A processing stage that performs side effects for an action.
pub trait Middleware: Send + Sync {
    /// Inspect `action` against the state it is about to be reduced with.
    ///
    /// Asynchronous work goes through [`Store::spawn`]; its completion
    /// reports back with [`Store::dispatch`].
    fn handle(&self, state: &AppState, action: &Action, store: &Store);
}

type Listener = Arc<dyn Fn(&AppState) + Send + Sync>;

/// Token returned by [`Store::subscribe`], consumed by [`Store::unsubscribe`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

struct StoreInner {
    state: Mutex<Arc<AppState>>,
    queue: Mutex<VecDeque<Action>>,
    draining: AtomicBool,
    middleware: Vec<Arc<dyn Middleware>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_subscription: AtomicU64,
    tasks: Mutex<JoinSet<()>>,
    cancel: CancellationToken,
}

/// Shared handle to the session's single state value.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("middleware", &self.inner.middleware.len())
            .field("listeners", &lock(&self.inner.listeners).len())
            .field("shut_down", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the drain flag even if a listener panics.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Store {
    /// Create a store with an ordered middleware chain.
    pub fn new(initial: AppState, middleware: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(Arc::new(initial)),
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                middleware,
                listeners: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(0),
                tasks: Mutex::new(JoinSet::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> Arc<AppState> {
        lock(&self.inner.state).clone()
    }

    /// Queue `action` and process the queue unless another caller already is.
    pub fn dispatch(&self, action: impl Into<Action>) {
        let action = action.into();
        if self.inner.cancel.is_cancelled() {
            tracing::debug!(?action, "store shut down, dropping action");
            return;
        }
        lock(&self.inner.queue).push_back(action);
        self.drain();
    }

    fn drain(&self) {
        loop {
            if self
                .inner
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // The active drainer will pick it up.
                return;
            }
            {
                let _guard = DrainGuard(&self.inner.draining);
                loop {
                    let next = lock(&self.inner.queue).pop_front();
                    match next {
                        Some(action) => self.process(action),
                        None => break,
                    }
                }
            }
            // An action pushed between the last pop and the flag release
            // would otherwise be stranded.
            if lock(&self.inner.queue).is_empty() {
                return;
            }
        }
    }

    fn process(&self, action: Action) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        tracing::trace!(?action, "dispatch");
        let current = self.state();
        for middleware in &self.inner.middleware {
            middleware.handle(&current, &action, self);
        }

        let next = Arc::new(reduce(&current, &action));
        *lock(&self.inner.state) = Arc::clone(&next);

        let listeners: Vec<Listener> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&next);
        }
    }

    /// Register a listener called after every reduced action.
    pub fn subscribe(&self, listener: impl Fn(&AppState) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        Subscription(id)
    }

    /// Detach a listener. Returns false if it was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != subscription.0);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    /// Run a side effect on the ambient tokio runtime. The task is aborted
    /// by [`shutdown`](Store::shutdown).
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime, side effect dropped");
            return;
        };
        let cancel = self.inner.cancel.clone();
        let mut tasks = lock(&self.inner.tasks);
        while tasks.try_join_next().is_some() {}
        tasks.spawn_on(
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = future => {}
                }
            },
            &runtime,
        );
    }

    /// Number of side-effect tasks that have not finished yet.
    pub fn pending_tasks(&self) -> usize {
        let mut tasks = lock(&self.inner.tasks);
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Cancel every outstanding side effect and detach all listeners.
    /// Later dispatches are dropped.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        lock(&self.inner.tasks).abort_all();
        lock(&self.inner.listeners).clear();
        lock(&self.inner.queue).clear();
        tracing::info!("store shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use crate::action::ArchiveAction;
    use std::time::Duration;

    /// Records the `loading` flag each action was handled with.
    struct Recorder {
        seen: Mutex<Vec<(Action, bool)>>,
    }

    impl Middleware for Recorder {
        fn handle(&self, state: &AppState, action: &Action, _store: &Store) {
            self.seen.lock().unwrap().push((action.clone(), state.loading));
        }
    }

    /// Resolves every extraction asynchronously with two pages.
    struct FakeExtract;

    impl Middleware for FakeExtract {
        fn handle(&self, _state: &AppState, action: &Action, store: &Store) {
            if let Action::Archive(ArchiveAction::Extract(id)) = action {
                let id = id.clone();
                let store2 = store.clone();
                store.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    store2.dispatch(ArchiveAction::PagesLoaded {
                        id,
                        pages: vec!["p0".into(), "p1".into()],
                    });
                });
            }
        }
    }

    async fn wait_until(store: &Store, pred: impl Fn(&AppState) -> bool) {
        for _ in 0..200 {
            if pred(&store.state()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn middleware_sees_pre_action_state() {
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let store = Store::new(AppState::default(), vec![recorder.clone()]);
        store.dispatch(ArchiveAction::Extract("a".into()));
        store.dispatch(ArchiveAction::Error(ErrorCode::ExtractError));

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(!seen[0].1, "Extract handled before loading was set");
        assert!(seen[1].1, "Error handled while loading");
        assert!(!store.state().loading);
    }

    #[test]
    fn listeners_notified_synchronously() {
        let store = Store::new(AppState::default(), vec![]);
        let calls = Arc::new(AtomicU64::new(0));
        let calls2 = calls.clone();
        store.subscribe(move |state| {
            assert!(state.loading);
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        store.dispatch(ArchiveAction::FetchArchives);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reentrant_dispatch_is_queued_not_nested() {
        let store = Store::new(AppState::default(), vec![]);
        let order = Arc::new(Mutex::new(Vec::new()));
        let order2 = order.clone();
        let store2 = store.clone();
        store.subscribe(move |state| {
            order2.lock().unwrap().push(state.error_code);
            if state.error_code.is_some() {
                store2.dispatch(ArchiveAction::Reset);
            }
        });
        store.dispatch(ArchiveAction::Error(ErrorCode::FetchPageError));
        assert_eq!(
            *order.lock().unwrap(),
            vec![Some(ErrorCode::FetchPageError), None]
        );
        assert!(store.state().error_code.is_none());
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let store = Store::new(AppState::default(), vec![]);
        let calls = Arc::new(AtomicU64::new(0));
        let calls2 = calls.clone();
        let sub = store.subscribe(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        store.dispatch(ArchiveAction::FetchArchives);
        assert!(store.unsubscribe(sub));
        store.dispatch(ArchiveAction::Reset);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn concurrent_dispatch_applies_every_action() {
        let store = Store::new(AppState::default(), vec![]);
        std::thread::scope(|s| {
            for t in 0..8 {
                let store = store.clone();
                s.spawn(move || {
                    for i in 0..50 {
                        store.dispatch(ArchiveAction::ThumbnailLoaded(format!("{t}-{i}")));
                    }
                });
            }
        });
        assert_eq!(store.state().thumbnails.len(), 400);
    }

    #[tokio::test]
    async fn spawned_effect_dispatches_result() {
        let store = Store::new(AppState::default(), vec![Arc::new(FakeExtract)]);
        store.dispatch(ArchiveAction::Extract("a".into()));
        assert!(store.state().loading);
        wait_until(&store, |s| s.page_count("a") == 2).await;
        assert!(!store.state().loading);
    }

    #[tokio::test]
    async fn shutdown_cancels_effects_and_drops_results() {
        let store = Store::new(AppState::default(), vec![Arc::new(FakeExtract)]);
        store.subscribe(|_| {});
        store.dispatch(ArchiveAction::Extract("a".into()));
        store.shutdown();
        assert_eq!(store.listener_count(), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.pending_tasks(), 0);
        assert_eq!(store.state().page_count("a"), 0);

        store.dispatch(ArchiveAction::FetchArchives);
        assert!(store.state().loading, "state frozen at shutdown");
    }
}
