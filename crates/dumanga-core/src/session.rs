//! A reading session over one archive.
//!
//! The session is the UI-facing handle: it translates reader input into
//! navigation actions, reads the device orientation at the moment of each
//! action, and owns the lifetime of the prefetch cache.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::action::{ArchiveAction, NavigationAction};
use crate::config_file::ReaderSettings;
use crate::navigation::{NavContext, PageAction, PageHalf};
use crate::prefetch::PrefetchCache;
use crate::router::{ActionRouter, Gesture, PageControl};
use crate::state::{AppState, NavigationState};
use crate::store::{Store, Subscription};
use crate::{ArchiveItem, ErrorCode, ImageBytes};

/// Device orientation, read each time a navigation action is built.
pub trait Orientation: Send + Sync {
    fn is_portrait(&self) -> bool;
}

impl<F> Orientation for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_portrait(&self) -> bool {
        self()
    }
}

pub struct ReadingSession {
    store: Store,
    images: Arc<PrefetchCache>,
    archive_id: String,
    settings: ReaderSettings,
    router: ActionRouter,
    orientation: Arc<dyn Orientation>,
    subscription: Mutex<Option<Subscription>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ReadingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadingSession")
            .field("archive_id", &self.archive_id)
            .field("settings", &self.settings)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl ReadingSession {
    /// Open `archive_id` at `start_page`. Extraction is requested when the
    /// page list is not known yet; the first page loads as soon as it is.
    ///
    /// The session outlives error recovery: after a `Reset` it reopens at
    /// the last position, and a reader action retries a failed extraction.
    pub fn open(
        store: Store,
        images: Arc<PrefetchCache>,
        archive_id: impl Into<String>,
        start_page: usize,
        settings: ReaderSettings,
        orientation: Arc<dyn Orientation>,
    ) -> Self {
        let archive_id = archive_id.into();
        tracing::info!(id = %archive_id, start_page, "opening reading session");

        let started = AtomicBool::new(false);
        let last_page = AtomicUsize::new(start_page);
        let follow = {
            let store2 = store.clone();
            let id = archive_id.clone();
            let orientation = Arc::clone(&orientation);
            move |state: &AppState| {
                let Some(nav) = state.navigation(&id) else {
                    // Reset dropped the position: reopen where reading
                    // stopped. Nothing loads until the reader acts again.
                    if state.error_code.is_none() {
                        tracing::debug!(id = %id, "reopening after reset");
                        store2.dispatch(NavigationAction::Open {
                            id: id.clone(),
                            start_page: last_page.load(Ordering::Acquire),
                        });
                    }
                    return;
                };
                last_page.store(nav.page_index(settings.rounding), Ordering::Release);
                if started.load(Ordering::Acquire) {
                    return;
                }
                let Some(set) = state.page_set(&id) else {
                    return;
                };
                if started.swap(true, Ordering::AcqRel) {
                    return;
                }
                let last = set.len().saturating_sub(1) as f64;
                store2.dispatch(NavigationAction::Step {
                    id: id.clone(),
                    action: PageAction::Jump(nav.current_index.min(last)),
                    context: settings.nav_context(orientation.is_portrait()),
                });
            }
        };
        let subscription = store.subscribe(follow);

        store.dispatch(NavigationAction::Open {
            id: archive_id.clone(),
            start_page,
        });
        if store.state().page_set(&archive_id).is_none() {
            store.dispatch(ArchiveAction::Extract(archive_id.clone()));
        }

        Self {
            store,
            images,
            archive_id,
            settings,
            router: ActionRouter::new(settings.bindings),
            orientation,
            subscription: Mutex::new(Some(subscription)),
            closed: AtomicBool::new(false),
        }
    }

    /// Open `item` where the server says reading stopped.
    pub fn resume(
        store: Store,
        images: Arc<PrefetchCache>,
        item: &ArchiveItem,
        settings: ReaderSettings,
        orientation: Arc<dyn Orientation>,
    ) -> Self {
        Self::open(store, images, item.id.clone(), item.progress, settings, orientation)
    }

    pub fn archive_id(&self) -> &str {
        &self.archive_id
    }

    fn context(&self) -> NavContext {
        self.settings.nav_context(self.orientation.is_portrait())
    }

    fn step(&self, action: PageAction) {
        if self.is_closed() {
            return;
        }
        let state = self.store.state();
        if state.page_set(&self.archive_id).is_none() {
            if !state.loading {
                tracing::debug!(id = %self.archive_id, "retrying extraction");
                self.store
                    .dispatch(ArchiveAction::Extract(self.archive_id.clone()));
            }
            return;
        }
        self.store.dispatch(NavigationAction::Step {
            id: self.archive_id.clone(),
            action,
            context: self.context(),
        });
    }

    pub fn next(&self) {
        self.step(PageAction::Next);
    }

    pub fn previous(&self) {
        self.step(PageAction::Previous);
    }

    pub fn jump(&self, page: f64) {
        self.step(PageAction::Jump(page));
    }

    /// Slider drag: moves the position without loading anything.
    pub fn scrub(&self, position: f64) {
        if self.is_closed() {
            return;
        }
        self.store.dispatch(NavigationAction::Scrub {
            id: self.archive_id.clone(),
            position,
        });
    }

    /// Slider released: load the page under the scrubbed position.
    pub fn release_scrub(&self) {
        if let Some(nav) = self.navigation() {
            self.jump(nav.page_index(self.settings.rounding) as f64);
        }
    }

    pub fn toggle_controls(&self) {
        if self.is_closed() {
            return;
        }
        self.store
            .dispatch(NavigationAction::ToggleControls(self.archive_id.clone()));
    }

    pub fn perform(&self, control: PageControl) {
        match control {
            PageControl::Next => self.next(),
            PageControl::Previous => self.previous(),
            PageControl::Navigation => self.toggle_controls(),
        }
    }

    pub fn handle_gesture(&self, gesture: Gesture) {
        self.perform(self.router.route(gesture));
    }

    pub fn navigation(&self) -> Option<NavigationState> {
        self.store.state().navigation(&self.archive_id).copied()
    }

    /// The half of the physical page on screen, or `None` when not split
    /// under the current orientation.
    pub fn visible_half(&self) -> Option<PageHalf> {
        if !self.context().splitting() {
            return None;
        }
        self.navigation()?.visible_half(self.settings.priority_left)
    }

    /// Id of the page most recently loaded for display.
    pub fn visible_page(&self) -> Option<String> {
        self.store.state().visible_pages.get(&self.archive_id).cloned()
    }

    pub fn visible_image(&self) -> Option<ImageBytes> {
        self.images.get(&self.visible_page()?)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Detach from the store and unload the prefetch cache. Only the first
    /// call has any effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            self.store.unsubscribe(subscription);
        }
        self.store
            .dispatch(NavigationAction::Close(self.archive_id.clone()));
        self.images.unload();
        tracing::info!(id = %self.archive_id, "reading session closed");
    }
}

impl Drop for ReadingSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Report every error to `notice`, then dispatch `Reset`.
pub fn recover_on_error(
    store: &Store,
    notice: impl Fn(ErrorCode) + Send + Sync + 'static,
) -> Subscription {
    let store2 = store.clone();
    store.subscribe(move |state| {
        if let Some(code) = state.error_code {
            tracing::warn!(error = %code, "recovering");
            notice(code);
            store2.dispatch(ArchiveAction::Reset);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageSet;
    use crate::navigation::SplitPhase;
    use crate::prefetch::PrefetchConfig;
    use crate::remote::mock::MockClient;

    fn session_without_effects(pages: usize, settings: ReaderSettings, portrait: bool) -> ReadingSession {
        let mut state = AppState::default();
        state.pages.insert(
            "a".into(),
            PageSet {
                archive_id: "a".into(),
                pages: (0..pages).map(|i| format!("a/p{i}")).collect(),
            },
        );
        let store = Store::new(state, vec![]);
        let images = Arc::new(PrefetchCache::new(
            Arc::new(MockClient::new()),
            PrefetchConfig::default(),
        ));
        ReadingSession::open(store, images, "a", 0, settings, Arc::new(move || portrait))
    }

    #[test]
    fn known_pages_load_start_page_without_extract() {
        let session = session_without_effects(4, ReaderSettings::default(), true);
        let nav = session.navigation().unwrap();
        assert_eq!(nav.current_index, 0.0);
        assert_eq!(nav.split_phase, SplitPhase::Off);
        assert!(!session.store.state().loading);
    }

    #[test]
    fn gestures_follow_bindings() {
        let session = session_without_effects(4, ReaderSettings::default(), true);
        session.handle_gesture(Gesture::Tap(crate::TapZone::Left));
        assert_eq!(session.navigation().unwrap().current_index, 1.0);
        session.handle_gesture(Gesture::Tap(crate::TapZone::Right));
        assert_eq!(session.navigation().unwrap().current_index, 0.0);
        session.handle_gesture(Gesture::Tap(crate::TapZone::Middle));
        let nav = session.navigation().unwrap();
        assert!(!nav.controls_hidden);
        assert_eq!(nav.current_index, 0.0);
    }

    #[test]
    fn split_halves_follow_priority() {
        let settings = ReaderSettings {
            split_page: true,
            ..ReaderSettings::default()
        };
        let session = session_without_effects(3, settings, true);
        assert_eq!(session.visible_half(), Some(PageHalf::Right));
        session.next();
        assert_eq!(session.visible_half(), Some(PageHalf::Left));
        session.next();
        assert_eq!(session.navigation().unwrap().current_index, 1.0);
        assert_eq!(session.visible_half(), Some(PageHalf::Right));

        // Landscape ignores the split setting.
        let landscape = session_without_effects(3, settings, false);
        assert_eq!(landscape.visible_half(), None);
    }

    #[test]
    fn rotating_to_landscape_hides_the_half_at_once() {
        let mut state = AppState::default();
        state.pages.insert(
            "a".into(),
            PageSet {
                archive_id: "a".into(),
                pages: vec!["a/p0".into(), "a/p1".into()],
            },
        );
        let upright = Arc::new(AtomicBool::new(true));
        let flag = upright.clone();
        let settings = ReaderSettings {
            split_page: true,
            ..ReaderSettings::default()
        };
        let session = ReadingSession::open(
            Store::new(state, vec![]),
            Arc::new(PrefetchCache::new(
                Arc::new(MockClient::new()),
                PrefetchConfig::default(),
            )),
            "a",
            0,
            settings,
            Arc::new(move || flag.load(Ordering::SeqCst)),
        );
        assert_eq!(session.visible_half(), Some(PageHalf::Right));

        upright.store(false, Ordering::SeqCst);
        assert_eq!(session.navigation().unwrap().split_phase, SplitPhase::First);
        assert_eq!(session.visible_half(), None);

        upright.store(true, Ordering::SeqCst);
        assert_eq!(session.visible_half(), Some(PageHalf::Right));
    }

    #[test]
    fn scrub_then_release_jumps() {
        let session = session_without_effects(10, ReaderSettings::default(), true);
        session.scrub(6.4);
        assert_eq!(session.navigation().unwrap().current_index, 6.4);
        session.release_scrub();
        assert_eq!(session.navigation().unwrap().current_index, 6.0);
    }

    #[test]
    fn close_is_idempotent() {
        let session = session_without_effects(3, ReaderSettings::default(), true);
        let store = session.store.clone();
        assert_eq!(store.listener_count(), 1);
        session.close();
        session.close();
        assert!(session.is_closed());
        assert_eq!(store.listener_count(), 0);
        assert!(store.state().navigation("a").is_none());
        session.next();
        assert!(store.state().navigation("a").is_none());
    }

    #[test]
    fn start_page_past_end_clamps_to_last() {
        let mut state = AppState::default();
        state.pages.insert(
            "a".into(),
            PageSet {
                archive_id: "a".into(),
                pages: vec!["a/p0".into(), "a/p1".into()],
            },
        );
        let store = Store::new(state, vec![]);
        let images = Arc::new(PrefetchCache::new(
            Arc::new(MockClient::new()),
            PrefetchConfig::default(),
        ));
        let mut item = ArchiveItem::new("a", "Vol 1", "");
        item.progress = 9;
        let session = ReadingSession::resume(
            store,
            images,
            &item,
            ReaderSettings::default(),
            Arc::new(|| true),
        );
        assert_eq!(session.navigation().unwrap().current_index, 1.0);
    }

    #[test]
    fn reset_reopens_at_last_position() {
        let session = session_without_effects(5, ReaderSettings::default(), true);
        session.jump(3.0);
        session.store.dispatch(ArchiveAction::Error(ErrorCode::FetchPageError));
        session.store.dispatch(ArchiveAction::Reset);

        let nav = session.navigation().unwrap();
        assert_eq!(nav.current_index, 3.0);
        assert!(session.store.state().error_code.is_none());
        session.next();
        assert_eq!(session.navigation().unwrap().current_index, 4.0);
    }

    #[test]
    fn recover_reports_and_resets() {
        let store = Store::new(AppState::default(), vec![]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        recover_on_error(&store, move |code| seen2.lock().unwrap().push(code));
        store.dispatch(ArchiveAction::Error(ErrorCode::FetchPageError));
        assert_eq!(*seen.lock().unwrap(), vec![ErrorCode::FetchPageError]);
        assert!(store.state().error_code.is_none());
    }
}
