//! Side effects for the store: remote calls, prefetch scheduling and
//! settings persistence. Each middleware reacts to request actions and
//! reports back with result actions.

use std::sync::Arc;

use crate::action::{Action, ArchiveAction, NavigationAction, SettingAction};
use crate::config_file::{ConfigStore, ServerConfig};
use crate::navigation;
use crate::prefetch::{PrefetchCache, PrefetchError, prefetch_order};
use crate::remote::ArchiveClient;
use crate::retry::{self, FetchPolicy};
use crate::state::AppState;
use crate::store::{Middleware, Store};
use crate::thumbnails::ThumbnailCache;
use crate::ErrorCode;

/// Archive listing, thumbnails, extraction, page loads and the new flag.
pub struct ArchiveMiddleware {
    client: Arc<dyn ArchiveClient>,
    images: Arc<PrefetchCache>,
    thumbnails: ThumbnailCache,
    policy: FetchPolicy,
    extract_policy: FetchPolicy,
}

impl ArchiveMiddleware {
    pub fn new(
        client: Arc<dyn ArchiveClient>,
        images: Arc<PrefetchCache>,
        thumbnails: ThumbnailCache,
        policy: FetchPolicy,
        extract_policy: FetchPolicy,
    ) -> Self {
        Self {
            client,
            images,
            thumbnails,
            policy,
            extract_policy,
        }
    }

    fn fetch_archives(&self, store: &Store) {
        let client = Arc::clone(&self.client);
        let policy = self.policy;
        let store2 = store.clone();
        store.spawn(async move {
            match retry::with_policy(&policy, "list", || client.list_archives()).await {
                Ok(items) => {
                    tracing::info!(count = items.len(), "archives listed");
                    store2.dispatch(ArchiveAction::ArchivesLoaded(items));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "archive list failed");
                    store2.dispatch(ArchiveAction::Error(ErrorCode::ListArchivesError));
                }
            }
        });
    }

    fn fetch_thumbnail(&self, id: &str, store: &Store) {
        if self.thumbnails.contains(id) {
            tracing::debug!(id, "skipping: thumbnail cached");
            return;
        }
        let client = Arc::clone(&self.client);
        let thumbnails = self.thumbnails.clone();
        let policy = self.policy;
        let id = id.to_string();
        let store2 = store.clone();
        store.spawn(async move {
            match retry::with_policy(&policy, "thumbnail", || client.fetch_thumbnail(&id)).await {
                Ok(image) => {
                    thumbnails.insert(id.clone(), image);
                    store2.dispatch(ArchiveAction::ThumbnailLoaded(id));
                }
                // Placeholder stays.
                Err(e) => tracing::debug!(id = %id, error = %e, "thumbnail failed"),
            }
        });
    }

    fn extract(&self, state: &AppState, id: &str, store: &Store) {
        if let Some(set) = state.page_set(id) {
            tracing::debug!(id, "skipping: already extracted");
            store.dispatch(ArchiveAction::PagesLoaded {
                id: id.to_string(),
                pages: set.pages.clone(),
            });
            return;
        }
        let client = Arc::clone(&self.client);
        let policy = self.extract_policy;
        let id = id.to_string();
        let store2 = store.clone();
        store.spawn(async move {
            match retry::with_policy(&policy, "extract", || client.extract_archive(&id)).await {
                Ok(pages) => {
                    tracing::info!(id = %id, pages = pages.len(), "archive extracted");
                    store2.dispatch(ArchiveAction::PagesLoaded { id, pages });
                }
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "extract failed");
                    store2.dispatch(ArchiveAction::Error(ErrorCode::ExtractError));
                }
            }
        });
    }

    fn fetch_page(&self, id: &str, page_id: &str, store: &Store) {
        let images = Arc::clone(&self.images);
        let id = id.to_string();
        let page_id = page_id.to_string();
        let store2 = store.clone();
        store.spawn(async move {
            match images.fetch_now(&page_id).await {
                Ok(_) => store2.dispatch(ArchiveAction::PageReady { id, page_id }),
                Err(PrefetchError::Unloaded) => {
                    tracing::debug!(page_id = %page_id, "page load cancelled");
                }
                Err(e) => {
                    tracing::warn!(id = %id, page_id = %page_id, error = %e, "page load failed");
                    store2.dispatch(ArchiveAction::Error(ErrorCode::FetchPageError));
                }
            }
        });
    }

    fn clear_new_flag(&self, state: &AppState, id: &str, store: &Store) {
        if state.new_flag_cleared.contains(id) {
            tracing::debug!(id, "skipping: new flag already cleared");
            return;
        }
        let client = Arc::clone(&self.client);
        let policy = self.policy.single_attempt();
        let id = id.to_string();
        store.spawn(async move {
            if let Err(e) =
                retry::with_policy(&policy, "clear_new_flag", || client.clear_new_flag(&id)).await
            {
                tracing::debug!(id = %id, error = %e, "clearing new flag failed");
            }
        });
    }
}

impl Middleware for ArchiveMiddleware {
    fn handle(&self, state: &AppState, action: &Action, store: &Store) {
        let Action::Archive(action) = action else {
            return;
        };
        match action {
            ArchiveAction::FetchArchives => self.fetch_archives(store),
            ArchiveAction::FetchThumbnail(id) => self.fetch_thumbnail(id, store),
            ArchiveAction::Extract(id) => self.extract(state, id, store),
            ArchiveAction::FetchPage { id, page_id } => self.fetch_page(id, page_id, store),
            ArchiveAction::ClearNewFlag(id) => self.clear_new_flag(state, id, store),
            _ => {}
        }
    }
}

/// Turns navigation steps into page loads and prefetch scheduling.
pub struct NavigationMiddleware {
    images: Arc<PrefetchCache>,
}

impl NavigationMiddleware {
    pub fn new(images: Arc<PrefetchCache>) -> Self {
        Self { images }
    }
}

impl Middleware for NavigationMiddleware {
    fn handle(&self, state: &AppState, action: &Action, store: &Store) {
        let Action::Navigation(NavigationAction::Step {
            id,
            action,
            context,
        }) = action
        else {
            return;
        };
        let (Some(nav), Some(set)) = (state.navigation(id), state.page_set(id)) else {
            return;
        };
        // Same transition the reducer is about to apply.
        let transition = navigation::step(nav, set.len(), *action, context);
        let Some(index) = transition.load else {
            return;
        };
        let Some(page_id) = set.get(index) else {
            return;
        };
        tracing::debug!(id = %id, index, page_id, "page load");
        store.dispatch(ArchiveAction::FetchPage {
            id: id.clone(),
            page_id: page_id.to_string(),
        });
        self.images.preload(&prefetch_order(&set.pages, index));

        if transition.reaches_last_page(set.len()) && !state.new_flag_cleared.contains(id) {
            store.dispatch(ArchiveAction::ClearNewFlag(id.clone()));
        }
    }
}

/// Persists server settings.
pub struct SettingMiddleware {
    config: Arc<dyn ConfigStore>,
}

impl SettingMiddleware {
    pub fn new(config: Arc<dyn ConfigStore>) -> Self {
        Self { config }
    }
}

impl Middleware for SettingMiddleware {
    fn handle(&self, _state: &AppState, action: &Action, store: &Store) {
        let Action::Setting(SettingAction::Save { url, api_key }) = action else {
            return;
        };
        let config = Arc::clone(&self.config);
        let server = ServerConfig {
            url: url.clone(),
            api_key: api_key.clone(),
        };
        let store2 = store.clone();
        store.spawn(async move {
            let saved = server.clone();
            let result = tokio::task::spawn_blocking(move || config.save_server(&saved)).await;
            match result {
                Ok(Ok(())) => store2.dispatch(SettingAction::Saved {
                    url: server.url,
                    api_key: server.api_key,
                }),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "saving settings failed");
                    store2.dispatch(SettingAction::SaveFailed);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "settings task failed");
                    store2.dispatch(SettingAction::SaveFailed);
                }
            }
        });
    }
}

/// The standard chain: settings, navigation, then archive effects.
pub fn standard_chain(
    client: Arc<dyn ArchiveClient>,
    images: Arc<PrefetchCache>,
    thumbnails: ThumbnailCache,
    config: Arc<dyn ConfigStore>,
    policy: FetchPolicy,
    extract_policy: FetchPolicy,
) -> Vec<Arc<dyn Middleware>> {
    vec![
        Arc::new(SettingMiddleware::new(config)),
        Arc::new(NavigationMiddleware::new(Arc::clone(&images))),
        Arc::new(ArchiveMiddleware::new(
            client,
            images,
            thumbnails,
            policy,
            extract_policy,
        )),
    ]
}
