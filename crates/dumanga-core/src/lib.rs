use std::sync::Arc;

use thiserror::Error;

pub mod action;
pub mod config_file;
pub mod logging;
pub mod middleware;
pub mod navigation;
pub mod prefetch;
pub mod reducer;
pub mod remote;
pub mod retry;
pub mod router;
pub mod session;
pub mod state;
pub mod store;
pub mod thumbnails;

// Re-export for convenience
pub use action::{Action, ArchiveAction, NavigationAction, SettingAction};
pub use config_file::{ConfigError, ConfigStore, ReaderSettings, ServerConfig};
pub use navigation::{NavContext, PageAction, PageHalf, RoundingPolicy, SplitPhase};
pub use prefetch::{PrefetchCache, PrefetchConfig, PrefetchError, prefetch_order};
pub use reducer::reduce;
pub use remote::{ArchiveClient, ClientError};
pub use retry::FetchPolicy;
pub use router::{ActionRouter, ControlBindings, Gesture, PageControl, SwipeDirection, TapZone};
pub use session::{Orientation, ReadingSession, recover_on_error};
pub use state::{AppState, NavigationState};
pub use store::{Middleware, Store, Subscription};
pub use thumbnails::ThumbnailCache;

/// Image bytes shared between caches and views without copying.
pub type ImageBytes = Arc<[u8]>;

/// An archive as listed by the server. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveItem {
    pub id: String,
    pub name: String,
    pub tags: String,
    pub is_new: bool,
    pub page_count: usize,
    /// Server-side reading progress (1-based page, 0 when unread).
    pub progress: usize,
}

impl ArchiveItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, tags: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tags: tags.into(),
            is_new: false,
            page_count: 0,
            progress: 0,
        }
    }
}

/// The ordered page identifiers of one extracted archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSet {
    pub archive_id: String,
    pub pages: Vec<String>,
}

impl PageSet {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.pages.get(index).map(String::as_str)
    }
}

/// Failures surfaced to the user through [`AppState::error_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorCode {
    #[error("archive extraction failed")]
    ExtractError,
    #[error("page image could not be loaded")]
    FetchPageError,
    #[error("archive list could not be loaded")]
    ListArchivesError,
    #[error("settings could not be saved")]
    SaveSettingsError,
}
