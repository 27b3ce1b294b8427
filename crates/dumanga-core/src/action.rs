//! Actions: the only way to change [`AppState`](crate::state::AppState).
//!
//! Request actions come from input; result actions are dispatched by
//! middleware when a side effect completes. Each is consumed exactly once
//! by the reducer.

use crate::navigation::{NavContext, PageAction};
use crate::{ArchiveItem, ErrorCode};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Archive(ArchiveAction),
    Navigation(NavigationAction),
    Setting(SettingAction),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveAction {
    FetchArchives,
    ArchivesLoaded(Vec<ArchiveItem>),
    FetchThumbnail(String),
    ThumbnailLoaded(String),
    Extract(String),
    PagesLoaded { id: String, pages: Vec<String> },
    FetchPage { id: String, page_id: String },
    PageReady { id: String, page_id: String },
    /// Fire-and-forget; failures are never surfaced.
    ClearNewFlag(String),
    Error(ErrorCode),
    /// Clear the error and all in-progress navigation.
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavigationAction {
    Open {
        id: String,
        start_page: usize,
    },
    Step {
        id: String,
        action: PageAction,
        context: NavContext,
    },
    Scrub {
        id: String,
        position: f64,
    },
    ToggleControls(String),
    Close(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingAction {
    Save { url: String, api_key: String },
    Saved { url: String, api_key: String },
    SaveFailed,
}

impl From<ArchiveAction> for Action {
    fn from(action: ArchiveAction) -> Self {
        Action::Archive(action)
    }
}

impl From<NavigationAction> for Action {
    fn from(action: NavigationAction) -> Self {
        Action::Navigation(action)
    }
}

impl From<SettingAction> for Action {
    fn from(action: SettingAction) -> Self {
        Action::Setting(action)
    }
}
