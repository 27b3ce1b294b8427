//! Application state owned by the [`Store`](crate::store::Store).

use std::collections::{HashMap, HashSet};

use crate::config_file::ServerConfig;
use crate::{ArchiveItem, ErrorCode, PageSet};

pub use crate::navigation::NavigationState;

/// Persisted server settings as last confirmed by the configuration store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingState {
    pub server: Option<ServerConfig>,
}

/// The single state value of a reading session. Views only ever see
/// snapshots of it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub archives: HashMap<String, ArchiveItem>,
    pub pages: HashMap<String, PageSet>,
    /// One entry per archive opened in this session.
    pub navigation: HashMap<String, NavigationState>,
    /// Page id most recently requested for display, per archive. Only this
    /// page may become visible; earlier requests still in flight are stale.
    pub requested_pages: HashMap<String, String>,
    /// Page id last loaded for display, per archive.
    pub visible_pages: HashMap<String, String>,
    /// Archives whose thumbnail bytes sit in the thumbnail cache.
    pub thumbnails: HashSet<String>,
    /// Archives whose "new" flag has already been cleared this session.
    pub new_flag_cleared: HashSet<String>,
    pub loading: bool,
    pub error_code: Option<ErrorCode>,
    pub settings: SettingState,
}

impl AppState {
    pub fn page_set(&self, archive_id: &str) -> Option<&PageSet> {
        self.pages.get(archive_id)
    }

    /// Number of pages of an archive, zero until extraction succeeds.
    pub fn page_count(&self, archive_id: &str) -> usize {
        self.pages.get(archive_id).map_or(0, PageSet::len)
    }

    pub fn navigation(&self, archive_id: &str) -> Option<&NavigationState> {
        self.navigation.get(archive_id)
    }
}
