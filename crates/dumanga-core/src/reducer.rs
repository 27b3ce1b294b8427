//! The pure reducer: `reduce(state, action) -> state`.
//!
//! Total over every action variant and free of side effects, so replaying
//! the same `(state, action)` pair always produces the same state.

use crate::action::{Action, ArchiveAction, NavigationAction, SettingAction};
use crate::config_file::ServerConfig;
use crate::navigation::{self, NavigationState};
use crate::state::AppState;
use crate::{ErrorCode, PageSet};

pub fn reduce(state: &AppState, action: &Action) -> AppState {
    let mut next = state.clone();
    match action {
        Action::Archive(action) => reduce_archive(&mut next, action),
        Action::Navigation(action) => reduce_navigation(&mut next, action),
        Action::Setting(action) => reduce_setting(&mut next, action),
    }
    next
}

fn reduce_archive(state: &mut AppState, action: &ArchiveAction) {
    match action {
        ArchiveAction::FetchArchives | ArchiveAction::Extract(_) => {
            state.loading = true;
        }
        ArchiveAction::ArchivesLoaded(items) => {
            for item in items {
                state.archives.insert(item.id.clone(), item.clone());
            }
            state.loading = false;
        }
        ArchiveAction::ThumbnailLoaded(id) => {
            state.thumbnails.insert(id.clone());
        }
        ArchiveAction::PagesLoaded { id, pages } => {
            // A page set never changes once extracted.
            state.pages.entry(id.clone()).or_insert_with(|| PageSet {
                archive_id: id.clone(),
                pages: pages.clone(),
            });
            state.loading = false;
        }
        ArchiveAction::FetchPage { id, page_id } => {
            state.requested_pages.insert(id.clone(), page_id.clone());
        }
        ArchiveAction::PageReady { id, page_id } => {
            if state.requested_pages.get(id) == Some(page_id) {
                state.visible_pages.insert(id.clone(), page_id.clone());
            }
        }
        ArchiveAction::ClearNewFlag(id) => {
            state.new_flag_cleared.insert(id.clone());
            if let Some(item) = state.archives.get_mut(id) {
                item.is_new = false;
            }
        }
        ArchiveAction::Error(code) => {
            state.error_code = Some(*code);
            state.loading = false;
        }
        ArchiveAction::Reset => {
            state.error_code = None;
            state.loading = false;
            state.navigation.clear();
            state.requested_pages.clear();
            state.visible_pages.clear();
        }
        ArchiveAction::FetchThumbnail(_) => {}
    }
}

fn reduce_navigation(state: &mut AppState, action: &NavigationAction) {
    match action {
        NavigationAction::Open { id, start_page } => {
            state
                .navigation
                .entry(id.clone())
                .or_insert_with(|| NavigationState::at(*start_page));
        }
        NavigationAction::Step {
            id,
            action,
            context,
        } => {
            let page_count = state.page_count(id);
            if let Some(nav) = state.navigation.get_mut(id) {
                *nav = navigation::step(nav, page_count, *action, context).state;
            }
        }
        NavigationAction::Scrub { id, position } => {
            let page_count = state.page_count(id);
            if let Some(nav) = state.navigation.get_mut(id) {
                *nav = navigation::scrub(nav, page_count, *position);
            }
        }
        NavigationAction::ToggleControls(id) => {
            if let Some(nav) = state.navigation.get_mut(id) {
                nav.controls_hidden = !nav.controls_hidden;
            }
        }
        NavigationAction::Close(id) => {
            state.navigation.remove(id);
            state.requested_pages.remove(id);
            state.visible_pages.remove(id);
        }
    }
}

fn reduce_setting(state: &mut AppState, action: &SettingAction) {
    match action {
        SettingAction::Saved { url, api_key } => {
            state.settings.server = Some(ServerConfig {
                url: url.clone(),
                api_key: api_key.clone(),
            });
        }
        SettingAction::SaveFailed => {
            state.error_code = Some(ErrorCode::SaveSettingsError);
        }
        SettingAction::Save { .. } => {}
    }
}
