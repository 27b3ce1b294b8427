use dumanga_lanraragi::{ArchiveEntry, LanraragiClient};

use super::{ArchiveClient, ClientFuture};
use crate::config_file::ServerConfig;
use crate::{ArchiveItem, ImageBytes};

impl From<ArchiveEntry> for ArchiveItem {
    fn from(entry: ArchiveEntry) -> Self {
        ArchiveItem {
            id: entry.arcid,
            name: entry.title,
            tags: entry.tags,
            is_new: entry.isnew,
            page_count: entry.pagecount,
            progress: entry.progress,
        }
    }
}

/// Build a client from the server settings injected at session start.
pub fn client_for(server: &ServerConfig) -> LanraragiClient {
    LanraragiClient::new(&server.url, &server.api_key)
}

impl ArchiveClient for LanraragiClient {
    fn list_archives(&self) -> ClientFuture<'_, Vec<ArchiveItem>> {
        Box::pin(async move {
            let entries = LanraragiClient::list_archives(self).await?;
            Ok(entries.into_iter().map(ArchiveItem::from).collect())
        })
    }

    fn fetch_thumbnail<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ImageBytes> {
        Box::pin(async move {
            let bytes = LanraragiClient::fetch_thumbnail(self, id).await?;
            Ok(ImageBytes::from(bytes))
        })
    }

    fn extract_archive<'a>(&'a self, id: &'a str) -> ClientFuture<'a, Vec<String>> {
        Box::pin(async move { Ok(LanraragiClient::extract_archive(self, id).await?) })
    }

    fn fetch_page_image<'a>(&'a self, page_id: &'a str) -> ClientFuture<'a, ImageBytes> {
        Box::pin(async move {
            let bytes = LanraragiClient::fetch_page(self, page_id).await?;
            Ok(ImageBytes::from(bytes))
        })
    }

    fn clear_new_flag<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move { Ok(LanraragiClient::clear_new_flag(self, id).await?) })
    }
}
