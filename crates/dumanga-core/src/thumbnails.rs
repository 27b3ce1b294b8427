use std::sync::Arc;

use dashmap::DashMap;

use crate::ImageBytes;

/// Archive thumbnails keyed by archive id.
///
/// Written from fetch tasks and read from list views concurrently.
/// A missing entry means the view shows a placeholder.
#[derive(Debug, Clone, Default)]
pub struct ThumbnailCache {
    entries: Arc<DashMap<String, ImageBytes>>,
}

impl ThumbnailCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<ImageBytes> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn insert(&self, id: impl Into<String>, image: ImageBytes) {
        self.entries.insert(id.into(), image);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_entries() {
        let cache = ThumbnailCache::new();
        let view = cache.clone();
        assert!(view.get("a").is_none());
        cache.insert("a", ImageBytes::from(&b"png"[..]));
        assert!(view.contains("a"));
        assert_eq!(&*view.get("a").unwrap(), b"png");
        view.clear();
        assert!(cache.is_empty());
    }
}
