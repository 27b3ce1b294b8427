//! Scriptable in-memory archive server for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{ArchiveClient, ClientError, ClientFuture};
use crate::{ArchiveItem, ImageBytes};

/// Which remote operation a counter or scripted failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    ListArchives,
    Thumbnail,
    Extract,
    PageImage,
    ClearNewFlag,
}

/// A hand-rolled [`ArchiveClient`] backed by fixed data.
///
/// Page images are the page id's bytes. Supports:
/// - scripted failures per operation or per page id,
/// - optional per-call latency,
/// - call counting per operation and per page, plus peak concurrency.
#[derive(Default)]
pub struct MockClient {
    archives: Vec<ArchiveItem>,
    pages: HashMap<String, Vec<String>>,
    failing_ops: HashSet<MockOp>,
    failing_pages: HashSet<String>,
    /// Remaining failures before a page succeeds.
    flaky_pages: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<MockOp, usize>>,
    page_calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_archive(mut self, item: ArchiveItem) -> Self {
        self.archives.push(item);
        self
    }

    /// Register an archive whose extraction yields `count` pages named `{id}/p{i}`.
    pub fn with_pages(mut self, id: &str, count: usize) -> Self {
        let pages = (0..count).map(|i| format!("{id}/p{i}")).collect();
        self.pages.insert(id.to_string(), pages);
        self
    }

    pub fn failing(mut self, op: MockOp) -> Self {
        self.failing_ops.insert(op);
        self
    }

    pub fn failing_page(mut self, page_id: &str) -> Self {
        self.failing_pages.insert(page_id.to_string());
        self
    }

    /// Fail `page_id` `times` times, then succeed.
    pub fn flaky_page(self, page_id: &str, times: usize) -> Self {
        self.flaky_pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page_id.to_string(), times);
        self
    }

    /// Set simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `op` has been called.
    pub fn call_count(&self, op: MockOp) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// How many image fetches were issued for `page_id`.
    pub fn page_calls(&self, page_id: &str) -> usize {
        self.page_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(page_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, op: MockOp) -> Result<(), ClientError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default() += 1;
        if self.failing_ops.contains(&op) {
            return Err(ClientError::Other(format!("mock {op:?} failure")));
        }
        Ok(())
    }

    fn page_failure(&self, page_id: &str) -> Option<ClientError> {
        if self.failing_pages.contains(page_id) {
            return Some(ClientError::Other(format!("mock failure for {page_id}")));
        }
        let mut flaky = self.flaky_pages.lock().unwrap_or_else(PoisonError::into_inner);
        match flaky.get_mut(page_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Some(ClientError::Other(format!("transient failure for {page_id}")))
            }
            _ => None,
        }
    }

    async fn latency(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        guard
    }
}

impl ArchiveClient for MockClient {
    fn list_archives(&self) -> ClientFuture<'_, Vec<ArchiveItem>> {
        Box::pin(async move {
            let _guard = self.latency().await;
            self.record(MockOp::ListArchives)?;
            Ok(self.archives.clone())
        })
    }

    fn fetch_thumbnail<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ImageBytes> {
        Box::pin(async move {
            let _guard = self.latency().await;
            self.record(MockOp::Thumbnail)?;
            Ok(ImageBytes::from(format!("thumb:{id}").into_bytes()))
        })
    }

    fn extract_archive<'a>(&'a self, id: &'a str) -> ClientFuture<'a, Vec<String>> {
        Box::pin(async move {
            let _guard = self.latency().await;
            self.record(MockOp::Extract)?;
            self.pages
                .get(id)
                .cloned()
                .ok_or_else(|| ClientError::Other(format!("no such archive: {id}")))
        })
    }

    fn fetch_page_image<'a>(&'a self, page_id: &'a str) -> ClientFuture<'a, ImageBytes> {
        Box::pin(async move {
            *self
                .page_calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(page_id.to_string())
                .or_default() += 1;
            let _guard = self.latency().await;
            self.record(MockOp::PageImage)?;
            if let Some(err) = self.page_failure(page_id) {
                return Err(err);
            }
            Ok(ImageBytes::from(page_id.as_bytes()))
        })
    }

    fn clear_new_flag<'a>(&'a self, _id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.latency().await;
            self.record(MockOp::ClearNewFlag)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extract_and_page_fetch() {
        let mock = MockClient::new().with_pages("a", 3);
        let pages = mock.extract_archive("a").await.unwrap();
        assert_eq!(pages, vec!["a/p0", "a/p1", "a/p2"]);
        let image = mock.fetch_page_image("a/p1").await.unwrap();
        assert_eq!(&*image, b"a/p1");
        assert_eq!(mock.page_calls("a/p1"), 1);
        assert_eq!(mock.call_count(MockOp::Extract), 1);
    }

    #[tokio::test]
    async fn scripted_failures() {
        let mock = MockClient::new()
            .with_pages("a", 2)
            .failing(MockOp::ClearNewFlag)
            .failing_page("a/p0")
            .flaky_page("a/p1", 1);
        assert!(mock.clear_new_flag("a").await.is_err());
        assert!(mock.fetch_page_image("a/p0").await.is_err());
        assert!(mock.fetch_page_image("a/p1").await.is_err());
        assert!(mock.fetch_page_image("a/p1").await.is_ok());
        assert!(mock.extract_archive("missing").await.is_err());
        assert_eq!(mock.in_flight(), 0);
    }
}
