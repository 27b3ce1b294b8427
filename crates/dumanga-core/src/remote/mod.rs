//! Archive client trait and implementations for talking to the archive server.

pub mod lanraragi;
pub mod mock;

use std::future::Future;
use std::pin::Pin;

use dumanga_lanraragi::LanraragiError;
use thiserror::Error;

use crate::{ArchiveItem, ImageBytes};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("LANraragi error: {0}")]
    Lanraragi(#[from] LanraragiError),
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Transport failures, timeouts, 429 and 5xx are worth another attempt;
    /// anything the server answered deliberately is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout | ClientError::Other(_) => true,
            ClientError::Lanraragi(LanraragiError::Http(_)) => true,
            ClientError::Lanraragi(LanraragiError::Status(code)) => {
                *code == 429 || *code >= 500
            }
            ClientError::Lanraragi(LanraragiError::Server(_) | LanraragiError::Decode(_)) => false,
        }
    }
}

pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// The remote archive server as seen by the reading engine.
///
/// Every operation is asynchronous and fails independently.
pub trait ArchiveClient: Send + Sync {
    fn list_archives(&self) -> ClientFuture<'_, Vec<ArchiveItem>>;

    /// Best-effort; callers keep a placeholder on failure.
    fn fetch_thumbnail<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ImageBytes>;

    /// Ordered page identifiers of an archive. May be slow (server-side work).
    fn extract_archive<'a>(&'a self, id: &'a str) -> ClientFuture<'a, Vec<String>>;

    fn fetch_page_image<'a>(&'a self, page_id: &'a str) -> ClientFuture<'a, ImageBytes>;

    /// Advisory; callers swallow failures.
    fn clear_new_flag<'a>(&'a self, id: &'a str) -> ClientFuture<'a, ()>;
}
