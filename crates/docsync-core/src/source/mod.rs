//! Document repository abstraction.
//!
//! A [`DocumentStore`] is a remote tree of folders and files that can be
//! listed recursively, polled through a change feed, and downloaded from.
//! The production implementation talks to Microsoft Graph
//! (`docsync::graph`); [`InMemoryDocumentStore`](memory::InMemoryDocumentStore)
//! backs the tests.
//!
//! # Change feed
//!
//! `delta(None)` starts a feed from the beginning and returns the full
//! current state. Each page carries either a `next_link` to fetch the next
//! page or, on the last page, a `delta_link` that is the cursor for the
//! next incremental run. Passing a stored `delta_link` back to `delta`
//! returns only what changed since it was issued, including tombstones.
//! [`DocumentStore::latest_cursor`] skips the replay and returns a cursor
//! for the current end of the feed.

pub mod memory;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::{DeltaPage, FolderRef, ListPage};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Authenticate and resolve the configured site, drive, and folder.
    async fn connect(&self) -> Result<(), ProviderError>;

    /// The configured root folder that listings start from.
    async fn root(&self) -> Result<FolderRef, ProviderError>;

    /// One page of the immediate children of `folder`.
    async fn list_children(
        &self,
        folder: &FolderRef,
        page: Option<&str>,
    ) -> Result<ListPage, ProviderError>;

    /// One page of the change feed. `link` is `None` to start from the
    /// beginning, or a previous `next_link` or `delta_link`.
    async fn delta(&self, link: Option<&str>) -> Result<DeltaPage, ProviderError>;

    /// Raw content of a file.
    async fn download(&self, file_id: &str) -> Result<Vec<u8>, ProviderError>;

    /// A cursor positioned at the current end of the change feed, or `None`
    /// if the feed ended without one.
    ///
    /// The default walks the feed from the beginning and keeps only the
    /// terminal link. Providers that can issue a cursor for "now" directly
    /// should override it.
    async fn latest_cursor(&self) -> Result<Option<String>, ProviderError> {
        let mut page = self.delta(None).await?;
        while let Some(next) = page.next_link.take() {
            page = self.delta(Some(&next)).await?;
        }
        Ok(page.delta_link)
    }
}
