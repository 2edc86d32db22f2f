//! In-memory [`DocumentStore`] implementation for testing.
//!
//! Holds a folder tree and file contents behind `std::sync::RwLock` and
//! records every mutation in a change log with a monotonically increasing
//! sequence number. Change-feed links encode positions in that log:
//!
//! ```text
//! mem-delta:<since>:<skip>:<head>
//! ```
//!
//! `since` is the last sequence number the caller has seen, `head` pins
//! the end of the feed when it was started so paging is stable under
//! concurrent mutation, and `skip` is the paging offset.
//!
//! Failure injection covers the cases the orchestrator has to survive:
//! failing downloads, failing listings, rejected credentials, expired
//! cursors, and a feed that ends without a cursor.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::ProviderError;
use crate::models::{DeltaPage, DriveItem, FileRecord, FolderRef, ListPage};

use super::DocumentStore;

const ROOT_ID: &str = "root";
const DEFAULT_PAGE_SIZE: usize = 50;

/// A change applied when a given file is downloaded.
///
/// Lets tests mutate the repository in the middle of a sync run.
#[derive(Debug, Clone)]
pub enum Mutation {
    Update { file_id: String, content: Vec<u8> },
    Delete { file_id: String },
    Add { folder_id: String, name: String, content: Vec<u8> },
}

struct StoredFile {
    record: FileRecord,
    parent: String,
    content: Vec<u8>,
}

struct ChangeEntry {
    seq: u64,
    item: DriveItem,
}

struct Inner {
    folders: BTreeMap<String, (FolderRef, Option<String>)>,
    files: BTreeMap<String, StoredFile>,
    log: Vec<ChangeEntry>,
    seq: u64,
    next_id: u64,
    page_size: usize,
    failing_downloads: HashMap<String, ProviderError>,
    listing_error: Option<ProviderError>,
    delta_error: Option<ProviderError>,
    auth_error: Option<String>,
    expired_before: u64,
    truncate_feed: bool,
    deferred: HashMap<String, Vec<Mutation>>,
    downloads: u64,
}

/// In-memory document repository.
pub struct InMemoryDocumentStore {
    inner: RwLock<Inner>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        let root = FolderRef {
            id: ROOT_ID.to_string(),
            name: String::new(),
            path: "/".to_string(),
        };
        let mut folders = BTreeMap::new();
        folders.insert(ROOT_ID.to_string(), (root, None));
        Self {
            inner: RwLock::new(Inner {
                folders,
                files: BTreeMap::new(),
                log: Vec::new(),
                seq: 0,
                next_id: 0,
                page_size: DEFAULT_PAGE_SIZE,
                failing_downloads: HashMap::new(),
                listing_error: None,
                delta_error: None,
                auth_error: None,
                expired_before: 0,
                truncate_feed: false,
                deferred: HashMap::new(),
                downloads: 0,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Id of the root folder.
    pub fn root_id(&self) -> &'static str {
        ROOT_ID
    }

    /// Maximum items per listing or feed page.
    pub fn set_page_size(&self, size: usize) {
        self.write().page_size = size.max(1);
    }

    pub fn add_folder(&self, parent_id: &str, name: &str) -> FolderRef {
        let mut inner = self.write();
        inner.next_id += 1;
        let id = format!("folder-{}", inner.next_id);
        let parent_path = inner
            .folders
            .get(parent_id)
            .map(|(f, _)| f.path.clone())
            .unwrap_or_else(|| "/".to_string());
        let folder = FolderRef {
            id: id.clone(),
            name: name.to_string(),
            path: join_path(&parent_path, name),
        };
        inner
            .folders
            .insert(id, (folder.clone(), Some(parent_id.to_string())));
        inner.record(DriveItem::Folder(folder.clone()));
        folder
    }

    pub fn add_file(&self, folder_id: &str, name: &str, content: impl Into<Vec<u8>>) -> FileRecord {
        self.write().add_file(folder_id, name, content.into())
    }

    /// Replace a file's content. Returns `false` for unknown ids.
    pub fn update_file(&self, file_id: &str, content: impl Into<Vec<u8>>) -> bool {
        self.write().update_file(file_id, content.into())
    }

    /// Delete a file, leaving a tombstone in the change feed.
    pub fn delete_file(&self, file_id: &str) -> bool {
        self.write().delete_file(file_id)
    }

    /// Make every download of `file_id` fail with a server error.
    pub fn fail_download(&self, file_id: &str) {
        self.fail_download_with(
            file_id,
            ProviderError::Server {
                status: 500,
                message: format!("download of {} failed", file_id),
            },
        );
    }

    /// Make every download of `file_id` fail with `error`.
    pub fn fail_download_with(&self, file_id: &str, error: ProviderError) {
        self.write()
            .failing_downloads
            .insert(file_id.to_string(), error);
    }

    /// Make every `list_children` call fail with `error`.
    pub fn fail_listing(&self, error: Option<ProviderError>) {
        self.write().listing_error = error;
    }

    /// Make every `delta` call fail with `error`.
    pub fn fail_delta(&self, error: Option<ProviderError>) {
        self.write().delta_error = error;
    }

    /// Reject credentials on every call.
    pub fn reject_credentials(&self, reason: Option<&str>) {
        self.write().auth_error = reason.map(str::to_string);
    }

    /// Invalidate every cursor issued so far.
    pub fn expire_cursors(&self) {
        let mut inner = self.write();
        inner.expired_before = inner.seq + 1;
    }

    /// End the change feed without a `delta_link`.
    pub fn truncate_feed(&self, truncate: bool) {
        self.write().truncate_feed = truncate;
    }

    /// Apply `mutation` right after `trigger_file_id` is next downloaded.
    pub fn defer_on_download(&self, trigger_file_id: &str, mutation: Mutation) {
        self.write()
            .deferred
            .entry(trigger_file_id.to_string())
            .or_default()
            .push(mutation);
    }

    /// Number of successful downloads served.
    pub fn download_count(&self) -> u64 {
        self.read().downloads
    }

    pub fn file(&self, file_id: &str) -> Option<FileRecord> {
        self.read().files.get(file_id).map(|f| f.record.clone())
    }

    /// Ids of all live files, sorted.
    pub fn file_ids(&self) -> Vec<String> {
        self.read().files.keys().cloned().collect()
    }

    fn check_auth(&self) -> Result<(), ProviderError> {
        match &self.read().auth_error {
            Some(reason) => Err(ProviderError::Auth(reason.clone())),
            None => Ok(()),
        }
    }
}

impl Inner {
    fn record(&mut self, item: DriveItem) {
        self.seq += 1;
        let seq = self.seq;
        self.log.push(ChangeEntry { seq, item });
    }

    fn add_file(&mut self, folder_id: &str, name: &str, content: Vec<u8>) -> FileRecord {
        self.next_id += 1;
        let id = format!("file-{}", self.next_id);
        let folder_path = self
            .folders
            .get(folder_id)
            .map(|(f, _)| f.path.clone())
            .unwrap_or_else(|| "/".to_string());
        let path = join_path(&folder_path, name);
        let record = FileRecord {
            id: id.clone(),
            name: name.to_string(),
            web_url: format!("memory://{}", path.trim_start_matches('/')),
            path,
            size: content.len() as u64,
            content_type: String::new(),
            last_modified: Some(Utc::now()),
            deleted: false,
        };
        self.files.insert(
            id,
            StoredFile {
                record: record.clone(),
                parent: folder_id.to_string(),
                content,
            },
        );
        self.record(DriveItem::File(record.clone()));
        record
    }

    fn update_file(&mut self, file_id: &str, content: Vec<u8>) -> bool {
        let record = match self.files.get_mut(file_id) {
            Some(stored) => {
                stored.record.size = content.len() as u64;
                stored.record.last_modified = Some(Utc::now());
                stored.content = content;
                stored.record.clone()
            }
            None => return false,
        };
        self.record(DriveItem::File(record));
        true
    }

    fn delete_file(&mut self, file_id: &str) -> bool {
        match self.files.remove(file_id) {
            Some(stored) => {
                self.record(DriveItem::File(stored.record.tombstone()));
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Update { file_id, content } => {
                self.update_file(&file_id, content);
            }
            Mutation::Delete { file_id } => {
                self.delete_file(&file_id);
            }
            Mutation::Add {
                folder_id,
                name,
                content,
            } => {
                self.add_file(&folder_id, &name, content);
            }
        }
    }

    /// Latest state of every item changed in `(since, head]`, in log order.
    fn changes(&self, since: u64, head: u64) -> Vec<DriveItem> {
        let mut latest: BTreeMap<u64, DriveItem> = BTreeMap::new();
        let mut position: HashMap<String, u64> = HashMap::new();
        for entry in self.log.iter().filter(|e| e.seq > since && e.seq <= head) {
            let id = item_id(&entry.item).to_string();
            if let Some(prev) = position.insert(id, entry.seq) {
                latest.remove(&prev);
            }
            latest.insert(entry.seq, entry.item.clone());
        }
        latest
            .into_values()
            .filter(|item| since > 0 || !is_tombstone(item))
            .collect()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn connect(&self) -> Result<(), ProviderError> {
        self.check_auth()
    }

    async fn root(&self) -> Result<FolderRef, ProviderError> {
        self.check_auth()?;
        self.read()
            .folders
            .get(ROOT_ID)
            .map(|(f, _)| f.clone())
            .ok_or_else(|| ProviderError::NotFound(ROOT_ID.to_string()))
    }

    async fn list_children(
        &self,
        folder: &FolderRef,
        page: Option<&str>,
    ) -> Result<ListPage, ProviderError> {
        self.check_auth()?;
        let inner = self.read();
        if let Some(err) = &inner.listing_error {
            return Err(err.clone());
        }
        if !inner.folders.contains_key(&folder.id) {
            return Err(ProviderError::NotFound(folder.id.clone()));
        }

        let mut items: Vec<DriveItem> = inner
            .folders
            .values()
            .filter(|(_, parent)| parent.as_deref() == Some(folder.id.as_str()))
            .map(|(f, _)| DriveItem::Folder(f.clone()))
            .collect();
        items.extend(
            inner
                .files
                .values()
                .filter(|f| f.parent == folder.id)
                .map(|f| DriveItem::File(f.record.clone())),
        );

        let offset = match page {
            Some(token) => token
                .strip_prefix("offset:")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| ProviderError::Client {
                    status: 400,
                    message: format!("bad page token: {}", token),
                })?,
            None => 0,
        };
        let end = (offset + inner.page_size).min(items.len());
        let next_page = (end < items.len()).then(|| format!("offset:{}", end));
        let items = items.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        Ok(ListPage { items, next_page })
    }

    async fn delta(&self, link: Option<&str>) -> Result<DeltaPage, ProviderError> {
        self.check_auth()?;
        let inner = self.read();
        if let Some(err) = &inner.delta_error {
            return Err(err.clone());
        }

        let (since, skip, head) = match link {
            None => (0, 0, inner.seq),
            Some(link) => parse_link(link)?,
        };
        if since > 0 && since < inner.expired_before {
            return Err(ProviderError::InvalidCursor(format!(
                "cursor {} has expired",
                since
            )));
        }

        let changes = inner.changes(since, head);
        let end = (skip + inner.page_size).min(changes.len());
        let items = changes.get(skip..end).map(<[_]>::to_vec).unwrap_or_default();

        let mut page = DeltaPage {
            items,
            ..DeltaPage::default()
        };
        if end < changes.len() {
            page.next_link = Some(format!("mem-delta:{}:{}:{}", since, end, head));
        } else if !inner.truncate_feed {
            page.delta_link = Some(format!("mem-delta:{}:0:{}", head, head));
        }
        Ok(page)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, ProviderError> {
        self.check_auth()?;
        let mut inner = self.write();
        if let Some(err) = inner.failing_downloads.get(file_id) {
            return Err(err.clone());
        }
        let content = inner
            .files
            .get(file_id)
            .map(|f| f.content.clone())
            .ok_or_else(|| ProviderError::NotFound(file_id.to_string()))?;
        inner.downloads += 1;
        if let Some(mutations) = inner.deferred.remove(file_id) {
            for m in mutations {
                inner.apply(m);
            }
        }
        Ok(content)
    }
}

fn parse_link(link: &str) -> Result<(u64, usize, u64), ProviderError> {
    let invalid = || ProviderError::InvalidCursor(format!("unrecognised link: {}", link));
    let rest = link.strip_prefix("mem-delta:").ok_or_else(invalid)?;
    let parts: Vec<&str> = rest.split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }
    let since = parts[0].parse().map_err(|_| invalid())?;
    let skip = parts[1].parse().map_err(|_| invalid())?;
    let head = parts[2].parse().map_err(|_| invalid())?;
    Ok((since, skip, head))
}

fn item_id(item: &DriveItem) -> &str {
    match item {
        DriveItem::File(f) => &f.id,
        DriveItem::Folder(f) => &f.id,
    }
}

fn is_tombstone(item: &DriveItem) -> bool {
    matches!(item, DriveItem::File(f) if f.deleted)
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}
