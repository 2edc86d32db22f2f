//! Microsoft Graph document store.
//!
//! Implements [`DocumentStore`] over a SharePoint document library:
//!
//! - the site is `site_id`, or resolved from `site_url` as
//!   `/sites/{host}:{path}`;
//! - the drive is `drive_id`, or the site's `documentLibrary` drive (the
//!   first drive when none is tagged);
//! - the root is `folder_id`, or the item at `folder_path`.
//!
//! Resolution happens once, on first use. Continuation links returned by
//! Graph (`@odata.nextLink`, `@odata.deltaLink`) are absolute URLs and are
//! followed as-is, but only when they point back at the configured Graph
//! endpoint so a tampered cursor file cannot send the bearer token elsewhere.

pub mod auth;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docsync_core::models::{DeltaPage, DriveItem, FileRecord, FolderRef, ListPage};
use docsync_core::source::DocumentStore;
use docsync_core::ProviderError;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::http;

use self::auth::{Credentials, TokenProvider};

#[derive(Debug, Clone)]
struct Resolved {
    drive_id: String,
    root: FolderRef,
}

pub struct GraphDocumentStore {
    client: reqwest::Client,
    graph_url: String,
    tokens: TokenProvider,
    source: SourceConfig,
    resolved: OnceCell<Resolved>,
}

impl GraphDocumentStore {
    /// Build a store from the `[source]` section. Credentials come from the
    /// section or the environment; see [`SourceConfig::client_secret`].
    pub fn from_config(source: &SourceConfig) -> Result<Self> {
        let credentials = Credentials {
            tenant_id: source.tenant_id()?,
            client_id: source.client_id()?,
            client_secret: source.client_secret()?,
        };
        Ok(Self::new(source.clone(), credentials)?)
    }

    pub fn new(source: SourceConfig, credentials: Credentials) -> Result<Self, ProviderError> {
        let client = http::client()?;
        let tokens = TokenProvider::new(client.clone(), &source.authority_url, credentials);
        Ok(Self {
            graph_url: source.graph_url.trim_end_matches('/').to_string(),
            client,
            tokens,
            source,
            resolved: OnceCell::new(),
        })
    }

    async fn resolved(&self) -> Result<&Resolved, ProviderError> {
        self.resolved.get_or_try_init(|| self.resolve()).await
    }

    async fn resolve(&self) -> Result<Resolved, ProviderError> {
        let drive_id = match &self.source.drive_id {
            Some(id) => id.clone(),
            None => {
                let site_id = self.resolve_site().await?;
                self.resolve_drive(&site_id).await?
            }
        };

        let item = match (&self.source.folder_id, &self.source.folder_path) {
            (Some(id), _) => {
                self.get_json(&format!("{}/drives/{}/items/{}", self.graph_url, drive_id, id), &[])
                    .await?
            }
            (None, Some(path)) => {
                let path = normalize_path(path);
                self.get_json(&format!("{}/drives/{}/root:{}:", self.graph_url, drive_id, path), &[])
                    .await?
            }
            (None, None) => {
                return Err(ProviderError::Other(
                    "source needs folder_id or folder_path".into(),
                ))
            }
        };

        let root = match parse_item(&item) {
            Some(DriveItem::Folder(folder)) => folder,
            _ => {
                return Err(ProviderError::Malformed(
                    "configured root is not a folder".into(),
                ))
            }
        };
        info!(drive = %drive_id, root = %root.path, "resolved document library root");
        Ok(Resolved { drive_id, root })
    }

    async fn resolve_site(&self) -> Result<String, ProviderError> {
        if let Some(id) = &self.source.site_id {
            return Ok(id.clone());
        }
        let site_url = self
            .source
            .site_url
            .as_deref()
            .ok_or_else(|| ProviderError::Other("source needs site_id, site_url or drive_id".into()))?;
        let parsed = reqwest::Url::parse(site_url)
            .map_err(|e| ProviderError::Other(format!("invalid site_url '{}': {}", site_url, e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ProviderError::Other(format!("site_url '{}' has no host", site_url)))?;
        let path = parsed.path().trim_end_matches('/');

        let site = self
            .get_json(&format!("{}/sites/{}:{}", self.graph_url, host, path), &[])
            .await?;
        let id = str_field(&site, "id")
            .ok_or_else(|| ProviderError::Malformed("site response has no id".into()))?;
        debug!(site = %id, "resolved site");
        Ok(id)
    }

    async fn resolve_drive(&self, site_id: &str) -> Result<String, ProviderError> {
        let body = self
            .get_json(&format!("{}/sites/{}/drives", self.graph_url, site_id), &[])
            .await?;
        let drives = body
            .get("value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let chosen = drives
            .iter()
            .find(|d| d.get("driveType").and_then(Value::as_str) == Some("documentLibrary"))
            .or_else(|| drives.first())
            .ok_or_else(|| ProviderError::NotFound(format!("site {} has no drives", site_id)))?;
        str_field(chosen, "id").ok_or_else(|| ProviderError::Malformed("drive has no id".into()))
    }

    /// GET with the cached token. A 401 drops the token and the request is
    /// sent once more with a fresh one before the failure is reported.
    async fn send_get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response, ProviderError> {
        let token = self.tokens.token().await?;
        match self.get_with(&token, url, query).await {
            Err(e) if e.is_auth() => {
                warn!(error = %e, "access token rejected; refreshing");
                self.tokens.invalidate().await;
                let token = self.tokens.token().await?;
                let result = self.get_with(&token, url, query).await;
                if matches!(&result, Err(e) if e.is_auth()) {
                    self.tokens.invalidate().await;
                }
                result
            }
            other => other,
        }
    }

    async fn get_with(
        &self,
        token: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(http::transport_error)?;
        http::check(response).await
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, ProviderError> {
        http::json(self.send_get(url, query).await?).await
    }

    /// Accept a continuation link only if it targets the Graph endpoint.
    fn continuation(&self, link: &str) -> Result<String, ProviderError> {
        if link.starts_with(&self.graph_url) {
            Ok(link.to_string())
        } else if link.starts_with('/') {
            Ok(format!("{}{}", self.graph_url, link))
        } else {
            Err(ProviderError::InvalidCursor(format!(
                "link does not point at {}",
                self.graph_url
            )))
        }
    }
}

#[async_trait]
impl DocumentStore for GraphDocumentStore {
    async fn connect(&self) -> Result<(), ProviderError> {
        self.tokens.token().await?;
        self.resolved().await?;
        Ok(())
    }

    async fn root(&self) -> Result<FolderRef, ProviderError> {
        Ok(self.resolved().await?.root.clone())
    }

    async fn list_children(
        &self,
        folder: &FolderRef,
        page: Option<&str>,
    ) -> Result<ListPage, ProviderError> {
        let body = match page {
            Some(link) => self.get_json(&self.continuation(link)?, &[]).await?,
            None => {
                let drive_id = &self.resolved().await?.drive_id;
                let url = format!("{}/drives/{}/items/{}/children", self.graph_url, drive_id, folder.id);
                self.get_json(&url, &[("$top", self.source.page_size.to_string())])
                    .await?
            }
        };

        let items = parse_items(&body)
            .into_iter()
            .filter(|item| match item {
                DriveItem::File(f) => !f.deleted,
                DriveItem::Folder(_) => true,
            })
            .collect();
        Ok(ListPage {
            items,
            next_page: str_field(&body, "@odata.nextLink"),
        })
    }

    async fn delta(&self, link: Option<&str>) -> Result<DeltaPage, ProviderError> {
        let body = match link {
            Some(link) => self.get_json(&self.continuation(link)?, &[]).await?,
            None => {
                let resolved = self.resolved().await?;
                let url = format!(
                    "{}/drives/{}/items/{}/delta",
                    self.graph_url, resolved.drive_id, resolved.root.id
                );
                self.get_json(&url, &[]).await?
            }
        };

        Ok(DeltaPage {
            items: parse_items(&body),
            next_link: str_field(&body, "@odata.nextLink"),
            delta_link: str_field(&body, "@odata.deltaLink"),
        })
    }

    /// Graph issues a cursor for "now" with `token=latest`, without
    /// enumerating the drive.
    async fn latest_cursor(&self) -> Result<Option<String>, ProviderError> {
        let resolved = self.resolved().await?;
        let url = format!(
            "{}/drives/{}/items/{}/delta",
            self.graph_url, resolved.drive_id, resolved.root.id
        );
        let mut body = self.get_json(&url, &[("token", "latest".to_string())]).await?;
        while let Some(next) = str_field(&body, "@odata.nextLink") {
            body = self.get_json(&self.continuation(&next)?, &[]).await?;
        }
        Ok(str_field(&body, "@odata.deltaLink"))
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, ProviderError> {
        let drive_id = &self.resolved().await?.drive_id;
        let url = format!("{}/drives/{}/items/{}/content", self.graph_url, drive_id, file_id);
        let response = self.send_get(&url, &[]).await?;
        let bytes = response.bytes().await.map_err(http::transport_error)?;
        Ok(bytes.to_vec())
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{}", trimmed)
}

/// Folder path of an item from its `parentReference.path`
/// (`/drives/{id}/root:/Bids/2024` becomes `/Bids/2024`).
fn parent_path(item: &Value) -> String {
    let raw = item
        .pointer("/parentReference/path")
        .and_then(Value::as_str)
        .unwrap_or("");
    match raw.split_once("root:") {
        Some((_, rest)) => rest.trim_end_matches('/').to_string(),
        None => String::new(),
    }
}

fn parse_items(body: &Value) -> Vec<DriveItem> {
    body.get("value")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_item).collect())
        .unwrap_or_default()
}

/// Convert one Graph `driveItem` into a [`DriveItem`]. Items that are
/// neither files nor folders (OneNote packages and the like) are dropped.
fn parse_item(item: &Value) -> Option<DriveItem> {
    let id = str_field(item, "id")?;
    let name = str_field(item, "name").unwrap_or_default();
    let parent = parent_path(item);
    let path = if item.get("root").is_some() {
        "/".to_string()
    } else {
        format!("{}/{}", parent, name)
    };
    let deleted = item.get("deleted").is_some();

    if item.get("folder").is_some() || item.get("root").is_some() {
        return Some(DriveItem::Folder(FolderRef { id, name, path }));
    }
    if item.get("file").is_none() && !deleted {
        return None;
    }

    let last_modified = item
        .get("lastModifiedDateTime")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Some(DriveItem::File(FileRecord {
        id,
        name,
        path,
        size: item.get("size").and_then(Value::as_u64).unwrap_or(0),
        content_type: item
            .pointer("/file/mimeType")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        web_url: str_field(item, "webUrl").unwrap_or_default(),
        last_modified,
        deleted,
    }))
}
