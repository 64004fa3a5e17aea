//! The `ContentStore` trait and its HTTP-backed implementation talking to an
//! external content-addressed DHT daemon, plus an in-memory double for tests.

use std::time::Duration;

use async_trait::async_trait;
use boardmesh_types::Cid;
use serde::Deserialize;

use crate::error::StoreError;

const MAX_PUT_RETRIES: u32 = 2;

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(&self, value: Vec<u8>, attrs: Vec<String>, tags: Vec<String>) -> Result<Cid, StoreError>;
    async fn get(&self, cid: &Cid) -> Result<Vec<u8>, StoreError>;
    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Cid>, StoreError>;
    async fn list_by_attr(&self, attr: &str) -> Result<Vec<Cid>, StoreError>;
}

/// Talks to the external content-addressed DHT backend over HTTP.
pub struct HttpContentStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct PutResponse {
    cid: String,
    #[serde(default)]
    peer_count: Option<u64>,
}

#[derive(Deserialize)]
struct GetResponse {
    /// The backend wraps raw bytes in a single level of string quoting; we
    /// unwrap it back to the original payload.
    value: String,
}

#[derive(Deserialize)]
struct ListResponse {
    cids: Vec<String>,
}

impl HttpContentStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Reads the backend's error message, which may arrive only via a
    /// response trailer-style header (`x-backend-error`), URL-escaped.
    async fn extract_backend_error(resp: &reqwest::Response) -> Option<String> {
        resp.headers()
            .get("x-backend-error")
            .and_then(|v| v.to_str().ok())
            .map(|raw| urlencoding::decode(raw).map(|c| c.into_owned()).unwrap_or_else(|_| raw.to_string()))
    }

    fn check_zero_peers(peer_count: Option<u64>) -> Result<(), StoreError> {
        if peer_count == Some(0) {
            return Err(StoreError::NoPeers);
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for HttpContentStore {
    #[tracing::instrument(level = "debug", skip(self, value))]
    async fn put(&self, value: Vec<u8>, attrs: Vec<String>, tags: Vec<String>) -> Result<Cid, StoreError> {
        let url = format!("{}/put", self.base_url);
        let body = serde_json::json!({
            "value": base64::encode_value(&value),
            "attrs": attrs,
            "tags": tags,
        });

        let mut attempt = 0;
        loop {
            let resp = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;

            let status = resp.status();
            if status.is_client_error() {
                let err_msg = Self::extract_backend_error(&resp).await;
                let bytes = resp.bytes().await.unwrap_or_default();
                if bytes.is_empty() && attempt < MAX_PUT_RETRIES {
                    tracing::warn!(attempt, "empty-body 4xx from content store, retrying");
                    attempt += 1;
                    continue;
                }
                return Err(StoreError::Backend(
                    err_msg.unwrap_or_else(|| format!("status {status}")),
                ));
            }
            if status.is_server_error() {
                return Err(StoreError::Transport(format!("status {status}")));
            }

            let parsed: PutResponse = resp
                .json()
                .await
                .map_err(|e| StoreError::Json(e.to_string()))?;
            Self::check_zero_peers(parsed.peer_count)?;
            return Ok(Cid::new(parsed.cid));
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, cid: &Cid) -> Result<Vec<u8>, StoreError> {
        let url = format!("{}/get/{}", self.base_url, urlencoding::encode(cid.as_str()));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(cid.to_string()));
        }
        if resp.status().is_client_error() || resp.status().is_server_error() {
            let err_msg = Self::extract_backend_error(&resp).await;
            return Err(StoreError::Backend(
                err_msg.unwrap_or_else(|| format!("status {}", resp.status())),
            ));
        }
        let parsed: GetResponse = resp.json().await.map_err(|e| StoreError::Json(e.to_string()))?;
        base64::decode_value(&parsed.value).map_err(StoreError::Json)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Cid>, StoreError> {
        let url = format!("{}/tag/{}", self.base_url, urlencoding::encode(tag));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let parsed: ListResponse = resp.json().await.map_err(|e| StoreError::Json(e.to_string()))?;
        let mut cids: Vec<Cid> = parsed.cids.into_iter().map(Cid::new).collect();
        cids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(cids)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_by_attr(&self, attr: &str) -> Result<Vec<Cid>, StoreError> {
        let url = format!("{}/attr/{}", self.base_url, urlencoding::encode(attr));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let parsed: ListResponse = resp.json().await.map_err(|e| StoreError::Json(e.to_string()))?;
        let mut cids: Vec<Cid> = parsed.cids.into_iter().map(Cid::new).collect();
        cids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(cids)
    }
}

/// Small base64 helper module so `content_store` doesn't depend on the
/// `base64` crate's version-specific `Engine` trait import at every call site.
mod base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    pub fn encode_value(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    pub fn decode_value(s: &str) -> Result<Vec<u8>, String> {
        STANDARD.decode(s).map_err(|e| e.to_string())
    }
}

/// An in-process `ContentStore` double, used by tests and by nodes running
/// without a configured backend.
#[derive(Default)]
pub struct InMemoryContentStore {
    blocks: tokio::sync::RwLock<std::collections::HashMap<Cid, Vec<u8>>>,
    by_tag: tokio::sync::RwLock<std::collections::HashMap<String, Vec<Cid>>>,
    by_attr: tokio::sync::RwLock<std::collections::HashMap<String, Vec<Cid>>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn compute_cid(bytes: &[u8]) -> Cid {
        let hash = blake3::hash(bytes);
        Cid::new(format!("bafy{}", hash.to_hex()))
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn put(&self, value: Vec<u8>, attrs: Vec<String>, tags: Vec<String>) -> Result<Cid, StoreError> {
        let cid = Self::compute_cid(&value);
        self.blocks.write().await.insert(cid.clone(), value);
        let mut tag_map = self.by_tag.write().await;
        for tag in tags {
            let list = tag_map.entry(tag).or_default();
            if !list.contains(&cid) {
                list.push(cid.clone());
            }
        }
        let mut attr_map = self.by_attr.write().await;
        for attr in attrs {
            let list = attr_map.entry(attr).or_default();
            if !list.contains(&cid) {
                list.push(cid.clone());
            }
        }
        Ok(cid)
    }

    async fn get(&self, cid: &Cid) -> Result<Vec<u8>, StoreError> {
        self.blocks
            .read()
            .await
            .get(cid)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(cid.to_string()))
    }

    async fn list_by_tag(&self, tag: &str) -> Result<Vec<Cid>, StoreError> {
        let mut cids = self.by_tag.read().await.get(tag).cloned().unwrap_or_default();
        cids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(cids)
    }

    async fn list_by_attr(&self, attr: &str) -> Result<Vec<Cid>, StoreError> {
        let mut cids = self.by_attr.read().await.get(attr).cloned().unwrap_or_default();
        cids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(cids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_bytes_yield_identical_cid() {
        let store = InMemoryContentStore::new();
        let cid1 = store.put(b"hello".to_vec(), vec![], vec!["t".into()]).await.unwrap();
        let cid2 = store.put(b"hello".to_vec(), vec![], vec!["t".into()]).await.unwrap();
        assert_eq!(cid1, cid2);
    }

    #[tokio::test]
    async fn list_by_tag_is_sorted_and_deduped() {
        let store = InMemoryContentStore::new();
        store.put(b"a".to_vec(), vec![], vec!["x".into()]).await.unwrap();
        store.put(b"b".to_vec(), vec![], vec!["x".into()]).await.unwrap();
        store.put(b"a".to_vec(), vec![], vec!["x".into()]).await.unwrap();
        let cids = store.list_by_tag("x").await.unwrap();
        assert_eq!(cids.len(), 2);
        let mut sorted = cids.clone();
        sorted.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(cids, sorted);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = InMemoryContentStore::new();
        let err = store.get(&Cid::new("missing")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
