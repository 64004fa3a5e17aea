//! Typed save/load over [`ContentStore`] with the attribute and tag
//! conventions from the storage facade design: each entity kind carries a
//! fixed `{objtype_<kind>, version_<n>}` attribute pair, and posts/threads/
//! log entries/board metas are tagged the way replay and gossip need to
//! discover them later.

use std::sync::Arc;

use boardmesh_types::{BoardLogEntry, BoardMeta, Cid, Post, ThreadMeta};

use crate::content_store::ContentStore;
use crate::error::StoreError;

const VERSION: u32 = 1;

fn attrs_for(objtype: &str) -> Vec<String> {
    vec![format!("objtype_{objtype}"), format!("version_{VERSION}")]
}

fn thread_tag(board_id: &str, thread_id: &str) -> String {
    format!("board_{board_id}-thread_{thread_id}")
}

fn board_tag(board_id: &str) -> String {
    format!("board_{board_id}")
}

/// Wraps a [`ContentStore`] with entity-aware save/load. `S` is left
/// unsized so a node can hold a `StorageFacade<dyn ContentStore>` without
/// committing its HTTP handlers to one concrete backend type.
pub struct StorageFacade<S: ContentStore + ?Sized> {
    store: Arc<S>,
}

impl<S: ContentStore + ?Sized> StorageFacade<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn save_post(&self, post: &Post, board_id: &str) -> Result<Cid, StoreError> {
        let bytes = serde_json::to_vec(post).map_err(|e| StoreError::Json(e.to_string()))?;
        let tags = vec![thread_tag(board_id, post.thread_id.as_str())];
        self.store.put(bytes, attrs_for("post"), tags).await
    }

    pub async fn load_post(&self, cid: &Cid) -> Result<Post, StoreError> {
        let bytes = self.store.get(cid).await?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Json(e.to_string()))
    }

    /// Mints a thread's identity: `threadId` is defined as the CID of the
    /// `ThreadMeta` at creation, so the first write happens before that CID
    /// can exist in the struct itself and is tagged only by board. Callers
    /// must follow up with [`Self::finalize_thread_meta`] once `thread_id`
    /// (and `root_post_cid`, once the root post is saved) are known.
    pub async fn save_thread_meta(&self, tm: &ThreadMeta, board_id: &str) -> Result<Cid, StoreError> {
        let bytes = serde_json::to_vec(tm).map_err(|e| StoreError::Json(e.to_string()))?;
        self.store.put(bytes, attrs_for("threadMeta"), vec![board_tag(board_id)]).await
    }

    /// Re-saves `tm` with `thread_id`/`root_post_cid` populated, tagged by
    /// board+thread so tag-based fallback replay can find it even when the
    /// board log itself is stale. This is the second of the two writes a
    /// `ThreadMeta` always gets.
    pub async fn finalize_thread_meta(&self, tm: &ThreadMeta, board_id: &str) -> Result<Cid, StoreError> {
        let bytes = serde_json::to_vec(tm).map_err(|e| StoreError::Json(e.to_string()))?;
        let tags = vec![board_tag(board_id), thread_tag(board_id, tm.thread_id.as_str())];
        self.store.put(bytes, attrs_for("threadMeta"), tags).await
    }

    pub async fn load_thread_meta(&self, cid: &Cid) -> Result<ThreadMeta, StoreError> {
        let bytes = self.store.get(cid).await?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Json(e.to_string()))
    }

    pub async fn save_board_log_entry(&self, entry: &BoardLogEntry) -> Result<Cid, StoreError> {
        let bytes = serde_json::to_vec(entry).map_err(|e| StoreError::Json(e.to_string()))?;
        let tags = vec![thread_tag(&entry.board_id, entry.thread_id.as_str())];
        self.store.put(bytes, attrs_for("boardLogEntry"), tags).await
    }

    pub async fn load_board_log_entry(&self, cid: &Cid) -> Result<BoardLogEntry, StoreError> {
        let bytes = self.store.get(cid).await?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Json(e.to_string()))
    }

    pub async fn save_board_meta(&self, bm: &BoardMeta) -> Result<Cid, StoreError> {
        let bytes = serde_json::to_vec(bm).map_err(|e| StoreError::Json(e.to_string()))?;
        let tags = vec![board_tag(&bm.board_id)];
        self.store.put(bytes, attrs_for("boardMeta"), tags).await
    }

    pub async fn load_board_meta(&self, cid: &Cid) -> Result<BoardMeta, StoreError> {
        let bytes = self.store.get(cid).await?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Json(e.to_string()))
    }

    /// Lists `BoardLogEntry` CIDs tagged for a given board+thread, used by
    /// the tag-based fallback replay.
    pub async fn list_thread_log_entries(&self, board_id: &str, thread_id: &str) -> Result<Vec<Cid>, StoreError> {
        self.store.list_by_tag(&thread_tag(board_id, thread_id)).await
    }
}

impl<S: ContentStore + ?Sized> Clone for StorageFacade<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}
