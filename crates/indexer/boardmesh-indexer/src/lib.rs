#![deny(unsafe_code)]

//! A SQLite mirror of the board log, maintained for substring search and
//! paginated listing the content store itself can't do efficiently.
//! Migrations run on open; a `processed_logs` table gives `sync_board` its
//! exactly-once apply.

use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use boardmesh_log::ChainEntry;
use boardmesh_store::{ContentStore, StorageFacade};
use boardmesh_types::{verify_entity, BoardError, BoardLogEntry, Cid, LogOp, RecoveryPolicy};

/// Default and maximum page sizes for search results, matching the node's
/// configuration defaults.
pub const DEFAULT_SEARCH_LIMIT: i64 = 50;
pub const MAX_SEARCH_LIMIT: i64 = 200;

/// A board row as surfaced by search.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardRow {
    pub board_id: String,
    pub title: String,
    pub description: String,
}

/// A thread row as surfaced by search.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadRow {
    pub thread_id: String,
    pub board_id: String,
    pub title: String,
    pub root_post_cid: String,
    pub created_at: String,
}

/// A post row as surfaced by search, including its position in the thread.
#[derive(Debug, Clone, PartialEq)]
pub struct PostRow {
    pub post_cid: String,
    pub thread_id: String,
    pub ordinal: i64,
    pub author_pub_key: String,
    pub display_name: String,
    pub body_content: String,
    pub created_at: String,
    pub tombstoned: bool,
}

/// Optional filters for `search_posts`.
#[derive(Debug, Clone, Default)]
pub struct PostSearchFilter {
    pub board_id: Option<String>,
    pub author_pub_key: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub text: Option<String>,
}

/// The SQLite-backed secondary index.
pub struct IndexerStore {
    pool: SqlitePool,
    search_limit_default: i64,
    search_limit_max: i64,
}

impl IndexerStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, BoardError> {
        let url = format!("sqlite://{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .map_err(|e| BoardError::Transient(format!("opening index db: {e}")))?;
        let store = Self {
            pool,
            search_limit_default: DEFAULT_SEARCH_LIMIT,
            search_limit_max: MAX_SEARCH_LIMIT,
        };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, BoardError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(|e| BoardError::Transient(format!("opening in-memory index db: {e}")))?;
        let store = Self {
            pool,
            search_limit_default: DEFAULT_SEARCH_LIMIT,
            search_limit_max: MAX_SEARCH_LIMIT,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Overrides the default/max search page sizes, normally taken from
    /// `BoardmeshConfig::search_limit_default`/`search_limit_max`.
    pub fn with_search_limits(mut self, default: i64, max: i64) -> Self {
        self.search_limit_default = default;
        self.search_limit_max = max;
        self
    }

    /// `limit<=0` (including absent) falls back to the configured default;
    /// anything above the configured cap is clamped down to it.
    fn clamp_limit(&self, limit: Option<i64>) -> i64 {
        match limit {
            Some(l) if l > 0 => l.min(self.search_limit_max),
            _ => self.search_limit_default,
        }
    }

    async fn migrate(&self) -> Result<(), BoardError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS boards (
                board_id TEXT PRIMARY KEY,
                meta_cid TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                log_head_cid TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                thread_id TEXT PRIMARY KEY,
                board_id TEXT NOT NULL,
                title TEXT NOT NULL,
                root_post_cid TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                post_cid TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                author_pub_key TEXT NOT NULL,
                display_name TEXT NOT NULL,
                body_content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS thread_posts (
                thread_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                post_cid TEXT NOT NULL,
                tombstoned INTEGER NOT NULL DEFAULT 0,
                tombstone_reason TEXT,
                tombstone_created_at TEXT,
                tombstone_author_pubkey TEXT,
                PRIMARY KEY (thread_id, ordinal)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_logs (
                log_cid TEXT PRIMARY KEY,
                board_id TEXT NOT NULL,
                valid_sig INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_threads_board ON threads(board_id)")
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_thread ON posts(thread_id)")
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_pub_key)")
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;

        Ok(())
    }

    /// Mirrors one board's log into the relational schema:
    /// 1. load and verify the `BoardMeta` at `meta_cid`, upsert its row
    /// 2. if `logHeadCid` is already in `processed_logs`, there's nothing new
    /// 3. otherwise walk backward from `logHeadCid` by `prevLogCid`, stopping
    ///    at the first already-processed ancestor (or genesis) — this is the
    ///    exactly-once apply, and it bounds each sync call to the unsynced
    ///    suffix of the log rather than re-walking it from scratch
    /// 4. for unseen, valid-signature entries, upsert threads/posts/thread_posts
    /// 5. record every walked entry (valid or not) in `processed_logs`
    #[tracing::instrument(level = "debug", skip(self, facade), fields(board_id))]
    pub async fn sync_board_by_meta_cid<S: ContentStore + ?Sized>(
        &self,
        facade: &StorageFacade<S>,
        meta_cid: &Cid,
    ) -> Result<(), BoardError> {
        let board_meta = facade.load_board_meta(meta_cid).await?;
        let (board_meta, _) = verify_entity(&board_meta, RecoveryPolicy::Enabled)
            .map_err(|_| BoardError::SignatureInvalid)?;

        sqlx::query(
            "INSERT INTO boards (board_id, meta_cid, title, description, log_head_cid) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(board_id) DO UPDATE SET \
             meta_cid = excluded.meta_cid, title = excluded.title, \
             description = excluded.description, log_head_cid = excluded.log_head_cid",
        )
        .bind(&board_meta.board_id)
        .bind(meta_cid.as_str())
        .bind(&board_meta.title)
        .bind(&board_meta.description)
        .bind(board_meta.log_head_cid.as_ref().map(Cid::as_str))
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;

        let Some(head) = &board_meta.log_head_cid else {
            return Ok(());
        };

        if self.is_processed(head).await? {
            return Ok(());
        }

        let chain = self.fetch_unprocessed_chain(facade, head).await?;

        for chain_entry in &chain {
            if chain_entry.signature_valid {
                self.apply_entry(facade, &board_meta.board_id, chain_entry).await?;
            }

            sqlx::query(
                "INSERT OR IGNORE INTO processed_logs (log_cid, board_id, valid_sig) VALUES (?, ?, ?)",
            )
            .bind(chain_entry.cid.as_str())
            .bind(&board_meta.board_id)
            .bind(chain_entry.signature_valid as i64)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        }

        Ok(())
    }

    async fn is_processed(&self, log_cid: &Cid) -> Result<bool, BoardError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT log_cid FROM processed_logs WHERE log_cid = ?")
            .bind(log_cid.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(row.is_some())
    }

    /// Walks backward from `head` by `prevLogCid`, stopping at the first
    /// already-processed ancestor (or genesis), so a sync call only ever
    /// re-reads the suffix of the log it hasn't mirrored yet. Returns the
    /// unprocessed entries oldest-first.
    async fn fetch_unprocessed_chain<S: ContentStore + ?Sized>(
        &self,
        facade: &StorageFacade<S>,
        head: &Cid,
    ) -> Result<Vec<ChainEntry>, BoardError> {
        use std::collections::HashSet;

        let mut seen = HashSet::new();
        let mut newest_first = Vec::new();
        let mut cursor = Some(head.clone());
        let mut depth = 0usize;

        while let Some(cid) = cursor {
            if self.is_processed(&cid).await? {
                break;
            }
            if depth > boardmesh_log::MAX_LOG_DEPTH {
                return Err(BoardError::Capacity(format!(
                    "log exceeds max depth {}",
                    boardmesh_log::MAX_LOG_DEPTH
                )));
            }
            if !seen.insert(cid.clone()) {
                return Err(BoardError::Capacity(format!("cycle detected at {cid}")));
            }

            let entry: BoardLogEntry = facade.load_board_log_entry(&cid).await?;
            let signature_valid = verify_entity(&entry, RecoveryPolicy::Enabled).is_ok();
            let next = entry.prev_log_cid.clone();
            newest_first.push(ChainEntry {
                cid,
                entry,
                signature_valid,
            });
            cursor = next;
            depth += 1;
        }

        newest_first.reverse();
        Ok(newest_first)
    }

    async fn apply_entry<S: ContentStore + ?Sized>(
        &self,
        facade: &StorageFacade<S>,
        board_id: &str,
        chain_entry: &boardmesh_log::ChainEntry,
    ) -> Result<(), BoardError> {
        let entry = &chain_entry.entry;
        match entry.op {
            LogOp::CreateThread | LogOp::AddPost => {
                let Some(post_cid) = &entry.post_cid else {
                    return Ok(());
                };
                let post = facade.load_post(post_cid).await?;
                let Ok((post, _)) = verify_entity(&post, RecoveryPolicy::Enabled) else {
                    return Ok(());
                };

                if entry.op == LogOp::CreateThread {
                    // thread_id is defined as the CID of the ThreadMeta that created the
                    // thread, so it can be loaded directly for the title.
                    let title = facade
                        .load_thread_meta(&entry.thread_id)
                        .await
                        .map(|tm| tm.title)
                        .unwrap_or_else(|_| post.display_name.clone());
                    sqlx::query(
                        "INSERT INTO threads (thread_id, board_id, title, root_post_cid, created_at) \
                         VALUES (?, ?, ?, ?, ?) ON CONFLICT(thread_id) DO NOTHING",
                    )
                    .bind(entry.thread_id.as_str())
                    .bind(board_id)
                    .bind(&title)
                    .bind(post_cid.as_str())
                    .bind(&entry.created_at)
                    .execute(&self.pool)
                    .await
                    .map_err(sql_err)?;
                }

                sqlx::query(
                    "INSERT INTO posts (post_cid, thread_id, author_pub_key, display_name, body_content, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?) \
                     ON CONFLICT(post_cid) DO UPDATE SET body_content = excluded.body_content",
                )
                .bind(post_cid.as_str())
                .bind(entry.thread_id.as_str())
                .bind(post.author_pub_key.to_string())
                .bind(&post.display_name)
                .bind(&post.body.content)
                .bind(&post.created_at)
                .execute(&self.pool)
                .await
                .map_err(sql_err)?;

                let next_ordinal: (i64,) = sqlx::query_as(
                    "SELECT COALESCE(MAX(ordinal), -1) + 1 FROM thread_posts WHERE thread_id = ?",
                )
                .bind(entry.thread_id.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(sql_err)?;

                sqlx::query(
                    "INSERT INTO thread_posts (thread_id, ordinal, post_cid) VALUES (?, ?, ?)",
                )
                .bind(entry.thread_id.as_str())
                .bind(next_ordinal.0)
                .bind(post_cid.as_str())
                .execute(&self.pool)
                .await
                .map_err(sql_err)?;
            }
            LogOp::EditPost => {
                let (Some(old_cid), Some(new_cid)) = (&entry.old_post_cid, &entry.new_post_cid) else {
                    return Ok(());
                };
                let Ok(old_post) = facade.load_post(old_cid).await else {
                    return Ok(());
                };
                let Ok(new_post) = facade.load_post(new_cid).await else {
                    return Ok(());
                };
                let Ok((new_post, _)) = verify_entity(&new_post, RecoveryPolicy::Enabled) else {
                    return Ok(());
                };
                let authors_match = entry.author_pub_key.to_string() == old_post.author_pub_key.to_string()
                    && entry.author_pub_key.to_string() == new_post.author_pub_key.to_string();
                if !authors_match {
                    return Ok(());
                }

                sqlx::query(
                    "INSERT INTO posts (post_cid, thread_id, author_pub_key, display_name, body_content, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?) \
                     ON CONFLICT(post_cid) DO UPDATE SET body_content = excluded.body_content",
                )
                .bind(new_cid.as_str())
                .bind(entry.thread_id.as_str())
                .bind(new_post.author_pub_key.to_string())
                .bind(&new_post.display_name)
                .bind(&new_post.body.content)
                .bind(&new_post.created_at)
                .execute(&self.pool)
                .await
                .map_err(sql_err)?;

                sqlx::query(
                    "UPDATE thread_posts SET post_cid = ? WHERE thread_id = ? AND post_cid = ?",
                )
                .bind(new_cid.as_str())
                .bind(entry.thread_id.as_str())
                .bind(old_cid.as_str())
                .execute(&self.pool)
                .await
                .map_err(sql_err)?;
            }
            LogOp::TombstonePost => {
                let Some(target_cid) = &entry.target_post_cid else {
                    return Ok(());
                };
                sqlx::query(
                    "UPDATE thread_posts SET tombstoned = 1, tombstone_reason = ?, \
                     tombstone_created_at = ?, tombstone_author_pubkey = ? \
                     WHERE thread_id = ? AND post_cid = ?",
                )
                .bind(&entry.reason)
                .bind(&entry.created_at)
                .bind(entry.author_pub_key.to_string())
                .bind(entry.thread_id.as_str())
                .bind(target_cid.as_str())
                .execute(&self.pool)
                .await
                .map_err(sql_err)?;
            }
        }
        Ok(())
    }

    pub async fn search_boards(&self, text: &str, limit: Option<i64>, offset: i64) -> Result<Vec<BoardRow>, BoardError> {
        let limit = self.clamp_limit(limit);
        let pattern = format!("%{text}%");
        let rows = sqlx::query(
            "SELECT board_id, title, description FROM boards \
             WHERE title LIKE ? OR description LIKE ? OR board_id LIKE ? \
             ORDER BY board_id LIMIT ? OFFSET ?",
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_err)?;

        Ok(rows
            .iter()
            .map(|r| BoardRow {
                board_id: r.get("board_id"),
                title: r.get("title"),
                description: r.get("description"),
            })
            .collect())
    }

    /// Resolves a thread to the board it belongs to, so a handler that only
    /// has a `thread_id` (reply/edit/tombstone) can find the board's log
    /// head without the caller having to pass `board_id` redundantly.
    pub async fn get_thread_board(&self, thread_id: &str) -> Result<Option<String>, BoardError> {
        let row = sqlx::query("SELECT board_id FROM threads WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(row.map(|r| r.get("board_id")))
    }

    pub async fn search_threads(
        &self,
        board_id: Option<&str>,
        text: &str,
        limit: Option<i64>,
        offset: i64,
    ) -> Result<Vec<ThreadRow>, BoardError> {
        let limit = self.clamp_limit(limit);
        let pattern = format!("%{text}%");
        let rows = sqlx::query(
            "SELECT thread_id, board_id, title, root_post_cid, created_at FROM threads \
             WHERE title LIKE ? AND (? IS NULL OR board_id = ?) \
             ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(&pattern)
        .bind(board_id)
        .bind(board_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_err)?;

        Ok(rows
            .iter()
            .map(|r| ThreadRow {
                thread_id: r.get("thread_id"),
                board_id: r.get("board_id"),
                title: r.get("title"),
                root_post_cid: r.get("root_post_cid"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    pub async fn search_posts(
        &self,
        filter: &PostSearchFilter,
        limit: Option<i64>,
        offset: i64,
    ) -> Result<Vec<PostRow>, BoardError> {
        let limit = self.clamp_limit(limit);
        let pattern = filter.text.as_deref().map(|t| format!("%{t}%"));

        let rows = sqlx::query(
            "SELECT p.post_cid, p.thread_id, tp.ordinal, p.author_pub_key, p.display_name, \
                    p.body_content, p.created_at, tp.tombstoned \
             FROM posts p \
             JOIN thread_posts tp ON tp.post_cid = p.post_cid AND tp.thread_id = p.thread_id \
             JOIN threads t ON t.thread_id = p.thread_id \
             WHERE tp.tombstoned = 0 \
               AND (? IS NULL OR t.board_id = ?) \
               AND (? IS NULL OR p.author_pub_key = ?) \
               AND (? IS NULL OR p.created_at >= ?) \
               AND (? IS NULL OR p.created_at <= ?) \
               AND (? IS NULL OR p.body_content LIKE ?) \
             ORDER BY p.created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(&filter.board_id)
        .bind(&filter.board_id)
        .bind(&filter.author_pub_key)
        .bind(&filter.author_pub_key)
        .bind(&filter.since)
        .bind(&filter.since)
        .bind(&filter.until)
        .bind(&filter.until)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(sql_err)?;

        Ok(rows
            .iter()
            .map(|r| PostRow {
                post_cid: r.get("post_cid"),
                thread_id: r.get("thread_id"),
                ordinal: r.get("ordinal"),
                author_pub_key: r.get("author_pub_key"),
                display_name: r.get("display_name"),
                body_content: r.get("body_content"),
                created_at: r.get("created_at"),
                tombstoned: r.get::<i64, _>("tombstoned") != 0,
            })
            .collect())
    }
}

fn sql_err(e: sqlx::Error) -> BoardError {
    BoardError::Transient(format!("index db: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardmesh_store::InMemoryContentStore;
    use boardmesh_types::{sign_entity, Body, BoardLogEntry, BoardMeta, Post, PrivateKey};
    use std::sync::Arc;

    fn facade() -> StorageFacade<InMemoryContentStore> {
        StorageFacade::new(Arc::new(InMemoryContentStore::new()))
    }

    async fn seed_board(
        facade: &StorageFacade<InMemoryContentStore>,
        sk: &PrivateKey,
        board_id: &str,
    ) -> Cid {
        let post = {
            let mut p = Post {
                thread_id: "thread-1".into(),
                parent_post_cid: None,
                author_pub_key: sk.public_key(),
                display_name: "alice".into(),
                body: Body {
                    format: "markdown".into(),
                    content: "hello".into(),
                },
                created_at: "2026-01-01T00:00:00Z".into(),
                edited_at: None,
                meta: serde_json::Value::Null,
                attachments: vec![],
                signature: sk.sign(b"x"),
            };
            sign_entity(sk, &mut p);
            p
        };
        let post_cid = facade.save_post(&post, board_id).await.unwrap();

        let mut entry = BoardLogEntry {
            board_id: board_id.into(),
            op: LogOp::CreateThread,
            thread_id: "thread-1".into(),
            post_cid: Some(post_cid),
            old_post_cid: None,
            new_post_cid: None,
            target_post_cid: None,
            reason: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            author_pub_key: sk.public_key(),
            prev_log_cid: None,
            signature: sk.sign(b"x"),
        };
        sign_entity(sk, &mut entry);
        let log_cid = facade.save_board_log_entry(&entry).await.unwrap();

        let mut board_meta = BoardMeta {
            board_id: board_id.into(),
            title: "General".into(),
            description: "catch-all board".into(),
            log_head_cid: Some(log_cid),
            created_at: "2026-01-01T00:00:00Z".into(),
            created_by: sk.public_key(),
            signature: sk.sign(b"x"),
        };
        sign_entity(sk, &mut board_meta);
        facade.save_board_meta(&board_meta).await.unwrap()
    }

    #[tokio::test]
    async fn sync_mirrors_a_thread_and_its_post() {
        let facade = facade();
        let sk = PrivateKey::generate();
        let meta_cid = seed_board(&facade, &sk, "board-1").await;

        let index = IndexerStore::in_memory().await.unwrap();
        index.sync_board_by_meta_cid(&facade, &meta_cid).await.unwrap();

        let boards = index.search_boards("General", None, 0).await.unwrap();
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].board_id, "board-1");

        let threads = index.search_threads(Some("board-1"), "", None, 0).await.unwrap();
        assert_eq!(threads.len(), 1);
        assert!(!threads[0].root_post_cid.is_empty());
        assert_eq!(
            index.get_thread_board("thread-1").await.unwrap(),
            Some("board-1".to_string())
        );

        let posts = index
            .search_posts(&PostSearchFilter {
                board_id: Some("board-1".into()),
                ..Default::default()
            }, None, 0)
            .await
            .unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].body_content, "hello");
        assert!(!posts[0].tombstoned);
    }

    #[tokio::test]
    async fn sync_is_exactly_once_on_repeated_calls() {
        let facade = facade();
        let sk = PrivateKey::generate();
        let meta_cid = seed_board(&facade, &sk, "board-1").await;

        let index = IndexerStore::in_memory().await.unwrap();
        index.sync_board_by_meta_cid(&facade, &meta_cid).await.unwrap();
        index.sync_board_by_meta_cid(&facade, &meta_cid).await.unwrap();

        let posts = index
            .search_posts(&PostSearchFilter::default(), None, 0)
            .await
            .unwrap();
        assert_eq!(posts.len(), 1);
    }
}
