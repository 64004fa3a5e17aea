//! HTTP handlers implementing the route table: list/read boards and
//! threads, mutate via thread/post/edit/tombstone, search (local or
//! proxied), and the announce/gossip endpoints.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use boardmesh_gossip::{AnnounceMessage, AnnounceOutcome};
use boardmesh_log::{fetch_chain, MAX_LOG_DEPTH};
use boardmesh_replay::replay_thread;
use boardmesh_types::{
    sign_entity, verify_entity, Attachment, BoardError, BoardLogEntry, BoardMeta, Body, Cid,
    LogOp, Post, PrivateKey, RecoveryPolicy, ThreadMeta,
};

use crate::error::ApiError;
use crate::state::AppState;

fn recovery_policy(state: &AppState) -> RecoveryPolicy {
    if state.config.enable_latin1_recovery {
        RecoveryPolicy::Enabled
    } else {
        RecoveryPolicy::Disabled
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn clamp_offset(offset: Option<i64>) -> i64 {
    offset.filter(|&o| o >= 0).unwrap_or(0)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/boards", get(list_boards))
        .route("/api/v1/boards/:id", get(get_board))
        .route("/api/v1/boards/:id/threads", get(list_threads))
        .route("/api/v1/threads/:id", get(get_thread))
        .route("/api/v1/threads", post(create_thread))
        .route("/api/v1/posts", post(add_post))
        .route("/api/v1/posts/:cid/edit", post(edit_post))
        .route("/api/v1/posts/:cid/tombstone", post(tombstone_post))
        .route("/api/v1/search/boards", get(search_boards))
        .route("/api/v1/search/threads", get(search_threads))
        .route("/api/v1/search/posts", get(search_posts))
        .route("/api/v1/announce/board", post(announce_board))
        .route("/api/v1/trusted-indexers", get(list_trusted_indexers))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> String {
    format!("ok role={}", state.config.role)
}

// ---- boards ----

async fn list_boards(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mut boards = Vec::new();
    for (board_id, meta_cid) in state.boards.list() {
        let meta = state.facade.load_board_meta(&meta_cid).await?;
        let (meta, _) = verify_entity(&meta, recovery_policy(&state)).map_err(|_| BoardError::SignatureInvalid)?;
        boards.push(json!({
            "boardId": board_id,
            "title": meta.title,
            "description": meta.description,
        }));
    }
    Ok(Json(json!({ "boards": boards })))
}

async fn get_board(State(state): State<AppState>, Path(board_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let meta_cid = state
        .boards
        .get(&board_id)
        .ok_or_else(|| BoardError::NotFound(format!("board {board_id} not found")))?;
    let meta = state.facade.load_board_meta(&meta_cid).await?;
    let (meta, _) = verify_entity(&meta, recovery_policy(&state)).map_err(|_| BoardError::SignatureInvalid)?;
    Ok(Json(json!({
        "boardId": meta.board_id,
        "title": meta.title,
        "description": meta.description,
        "createdAt": meta.created_at,
        "createdBy": meta.created_by.to_string(),
    })))
}

#[derive(Deserialize)]
struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_threads(
    State(state): State<AppState>,
    Path(board_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    if state.boards.get(&board_id).is_none() {
        return Err(BoardError::NotFound(format!("board {board_id} not found")).into());
    }
    let Some(indexer) = &state.indexer else {
        return Err(BoardError::Upstream("no local indexer to list threads from".into()).into());
    };
    let rows = indexer
        .search_threads(Some(&board_id), "", page.limit, clamp_offset(page.offset))
        .await?;
    let threads: Vec<Value> = rows
        .into_iter()
        .map(|r| {
            json!({
                "threadId": r.thread_id,
                "boardId": r.board_id,
                "title": r.title,
                "rootPostCid": r.root_post_cid,
                "createdAt": r.created_at,
            })
        })
        .collect();
    Ok(Json(json!({ "threads": threads })))
}

// ---- threads & posts ----

async fn get_thread(State(state): State<AppState>, Path(thread_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let Some(indexer) = &state.indexer else {
        return Err(BoardError::Upstream("no local indexer to resolve thread's board".into()).into());
    };
    let Some(board_id) = indexer.get_thread_board(&thread_id).await? else {
        return Err(BoardError::NotFound(format!("thread {thread_id} not found")).into());
    };
    let meta_cid = state
        .boards
        .get(&board_id)
        .ok_or_else(|| BoardError::NotFound(format!("board {board_id} not found")))?;
    let board_meta = state.facade.load_board_meta(&meta_cid).await?;
    let (board_meta, _) = verify_entity(&board_meta, recovery_policy(&state)).map_err(|_| BoardError::SignatureInvalid)?;

    let chain = match &board_meta.log_head_cid {
        Some(head) => Some(fetch_chain(&state.facade, head, MAX_LOG_DEPTH).await?),
        None => None,
    };
    let posts = replay_thread(&state.facade, chain.as_deref(), &board_id, &thread_id).await;
    if posts.is_empty() && chain.is_none() {
        return Err(BoardError::Upstream(format!("no posts found for thread {thread_id}")).into());
    }

    let posts: Vec<Value> = posts
        .into_iter()
        .map(|p| {
            json!({
                "cid": p.cid.as_str(),
                "post": post_to_json(&p.post),
                "tombstoned": p.tombstoned,
                "tombstoneReason": p.tombstone_reason,
            })
        })
        .collect();
    Ok(Json(json!({ "threadId": thread_id, "boardId": board_id, "posts": posts })))
}

fn post_to_json(post: &Post) -> Value {
    json!({
        "threadId": post.thread_id.as_str(),
        "parentPostCid": post.parent_post_cid.as_ref().map(|c| c.as_str()),
        "authorPubKey": post.author_pub_key.to_string(),
        "displayName": post.display_name,
        "body": { "format": post.body.format, "content": post.body.content },
        "createdAt": post.created_at,
        "editedAt": post.edited_at,
        "meta": post.meta,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateThreadRequest {
    board_id: String,
    title: String,
    display_name: String,
    body: Body,
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default)]
    thread_meta: Value,
    #[serde(default)]
    post_meta: Value,
    author_priv_key: String,
}

async fn create_thread(
    State(state): State<AppState>,
    Json(req): Json<CreateThreadRequest>,
) -> Result<Json<Value>, ApiError> {
    let sk = PrivateKey::parse(&req.author_priv_key)?;
    let meta_cid = state
        .boards
        .get(&req.board_id)
        .ok_or_else(|| BoardError::NotFound(format!("board {} not found", req.board_id)))?;
    let board_meta = state.facade.load_board_meta(&meta_cid).await?;
    let (board_meta, _) = verify_entity(&board_meta, recovery_policy(&state)).map_err(|_| BoardError::SignatureInvalid)?;

    let created_at = now_rfc3339();

    // threadId is defined as the CID of the ThreadMeta at creation, which we
    // don't know until it's stored; threadId/rootPostCid aren't part of the
    // signed payload so the placeholder values below don't affect the signature.
    let mut thread_meta = ThreadMeta {
        thread_id: Cid::new(""),
        board_id: req.board_id.clone(),
        title: req.title.clone(),
        root_post_cid: Cid::new(""),
        created_at: created_at.clone(),
        created_by: sk.public_key(),
        meta: req.thread_meta.clone(),
        signature: sk.sign(b"placeholder"),
    };
    sign_entity(&sk, &mut thread_meta);
    let thread_cid = state.facade.save_thread_meta(&thread_meta, &req.board_id).await?;

    let mut root_post = Post {
        thread_id: thread_cid.clone(),
        parent_post_cid: None,
        author_pub_key: sk.public_key(),
        display_name: req.display_name.clone(),
        body: req.body.clone(),
        created_at: created_at.clone(),
        edited_at: None,
        meta: req.post_meta.clone(),
        attachments: req.attachments.clone(),
        signature: sk.sign(b"placeholder"),
    };
    sign_entity(&sk, &mut root_post);
    let post_cid = state.facade.save_post(&root_post, &req.board_id).await?;

    // thread_id/root_post_cid aren't part of the signed payload, so filling
    // them in here doesn't invalidate the signature computed above.
    thread_meta.thread_id = thread_cid.clone();
    thread_meta.root_post_cid = post_cid.clone();
    state.facade.finalize_thread_meta(&thread_meta, &req.board_id).await?;

    let log_cid = append_log_entry(
        &state,
        &sk,
        &req.board_id,
        LogOp::CreateThread,
        thread_cid.clone(),
        board_meta.log_head_cid.clone(),
        Some(post_cid.clone()),
        None,
        None,
        None,
        None,
        &created_at,
    )
    .await?;

    advance_board_head(&state, &board_meta, log_cid).await?;

    Ok(Json(json!({
        "threadId": thread_cid.as_str(),
        "rootPostCid": post_cid.as_str(),
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddPostRequest {
    thread_id: String,
    parent_post_cid: Option<String>,
    display_name: String,
    body: Body,
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default)]
    meta: Value,
    author_priv_key: String,
}

async fn add_post(State(state): State<AppState>, Json(req): Json<AddPostRequest>) -> Result<Json<Value>, ApiError> {
    let sk = PrivateKey::parse(&req.author_priv_key)?;
    let board_id = resolve_thread_board(&state, &req.thread_id).await?;
    let meta_cid = state
        .boards
        .get(&board_id)
        .ok_or_else(|| BoardError::NotFound(format!("board {board_id} not found")))?;
    let board_meta = state.facade.load_board_meta(&meta_cid).await?;
    let (board_meta, _) = verify_entity(&board_meta, recovery_policy(&state)).map_err(|_| BoardError::SignatureInvalid)?;

    let created_at = now_rfc3339();
    let thread_id: Cid = req.thread_id.as_str().into();
    let mut post = Post {
        thread_id: thread_id.clone(),
        parent_post_cid: req.parent_post_cid.as_deref().map(Cid::from),
        author_pub_key: sk.public_key(),
        display_name: req.display_name.clone(),
        body: req.body.clone(),
        created_at: created_at.clone(),
        edited_at: None,
        meta: req.meta.clone(),
        attachments: req.attachments.clone(),
        signature: sk.sign(b"placeholder"),
    };
    sign_entity(&sk, &mut post);
    let post_cid = state.facade.save_post(&post, &board_id).await?;

    let log_cid = append_log_entry(
        &state,
        &sk,
        &board_id,
        LogOp::AddPost,
        thread_id,
        board_meta.log_head_cid.clone(),
        Some(post_cid.clone()),
        None,
        None,
        None,
        None,
        &created_at,
    )
    .await?;

    advance_board_head(&state, &board_meta, log_cid).await?;

    Ok(Json(json!({ "postCid": post_cid.as_str() })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditPostRequest {
    body: Body,
    display_name: Option<String>,
    author_priv_key: String,
}

async fn edit_post(
    State(state): State<AppState>,
    Path(old_cid): Path<String>,
    Json(req): Json<EditPostRequest>,
) -> Result<Json<Value>, ApiError> {
    let sk = PrivateKey::parse(&req.author_priv_key)?;
    let old_cid = Cid::new(old_cid);
    let old_post = state.facade.load_post(&old_cid).await?;
    let (old_post, _) = verify_entity(&old_post, recovery_policy(&state)).map_err(|_| BoardError::SignatureInvalid)?;
    if old_post.author_pub_key != sk.public_key() {
        return Err(BoardError::Unauthorized("author key does not match the post being edited".into()).into());
    }

    let board_id = resolve_thread_board(&state, old_post.thread_id.as_str()).await?;
    let meta_cid = state
        .boards
        .get(&board_id)
        .ok_or_else(|| BoardError::NotFound(format!("board {board_id} not found")))?;
    let board_meta = state.facade.load_board_meta(&meta_cid).await?;
    let (board_meta, _) = verify_entity(&board_meta, recovery_policy(&state)).map_err(|_| BoardError::SignatureInvalid)?;

    let created_at = now_rfc3339();
    let mut new_post = Post {
        thread_id: old_post.thread_id.clone(),
        parent_post_cid: old_post.parent_post_cid.clone(),
        author_pub_key: sk.public_key(),
        display_name: req.display_name.clone().unwrap_or_else(|| old_post.display_name.clone()),
        body: req.body.clone(),
        created_at: old_post.created_at.clone(),
        edited_at: Some(created_at.clone()),
        meta: old_post.meta.clone(),
        attachments: old_post.attachments.clone(),
        signature: sk.sign(b"placeholder"),
    };
    sign_entity(&sk, &mut new_post);
    let new_cid = state.facade.save_post(&new_post, &board_id).await?;

    let log_cid = append_log_entry(
        &state,
        &sk,
        &board_id,
        LogOp::EditPost,
        old_post.thread_id.clone(),
        board_meta.log_head_cid.clone(),
        None,
        Some(old_cid),
        Some(new_cid.clone()),
        None,
        None,
        &created_at,
    )
    .await?;

    advance_board_head(&state, &board_meta, log_cid).await?;

    Ok(Json(json!({ "newPostCid": new_cid.as_str() })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TombstoneRequest {
    reason: Option<String>,
    author_priv_key: String,
}

async fn tombstone_post(
    State(state): State<AppState>,
    Path(target_cid): Path<String>,
    Json(req): Json<TombstoneRequest>,
) -> Result<Json<Value>, ApiError> {
    let sk = PrivateKey::parse(&req.author_priv_key)?;
    let target_cid = Cid::new(target_cid);
    let target_post = state.facade.load_post(&target_cid).await?;
    let (target_post, _) = verify_entity(&target_post, recovery_policy(&state)).map_err(|_| BoardError::SignatureInvalid)?;
    if target_post.author_pub_key != sk.public_key() {
        return Err(BoardError::Unauthorized("author key does not match the post being tombstoned".into()).into());
    }

    let board_id = resolve_thread_board(&state, target_post.thread_id.as_str()).await?;
    let meta_cid = state
        .boards
        .get(&board_id)
        .ok_or_else(|| BoardError::NotFound(format!("board {board_id} not found")))?;
    let board_meta = state.facade.load_board_meta(&meta_cid).await?;
    let (board_meta, _) = verify_entity(&board_meta, recovery_policy(&state)).map_err(|_| BoardError::SignatureInvalid)?;

    let created_at = now_rfc3339();
    let log_cid = append_log_entry(
        &state,
        &sk,
        &board_id,
        LogOp::TombstonePost,
        target_post.thread_id.clone(),
        board_meta.log_head_cid.clone(),
        None,
        None,
        None,
        Some(target_cid.clone()),
        req.reason.clone(),
        &created_at,
    )
    .await?;

    advance_board_head(&state, &board_meta, log_cid).await?;

    Ok(Json(json!({ "tombstoned": true, "postCid": target_cid.as_str() })))
}

/// Resolves a thread to its board via the local indexer, the only place
/// that tracks the mapping independent of the board log itself.
async fn resolve_thread_board(state: &AppState, thread_id: &str) -> Result<String, BoardError> {
    let Some(indexer) = &state.indexer else {
        return Err(BoardError::Upstream("no local indexer to resolve thread's board".into()));
    };
    indexer
        .get_thread_board(thread_id)
        .await?
        .ok_or_else(|| BoardError::NotFound(format!("thread {thread_id} not found")))
}

#[allow(clippy::too_many_arguments)]
async fn append_log_entry(
    state: &AppState,
    sk: &PrivateKey,
    board_id: &str,
    op: LogOp,
    thread_id: Cid,
    prev_log_cid: Option<Cid>,
    post_cid: Option<Cid>,
    old_post_cid: Option<Cid>,
    new_post_cid: Option<Cid>,
    target_post_cid: Option<Cid>,
    reason: Option<String>,
    created_at: &str,
) -> Result<Cid, BoardError> {
    let mut entry = BoardLogEntry {
        board_id: board_id.to_string(),
        op,
        thread_id,
        post_cid,
        old_post_cid,
        new_post_cid,
        target_post_cid,
        reason,
        created_at: created_at.to_string(),
        author_pub_key: sk.public_key(),
        prev_log_cid,
        signature: sk.sign(b"placeholder"),
    };
    sign_entity(sk, &mut entry);
    Ok(state.facade.save_board_log_entry(&entry).await?)
}

/// Advances a board's head by saving a new `BoardMeta` whose `logHeadCid`
/// points at the new log entry, reusing the original signature (`logHeadCid`
/// is excluded from the canonical payload, so the signature stays valid),
/// then upserts the registry and eagerly syncs the local indexer so a
/// follow-up reply/edit/tombstone on the same node can resolve the thread
/// before the next periodic sync tick runs.
async fn advance_board_head(state: &AppState, board_meta: &BoardMeta, log_cid: Cid) -> Result<(), BoardError> {
    let mut new_meta = board_meta.clone();
    new_meta.log_head_cid = Some(log_cid);
    let new_meta_cid = state.facade.save_board_meta(&new_meta).await?;
    state.boards.upsert(&new_meta.board_id, new_meta_cid.clone())?;

    if let Some(indexer) = &state.indexer {
        indexer.sync_board_by_meta_cid(&state.facade, &new_meta_cid).await?;
    }
    Ok(())
}

// ---- search ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchQuery {
    #[serde(default)]
    q: String,
    board_id: Option<String>,
    author: Option<String>,
    since: Option<String>,
    until: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

fn search_query_string(q: &SearchQuery) -> String {
    let mut pairs = vec![("q".to_string(), q.q.clone())];
    if let Some(b) = &q.board_id {
        pairs.push(("boardId".to_string(), b.clone()));
    }
    if let Some(a) = &q.author {
        pairs.push(("author".to_string(), a.clone()));
    }
    if let Some(s) = &q.since {
        pairs.push(("since".to_string(), s.clone()));
    }
    if let Some(u) = &q.until {
        pairs.push(("until".to_string(), u.clone()));
    }
    if let Some(l) = q.limit {
        pairs.push(("limit".to_string(), l.to_string()));
    }
    pairs.push(("offset".to_string(), clamp_offset(q.offset).to_string()));
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(&v)))
        .collect::<Vec<_>>()
        .join("&")
}

async fn search_boards(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> Result<Json<Value>, ApiError> {
    if let Some(indexer) = &state.indexer {
        let rows = indexer.search_boards(&q.q, q.limit, clamp_offset(q.offset)).await?;
        let boards: Vec<Value> = rows
            .into_iter()
            .map(|r| json!({ "boardId": r.board_id, "title": r.title, "description": r.description }))
            .collect();
        return Ok(Json(json!({ "boards": boards })));
    }
    proxy_search(&state, "boards", &search_query_string(&q)).await
}

async fn search_threads(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> Result<Json<Value>, ApiError> {
    if let Some(indexer) = &state.indexer {
        let rows = indexer
            .search_threads(q.board_id.as_deref(), &q.q, q.limit, clamp_offset(q.offset))
            .await?;
        let threads: Vec<Value> = rows
            .into_iter()
            .map(|r| {
                json!({
                    "threadId": r.thread_id,
                    "boardId": r.board_id,
                    "title": r.title,
                    "rootPostCid": r.root_post_cid,
                    "createdAt": r.created_at,
                })
            })
            .collect();
        return Ok(Json(json!({ "threads": threads })));
    }
    proxy_search(&state, "threads", &search_query_string(&q)).await
}

async fn search_posts(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> Result<Json<Value>, ApiError> {
    if let Some(indexer) = &state.indexer {
        let filter = boardmesh_indexer::PostSearchFilter {
            board_id: q.board_id.clone(),
            author_pub_key: q.author.clone(),
            since: q.since.clone(),
            until: q.until.clone(),
            text: Some(q.q.clone()),
        };
        let rows = indexer.search_posts(&filter, q.limit, clamp_offset(q.offset)).await?;
        let posts: Vec<Value> = rows
            .into_iter()
            .map(|r| {
                json!({
                    "postCid": r.post_cid,
                    "threadId": r.thread_id,
                    "ordinal": r.ordinal,
                    "authorPubKey": r.author_pub_key,
                    "displayName": r.display_name,
                    "bodyContent": r.body_content,
                    "createdAt": r.created_at,
                    "tombstoned": r.tombstoned,
                })
            })
            .collect();
        return Ok(Json(json!({ "posts": posts })));
    }
    proxy_search(&state, "posts", &search_query_string(&q)).await
}

async fn proxy_search(state: &AppState, kind: &str, query: &str) -> Result<Json<Value>, ApiError> {
    let indexers = state.trusted_indexers.list();
    if indexers.is_empty() {
        return Err(BoardError::NotConfigured("no local indexer and no trusted indexers to proxy search to".into()).into());
    }
    let path_and_query = format!("/api/v1/search/{kind}?{query}");
    let value: Value = state.gossip.search_via_indexers(&indexers, &path_and_query).await?;
    Ok(Json(value))
}

// ---- announce / gossip ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnounceRequest {
    board_meta_cid: String,
}

#[derive(Serialize)]
struct AnnounceResponse {
    accepted: bool,
    #[serde(rename = "ignoredReason", skip_serializing_if = "Option::is_none")]
    ignored_reason: Option<String>,
}

async fn announce_board(
    State(state): State<AppState>,
    Json(req): Json<AnnounceRequest>,
) -> Result<Json<AnnounceResponse>, ApiError> {
    let announce = AnnounceMessage {
        meta_cid: Cid::new(req.board_meta_cid),
        from: None,
    };
    let outcome = state
        .gossip
        .accept_announce(
            state.config.role,
            &state.facade,
            &state.boards,
            &state.config.trusted_peers,
            announce,
        )
        .await?;

    let response = match outcome {
        AnnounceOutcome::Duplicate => AnnounceResponse {
            accepted: false,
            ignored_reason: Some("seen".to_string()),
        },
        AnnounceOutcome::Rejected(reason) => AnnounceResponse {
            accepted: false,
            ignored_reason: Some(reason),
        },
        AnnounceOutcome::Applied { advanced: true, .. } => AnnounceResponse {
            accepted: true,
            ignored_reason: None,
        },
        AnnounceOutcome::Applied { advanced: false, reason } => AnnounceResponse {
            accepted: false,
            ignored_reason: Some(reason.to_string()),
        },
    };
    Ok(Json(response))
}

async fn list_trusted_indexers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "trustedIndexers": state.trusted_indexers.list() }))
}
