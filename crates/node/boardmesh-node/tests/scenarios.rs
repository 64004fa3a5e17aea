//! End-to-end scenario tests driving the real router with an in-memory
//! content store and indexer, one test per scenario in the interface spec.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use boardmesh_config::BoardmeshConfig;
use boardmesh_gossip::GossipPeer;
use boardmesh_indexer::IndexerStore;
use boardmesh_node::state::AppState;
use boardmesh_registry::{BoardRegistry, TrustedIndexerRegistry};
use boardmesh_store::{ContentStore, InMemoryContentStore, StorageFacade};
use boardmesh_types::{sign_entity, BoardMeta, PrivateKey};

fn test_config() -> BoardmeshConfig {
    BoardmeshConfig::from_toml_str(
        r#"
        role = "full"
        content_store_endpoint = "http://unused.invalid"
        "#,
    )
    .unwrap()
}

async fn test_state() -> AppState {
    let store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
    test_state_on(store).await
}

/// Builds a node sharing the given content store, the way two real nodes
/// share one external content-addressed backend but keep separate
/// registries/indexes.
async fn test_state_on(store: Arc<dyn ContentStore>) -> AppState {
    let facade = StorageFacade::new(store);
    // Registries need a real directory for their atomic-write path; leak it
    // into a plain PathBuf since the test process is short-lived.
    let dir = tempfile::tempdir().unwrap().into_path();
    let boards = Arc::new(BoardRegistry::load(dir.join("boards.json")).unwrap());
    let trusted_indexers = Arc::new(TrustedIndexerRegistry::load(dir.join("trusted_indexers.json")).unwrap());
    let indexer = Some(Arc::new(IndexerStore::in_memory().await.unwrap()));
    let gossip = Arc::new(GossipPeer::new(64, std::time::Duration::from_secs(60), std::time::Duration::from_secs(1)));

    AppState {
        config: Arc::new(test_config()),
        facade,
        boards,
        trusted_indexers,
        indexer,
        gossip,
    }
}

async fn seed_board(state: &AppState, sk: &PrivateKey, board_id: &str) {
    let mut bm = BoardMeta {
        board_id: board_id.to_string(),
        title: "General".into(),
        description: String::new(),
        log_head_cid: None,
        created_at: "2026-01-01T00:00:00Z".into(),
        created_by: sk.public_key(),
        signature: sk.sign(b"placeholder"),
    };
    sign_entity(sk, &mut bm);
    let cid = state.facade.save_board_meta(&bm).await.unwrap();
    state.boards.upsert(board_id, cid).unwrap();
}

async fn call(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let router = boardmesh_node::routes::router(state.clone());
    let request = match body {
        Some(b) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&b).unwrap()))
            .unwrap(),
        None => Request::builder().method(method).uri(uri).body(Body::empty()).unwrap(),
    };
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn scenario_1_create_and_read() {
    let state = test_state().await;
    let sk = PrivateKey::generate();
    seed_board(&state, &sk, "bbs.general").await;

    let (status, created) = call(
        &state,
        "POST",
        "/api/v1/threads",
        Some(json!({
            "boardId": "bbs.general",
            "title": "hello",
            "displayName": "alice",
            "body": { "format": "markdown", "content": "first" },
            "authorPrivKey": sk.to_seed_string(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let thread_id = created["threadId"].as_str().unwrap().to_string();
    let root_post_cid = created["rootPostCid"].as_str().unwrap().to_string();

    let (status, threads) = call(&state, "GET", "/api/v1/boards/bbs.general/threads", None).await;
    assert_eq!(status, StatusCode::OK);
    let thread_list = threads["threads"].as_array().unwrap();
    assert_eq!(thread_list.len(), 1);
    assert_eq!(thread_list[0]["rootPostCid"], root_post_cid);

    let (status, thread) = call(&state, "GET", &format!("/api/v1/threads/{thread_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let posts = thread["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["tombstoned"], false);
}

#[tokio::test]
async fn scenario_2_edit() {
    let state = test_state().await;
    let sk = PrivateKey::generate();
    seed_board(&state, &sk, "bbs.general").await;

    let (_, created) = call(
        &state,
        "POST",
        "/api/v1/threads",
        Some(json!({
            "boardId": "bbs.general",
            "title": "hello",
            "displayName": "alice",
            "body": { "format": "markdown", "content": "first" },
            "authorPrivKey": sk.to_seed_string(),
        })),
    )
    .await;
    let thread_id = created["threadId"].as_str().unwrap().to_string();
    let old_cid = created["rootPostCid"].as_str().unwrap().to_string();

    let (status, edited) = call(
        &state,
        "POST",
        &format!("/api/v1/posts/{old_cid}/edit"),
        Some(json!({
            "body": { "format": "markdown", "content": "first (edited)" },
            "authorPrivKey": sk.to_seed_string(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let new_cid = edited["newPostCid"].as_str().unwrap().to_string();
    assert_ne!(new_cid, old_cid);

    let (_, thread) = call(&state, "GET", &format!("/api/v1/threads/{thread_id}"), None).await;
    let posts = thread["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 1, "edit replaces the ordinal, it does not append");
    assert_eq!(posts[0]["cid"], new_cid);
    assert_eq!(posts[0]["post"]["body"]["content"], "first (edited)");
}

#[tokio::test]
async fn scenario_3_edit_rejected_by_wrong_author() {
    let state = test_state().await;
    let sk = PrivateKey::generate();
    let other = PrivateKey::generate();
    seed_board(&state, &sk, "bbs.general").await;

    let (_, created) = call(
        &state,
        "POST",
        "/api/v1/threads",
        Some(json!({
            "boardId": "bbs.general",
            "title": "hello",
            "displayName": "alice",
            "body": { "format": "markdown", "content": "first" },
            "authorPrivKey": sk.to_seed_string(),
        })),
    )
    .await;
    let thread_id = created["threadId"].as_str().unwrap().to_string();
    let old_cid = created["rootPostCid"].as_str().unwrap().to_string();

    let (status, _) = call(
        &state,
        "POST",
        &format!("/api/v1/posts/{old_cid}/edit"),
        Some(json!({
            "body": { "format": "markdown", "content": "hijacked" },
            "authorPrivKey": other.to_seed_string(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, thread) = call(&state, "GET", &format!("/api/v1/threads/{thread_id}"), None).await;
    let posts = thread["posts"].as_array().unwrap();
    assert_eq!(posts[0]["cid"], old_cid, "rejected edit must not change the thread");
    assert_eq!(posts[0]["post"]["body"]["content"], "first");
}

#[tokio::test]
async fn scenario_4_tombstone() {
    let state = test_state().await;
    let sk = PrivateKey::generate();
    seed_board(&state, &sk, "bbs.general").await;

    let (_, created) = call(
        &state,
        "POST",
        "/api/v1/threads",
        Some(json!({
            "boardId": "bbs.general",
            "title": "hello",
            "displayName": "alice",
            "body": { "format": "markdown", "content": "first" },
            "authorPrivKey": sk.to_seed_string(),
        })),
    )
    .await;
    let thread_id = created["threadId"].as_str().unwrap().to_string();
    let old_cid = created["rootPostCid"].as_str().unwrap().to_string();

    let (_, edited) = call(
        &state,
        "POST",
        &format!("/api/v1/posts/{old_cid}/edit"),
        Some(json!({
            "body": { "format": "markdown", "content": "first (edited)" },
            "authorPrivKey": sk.to_seed_string(),
        })),
    )
    .await;
    let edited_cid = edited["newPostCid"].as_str().unwrap().to_string();

    let (status, _) = call(
        &state,
        "POST",
        &format!("/api/v1/posts/{edited_cid}/tombstone"),
        Some(json!({ "reason": "spam", "authorPrivKey": sk.to_seed_string() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, thread) = call(&state, "GET", &format!("/api/v1/threads/{thread_id}"), None).await;
    let posts = thread["posts"].as_array().unwrap();
    assert_eq!(posts[0]["tombstoned"], true);
    assert_eq!(posts[0]["tombstoneReason"], "spam");

    let (_, search) = call(&state, "GET", "/api/v1/search/posts?q=edited", None).await;
    assert!(search["posts"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn scenario_5_fork_rejection() {
    // Both nodes talk to the same content-addressed backend, as they would
    // in production; only their registries/indexes are node-local.
    let shared_store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
    let node_a = test_state_on(shared_store.clone()).await;
    let node_b = test_state_on(shared_store).await;
    let sk = PrivateKey::generate();

    let mut genesis = BoardMeta {
        board_id: "bbs.general".into(),
        title: "General".into(),
        description: String::new(),
        log_head_cid: None,
        created_at: "2026-01-01T00:00:00Z".into(),
        created_by: sk.public_key(),
        signature: sk.sign(b"placeholder"),
    };
    sign_entity(&sk, &mut genesis);
    let genesis_cid = node_a.facade.save_board_meta(&genesis).await.unwrap();
    node_a.boards.upsert("bbs.general", genesis_cid.clone()).unwrap();
    node_b.boards.upsert("bbs.general", genesis_cid.clone()).unwrap();

    // A and B each post a reply from the shared genesis head, diverging it.
    call(
        &node_a,
        "POST",
        "/api/v1/threads",
        Some(json!({
            "boardId": "bbs.general",
            "title": "a's thread",
            "displayName": "alice",
            "body": { "format": "markdown", "content": "from a" },
            "authorPrivKey": sk.to_seed_string(),
        })),
    )
    .await;
    call(
        &node_b,
        "POST",
        "/api/v1/threads",
        Some(json!({
            "boardId": "bbs.general",
            "title": "b's thread",
            "displayName": "alice",
            "body": { "format": "markdown", "content": "from b" },
            "authorPrivKey": sk.to_seed_string(),
        })),
    )
    .await;

    let a_head_meta_cid = node_a.boards.get("bbs.general").unwrap();
    let b_head_before = node_b.boards.get("bbs.general").unwrap();

    let (status, response) = call(
        &node_b,
        "POST",
        "/api/v1/announce/board",
        Some(json!({ "boardMetaCid": a_head_meta_cid.as_str() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["accepted"], false);
    assert_eq!(response["ignoredReason"], "fork");
    assert_eq!(node_b.boards.get("bbs.general").unwrap(), b_head_before);
}

#[tokio::test]
async fn scenario_6_fast_forward_acceptance() {
    let shared_store: Arc<dyn ContentStore> = Arc::new(InMemoryContentStore::new());
    let node_a = test_state_on(shared_store.clone()).await;
    let node_b = test_state_on(shared_store).await;
    let sk = PrivateKey::generate();

    let mut genesis = BoardMeta {
        board_id: "bbs.general".into(),
        title: "General".into(),
        description: String::new(),
        log_head_cid: None,
        created_at: "2026-01-01T00:00:00Z".into(),
        created_by: sk.public_key(),
        signature: sk.sign(b"placeholder"),
    };
    sign_entity(&sk, &mut genesis);
    let genesis_cid = node_a.facade.save_board_meta(&genesis).await.unwrap();
    node_a.boards.upsert("bbs.general", genesis_cid.clone()).unwrap();
    node_b.boards.upsert("bbs.general", genesis_cid.clone()).unwrap();

    call(
        &node_a,
        "POST",
        "/api/v1/threads",
        Some(json!({
            "boardId": "bbs.general",
            "title": "t1",
            "displayName": "alice",
            "body": { "format": "markdown", "content": "first" },
            "authorPrivKey": sk.to_seed_string(),
        })),
    )
    .await;
    let h1 = node_a.boards.get("bbs.general").unwrap();

    call(
        &node_a,
        "POST",
        "/api/v1/posts",
        Some(json!({
            "threadId": node_a
                .indexer
                .as_ref()
                .unwrap()
                .search_threads(Some("bbs.general"), "", None, 0)
                .await
                .unwrap()[0]
                .thread_id,
            "displayName": "alice",
            "body": { "format": "markdown", "content": "second" },
            "authorPrivKey": sk.to_seed_string(),
        })),
    )
    .await;
    let h2 = node_a.boards.get("bbs.general").unwrap();
    assert_ne!(h1, h2);

    let (status, response) = call(
        &node_b,
        "POST",
        "/api/v1/announce/board",
        Some(json!({ "boardMetaCid": h2.as_str() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["accepted"], true);
    assert_eq!(node_b.boards.get("bbs.general").unwrap(), h2);

    // advancing B's registry alone doesn't sync B's indexer; do that
    // explicitly the way the periodic loop would, then confirm both posts
    // landed exactly once.
    node_b
        .indexer
        .as_ref()
        .unwrap()
        .sync_board_by_meta_cid(&node_b.facade, &h2)
        .await
        .unwrap();
    let posts = node_b
        .indexer
        .as_ref()
        .unwrap()
        .search_posts(&boardmesh_indexer::PostSearchFilter::default(), None, 0)
        .await
        .unwrap();
    assert_eq!(posts.len(), 2);
}

#[tokio::test]
async fn boundary_offset_and_limit_clamp() {
    let state = test_state().await;
    let sk = PrivateKey::generate();
    seed_board(&state, &sk, "bbs.general").await;

    let (status, result) = call(&state, "GET", "/api/v1/search/threads?q=&offset=-5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(result["threads"].as_array().unwrap().is_empty());

    for i in 0..3 {
        call(
            &state,
            "POST",
            "/api/v1/threads",
            Some(json!({
                "boardId": "bbs.general",
                "title": format!("thread-{i}"),
                "displayName": "alice",
                "body": { "format": "markdown", "content": "first" },
                "authorPrivKey": sk.to_seed_string(),
            })),
        )
        .await;
    }

    // limit<=0 must fall back to the default page size (50), not clamp to 1.
    for limit in ["0", "-1"] {
        let (status, result) = call(
            &state,
            "GET",
            &format!("/api/v1/search/threads?q=thread&limit={limit}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["threads"].as_array().unwrap().len(), 3);
    }
}
