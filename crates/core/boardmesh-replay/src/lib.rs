#![deny(unsafe_code)]

//! Thread replay: folding an ordered board-log chain (or, as a fallback, a
//! tag-scanned and re-ordered set of log entries) into the post list for a
//! single thread, applying each operation one at a time.

use std::collections::HashMap;

use boardmesh_log::ChainEntry;
use boardmesh_store::{ContentStore, StorageFacade};
use boardmesh_types::{verify_entity, BoardLogEntry, Cid, LogOp, Post, RecoveryPolicy};

/// One post as it stands after folding the log, with tombstone state
/// overlaid rather than the post being removed from the list.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplayedPost {
    pub cid: Cid,
    pub post: Post,
    pub tombstoned: bool,
    pub tombstone_reason: Option<String>,
}

/// Folds a chain of log entries (oldest-first, as returned by
/// `boardmesh_log::fetch_chain`) restricted to `thread_id` into an ordered
/// post list. Entries with an invalid signature, entries for other threads,
/// and operations that fail an author-identity check are skipped rather than
/// aborting the whole replay.
pub async fn replay_chain<S: ContentStore + ?Sized>(
    facade: &StorageFacade<S>,
    chain: &[ChainEntry],
    thread_id: &str,
) -> Vec<ReplayedPost> {
    let mut posts: Vec<ReplayedPost> = Vec::new();
    let mut index_of: HashMap<Cid, usize> = HashMap::new();

    for chain_entry in chain {
        if !chain_entry.signature_valid {
            continue;
        }
        let entry = &chain_entry.entry;
        if entry.thread_id.as_str() != thread_id {
            continue;
        }
        apply_op(facade, entry, &mut posts, &mut index_of).await;
    }

    posts
}

/// Loads the `BoardLogEntry`s tagged for `board_id`/`thread_id`, orders them
/// by `createdAt` (RFC 3339 parse, falling back to lexicographic comparison
/// if parsing fails), breaking ties by `LogOp::order_weight` and finally by
/// the entry's own CID, then folds them the same way `replay_chain` does.
/// Used when the primary board log is missing or doesn't cover this thread.
pub async fn replay_by_tag<S: ContentStore + ?Sized>(
    facade: &StorageFacade<S>,
    board_id: &str,
    thread_id: &str,
) -> Vec<ReplayedPost> {
    let cids = match facade.list_thread_log_entries(board_id, thread_id).await {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    let mut loaded: Vec<(Cid, BoardLogEntry, bool)> = Vec::new();
    for cid in cids {
        let Ok(entry) = facade.load_board_log_entry(&cid).await else {
            continue;
        };
        let signature_valid = verify_entity(&entry, RecoveryPolicy::Enabled).is_ok();
        loaded.push((cid, entry, signature_valid));
    }

    loaded.sort_by(|(cid_a, a, _), (cid_b, b, _)| {
        created_at_key(&a.created_at)
            .cmp(&created_at_key(&b.created_at))
            .then_with(|| a.op.order_weight().cmp(&b.op.order_weight()))
            .then_with(|| cid_a.as_str().cmp(cid_b.as_str()))
    });

    let mut posts: Vec<ReplayedPost> = Vec::new();
    let mut index_of: HashMap<Cid, usize> = HashMap::new();
    for (_, entry, signature_valid) in &loaded {
        if !signature_valid {
            continue;
        }
        apply_op(facade, entry, &mut posts, &mut index_of).await;
    }

    posts
}

/// Runs both replay paths and keeps whichever produced more posts, ties
/// favoring the primary (log-based) replay.
pub async fn replay_thread<S: ContentStore + ?Sized>(
    facade: &StorageFacade<S>,
    primary_chain: Option<&[ChainEntry]>,
    board_id: &str,
    thread_id: &str,
) -> Vec<ReplayedPost> {
    let primary = match primary_chain {
        Some(chain) => replay_chain(facade, chain, thread_id).await,
        None => Vec::new(),
    };
    let fallback = replay_by_tag(facade, board_id, thread_id).await;

    if fallback.len() > primary.len() {
        fallback
    } else {
        primary
    }
}

/// RFC 3339 timestamps sort correctly as strings only once zero-padded and
/// normalized; rather than assume that, parse with chrono and fall back to
/// the raw string (still deterministic, just not calendar-correct) if it
/// doesn't parse.
fn created_at_key(raw: &str) -> (i64, String) {
    match chrono::DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => (dt.timestamp_nanos_opt().unwrap_or(0), String::new()),
        Err(_) => (i64::MAX, raw.to_string()),
    }
}

async fn apply_op<S: ContentStore + ?Sized>(
    facade: &StorageFacade<S>,
    entry: &BoardLogEntry,
    posts: &mut Vec<ReplayedPost>,
    index_of: &mut HashMap<Cid, usize>,
) {
    match entry.op {
        LogOp::CreateThread | LogOp::AddPost => {
            let Some(post_cid) = &entry.post_cid else {
                return;
            };
            if index_of.contains_key(post_cid) {
                return;
            }
            let Some(post) = load_and_verify_post(facade, post_cid).await else {
                return;
            };
            if post.thread_id.as_str() != entry.thread_id.as_str() {
                return;
            }
            let idx = posts.len();
            index_of.insert(post_cid.clone(), idx);
            posts.push(ReplayedPost {
                cid: post_cid.clone(),
                post,
                tombstoned: false,
                tombstone_reason: None,
            });
        }
        LogOp::EditPost => {
            let (Some(old_cid), Some(new_cid)) = (&entry.old_post_cid, &entry.new_post_cid) else {
                return;
            };
            let Some(&idx) = index_of.get(old_cid) else {
                return;
            };
            let old_author = posts[idx].post.author_pub_key.clone();
            let Some(new_post) = load_and_verify_post(facade, new_cid).await else {
                return;
            };
            if entry.author_pub_key != old_author || entry.author_pub_key != new_post.author_pub_key {
                return;
            }
            index_of.remove(old_cid);
            index_of.insert(new_cid.clone(), idx);
            posts[idx].cid = new_cid.clone();
            posts[idx].post = new_post;
        }
        LogOp::TombstonePost => {
            let Some(target_cid) = &entry.target_post_cid else {
                return;
            };
            let Some(&idx) = index_of.get(target_cid) else {
                return;
            };
            if entry.author_pub_key != posts[idx].post.author_pub_key {
                return;
            }
            posts[idx].tombstoned = true;
            posts[idx].tombstone_reason = entry.reason.clone();
        }
    }
}

async fn load_and_verify_post<S: ContentStore + ?Sized>(facade: &StorageFacade<S>, cid: &Cid) -> Option<Post> {
    let post = facade.load_post(cid).await.ok()?;
    let (verified, _) = verify_entity(&post, RecoveryPolicy::Enabled).ok()?;
    Some(verified)
}
