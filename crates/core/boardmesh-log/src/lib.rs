#![deny(unsafe_code)]

//! The hash-linked board-log traversal, ancestry checks, and fork/rollback
//! head-advancement decision over the board log's linear `prevLogCid` chain.

use std::collections::HashSet;

use boardmesh_store::{ContentStore, StorageFacade};
use boardmesh_types::{
    verify_entity, BoardError, BoardLogEntry, BoardMeta, Cid, RecoveryPolicy,
};

/// Maximum chain depth enforced everywhere a chain is walked.
pub const MAX_LOG_DEPTH: usize = 50_000;

/// One entry in a fetched chain, carrying whether its signature verified.
/// Replay filters on this rather than the fetch dropping unverified entries.
#[derive(Clone, Debug)]
pub struct ChainEntry {
    pub cid: Cid,
    pub entry: BoardLogEntry,
    pub signature_valid: bool,
}

/// Walks a board log starting at `head`, following `prevLogCid`, recording
/// each entry's signature validity without dropping invalid ones. Returns
/// the chain oldest-first. Aborts with `BoardError::Capacity` if depth
/// exceeds `max_depth` or a CID repeats (cycle).
pub async fn fetch_chain<S: ContentStore + ?Sized>(
    facade: &StorageFacade<S>,
    head: &Cid,
    max_depth: usize,
) -> Result<Vec<ChainEntry>, BoardError> {
    let mut seen = HashSet::new();
    let mut newest_first = Vec::new();
    let mut cursor = Some(head.clone());
    let mut depth = 0usize;

    while let Some(cid) = cursor {
        if depth > max_depth {
            return Err(BoardError::Capacity(format!(
                "log exceeds max depth {max_depth}"
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

/// Walks from `head` by `prevLogCid`, returning `true` iff `ancestor` is
/// reached. Every walked entry must match `board_id`, have a valid
/// signature, and the walk must not exceed `MAX_LOG_DEPTH` or cycle — those
/// conditions surface as errors rather than being treated as "no".
pub async fn is_descendant<S: ContentStore + ?Sized>(
    facade: &StorageFacade<S>,
    head: &Cid,
    ancestor: &Cid,
    board_id: &str,
) -> Result<bool, BoardError> {
    let mut seen = HashSet::new();
    let mut cursor = Some(head.clone());
    let mut depth = 0usize;

    while let Some(cid) = cursor {
        if &cid == ancestor {
            return Ok(true);
        }
        if depth > MAX_LOG_DEPTH {
            return Err(BoardError::Capacity(format!(
                "log exceeds max depth {MAX_LOG_DEPTH}"
            )));
        }
        if !seen.insert(cid.clone()) {
            return Err(BoardError::Capacity(format!("cycle detected at {cid}")));
        }

        let entry: BoardLogEntry = facade.load_board_log_entry(&cid).await?;
        if entry.board_id != board_id {
            return Err(BoardError::InvalidInput(format!(
                "board id mismatch while walking log: expected {board_id}, found {}",
                entry.board_id
            )));
        }
        if verify_entity(&entry, RecoveryPolicy::Enabled).is_err() {
            return Err(BoardError::SignatureInvalid);
        }

        cursor = entry.prev_log_cid.clone();
        depth += 1;
    }

    Ok(false)
}

/// The outcome of comparing a current `BoardMeta` against an incoming one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateDecision {
    /// Heads are identical; nothing to do.
    Same,
    /// The incoming head supersedes the current one.
    Advance,
    /// The incoming head is behind the current one, or invalid.
    Rollback,
    /// The heads diverge from a common ancestor; neither supersedes.
    Fork,
}

impl UpdateDecision {
    pub fn accepted(self) -> bool {
        matches!(self, UpdateDecision::Same | UpdateDecision::Advance)
    }

    pub fn reason(self) -> &'static str {
        match self {
            UpdateDecision::Same => "same",
            UpdateDecision::Advance => "advance",
            UpdateDecision::Rollback => "rollback",
            UpdateDecision::Fork => "fork",
        }
    }
}

/// Decides whether `incoming` should replace `current` for a board,
/// per the head-update decision table.
#[tracing::instrument(level = "debug", skip(facade, current, incoming), fields(board_id = %current.board_id))]
pub async fn decide_board_meta_update<S: ContentStore + ?Sized>(
    facade: &StorageFacade<S>,
    current: &BoardMeta,
    incoming: &BoardMeta,
) -> Result<UpdateDecision, BoardError> {
    let c = &current.log_head_cid;
    let i = &incoming.log_head_cid;

    if c == i {
        return Ok(UpdateDecision::Same);
    }
    let Some(c_cid) = c else {
        return Ok(UpdateDecision::Advance);
    };
    let Some(i_cid) = i else {
        return Ok(UpdateDecision::Rollback);
    };

    if is_descendant(facade, i_cid, c_cid, &current.board_id).await? {
        return Ok(UpdateDecision::Advance);
    }
    if is_descendant(facade, c_cid, i_cid, &current.board_id).await? {
        return Ok(UpdateDecision::Rollback);
    }

    tracing::warn!("board meta head diverged into a fork; keeping current head");
    Ok(UpdateDecision::Fork)
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;
    use std::sync::Arc;

    use super::*;
    use boardmesh_store::InMemoryContentStore;
    use boardmesh_types::{sign_entity, LogOp, PrivateKey};

    async fn append_entry(
        facade: &StorageFacade<InMemoryContentStore>,
        sk: &PrivateKey,
        prev: Option<Cid>,
    ) -> Cid {
        let mut entry = BoardLogEntry {
            board_id: "b".into(),
            op: LogOp::AddPost,
            thread_id: "thread-1".into(),
            post_cid: Some("post-1".into()),
            old_post_cid: None,
            new_post_cid: None,
            target_post_cid: None,
            reason: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            author_pub_key: sk.public_key(),
            prev_log_cid: prev,
            signature: sk.sign(b"x"),
        };
        sign_entity(sk, &mut entry);
        facade.save_board_log_entry(&entry).await.unwrap()
    }

    fn board_meta(sk: &PrivateKey, head: Option<Cid>) -> BoardMeta {
        let mut bm = BoardMeta {
            board_id: "b".into(),
            title: "t".into(),
            description: "d".into(),
            log_head_cid: head,
            created_at: "2026-01-01T00:00:00Z".into(),
            created_by: sk.public_key(),
            signature: sk.sign(b"x"),
        };
        sign_entity(sk, &mut bm);
        bm
    }

    proptest! {
        /// For any two positions on the same linear chain, the decision is
        /// never `Fork` — a fork requires genuinely divergent heads, which a
        /// single linear extension can never produce.
        #[test]
        fn linear_chain_never_forks(chain_len in 1usize..20, i in 0usize..19, j in 0usize..19) {
            let i = i.min(chain_len - 1);
            let j = j.min(chain_len - 1);
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let facade = StorageFacade::new(Arc::new(InMemoryContentStore::new()));
                let sk = PrivateKey::generate();
                let mut cids = Vec::with_capacity(chain_len);
                let mut prev = None;
                for _ in 0..chain_len {
                    let cid = append_entry(&facade, &sk, prev.clone()).await;
                    prev = Some(cid.clone());
                    cids.push(cid);
                }

                let current = board_meta(&sk, Some(cids[i].clone()));
                let incoming = board_meta(&sk, Some(cids[j].clone()));
                let decision = decide_board_meta_update(&facade, &current, &incoming).await.unwrap();

                if i == j {
                    prop_assert_eq!(decision, UpdateDecision::Same);
                } else if i < j {
                    prop_assert_eq!(decision, UpdateDecision::Advance);
                } else {
                    prop_assert_eq!(decision, UpdateDecision::Rollback);
                }
            })?;
        }
    }
}
