#![deny(unsafe_code)]

//! Announce/pull gossip between boardmesh nodes: broadcast a signed
//! `BoardMeta` update, track what's already been seen, forward to trusted
//! peers over HTTP.

pub mod recent;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use boardmesh_config::Role;
use boardmesh_log::decide_board_meta_update;
use boardmesh_registry::{normalize_indexer_url, BoardRegistry};
use boardmesh_store::{ContentStore, StorageFacade};
use boardmesh_types::{verify_entity, BoardError, BoardMeta, Cid, RecoveryPolicy};

pub use recent::RecentCidSet;

/// Wire payload for `POST /api/v1/announce/board`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnnounceMessage {
    pub meta_cid: Cid,
    /// The peer URL that sent this announce, so it isn't immediately
    /// forwarded back to its source.
    #[serde(default)]
    pub from: Option<String>,
}

/// What an announce resulted in. Mirrors the `{accepted, ignoredReason}`
/// response shape: only `Applied { advanced: true }` is `accepted: true`.
#[derive(Clone, Debug, PartialEq)]
pub enum AnnounceOutcome {
    /// Already seen this `meta_cid` within the dedup window; no-op.
    Duplicate,
    /// The sending role isn't allowed to introduce this board (a client
    /// announcing a board it doesn't already track) or board lookup failed.
    Rejected(String),
    /// Ran the head-update decision; `advanced` is false for `same`,
    /// `rollback`, or `fork` (the `reason` names which).
    Applied { advanced: bool, reason: &'static str },
}

/// A node's gossip-facing state: who it trusts, who it's heard from
/// recently, and the HTTP client used to push/pull.
pub struct GossipPeer {
    http: reqwest::Client,
    recent: RecentCidSet,
    peer_timeout: Duration,
}

impl GossipPeer {
    pub fn new(recent_capacity: usize, recent_ttl: Duration, peer_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            recent: RecentCidSet::new(recent_capacity, recent_ttl),
            peer_timeout,
        }
    }

    /// Implements the announce accept path:
    /// 1. dedup on `meta_cid` — a repeat within the TTL window is a no-op
    /// 2. a `Client`-role node rejects announces for boards it doesn't
    ///    already track and never forwards
    /// 3. load+verify the `BoardMeta` at `meta_cid`
    /// 4. decide whether it supersedes the board's current head (or this is
    ///    a new board the role auto-registers)
    /// 5. on acceptance, persist the new head and, if the role forwards,
    ///    push the announce on to trusted peers (excluding the sender)
    #[tracing::instrument(level = "debug", skip(self, facade, registry, trusted_peers), fields(meta_cid = %announce.meta_cid))]
    pub async fn accept_announce<S: ContentStore + ?Sized>(
        &self,
        role: Role,
        facade: &StorageFacade<S>,
        registry: &BoardRegistry,
        trusted_peers: &[String],
        announce: AnnounceMessage,
    ) -> Result<AnnounceOutcome, BoardError> {
        if !self.recent.insert(announce.meta_cid.clone()) {
            return Ok(AnnounceOutcome::Duplicate);
        }

        let incoming_meta = facade.load_board_meta(&announce.meta_cid).await?;
        let (incoming_meta, _) = verify_entity(&incoming_meta, RecoveryPolicy::Enabled)
            .map_err(|_| BoardError::SignatureInvalid)?;
        let board_id = incoming_meta.board_id.clone();

        let current_cid = registry.get(&board_id);
        if current_cid.is_none() && !role.auto_registers_unknown_boards() {
            return Ok(AnnounceOutcome::Rejected(format!(
                "role {role} does not auto-register unknown board {board_id}"
            )));
        }

        let (advanced, reason) = match current_cid {
            None => {
                registry.upsert(&board_id, announce.meta_cid.clone())?;
                (true, "advance")
            }
            Some(current_cid) => {
                let current_meta = facade.load_board_meta(&current_cid).await?;
                let (current_meta, _) = verify_entity(&current_meta, RecoveryPolicy::Enabled)
                    .map_err(|_| BoardError::SignatureInvalid)?;
                let decision = decide_board_meta_update(facade, &current_meta, &incoming_meta).await?;
                let advanced = decision.accepted() && announce.meta_cid != current_cid;
                if advanced {
                    registry.upsert(&board_id, announce.meta_cid.clone())?;
                }
                let reason = if announce.meta_cid == current_cid { "same" } else { decision.reason() };
                (advanced, reason)
            }
        };

        if advanced && role.forwards_announces() {
            self.forward(trusted_peers, &announce).await;
        }

        Ok(AnnounceOutcome::Applied { advanced, reason })
    }

    async fn forward(&self, trusted_peers: &[String], announce: &AnnounceMessage) {
        let source = announce.from.as_deref().map(normalize_indexer_url);
        let mut outgoing = announce.clone();

        for peer in trusted_peers {
            let normalized = normalize_indexer_url(peer);
            if Some(&normalized) == source.as_ref() {
                continue;
            }
            outgoing.from = Some(normalized.clone());
            let url = format!("{normalized}/api/v1/announce/board");
            let result = self
                .http
                .post(&url)
                .timeout(self.peer_timeout)
                .json(&outgoing)
                .send()
                .await;
            if let Err(e) = result {
                tracing::warn!(peer = %normalized, error = %e, "announce forward failed");
            }
        }
    }

    /// Pulls the current `BoardMeta` for `board_id` from a trusted indexer,
    /// used by client-role nodes to refresh before serving a read.
    pub async fn pull_board(&self, indexer_base_url: &str, board_id: &str) -> Result<BoardMeta, BoardError> {
        let url = format!(
            "{}/api/v1/boards/{}",
            normalize_indexer_url(indexer_base_url),
            board_id
        );
        let response = self
            .http
            .get(&url)
            .timeout(self.peer_timeout)
            .send()
            .await
            .map_err(|e| BoardError::Upstream(format!("pull {board_id} from {indexer_base_url}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BoardError::NotFound(format!("board {board_id} not known to {indexer_base_url}")));
        }
        if !response.status().is_success() {
            return Err(BoardError::Upstream(format!(
                "pull {board_id} from {indexer_base_url}: status {}",
                response.status()
            )));
        }

        let board_meta: BoardMeta = response
            .json()
            .await
            .map_err(|e| BoardError::Upstream(format!("decoding board meta: {e}")))?;
        verify_entity(&board_meta, RecoveryPolicy::Enabled)
            .map(|(meta, _)| meta)
            .map_err(|_| BoardError::SignatureInvalid)
    }

    /// Proxies a search request across `indexers` in order, returning the
    /// first successful JSON response. Used when this node has no local
    /// index (or wants a broader view) and must fan a search out.
    pub async fn search_via_indexers<T: for<'de> Deserialize<'de>>(
        &self,
        indexers: &[String],
        path_and_query: &str,
    ) -> Result<T, BoardError> {
        let mut last_err = BoardError::Upstream("no trusted indexers configured".into());

        for indexer in indexers {
            let url = format!("{}{}", normalize_indexer_url(indexer), path_and_query);
            match self.http.get(&url).timeout(self.peer_timeout).send().await {
                Ok(response) if response.status().is_success() => match response.json::<T>().await {
                    Ok(value) => return Ok(value),
                    Err(e) => last_err = BoardError::Upstream(format!("decoding response from {indexer}: {e}")),
                },
                Ok(response) => {
                    last_err = BoardError::Upstream(format!("{indexer} returned status {}", response.status()))
                }
                Err(e) => last_err = BoardError::Upstream(format!("{indexer}: {e}")),
            }
        }

        Err(last_err)
    }
}

/// Convenience constructor matching `boardmesh_config::BoardmeshConfig`'s
/// recent-CID and peer-timeout fields.
pub fn gossip_peer_from_config(cfg: &boardmesh_config::BoardmeshConfig) -> Arc<GossipPeer> {
    Arc::new(GossipPeer::new(
        cfg.recent_cid_capacity,
        Duration::from_secs(cfg.recent_cid_ttl_secs),
        Duration::from_secs(cfg.peer_timeout_secs),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardmesh_store::InMemoryContentStore;
    use boardmesh_types::{sign_entity, PrivateKey};
    use std::sync::Arc as StdArc;

    fn facade() -> StorageFacade<InMemoryContentStore> {
        StorageFacade::new(StdArc::new(InMemoryContentStore::new()))
    }

    fn signed_board_meta(sk: &PrivateKey, board_id: &str) -> BoardMeta {
        let mut bm = BoardMeta {
            board_id: board_id.into(),
            title: "t".into(),
            description: "d".into(),
            log_head_cid: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            created_by: sk.public_key(),
            signature: sk.sign(b"x"),
        };
        sign_entity(sk, &mut bm);
        bm
    }

    #[tokio::test]
    async fn client_role_rejects_unknown_board_announce() {
        let facade = facade();
        let sk = PrivateKey::generate();
        let meta = signed_board_meta(&sk, "board-1");
        let meta_cid = facade.save_board_meta(&meta).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let registry = BoardRegistry::load(dir.path().join("boards.json")).unwrap();
        let peer = GossipPeer::new(64, Duration::from_secs(60), Duration::from_secs(1));

        let outcome = peer
            .accept_announce(
                Role::Client,
                &facade,
                &registry,
                &[],
                AnnounceMessage {
                    meta_cid,
                    from: None,
                },
            )
            .await
            .unwrap();

        assert!(matches!(outcome, AnnounceOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn indexer_role_registers_a_new_board() {
        let facade = facade();
        let sk = PrivateKey::generate();
        let meta = signed_board_meta(&sk, "board-1");
        let meta_cid = facade.save_board_meta(&meta).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let registry = BoardRegistry::load(dir.path().join("boards.json")).unwrap();
        let peer = GossipPeer::new(64, Duration::from_secs(60), Duration::from_secs(1));

        let outcome = peer
            .accept_announce(
                Role::Indexer,
                &facade,
                &registry,
                &[],
                AnnounceMessage {
                    meta_cid: meta_cid.clone(),
                    from: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome, AnnounceOutcome::Applied { advanced: true, reason: "advance" });
        assert_eq!(registry.get("board-1"), Some(meta_cid));
    }

    #[tokio::test]
    async fn duplicate_announce_is_a_no_op() {
        let facade = facade();
        let sk = PrivateKey::generate();
        let meta = signed_board_meta(&sk, "board-1");
        let meta_cid = facade.save_board_meta(&meta).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let registry = BoardRegistry::load(dir.path().join("boards.json")).unwrap();
        let peer = GossipPeer::new(64, Duration::from_secs(60), Duration::from_secs(1));

        let msg = AnnounceMessage {
            meta_cid,
            from: None,
        };
        let _ = peer
            .accept_announce(Role::Indexer, &facade, &registry, &[], msg.clone())
            .await
            .unwrap();
        let second = peer
            .accept_announce(Role::Indexer, &facade, &registry, &[], msg)
            .await
            .unwrap();
        assert_eq!(second, AnnounceOutcome::Duplicate);
    }
}
