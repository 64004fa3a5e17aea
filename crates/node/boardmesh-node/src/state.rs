//! Shared application state handed to every axum handler via `State`.

use std::sync::Arc;

use boardmesh_config::BoardmeshConfig;
use boardmesh_gossip::GossipPeer;
use boardmesh_indexer::IndexerStore;
use boardmesh_registry::{BoardRegistry, TrustedIndexerRegistry};
use boardmesh_store::{ContentStore, StorageFacade};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BoardmeshConfig>,
    pub facade: StorageFacade<dyn ContentStore>,
    pub boards: Arc<BoardRegistry>,
    pub trusted_indexers: Arc<TrustedIndexerRegistry>,
    pub indexer: Option<Arc<IndexerStore>>,
    pub gossip: Arc<GossipPeer>,
}
