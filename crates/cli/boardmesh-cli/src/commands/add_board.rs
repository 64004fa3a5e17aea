use std::path::{Path, PathBuf};
use std::sync::Arc;

use boardmesh_registry::BoardRegistry;
use boardmesh_store::{HttpContentStore, StorageFacade};
use boardmesh_types::{verify_entity, Cid, RecoveryPolicy};

use crate::error::{CliError, CliResult};

pub async fn run(board_meta_cid: String, content_store: String, data_dir: PathBuf) -> CliResult {
    let facade = StorageFacade::new(Arc::new(HttpContentStore::new(content_store)));
    let cid = Cid::new(board_meta_cid);
    let meta = facade.load_board_meta(&cid).await?;
    let (meta, _) = verify_entity(&meta, RecoveryPolicy::Enabled)
        .map_err(|_| CliError::Runtime("board meta signature did not verify".into()))?;

    std::fs::create_dir_all(&data_dir)?;
    let registry = BoardRegistry::load(boards_json_path(&data_dir))?;
    registry.upsert(&meta.board_id, cid)?;

    println!("registered board {} ({})", meta.board_id, meta.title);
    Ok(())
}

fn boards_json_path(data_dir: &Path) -> PathBuf {
    data_dir.join("boards.json")
}
