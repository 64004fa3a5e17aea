use std::path::{Path, PathBuf};
use std::sync::Arc;

use boardmesh_registry::BoardRegistry;
use boardmesh_store::{HttpContentStore, StorageFacade};
use boardmesh_types::{sign_entity, BoardMeta, PrivateKey};

use crate::error::CliResult;

pub async fn run(
    board_id: String,
    title: String,
    description: String,
    private_key: Option<String>,
    content_store: String,
    data_dir: PathBuf,
) -> CliResult {
    let sk = match private_key {
        Some(s) => PrivateKey::parse(&s)?,
        None => PrivateKey::generate(),
    };

    let facade = StorageFacade::new(Arc::new(HttpContentStore::new(content_store)));
    let mut board_meta = BoardMeta {
        board_id: board_id.clone(),
        title,
        description,
        log_head_cid: None,
        created_at: chrono::Utc::now().to_rfc3339(),
        created_by: sk.public_key(),
        signature: sk.sign(b"placeholder"),
    };
    sign_entity(&sk, &mut board_meta);
    let meta_cid = facade.save_board_meta(&board_meta).await?;

    std::fs::create_dir_all(&data_dir)?;
    let registry = BoardRegistry::load(boards_json_path(&data_dir))?;
    registry.upsert(&board_id, meta_cid.clone())?;

    println!("board {board_id} created, boardMetaCid={meta_cid}");
    println!("signing key: {}", sk.to_seed_string());
    Ok(())
}

fn boards_json_path(data_dir: &Path) -> PathBuf {
    data_dir.join("boards.json")
}
