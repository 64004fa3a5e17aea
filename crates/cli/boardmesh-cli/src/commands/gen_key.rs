use std::path::PathBuf;

use boardmesh_types::PrivateKey;
use serde_json::json;

use crate::error::CliResult;

pub fn run(output: Option<PathBuf>) -> CliResult {
    let sk = PrivateKey::generate();
    let pk = sk.public_key();
    let doc = json!({
        "privateKey": sk.to_seed_string(),
        "publicKey": pk.to_string(),
    });

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, serde_json::to_vec_pretty(&doc).unwrap())?;
            println!("wrote keypair to {}", path.display());
        }
        None => {
            println!("{}", serde_json::to_string_pretty(&doc).unwrap());
        }
    }
    Ok(())
}
