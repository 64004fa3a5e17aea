use std::path::{Path, PathBuf};
use std::time::Duration;

use boardmesh_registry::{normalize_indexer_url, TrustedIndexerRegistry};

use crate::error::CliResult;

fn path(data_dir: &Path) -> PathBuf {
    data_dir.join("trusted_indexers.json")
}

pub fn list(data_dir: PathBuf) -> CliResult {
    let registry = TrustedIndexerRegistry::load(path(&data_dir))?;
    for url in registry.list() {
        println!("{url}");
    }
    Ok(())
}

pub fn add(url: String, data_dir: PathBuf) -> CliResult {
    let registry = TrustedIndexerRegistry::load(path(&data_dir))?;
    registry.add(&url)?;
    println!("added {}", normalize_indexer_url(&url));
    Ok(())
}

pub fn remove(url: String, data_dir: PathBuf) -> CliResult {
    let registry = TrustedIndexerRegistry::load(path(&data_dir))?;
    registry.remove(&url)?;
    println!("removed {}", normalize_indexer_url(&url));
    Ok(())
}

/// Probes every trusted indexer's `/healthz` and reports reachability.
/// Informational only: an unreachable peer is reported, not removed.
pub async fn sync(data_dir: PathBuf, timeout_secs: u64) -> CliResult {
    let registry = TrustedIndexerRegistry::load(path(&data_dir))?;
    let client = reqwest::Client::new();
    for url in registry.list() {
        let healthz = format!("{url}/healthz");
        match client.get(&healthz).timeout(Duration::from_secs(timeout_secs)).send().await {
            Ok(resp) if resp.status().is_success() => println!("{url}: ok"),
            Ok(resp) => println!("{url}: unhealthy (status {})", resp.status()),
            Err(e) => println!("{url}: unreachable ({e})"),
        }
    }
    Ok(())
}
