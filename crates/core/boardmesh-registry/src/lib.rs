#![deny(unsafe_code)]

//! Small JSON-file-backed registries: which `BoardMeta` CID a board ID
//! currently resolves to, and which indexer URLs this node trusts for
//! cross-indexer search fan-out. Both are `Mutex`-guarded in-process and
//! persisted with an atomic temp-file-then-rename write.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use boardmesh_types::{BoardError, Cid, Result};

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .map_err(|e| BoardError::Transient(format!("creating {}: {e}", parent.display())))?;

    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("registry")
    ));
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| BoardError::Transient(format!("serializing registry: {e}")))?;
    fs::write(&tmp_path, bytes)
        .map_err(|e| BoardError::Transient(format!("writing {}: {e}", tmp_path.display())))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| BoardError::Transient(format!("renaming into {}: {e}", path.display())))?;
    Ok(())
}

fn load_json_or_default<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| BoardError::Transient(format!("parsing {}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(BoardError::Transient(format!("reading {}: {e}", path.display()))),
    }
}

#[derive(Serialize, Deserialize)]
struct BoardEntryFile {
    #[serde(rename = "boardId")]
    board_id: String,
    #[serde(rename = "boardMetaCid")]
    board_meta_cid: Cid,
}

#[derive(Default, Serialize, Deserialize)]
struct BoardsFile {
    boards: Vec<BoardEntryFile>,
}

/// `boardId -> BoardMeta CID`, persisted as `<dataDir>/boards.json` in the
/// `{"boards":[{"boardId":…,"boardMetaCid":…}, …]}` shape, sorted by board ID.
pub struct BoardRegistry {
    path: PathBuf,
    entries: Mutex<HashMap<String, Cid>>,
}

impl BoardRegistry {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file: BoardsFile = load_json_or_default(&path)?;
        let entries = file
            .boards
            .into_iter()
            .map(|e| (e.board_id, e.board_meta_cid))
            .collect();
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn get(&self, board_id: &str) -> Option<Cid> {
        self.entries.lock().unwrap().get(board_id).cloned()
    }

    /// Re-reads `boards.json` from disk and replaces the in-memory map.
    /// Another process (or another node sharing this data dir) may have
    /// written it since `load`.
    pub fn reload(&self) -> Result<()> {
        let file: BoardsFile = load_json_or_default(&self.path)?;
        let entries = file
            .boards
            .into_iter()
            .map(|e| (e.board_id, e.board_meta_cid))
            .collect();
        *self.entries.lock().unwrap() = entries;
        Ok(())
    }

    pub fn list(&self) -> Vec<(String, Cid)> {
        let mut out: Vec<(String, Cid)> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Inserts or overwrites the CID a board ID resolves to, then persists
    /// the whole map atomically.
    #[tracing::instrument(level = "debug", skip(self, meta_cid), fields(board_id))]
    pub fn upsert(&self, board_id: &str, meta_cid: Cid) -> Result<()> {
        let snapshot = {
            let mut entries = self.entries.lock().unwrap();
            entries.insert(board_id.to_string(), meta_cid);
            entries.clone()
        };
        let mut boards: Vec<BoardEntryFile> = snapshot
            .into_iter()
            .map(|(board_id, board_meta_cid)| BoardEntryFile { board_id, board_meta_cid })
            .collect();
        boards.sort_by(|a, b| a.board_id.cmp(&b.board_id));
        atomic_write_json(&self.path, &BoardsFile { boards })
    }
}

/// Normalizes an indexer base URL for comparison/dedup: lowercases the
/// scheme and host, strips a trailing slash, and drops a default port.
pub fn normalize_indexer_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let (scheme, rest) = match trimmed.split_once("://") {
        Some((s, r)) => (s.to_ascii_lowercase(), r),
        None => return trimmed.to_string(),
    };
    let (authority, path) = match rest.split_once('/') {
        Some((a, p)) => (a, Some(p)),
        None => (rest, None),
    };
    let authority_lower = authority.to_ascii_lowercase();
    let authority_lower = authority_lower
        .strip_suffix(":80")
        .filter(|_| scheme == "http")
        .or_else(|| authority_lower.strip_suffix(":443").filter(|_| scheme == "https"))
        .map(str::to_string)
        .unwrap_or(authority_lower);

    match path {
        Some(p) if !p.is_empty() => format!("{scheme}://{authority_lower}/{p}"),
        _ => format!("{scheme}://{authority_lower}"),
    }
}

#[derive(Default, Serialize, Deserialize)]
struct TrustedIndexersFile {
    #[serde(rename = "trustedIndexers")]
    trusted_indexers: Vec<String>,
}

/// The list of indexer URLs this node treats as trusted, persisted as
/// `<dataDir>/trusted_indexers.json` as `{"trustedIndexers":[<url>, …]}`.
pub struct TrustedIndexerRegistry {
    path: PathBuf,
    urls: Mutex<Vec<String>>,
}

impl TrustedIndexerRegistry {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file: TrustedIndexersFile = load_json_or_default(&path)?;
        Ok(Self {
            path,
            urls: Mutex::new(file.trusted_indexers),
        })
    }

    pub fn list(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn contains(&self, url: &str) -> bool {
        let normalized = normalize_indexer_url(url);
        self.urls.lock().unwrap().iter().any(|u| *u == normalized)
    }

    pub fn add(&self, url: &str) -> Result<()> {
        let normalized = normalize_indexer_url(url);
        let snapshot = {
            let mut urls = self.urls.lock().unwrap();
            if !urls.contains(&normalized) {
                urls.push(normalized);
                urls.sort();
            }
            urls.clone()
        };
        atomic_write_json(&self.path, &TrustedIndexersFile { trusted_indexers: snapshot })
    }

    pub fn remove(&self, url: &str) -> Result<()> {
        let normalized = normalize_indexer_url(url);
        let snapshot = {
            let mut urls = self.urls.lock().unwrap();
            urls.retain(|u| *u != normalized);
            urls.clone()
        };
        atomic_write_json(&self.path, &TrustedIndexersFile { trusted_indexers: snapshot })
    }
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::normalize_indexer_url;

    fn arb_url() -> impl Strategy<Value = String> {
        (
            prop_oneof![Just("http"), Just("HTTP"), Just("https"), Just("HTTPS")],
            "[a-zA-Z0-9.-]{1,20}",
            prop_oneof![Just(String::new()), "(:[0-9]{1,5})?"],
            prop_oneof![Just(String::new()), "/[a-zA-Z0-9/_-]{0,20}"],
            prop_oneof![Just(""), Just("/")],
        )
            .prop_map(|(scheme, host, port, path, trailing_slash)| {
                format!("{scheme}://{host}{port}{path}{trailing_slash}")
            })
    }

    proptest! {
        /// Normalizing an already-normalized URL is a no-op, for any URL
        /// shape the normalizer accepts.
        #[test]
        fn normalize_is_idempotent(raw in arb_url()) {
            let once = normalize_indexer_url(&raw);
            let twice = normalize_indexer_url(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
