//! On-disk form of the sparse index: documents, their token lists and
//! (optionally) the derived statistics, as one JSON file replaced atomically.
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use quickrag_core::{DocumentChunk, Error, Result};

use crate::bm25::CorpusStats;

pub const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub format: u32,
    pub documents: Vec<DocumentChunk>,
    pub tokenized: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<CorpusStats>,
}

impl Snapshot {
    /// `Ok(None)` when no snapshot exists yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snap: Snapshot = serde_json::from_slice(&bytes).map_err(|e| Error::Snapshot(format!("{}: {e}", path.display())))?;
        if snap.format != SNAPSHOT_FORMAT {
            return Err(Error::Snapshot(format!("unsupported snapshot format {}", snap.format)));
        }
        if snap.documents.len() != snap.tokenized.len() {
            return Err(Error::Snapshot(format!(
                "{} documents but {} token lists",
                snap.documents.len(),
                snap.tokenized.len()
            )));
        }
        Ok(Some(snap))
    }

    /// Write to a temp file beside `path`, then rename over it.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, self)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}
