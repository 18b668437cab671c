//! JSON snapshot of the record tables.
//!
//! The CLI keeps its records in a single `records.json` holding the same
//! loosely typed rows a database would return. Loading validates nothing;
//! validation happens when the rows are turned into a
//! [`super::MemoryRecordStore`].

use crate::error::StoreError;
use crate::model::{ClaimRow, EvidenceFileRow, PaymentRow};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub claims: Vec<ClaimRow>,
    #[serde(default)]
    pub files: Vec<EvidenceFileRow>,
    #[serde(default)]
    pub payments: Vec<PaymentRow>,
}

impl Snapshot {
    /// Read a snapshot; a missing file yields an empty snapshot.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot at {}, starting empty", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the snapshot atomically (temp file + rename).
    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        debug!("Wrote snapshot to {} ({} bytes)", path.display(), json.len());
        Ok(())
    }
}
