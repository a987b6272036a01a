//! Durable epoch marker
//!
//! `metadata/role.marker` records the highest epoch this node has adopted
//! and the Master it belonged to. A node never goes back to a lower epoch
//! after a restart.
//!
//! Writes are atomic: temp file, fsync, rename, directory fsync.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::{RoleError, RoleResult};
use crate::cluster::NodeId;

const MARKER_FILE_NAME: &str = "role.marker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochMarker {
    pub epoch: u64,
    /// Master of that epoch, if known
    pub master_id: Option<NodeId>,
}

/// Reads and writes the epoch marker of one node.
pub struct DurableMarker {
    marker_path: PathBuf,
    temp_path: PathBuf,
}

impl DurableMarker {
    pub fn new(node_dir: &Path) -> Self {
        let metadata_dir = node_dir.join("metadata");
        Self {
            marker_path: metadata_dir.join(MARKER_FILE_NAME),
            temp_path: metadata_dir.join(format!("{}.tmp", MARKER_FILE_NAME)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.marker_path
    }

    pub fn write_atomic(&self, marker: &EpochMarker) -> RoleResult<()> {
        if let Some(parent) = self.marker_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                RoleError::marker_failed(format!("failed to create metadata directory: {}", e))
            })?;
        }

        let content = serde_json::to_vec(marker)
            .map_err(|e| RoleError::marker_failed(format!("failed to serialize marker: {}", e)))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.temp_path)
            .map_err(|e| RoleError::marker_failed(format!("failed to create temp marker: {}", e)))?;

        file.write_all(&content)
            .map_err(|e| RoleError::marker_failed(format!("failed to write marker: {}", e)))?;
        file.sync_all()
            .map_err(|e| RoleError::marker_failed(format!("failed to fsync marker: {}", e)))?;

        fs::rename(&self.temp_path, &self.marker_path)
            .map_err(|e| RoleError::marker_failed(format!("failed to commit marker: {}", e)))?;

        if let Some(parent) = self.marker_path.parent() {
            let dir = File::open(parent).map_err(|e| {
                RoleError::marker_failed(format!("failed to open metadata directory: {}", e))
            })?;
            dir.sync_all().map_err(|e| {
                RoleError::marker_failed(format!("failed to fsync metadata directory: {}", e))
            })?;
        }

        Ok(())
    }

    /// Read the marker; `None` on a node that never adopted an epoch.
    pub fn read(&self) -> RoleResult<Option<EpochMarker>> {
        if !self.marker_path.exists() {
            return Ok(None);
        }
        let content = fs::read(&self.marker_path)
            .map_err(|e| RoleError::marker_failed(format!("failed to read marker: {}", e)))?;
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| RoleError::marker_failed(format!("failed to parse marker: {}", e)))
    }
}
