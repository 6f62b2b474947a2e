use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::proto::FileMetaData;

/// Rejection of an UpdateFile whose version does not match the stored one.
/// Carries the server's current version so the client can catch up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMismatch {
    pub file_name: String,
    pub current_version: u64,
}

impl std::fmt::Display for VersionMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "version mismatch for \"{}\": server is at {}",
            self.file_name, self.current_version
        )
    }
}

impl std::error::Error for VersionMismatch {}

/// Versioned file-metadata operations the server exposes.
pub trait MetaStore: Send + Sync {
    /// Point-in-time snapshot of the full filename -> metadata map.
    fn file_info_map(&self) -> HashMap<String, FileMetaData>;

    /// Accept `candidate` iff its version equals the stored version, or the
    /// filename is unknown. On accept the record is stored at
    /// `candidate.version + 1` and that version is returned. On reject the
    /// stored record is unchanged.
    fn update_file(&self, candidate: FileMetaData) -> Result<u64, VersionMismatch>;
}

/// Volatile metadata store. Deletions are logical: tombstoned entries keep
/// their slot in the map and keep versioning forward.
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    files: DashMap<String, FileMetaData>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for MemoryMetaStore {
    fn file_info_map(&self) -> HashMap<String, FileMetaData> {
        self.files
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn update_file(&self, candidate: FileMetaData) -> Result<u64, VersionMismatch> {
        // The entry guard holds the map's shard lock for this filename, so the
        // check-and-bump below is atomic w.r.t. concurrent updates of the
        // same file.
        match self.files.entry(candidate.file_name.clone()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().version;
                if candidate.version != current {
                    return Err(VersionMismatch {
                        file_name: candidate.file_name,
                        current_version: current,
                    });
                }
                let accepted = candidate.version + 1;
                entry.insert(FileMetaData {
                    version: accepted,
                    ..candidate
                });
                Ok(accepted)
            }
            Entry::Vacant(entry) => {
                let accepted = candidate.version + 1;
                entry.insert(FileMetaData {
                    version: accepted,
                    ..candidate
                });
                Ok(accepted)
            }
        }
    }
}
