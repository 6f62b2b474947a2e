use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sentinel hash-list entry that marks a deleted file.
pub const TOMBSTONE_HASH: &str = "0";

/// One chunk of a file, at most `block_size` bytes. Identity is the lowercase
/// SHA-256 hex of `data`; blocks are immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub data: Vec<u8>,
    pub size: usize,
}

impl Block {
    pub fn new(data: Vec<u8>) -> Self {
        let size = data.len();
        Block { data, size }
    }

    pub fn hash(&self) -> String {
        hash_block(&self.data)
    }
}

/// Lowercase SHA-256 hex digest of a chunk.
pub fn hash_block(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Per-file record the server tracks: a server-assigned monotonic version and
/// the ordered block hashes that reconstitute the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetaData {
    pub file_name: String,
    pub version: u64,
    pub block_hash_list: Vec<String>,
}

impl FileMetaData {
    pub fn is_tombstone(&self) -> bool {
        is_tombstone(&self.block_hash_list)
    }
}

/// A deletion is encoded as a hash list of exactly `["0"]`. Any other list
/// shape, including the empty list of a zero-length file, is a live file.
pub fn is_tombstone(hash_list: &[String]) -> bool {
    hash_list.len() == 1 && hash_list[0] == TOMBSTONE_HASH
}

pub fn tombstone() -> Vec<String> {
    vec![TOMBSTONE_HASH.to_string()]
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutBlockResponse {
    pub hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HasBlocksRequest {
    pub hashes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HasBlocksResponse {
    pub present: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileInfoMapResponse {
    pub files: HashMap<String, FileMetaData>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateFileResponse {
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionConflictResponse {
    pub error: String,
    pub current_version: u64,
}
