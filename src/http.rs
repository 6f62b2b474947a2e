use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client as HttpClient, ClientBuilder, Response, StatusCode};

use crate::proto::{
    Block, FileInfoMapResponse, FileMetaData, HasBlocksRequest, HasBlocksResponse,
    PutBlockResponse, UpdateFileResponse, VersionConflictResponse,
};

/// GetBlock asked for a hash the server has never stored.
#[derive(Debug, Clone)]
pub struct BlockNotFound {
    pub hash: String,
}

impl std::fmt::Display for BlockNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "block {} not found on server", self.hash)
    }
}

impl std::error::Error for BlockNotFound {}

/// UpdateFile was rejected; `current_version` is the server's version for the
/// file at rejection time, informational only.
#[derive(Debug, Clone)]
pub struct VersionConflict {
    pub current_version: u64,
}

impl std::fmt::Display for VersionConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "update rejected: server is at version {}", self.current_version)
    }
}

impl std::error::Error for VersionConflict {}

/// Thin stub over the server methods. Connection pooling is disabled so each
/// call opens one connection, uses it, and closes it.
#[derive(Clone)]
pub struct ApiClient {
    base: String,
    http: HttpClient,
}

impl ApiClient {
    pub fn new(base: &str) -> Result<Self> {
        let http = ClientBuilder::new()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .user_agent("surfstore-rs/0.1")
            .pool_max_idle_per_host(0)
            .no_proxy()
            .build()?;
        Ok(ApiClient {
            base: base.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn healthz(&self) -> Result<()> {
        let url = format!("{}/healthz", self.base);
        let resp = self.http.get(url).send().await?;
        ensure_success(resp, "healthz").await?;
        Ok(())
    }

    pub async fn get_block(&self, hash: &str) -> Result<Block> {
        let url = format!("{}/api/v1/block/{hash}", self.base);
        let resp = self.http.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(anyhow::Error::new(BlockNotFound {
                hash: hash.to_string(),
            }));
        }
        let resp = ensure_success(resp, "get block").await?;
        let data = resp.bytes().await?.to_vec();
        Ok(Block::new(data))
    }

    pub async fn put_block(&self, block: &Block) -> Result<String> {
        let url = format!("{}/api/v1/block", self.base);
        let resp = self.http.put(url).body(block.data.clone()).send().await?;
        let resp = ensure_success(resp, "put block").await?;
        let out: PutBlockResponse = resp.json().await.context("parse put block response")?;
        Ok(out.hash)
    }

    pub async fn has_blocks(&self, hashes: &[String]) -> Result<Vec<String>> {
        let url = format!("{}/api/v1/block/present", self.base);
        let body = HasBlocksRequest {
            hashes: hashes.to_vec(),
        };
        let resp = self.http.post(url).json(&body).send().await?;
        let resp = ensure_success(resp, "has blocks").await?;
        let out: HasBlocksResponse = resp.json().await.context("parse has blocks response")?;
        Ok(out.present)
    }

    pub async fn get_file_info_map(&self) -> Result<HashMap<String, FileMetaData>> {
        let url = format!("{}/api/v1/metadata", self.base);
        let resp = self.http.get(url).send().await?;
        let resp = ensure_success(resp, "get file info map").await?;
        let out: FileInfoMapResponse = resp.json().await.context("parse file info map")?;
        Ok(out.files)
    }

    pub async fn update_file(&self, candidate: &FileMetaData) -> Result<u64> {
        let url = format!("{}/api/v1/metadata", self.base);
        let resp = self.http.post(url).json(candidate).send().await?;
        if resp.status() == StatusCode::CONFLICT {
            let conflict: VersionConflictResponse =
                resp.json().await.context("parse version conflict")?;
            return Err(anyhow::Error::new(VersionConflict {
                current_version: conflict.current_version,
            }));
        }
        let resp = ensure_success(resp, "update file").await?;
        let out: UpdateFileResponse = resp.json().await.context("parse update file response")?;
        Ok(out.version)
    }
}

async fn ensure_success(resp: Response, op: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    anyhow::bail!("{op} failed: {status} {text}")
}
