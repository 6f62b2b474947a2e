use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use crate::blockstore::{BlockStore, MemoryBlockStore};
use crate::metastore::{MemoryMetaStore, MetaStore};
use crate::proto::{
    Block, FileInfoMapResponse, FileMetaData, HasBlocksRequest, HasBlocksResponse,
    PutBlockResponse, UpdateFileResponse, VersionConflictResponse,
};

/// The RPC façade: one route per method, each forwarded to one of the two
/// stores. No policy lives here.
#[derive(Clone)]
pub struct SurfServer {
    blocks: Arc<dyn BlockStore>,
    meta: Arc<dyn MetaStore>,
}

impl SurfServer {
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryBlockStore::new()),
            Arc::new(MemoryMetaStore::new()),
        )
    }

    pub fn new(blocks: Arc<dyn BlockStore>, meta: Arc<dyn MetaStore>) -> Self {
        SurfServer { blocks, meta }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/api/v1/block", put(put_block))
            .route("/api/v1/block/present", post(has_blocks))
            .route("/api/v1/block/:hash", get(get_block))
            .route("/api/v1/metadata", get(file_info_map).post(update_file))
            .with_state(self)
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn get_block(
    State(server): State<SurfServer>,
    AxumPath(hash): AxumPath<String>,
) -> axum::response::Response {
    match server.blocks.get_block(&hash) {
        Some(block) => block.data.into_response(),
        None => (StatusCode::NOT_FOUND, format!("block {hash} does not exist")).into_response(),
    }
}

async fn put_block(State(server): State<SurfServer>, body: Bytes) -> Json<PutBlockResponse> {
    let hash = server.blocks.put_block(Block::new(body.to_vec()));
    Json(PutBlockResponse { hash })
}

async fn has_blocks(
    State(server): State<SurfServer>,
    Json(req): Json<HasBlocksRequest>,
) -> Json<HasBlocksResponse> {
    Json(HasBlocksResponse {
        present: server.blocks.has_blocks(&req.hashes),
    })
}

async fn file_info_map(State(server): State<SurfServer>) -> Json<FileInfoMapResponse> {
    Json(FileInfoMapResponse {
        files: server.meta.file_info_map(),
    })
}

async fn update_file(
    State(server): State<SurfServer>,
    Json(candidate): Json<FileMetaData>,
) -> axum::response::Response {
    match server.meta.update_file(candidate) {
        Ok(version) => Json(UpdateFileResponse { version }).into_response(),
        Err(mismatch) => {
            let current = mismatch.current_version.to_string();
            crate::logging::info_kv(
                "update rejected",
                &[
                    ("file", mismatch.file_name.as_str()),
                    ("server_version", current.as_str()),
                ],
            );
            (
                StatusCode::CONFLICT,
                Json(VersionConflictResponse {
                    error: mismatch.to_string(),
                    current_version: mismatch.current_version,
                }),
            )
                .into_response()
        }
    }
}

/// Bind `addr` and serve until Ctrl+C.
pub async fn serve(addr: &str, server: SurfServer) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    let bound = listener.local_addr()?;
    crate::logging::info_kv("server listening", &[("addr", &bound.to_string())]);

    axum::serve(listener, server.router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            crate::logging::info("server shutting down");
        })
        .await
        .context("serve")?;
    Ok(())
}
