use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::http::{ApiClient, VersionConflict};
use crate::index;
use crate::proto::{hash_block, tombstone, Block, FileMetaData};
use crate::scanner::{scan_base_dir, staged_path};

/// One full reconciliation pass: scan the base directory, diff it against the
/// local index and the remote map, pull files the server won, push local
/// changes, and rewrite the index last so it never claims more than the
/// server confirmed.
pub async fn sync_once(api: &ApiClient, base_dir: &Path, block_size: usize) -> Result<()> {
    index::ensure_index_file(base_dir)?;
    let mut local_index = index::load_index(base_dir).context("parse local index")?;
    let scanned = scan_base_dir(base_dir, block_size).context("scan base dir")?;

    let mut proposed = propose_changes(&local_index, &scanned.files);

    let remote = api
        .get_file_info_map()
        .await
        .context("fetch remote file info map")?;

    pull_remote_changes(api, base_dir, &remote, &mut local_index, &mut proposed).await?;

    if let Err(err) =
        push_local_changes(api, base_dir, &remote, &mut local_index, &proposed, &scanned.blocks)
            .await
    {
        // A rejected or failed push means the server moved on; take its state
        // and let the next pass re-derive what is still worth pushing.
        crate::logging::error(format!("push aborted, re-pulling server state: {err:#}"));
        pull_remote_changes(api, base_dir, &remote, &mut local_index, &mut proposed)
            .await
            .context("recovery pull")?;
    }

    index::save_index(base_dir, &local_index).context("persist local index")
}

/// Diff the scan against the index into the metadata updates this client
/// wants the server to accept.
fn propose_changes(
    local_index: &HashMap<String, FileMetaData>,
    scanned: &HashMap<String, Vec<String>>,
) -> HashMap<String, FileMetaData> {
    let mut proposed = HashMap::new();

    for (name, hashes) in scanned {
        match local_index.get(name) {
            None => {
                // Brand-new file; version 0 asks the server to assign v1.
                proposed.insert(
                    name.clone(),
                    FileMetaData {
                        file_name: name.clone(),
                        version: 0,
                        block_hash_list: hashes.clone(),
                    },
                );
            }
            Some(known) if known.block_hash_list != *hashes => {
                proposed.insert(
                    name.clone(),
                    FileMetaData {
                        file_name: name.clone(),
                        version: known.version,
                        block_hash_list: hashes.clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }

    // Files the index knows but the scan no longer sees were deleted locally.
    // Entries that are already tombstones are proposed again on purpose; the
    // push settles them against the server's current answer.
    for (name, known) in local_index {
        if !scanned.contains_key(name) {
            proposed.insert(
                name.clone(),
                FileMetaData {
                    file_name: name.clone(),
                    version: known.version,
                    block_hash_list: tombstone(),
                },
            );
        }
    }

    proposed
}

/// Apply every remote entry the local index has never seen or only knows at an
/// older version. The server is authoritative for those files, so a proposed
/// local change for the same name is dropped rather than pushed.
async fn pull_remote_changes(
    api: &ApiClient,
    base_dir: &Path,
    remote: &HashMap<String, FileMetaData>,
    local_index: &mut HashMap<String, FileMetaData>,
    proposed: &mut HashMap<String, FileMetaData>,
) -> Result<()> {
    for (name, rmeta) in remote {
        let remote_is_newer = match local_index.get(name) {
            None => true,
            Some(known) => known.version < rmeta.version,
        };
        if !remote_is_newer {
            continue;
        }

        apply_remote_file(api, base_dir, rmeta).await?;
        local_index.insert(name.clone(), rmeta.clone());
        proposed.remove(name);
    }
    Ok(())
}

/// Push each surviving proposed change. A tombstone carries no blocks; for
/// everything else all referenced blocks go up before the metadata update, so
/// the server never advertises a file it cannot serve.
async fn push_local_changes(
    api: &ApiClient,
    base_dir: &Path,
    remote: &HashMap<String, FileMetaData>,
    local_index: &mut HashMap<String, FileMetaData>,
    proposed: &HashMap<String, FileMetaData>,
    blocks: &HashMap<String, Block>,
) -> Result<()> {
    for (name, pmeta) in proposed {
        match remote.get(name) {
            None => push_file(api, pmeta, blocks, local_index).await?,
            Some(rmeta) if rmeta.version == pmeta.version => {
                push_file(api, pmeta, blocks, local_index).await?
            }
            Some(rmeta) if pmeta.version < rmeta.version => {
                // The server is already ahead; its copy wins and the local
                // edit is discarded.
                apply_remote_file(api, base_dir, rmeta).await?;
                local_index.insert(name.clone(), rmeta.clone());
            }
            Some(_) => {}
        }
    }
    Ok(())
}

async fn push_file(
    api: &ApiClient,
    pmeta: &FileMetaData,
    blocks: &HashMap<String, Block>,
    local_index: &mut HashMap<String, FileMetaData>,
) -> Result<()> {
    if !pmeta.is_tombstone() {
        for hash in &pmeta.block_hash_list {
            let block = blocks
                .get(hash)
                .with_context(|| format!("scanned block {hash} missing from cache"))?;
            api.put_block(block).await?;
        }
    }

    let version = match api.update_file(pmeta).await {
        Ok(version) => version,
        Err(err) => {
            if let Some(conflict) = err.downcast_ref::<VersionConflict>() {
                let current = conflict.current_version.to_string();
                crate::logging::info_kv(
                    "update rejected",
                    &[
                        ("file", pmeta.file_name.as_str()),
                        ("server_version", current.as_str()),
                    ],
                );
            }
            return Err(err);
        }
    };

    local_index.insert(
        pmeta.file_name.clone(),
        FileMetaData {
            file_name: pmeta.file_name.clone(),
            version,
            block_hash_list: pmeta.block_hash_list.clone(),
        },
    );
    Ok(())
}

/// Materialize one remote record locally: remove the file for a tombstone,
/// otherwise fetch its blocks into a staged temp file and rename into place,
/// so a failed fetch mid-file leaves the target untouched.
async fn apply_remote_file(api: &ApiClient, base_dir: &Path, rmeta: &FileMetaData) -> Result<()> {
    let target = base_dir.join(&rmeta.file_name);

    if rmeta.is_tombstone() {
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("remove {}", target.display()));
            }
        }
        return Ok(());
    }

    let tmp = staged_path(base_dir, &rmeta.file_name);
    if let Err(err) = write_blocks(api, &tmp, &rmeta.block_hash_list).await {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::rename(&tmp, &target)
        .with_context(|| format!("rename {} -> {}", tmp.display(), target.display()))
}

async fn write_blocks(api: &ApiClient, path: &Path, hashes: &[String]) -> Result<()> {
    let mut file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    for hash in hashes {
        let block = api.get_block(hash).await?;
        if hash_block(&block.data) != *hash {
            anyhow::bail!(
                "block {hash}: fetched {} bytes do not hash back to it",
                block.size
            );
        }
        file.write_all(&block.data)
            .with_context(|| format!("write {}", path.display()))?;
    }
    file.flush()
        .with_context(|| format!("flush {}", path.display()))?;
    Ok(())
}
