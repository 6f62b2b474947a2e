use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::index::INDEX_FILE_NAME;
use crate::proto::{hash_block, Block};

/// Prefix for staged temp files that the sync pass renames into place. The
/// scanner must never treat one as a user file.
pub(crate) const STAGED_PREFIX: &str = ".surfstore-tmp-";

pub(crate) fn staged_path(base_dir: &Path, name: &str) -> PathBuf {
    base_dir.join(format!(
        "{STAGED_PREFIX}{}-{name}",
        uuid::Uuid::new_v4().as_simple()
    ))
}

/// What one pass learned from the base directory: the ordered hash list per
/// file, plus every block backing those lists keyed by hash.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub files: HashMap<String, Vec<String>>,
    pub blocks: HashMap<String, Block>,
}

/// Walk the top level of the base directory and split every regular file into
/// `block_size` chunks. `index.txt` is reserved and skipped; so are
/// directories, symlinks and other non-regular entries.
pub fn scan_base_dir(base_dir: &Path, block_size: usize) -> Result<ScanResult> {
    let mut out = ScanResult::default();

    for entry in WalkDir::new(base_dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("read dir {}", base_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name == INDEX_FILE_NAME || name.starts_with(STAGED_PREFIX) {
            continue;
        }
        let hashes = split_into_blocks(entry.path(), block_size, &mut out.blocks)?;
        out.files.insert(name, hashes);
    }
    Ok(out)
}

/// Read `path` sequentially in `block_size` chunks, hashing each one. The last
/// chunk holds whatever remains; a zero-length file yields no chunks at all.
fn split_into_blocks(
    path: &Path,
    block_size: usize,
    cache: &mut HashMap<String, Block>,
) -> Result<Vec<String>> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hashes = Vec::new();
    loop {
        let mut data = vec![0u8; block_size];
        let n = read_chunk(&mut file, &mut data)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        data.truncate(n);
        let hash = hash_block(&data);
        cache.insert(hash.clone(), Block { data, size: n });
        hashes.push(hash);
    }
    Ok(hashes)
}

// Fill `buf` as far as the file allows; a short return means EOF.
fn read_chunk(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::SystemTime;

    fn make_temp_dir() -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let tmp = std::env::temp_dir().join(format!("surfstore-rs-scanner-test-{nanos}"));
        fs::create_dir_all(&tmp).unwrap();
        tmp
    }

    #[test]
    fn empty_base_dir_scans_empty() {
        let tmp = make_temp_dir();
        let scan = scan_base_dir(&tmp, 4096).unwrap();
        assert!(scan.files.is_empty());
        assert!(scan.blocks.is_empty());
    }

    #[test]
    fn file_one_byte_over_block_size_splits_into_two() {
        let tmp = make_temp_dir();
        fs::write(tmp.join("a.txt"), vec![b'x'; 4097]).unwrap();

        let scan = scan_base_dir(&tmp, 4096).unwrap();
        let hashes = &scan.files["a.txt"];
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], hash_block(&vec![b'x'; 4096]));
        assert_eq!(hashes[1], hash_block(b"x"));

        assert_eq!(scan.blocks[&hashes[0]].size, 4096);
        assert_eq!(scan.blocks[&hashes[1]].size, 1);
    }

    #[test]
    fn exact_multiple_of_block_size_has_no_empty_tail() {
        let tmp = make_temp_dir();
        fs::write(tmp.join("a.bin"), vec![7u8; 8192]).unwrap();

        let scan = scan_base_dir(&tmp, 4096).unwrap();
        assert_eq!(scan.files["a.bin"].len(), 2);
        for hash in &scan.files["a.bin"] {
            assert_eq!(scan.blocks[hash].size, 4096);
        }
    }

    #[test]
    fn zero_length_file_yields_empty_hash_list() {
        let tmp = make_temp_dir();
        fs::write(tmp.join("empty.txt"), b"").unwrap();

        let scan = scan_base_dir(&tmp, 4096).unwrap();
        assert!(scan.files["empty.txt"].is_empty());
        assert!(scan.blocks.is_empty());
    }

    #[test]
    fn identical_blocks_share_one_cache_entry() {
        let tmp = make_temp_dir();
        fs::write(tmp.join("a.bin"), vec![1u8; 4096 * 2]).unwrap();

        let scan = scan_base_dir(&tmp, 4096).unwrap();
        assert_eq!(scan.files["a.bin"].len(), 2);
        assert_eq!(scan.files["a.bin"][0], scan.files["a.bin"][1]);
        assert_eq!(scan.blocks.len(), 1);
    }

    #[test]
    fn index_file_subdirs_and_staged_temps_are_skipped() {
        let tmp = make_temp_dir();
        fs::write(tmp.join(INDEX_FILE_NAME), "a.txt,1,h\n").unwrap();
        fs::write(tmp.join(format!("{STAGED_PREFIX}abc-a.txt")), b"half").unwrap();
        fs::create_dir(tmp.join("subdir")).unwrap();
        fs::write(tmp.join("subdir").join("nested.txt"), b"nested").unwrap();
        fs::write(tmp.join("real.txt"), b"content").unwrap();

        let scan = scan_base_dir(&tmp, 4096).unwrap();
        assert_eq!(scan.files.len(), 1);
        assert!(scan.files.contains_key("real.txt"));
    }
}
