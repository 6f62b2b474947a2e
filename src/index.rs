use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::proto::FileMetaData;
use crate::scanner::staged_path;

pub const INDEX_FILE_NAME: &str = "index.txt";

pub fn index_path(base_dir: &Path) -> PathBuf {
    base_dir.join(INDEX_FILE_NAME)
}

/// Create an empty `index.txt` if the base directory does not have one yet.
pub fn ensure_index_file(base_dir: &Path) -> Result<()> {
    let path = index_path(base_dir);
    if !path.exists() {
        fs::write(&path, "").with_context(|| format!("create {}", path.display()))?;
    }
    Ok(())
}

/// Read and parse the local index. An absent or empty file is an empty index.
pub fn load_index(base_dir: &Path) -> Result<HashMap<String, FileMetaData>> {
    let path = index_path(base_dir);
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    parse_index(&raw)
}

/// Each line is `<filename>,<version>,<hash1 hash2 ... hashN>`. The hash field
/// is empty for a zero-length file and the single sentinel `0` for a deleted
/// one. A malformed line fails the whole parse.
pub fn parse_index(raw: &str) -> Result<HashMap<String, FileMetaData>> {
    let mut index = HashMap::new();
    for (lineno, line) in raw.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.splitn(3, ',');
        let (Some(name), Some(version), Some(hashes)) =
            (fields.next(), fields.next(), fields.next())
        else {
            bail!(
                "index line {}: expected <filename>,<version>,<hashes>",
                lineno + 1
            );
        };
        let version: u64 = version
            .parse()
            .with_context(|| format!("index line {}: bad version {version:?}", lineno + 1))?;
        let block_hash_list = if hashes.is_empty() {
            Vec::new()
        } else {
            hashes.split(' ').map(str::to_string).collect()
        };
        index.insert(
            name.to_string(),
            FileMetaData {
                file_name: name.to_string(),
                version,
                block_hash_list,
            },
        );
    }
    Ok(index)
}

pub fn serialize_index(index: &HashMap<String, FileMetaData>) -> String {
    let mut names: Vec<&String> = index.keys().collect();
    names.sort();

    let mut out = String::new();
    for name in names {
        let meta = &index[name];
        out.push_str(name);
        out.push(',');
        out.push_str(&meta.version.to_string());
        out.push(',');
        out.push_str(&meta.block_hash_list.join(" "));
        out.push('\n');
    }
    out
}

/// Rewrite `index.txt` through a staged temp file and rename, so a crash
/// mid-write never leaves a torn index behind.
pub fn save_index(base_dir: &Path, index: &HashMap<String, FileMetaData>) -> Result<()> {
    let target = index_path(base_dir);
    let tmp = staged_path(base_dir, INDEX_FILE_NAME);
    fs::write(&tmp, serialize_index(index))
        .with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, &target)
        .with_context(|| format!("rename {} -> {}", tmp.display(), target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::tombstone;
    use std::time::SystemTime;

    fn make_temp_dir() -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let tmp = std::env::temp_dir().join(format!("surfstore-rs-index-test-{nanos}"));
        fs::create_dir_all(&tmp).unwrap();
        tmp
    }

    #[test]
    fn absent_index_is_empty() {
        let tmp = make_temp_dir();
        assert!(load_index(&tmp).unwrap().is_empty());
    }

    #[test]
    fn empty_index_file_is_empty() {
        let tmp = make_temp_dir();
        fs::write(index_path(&tmp), "").unwrap();
        assert!(load_index(&tmp).unwrap().is_empty());
    }

    #[test]
    fn parse_live_tombstone_and_empty_entries() {
        let raw = "a.txt,3,h1 h2\ngone.txt,2,0\nempty.txt,1,\n";
        let index = parse_index(raw).unwrap();
        assert_eq!(index.len(), 3);

        assert_eq!(index["a.txt"].version, 3);
        assert_eq!(index["a.txt"].block_hash_list, vec!["h1", "h2"]);

        assert_eq!(index["gone.txt"].block_hash_list, tombstone());
        assert!(index["gone.txt"].is_tombstone());

        assert_eq!(index["empty.txt"].version, 1);
        assert!(index["empty.txt"].block_hash_list.is_empty());
        assert!(!index["empty.txt"].is_tombstone());
    }

    #[test]
    fn missing_field_fails_the_parse() {
        let err = parse_index("a.txt,3\n").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn unparseable_version_fails_the_parse() {
        let err = parse_index("a.txt,three,h1\n").unwrap_err();
        assert!(format!("{err:#}").contains("bad version"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = make_temp_dir();
        let mut index = HashMap::new();
        index.insert(
            "b.txt".to_string(),
            FileMetaData {
                file_name: "b.txt".to_string(),
                version: 2,
                block_hash_list: vec!["h1".to_string(), "h2".to_string()],
            },
        );
        index.insert(
            "a.txt".to_string(),
            FileMetaData {
                file_name: "a.txt".to_string(),
                version: 1,
                block_hash_list: Vec::new(),
            },
        );
        index.insert(
            "gone.txt".to_string(),
            FileMetaData {
                file_name: "gone.txt".to_string(),
                version: 4,
                block_hash_list: tombstone(),
            },
        );

        save_index(&tmp, &index).unwrap();
        let loaded = load_index(&tmp).unwrap();
        assert_eq!(loaded, index);

        // Lines come out sorted by filename, so rewrites are byte-stable.
        let raw = fs::read_to_string(index_path(&tmp)).unwrap();
        assert_eq!(raw, "a.txt,1,\nb.txt,2,h1 h2\ngone.txt,4,0\n");
    }

    #[test]
    fn ensure_index_file_creates_once() {
        let tmp = make_temp_dir();
        ensure_index_file(&tmp).unwrap();
        assert!(index_path(&tmp).exists());

        fs::write(index_path(&tmp), "a.txt,1,h\n").unwrap();
        ensure_index_file(&tmp).unwrap();
        assert_eq!(fs::read_to_string(index_path(&tmp)).unwrap(), "a.txt,1,h\n");
    }
}
