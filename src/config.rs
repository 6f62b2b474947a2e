use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

pub const DEFAULT_BLOCK_SIZE: usize = 4096;

#[derive(Debug, Default, Deserialize, Clone)]
struct PartialConfig {
    #[serde(default)]
    server_url: Option<String>,
    #[serde(default)]
    base_dir: Option<PathBuf>,
    #[serde(default)]
    block_size: Option<usize>,
}

/// Resolved client configuration: where the server is, which directory to
/// mirror, and the chunk size used when splitting files.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: String,
    pub base_dir: PathBuf,
    pub block_size: usize,
}

/// CLI-flag values; each takes precedence over the config file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub server_url: Option<String>,
    pub base_dir: Option<PathBuf>,
    pub block_size: Option<usize>,
}

pub fn default_log_file_path() -> PathBuf {
    home_dir().join(".surfstore").join("logs").join("surfstore.log")
}

impl Config {
    pub fn default_server_url() -> &'static str {
        "http://127.0.0.1:8080"
    }

    pub fn default_config_path() -> PathBuf {
        home_dir().join(".surfstore").join("config.json")
    }

    pub fn resolve_config_path(flag_path: Option<&Path>) -> PathBuf {
        match flag_path {
            Some(p) => absolutize_path(p),
            None => absolutize_path(&Self::default_config_path()),
        }
    }

    pub fn load_with_overrides(path: &Path, overrides: ConfigOverrides) -> Result<Self> {
        let file_cfg = if path.exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str::<PartialConfig>(&data).context("parse config json")?
        } else {
            PartialConfig::default()
        };

        let server_url = overrides
            .server_url
            .or(file_cfg.server_url)
            .unwrap_or_else(|| Self::default_server_url().to_string());
        let base_dir = overrides
            .base_dir
            .or(file_cfg.base_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        let block_size = overrides
            .block_size
            .or(file_cfg.block_size)
            .unwrap_or(DEFAULT_BLOCK_SIZE);

        let mut cfg = Config {
            server_url,
            base_dir,
            block_size,
        };
        cfg.normalize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn normalize(&mut self) -> Result<()> {
        self.server_url = self.server_url.trim().trim_end_matches('/').to_string();
        self.base_dir = absolutize_path(&self.base_dir);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        validate_url(&self.server_url).context("server_url")?;
        if self.block_size == 0 {
            anyhow::bail!("block_size must be positive");
        }
        Ok(())
    }
}

pub(crate) fn validate_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw)?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("url must be http or https");
    }
    Ok(())
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn absolutize_path(path: &Path) -> PathBuf {
    let expanded = expand_tilde(path);
    let abs = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(expanded)
    };
    let cleaned = clean_lexical(&abs);
    // Resolve symlinks (/tmp on macOS is one) so path comparisons use one
    // consistent form; fall back if the path does not exist yet.
    std::fs::canonicalize(&cleaned).unwrap_or(cleaned)
}

fn expand_tilde(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(c)) if c == OsStr::new("~") => {
            let mut out = home_dir();
            for c in components {
                out.push(c.as_os_str());
            }
            out
        }
        _ => path.to_path_buf(),
    }
}

fn clean_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Path::new(&std::path::MAIN_SEPARATOR.to_string())),
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                );
                if popped {
                    out.pop();
                } else if !out.as_os_str().is_empty() {
                    out.push("..");
                }
            }
            Component::Normal(p) => out.push(p),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_temp_dir(name: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        tmp
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let tmp = make_temp_dir("surfstore-rs-config-missing");
        let cfg = Config::load_with_overrides(
            &tmp.join("nope.json"),
            ConfigOverrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.server_url, Config::default_server_url());
        assert_eq!(cfg.block_size, DEFAULT_BLOCK_SIZE);
        assert!(cfg.base_dir.is_absolute());
    }

    #[test]
    fn config_file_values_are_loaded_and_normalized() {
        let tmp = make_temp_dir("surfstore-rs-config-load");
        let base_dir = tmp.join("data").display().to_string().replace('\\', "/");
        let cfg_path = tmp.join("config.json");
        fs::write(
            &cfg_path,
            format!(
                r#"{{
                    "server_url": "http://127.0.0.1:9000/",
                    "base_dir": "{}",
                    "block_size": 1024
                }}"#,
                base_dir
            ),
        )
        .unwrap();

        let cfg = Config::load_with_overrides(&cfg_path, ConfigOverrides::default()).unwrap();
        assert_eq!(cfg.server_url, "http://127.0.0.1:9000");
        assert_eq!(cfg.block_size, 1024);
        assert!(cfg.base_dir.is_absolute());
    }

    #[test]
    fn overrides_take_precedence_over_file() {
        let tmp = make_temp_dir("surfstore-rs-config-overrides");
        let cfg_path = tmp.join("config.json");
        fs::write(
            &cfg_path,
            r#"{"server_url": "http://127.0.0.1:9000", "block_size": 1024}"#,
        )
        .unwrap();

        let cfg = Config::load_with_overrides(
            &cfg_path,
            ConfigOverrides {
                server_url: Some("http://127.0.0.1:9001".to_string()),
                base_dir: Some(tmp.clone()),
                block_size: Some(512),
            },
        )
        .unwrap();
        assert_eq!(cfg.server_url, "http://127.0.0.1:9001");
        assert_eq!(cfg.block_size, 512);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let tmp = make_temp_dir("surfstore-rs-config-zero-block");
        let err = Config::load_with_overrides(
            &tmp.join("nope.json"),
            ConfigOverrides {
                block_size: Some(0),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("block_size"));
    }

    #[test]
    fn non_http_server_url_is_rejected() {
        let tmp = make_temp_dir("surfstore-rs-config-bad-scheme");
        let err = Config::load_with_overrides(
            &tmp.join("nope.json"),
            ConfigOverrides {
                server_url: Some("ftp://127.0.0.1:21".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("http"));
    }
}
