//! On-disk YAML configuration (`sdsio.yml` / `sdsio.yaml`).
//!
//! Invalid or missing values always fall back to a default and log a
//! warning — loading this file never fails the process.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

const DEFAULT_IDX_END: u32 = i32::MAX as u32;

/// How WRITE-mode indexes are drawn for a given stream name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatorConfig {
    /// Smallest free index in `[start, end]`, probed against the filesystem.
    Range { start: u32, end: u32 },
    /// Explicit sequence, de-duplicated in order; overrides the range.
    List(Vec<u32>),
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig::Range {
            start: 0,
            end: DEFAULT_IDX_END,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory `.sds` files live in. Resolved against the work dir and
    /// created (including missing parents) before use.
    pub dir: PathBuf,
    pub allocator: AllocatorConfig,
}

/// Raw deserialization shape; fields are independently optional and
/// independently validated so one bad key doesn't discard the rest.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    dir: Option<String>,
    #[serde(rename = "idx-start")]
    idx_start: Option<i64>,
    #[serde(rename = "idx-end")]
    idx_end: Option<i64>,
    #[serde(rename = "idx-list")]
    idx_list: Option<Vec<i64>>,
}

impl Config {
    /// Looks for `sdsio.yml` then `sdsio.yaml` inside `workdir`; falls back
    /// to an all-defaults config if neither is present or parseable.
    pub fn load(workdir: &Path) -> Config {
        let raw = ["sdsio.yml", "sdsio.yaml"]
            .iter()
            .map(|name| workdir.join(name))
            .find(|path| path.is_file())
            .and_then(|path| match std::fs::read_to_string(&path) {
                Ok(text) => match serde_yaml::from_str::<RawConfig>(&text) {
                    Ok(raw) => Some(raw),
                    Err(err) => {
                        warn!(path = %path.display(), %err, "failed to parse sdsio config, using defaults");
                        None
                    }
                },
                Err(err) => {
                    warn!(path = %path.display(), %err, "failed to read sdsio config, using defaults");
                    None
                }
            })
            .unwrap_or_default();

        Config::from_raw(raw, workdir)
    }

    fn from_raw(raw: RawConfig, workdir: &Path) -> Config {
        let dir = match raw.dir {
            Some(dir) => {
                let path = PathBuf::from(dir);
                if path.is_absolute() { path } else { workdir.join(path) }
            }
            None => workdir.to_path_buf(),
        };

        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), %err, "failed to create sdsio output directory");
        }

        let allocator = if let Some(list) = raw.idx_list {
            let mut seen = std::collections::HashSet::new();
            let mut dedup = Vec::new();
            for v in list {
                match u32::try_from(v) {
                    Ok(v) if seen.insert(v) => dedup.push(v),
                    Ok(_) => {}
                    Err(_) => warn!(value = v, "ignoring negative idx-list entry"),
                }
            }
            AllocatorConfig::List(dedup)
        } else {
            let start = raw
                .idx_start
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0);
            let end = raw
                .idx_end
                .and_then(|v| u32::try_from(v).ok())
                .filter(|&end| end >= start)
                .unwrap_or(DEFAULT_IDX_END);
            AllocatorConfig::Range { start, end }
        };

        Config { dir, allocator }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_file_present() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path());
        assert_eq!(cfg.dir, dir.path());
        assert_eq!(cfg.allocator, AllocatorConfig::default());
    }

    #[test]
    fn parses_range_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sdsio.yml"), "idx-start: 5\nidx-end: 10\n").unwrap();
        let cfg = Config::load(dir.path());
        assert_eq!(cfg.allocator, AllocatorConfig::Range { start: 5, end: 10 });
    }

    #[test]
    fn idx_list_overrides_range_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sdsio.yml"),
            "idx-start: 5\nidx-list: [3, 1, 3, 2]\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path());
        assert_eq!(cfg.allocator, AllocatorConfig::List(vec![3, 1, 2]));
    }

    #[test]
    fn malformed_yaml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sdsio.yml"), "not: [valid yaml").unwrap();
        let cfg = Config::load(dir.path());
        assert_eq!(cfg.allocator, AllocatorConfig::default());
    }

    #[test]
    fn relative_dir_resolves_against_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sdsio.yml"), "dir: captures\n").unwrap();
        let cfg = Config::load(dir.path());
        assert_eq!(cfg.dir, dir.path().join("captures"));
        assert!(cfg.dir.is_dir());
    }
}
