use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = ".busgen/config.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[clap(rename_all = "kebab_case")]
pub enum FailPolicy {
    /// Record each failure and keep running the campaign.
    ContinueOnFail,
    /// Halt the campaign on the first failing loop.
    StopOnFail,
}

/// Workspace configuration. The schema is closed: unknown keys are a load
/// error, so typos never silently fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub output_root: PathBuf,
    pub toolchain_hint: Option<String>,
    pub default_loops: u32,
    pub fail_policy: FailPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("."),
            toolchain_hint: None,
            default_loops: 3,
            fail_policy: FailPolicy::ContinueOnFail,
        }
    }
}

impl Config {
    pub fn gen_dir(&self) -> PathBuf {
        self.output_root.join("gen")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.output_root.join("raw_reports")
    }
}

/// Load the config file, or defaults when it does not exist.
pub fn load(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parse config: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load(Path::new("/definitely/not/here/config.yaml")).unwrap();
        assert_eq!(cfg.default_loops, 3);
        assert_eq!(cfg.fail_policy, FailPolicy::ContinueOnFail);
        assert_eq!(cfg.output_root, PathBuf::from("."));
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = util::scratch_dir("config_partial").unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(&path, "default_loops: 7\nfail_policy: stop-on-fail\n").unwrap();
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.default_loops, 7);
        assert_eq!(cfg.fail_policy, FailPolicy::StopOnFail);
        assert!(cfg.toolchain_hint.is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = util::scratch_dir("config_unknown").unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(&path, "default_loops: 7\nmax_retries: 2\n").unwrap();
        assert!(load(&path).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
