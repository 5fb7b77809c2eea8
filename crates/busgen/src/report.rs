//! Canonical campaign reports.
//!
//! Serde struct field order fixes the key order, artifact hash lists are
//! sorted by path, and the timestamp is injected by the caller, so two
//! identical campaigns produce byte-equal documents modulo that timestamp.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::campaign::RoundtripFailure;
use crate::config::FailPolicy;
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    #[serde(rename = "PASSED")]
    Passed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl RunStatus {
    pub fn from_failures(failures: u64) -> Self {
        if failures == 0 {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileHash {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IrInput {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub ir_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolchainInfo {
    pub compiler: String,
    pub compiler_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignConfig {
    pub loops: u32,
    pub cases_per_seed: u32,
    pub fail_policy: FailPolicy,
    pub master_seed: u64,
    pub loop_seeds: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageOutcome {
    pub message: String,
    pub cases_run: u32,
    pub failure_count: u32,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopSummary {
    pub loop_index: u32,
    pub loop_seed: u64,
    pub messages: Vec<MessageOutcome>,
    pub failure_count: u32,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Totals {
    pub loops_executed: u32,
    pub passed_loops: u32,
    pub failed_loops: u32,
    pub cases_run: u64,
    pub failure_count: u64,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub schema_version: String,
    pub timestamp_utc: String,
    pub tool_version: String,
    pub codec_version: String,
    pub toolchain: ToolchainInfo,
    pub inputs: Vec<IrInput>,
    pub artifact_dir: String,
    pub artifacts: Vec<FileHash>,
    pub config: CampaignConfig,
    pub loops: Vec<LoopSummary>,
    pub totals: Totals,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub schema_version: String,
    pub timestamp_utc: String,
    pub tool_version: String,
    pub codec_version: String,
    pub toolchain: ToolchainInfo,
    pub inputs: Vec<IrInput>,
    pub config: CampaignConfig,
    pub failure_count: u64,
    pub failures: Vec<RoundtripFailure>,
}

pub fn summary_filename(run_stamp: &str) -> String {
    format!("{run_stamp}-raw.report.yaml")
}

pub fn error_filename(run_stamp: &str) -> String {
    format!("{run_stamp}-raw.error.report.yaml")
}

/// Write the summary and, when present, the error report. Returns the paths.
pub fn write_reports(
    report_dir: &Path,
    run_stamp: &str,
    summary: &SummaryReport,
    errors: Option<&ErrorReport>,
) -> Result<(PathBuf, Option<PathBuf>)> {
    let summary_path = report_dir.join(summary_filename(run_stamp));
    util::write_atomic(&summary_path, serde_yaml::to_string(summary)?.as_bytes())?;

    let error_path = match errors {
        Some(errors) => {
            let path = report_dir.join(error_filename(run_stamp));
            util::write_atomic(&path, serde_yaml::to_string(errors)?.as_bytes())?;
            Some(path)
        }
        None => None,
    };

    Ok((summary_path, error_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_with_timestamp(timestamp: &str) -> SummaryReport {
        let outcome = MessageOutcome {
            message: "status".to_string(),
            cases_run: 8,
            failure_count: 0,
            status: RunStatus::Passed,
        };
        SummaryReport {
            schema_version: busgenc::RAW_REPORT_SCHEMA_VERSION.to_string(),
            timestamp_utc: timestamp.to_string(),
            tool_version: "0.1.0".to_string(),
            codec_version: busgenc::BUSGENC_VERSION.to_string(),
            toolchain: ToolchainInfo {
                compiler: "cc".to_string(),
                compiler_version: "cc 12.0".to_string(),
            },
            inputs: vec![IrInput {
                name: "demo".to_string(),
                path: "demo.ir.yaml".to_string(),
                sha256: "ab".repeat(32),
                ir_version: "0.1".to_string(),
            }],
            artifact_dir: "/tmp/gen".to_string(),
            artifacts: vec![FileHash {
                path: "demo_protocol.c".to_string(),
                sha256: "cd".repeat(32),
            }],
            config: CampaignConfig {
                loops: 2,
                cases_per_seed: 8,
                fail_policy: FailPolicy::ContinueOnFail,
                master_seed: 42,
                loop_seeds: vec![1, 2],
            },
            loops: vec![LoopSummary {
                loop_index: 0,
                loop_seed: 1,
                messages: vec![outcome],
                failure_count: 0,
                status: RunStatus::Passed,
            }],
            totals: Totals {
                loops_executed: 1,
                passed_loops: 1,
                failed_loops: 0,
                cases_run: 8,
                failure_count: 0,
                status: RunStatus::Passed,
            },
        }
    }

    #[test]
    fn identical_campaigns_serialize_byte_equal() {
        let a = serde_yaml::to_string(&summary_with_timestamp("2026-01-01T00:00:00Z")).unwrap();
        let b = serde_yaml::to_string(&summary_with_timestamp("2026-01-01T00:00:00Z")).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("master_seed: 42"));
        assert!(a.contains("status: PASSED"));
    }

    #[test]
    fn reports_land_under_the_stamped_names() {
        let dir = crate::util::scratch_dir("report_names").unwrap();
        let summary = summary_with_timestamp("2026-01-01T00:00:00Z");
        let (summary_path, error_path) =
            write_reports(&dir, "20260101T000000Z", &summary, None).unwrap();
        assert_eq!(
            summary_path.file_name().unwrap().to_str().unwrap(),
            "20260101T000000Z-raw.report.yaml"
        );
        assert!(error_path.is_none());
        assert!(summary_path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
