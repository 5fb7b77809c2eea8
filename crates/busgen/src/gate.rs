//! Gate over generated protocol artifacts: determinism re-run, artifact
//! presence, native compile. Steps run in order and the first failure is
//! fatal; later steps are skipped rather than reported against stale state.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use busgenc::{c_emit, ir::SpecIr, naming};

use crate::toolchain;
use crate::util;

#[derive(Debug, Clone, Serialize)]
pub struct GateCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateFailure {
    DeterminismMismatch,
    MissingArtifact,
    CompileFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<GateFailure>,
    pub gen_dir: String,
    pub expected_files: Vec<String>,
    pub checks: Vec<GateCheck>,
}

impl GateReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Codegen Gate: {}",
            if self.ok { "PASSED" } else { "FAILED" }
        );
        let _ = writeln!(out, "  Gen Dir: {}", self.gen_dir);
        let _ = writeln!(out, "  Expected: {}", self.expected_files.join(", "));
        let _ = writeln!(out, "  Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            if check.detail.is_empty() {
                let _ = writeln!(out, "    - [{status}] {}", check.name);
            } else {
                let _ = writeln!(out, "    - [{status}] {} ({})", check.name, check.detail);
            }
        }
        out
    }
}

pub fn run_gate(spec: &SpecIr, gen_dir: &Path, toolchain_hint: Option<&str>) -> Result<GateReport> {
    let (header_name, source_name) = naming::output_filenames(&spec.meta.name);
    let mut report = GateReport {
        ok: true,
        failure: None,
        gen_dir: gen_dir.display().to_string(),
        expected_files: vec![header_name.clone(), source_name.clone()],
        checks: Vec::new(),
    };

    if let Err(failure) = check_determinism(spec, gen_dir, &mut report)? {
        report.ok = false;
        report.failure = Some(failure);
        return Ok(report);
    }
    if let Err(failure) = check_presence(gen_dir, &header_name, &source_name, &mut report)? {
        report.ok = false;
        report.failure = Some(failure);
        return Ok(report);
    }
    if let Err(failure) = check_compile(gen_dir, &source_name, toolchain_hint, &mut report)? {
        report.ok = false;
        report.failure = Some(failure);
        return Ok(report);
    }

    Ok(report)
}

/// Re-run codegen into a fresh scratch directory, hash both trees, and
/// require identical digests file-by-file.
fn check_determinism(
    spec: &SpecIr,
    gen_dir: &Path,
    report: &mut GateReport,
) -> Result<std::result::Result<(), GateFailure>> {
    let scratch = util::scratch_dir("gate_det")?;
    let rerun = (|| -> Result<Vec<(String, String)>> {
        let generated = c_emit::emit_protocol(spec).context("re-run codegen")?;
        let mut hashes = Vec::new();
        for (name, text) in [
            (&generated.header_name, &generated.header),
            (&generated.source_name, &generated.source),
        ] {
            let path = scratch.join(name);
            util::write_atomic(&path, text.as_bytes())?;
            hashes.push((name.clone(), util::file_sha256(&path)?));
        }
        Ok(hashes)
    })();
    let _ = std::fs::remove_dir_all(&scratch);
    let rerun = rerun?;

    let mut changed: Vec<String> = Vec::new();
    for (name, fresh_hash) in &rerun {
        let existing = gen_dir.join(name);
        match util::file_sha256(&existing) {
            Ok(hash) if hash == *fresh_hash => {}
            Ok(_) => changed.push(name.clone()),
            Err(_) => changed.push(format!("{name} (unreadable)")),
        }
    }

    let passed = changed.is_empty();
    report.checks.push(GateCheck {
        name: "determinism".to_string(),
        passed,
        detail: if passed {
            "ok".to_string()
        } else {
            format!("changed files: {}", changed.join(", "))
        },
    });
    Ok(if passed {
        Ok(())
    } else {
        Err(GateFailure::DeterminismMismatch)
    })
}

fn check_presence(
    gen_dir: &Path,
    header_name: &str,
    source_name: &str,
    report: &mut GateReport,
) -> Result<std::result::Result<(), GateFailure>> {
    let mut problems: Vec<String> = Vec::new();
    for name in [header_name, source_name] {
        let path = gen_dir.join(name);
        match std::fs::metadata(&path) {
            Err(_) => problems.push(format!("missing: {name}")),
            Ok(meta) if meta.len() == 0 => problems.push(format!("empty: {name}")),
            Ok(_) => {}
        }
    }

    if problems.is_empty() {
        let include_line = format!("#include \"{header_name}\"");
        let source_text = std::fs::read_to_string(gen_dir.join(source_name))
            .with_context(|| format!("read generated source: {source_name}"))?;
        if !source_text.contains(&include_line) {
            problems.push(format!("source does not include {header_name}"));
        }
    }

    let passed = problems.is_empty();
    report.checks.push(GateCheck {
        name: "presence".to_string(),
        passed,
        detail: if passed {
            "ok".to_string()
        } else {
            problems.join(", ")
        },
    });
    Ok(if passed {
        Ok(())
    } else {
        Err(GateFailure::MissingArtifact)
    })
}

/// Compile the generated source to a throwaway object with the fixed flag
/// set, under the per-step wall timeout.
fn check_compile(
    gen_dir: &Path,
    source_name: &str,
    toolchain_hint: Option<&str>,
    report: &mut GateReport,
) -> Result<std::result::Result<(), GateFailure>> {
    let tc = match toolchain::discover(toolchain_hint) {
        Ok(tc) => tc,
        Err(err) => {
            report.checks.push(GateCheck {
                name: "compile".to_string(),
                passed: false,
                detail: format!("{err}"),
            });
            return Ok(Err(GateFailure::CompileFailed));
        }
    };

    let scratch = util::scratch_dir("gate_obj")?;
    let obj = scratch.join("protocol.o");
    let outcome = toolchain::compile_object(&tc, &gen_dir.join(source_name), gen_dir, &obj);
    let _ = std::fs::remove_dir_all(&scratch);
    let outcome = outcome?;

    let passed = outcome.success();
    let detail = if passed {
        "ok".to_string()
    } else if outcome.timed_out {
        format!(
            "compile timed out after {}ms",
            toolchain::COMPILE_TIMEOUT_MS
        )
    } else {
        let stderr = outcome.stderr_trimmed();
        if stderr.is_empty() {
            format!("compile failed with exit {}", outcome.exit_code)
        } else {
            format!("compile failed with exit {}: {stderr}", outcome.exit_code)
        }
    };
    report.checks.push(GateCheck {
        name: "compile".to_string(),
        passed,
        detail,
    });
    Ok(if passed {
        Ok(())
    } else {
        Err(GateFailure::CompileFailed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_rendering_lists_each_check() {
        let report = GateReport {
            ok: false,
            failure: Some(GateFailure::MissingArtifact),
            gen_dir: "/tmp/gen".to_string(),
            expected_files: vec!["a_protocol.h".to_string(), "a_protocol.c".to_string()],
            checks: vec![
                GateCheck {
                    name: "determinism".to_string(),
                    passed: true,
                    detail: "ok".to_string(),
                },
                GateCheck {
                    name: "presence".to_string(),
                    passed: false,
                    detail: "missing: a_protocol.c".to_string(),
                },
            ],
        };
        let text = report.render_text();
        assert!(text.starts_with("Codegen Gate: FAILED"));
        assert!(text.contains("[PASS] determinism"));
        assert!(text.contains("[FAIL] presence (missing: a_protocol.c)"));
    }
}
