//! Native toolchain discovery and subprocess management.
//!
//! Everything that touches the C compiler or a compiled artifact funnels
//! through here: candidate discovery, family-specific flag sets (GCC/Clang vs
//! MSVC), captured stdout/stderr, and a wall-clock timeout enforced with a
//! try-wait/kill loop.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

/// Per-step wall-clock budget for compiler invocations.
pub const COMPILE_TIMEOUT_MS: u64 = 60_000;
/// Wall-clock budget for one driver execution.
pub const RUN_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolchainFamily {
    Gnu,
    Msvc,
}

#[derive(Debug, Clone)]
pub struct Toolchain {
    pub program: PathBuf,
    pub family: ToolchainFamily,
}

impl Toolchain {
    /// First line of the compiler's version banner, for reports.
    pub fn version_line(&self) -> String {
        let mut cmd = Command::new(&self.program);
        if self.family == ToolchainFamily::Gnu {
            cmd.arg("--version");
        }
        match cmd.output() {
            Ok(out) => {
                let text = String::from_utf8_lossy(&out.stdout);
                let text = if text.trim().is_empty() {
                    String::from_utf8_lossy(&out.stderr)
                } else {
                    text
                };
                text.lines()
                    .next()
                    .map(str::to_string)
                    .unwrap_or_else(|| "version unknown".to_string())
            }
            Err(_) => "version unknown".to_string(),
        }
    }
}

fn family_of(program: &str) -> ToolchainFamily {
    let stem = Path::new(program)
        .file_stem()
        .map(|s| s.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if stem == "cl" {
        ToolchainFamily::Msvc
    } else {
        ToolchainFamily::Gnu
    }
}

fn probe(program: &str) -> bool {
    let mut cmd = Command::new(program);
    if family_of(program) == ToolchainFamily::Gnu {
        cmd.arg("--version");
    }
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());
    cmd.status().is_ok()
}

/// Discover a usable C toolchain: `BUSGEN_CC`, then the config hint, then the
/// conventional names in order.
pub fn discover(hint: Option<&str>) -> Result<Toolchain> {
    let mut candidates: Vec<String> = Vec::new();
    if let Ok(cc) = std::env::var("BUSGEN_CC") {
        if !cc.trim().is_empty() {
            candidates.push(cc);
        }
    }
    if let Some(h) = hint {
        if !h.trim().is_empty() {
            candidates.push(h.to_string());
        }
    }
    candidates.extend(["cc", "gcc", "clang"].map(String::from));
    discover_from(&candidates)
}

fn discover_from(candidates: &[String]) -> Result<Toolchain> {
    for cand in candidates {
        if probe(cand) {
            return Ok(Toolchain {
                program: PathBuf::from(cand),
                family: family_of(cand),
            });
        }
    }
    anyhow::bail!("no C toolchain found (tried: {})", candidates.join(", "));
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    pub fn stderr_trimmed(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

fn wait_with_wall_timeout(child: &mut Child, wall_ms: u64) -> Result<(ExitStatus, bool)> {
    let deadline = Instant::now().checked_add(Duration::from_millis(wall_ms.max(1)));

    loop {
        if let Some(status) = child.try_wait().context("try_wait child")? {
            return Ok((status, false));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            let _ = child.kill();
            let status = child.wait().context("wait child after kill")?;
            return Ok((status, true));
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn run_with_timeout(mut cmd: Command, input: Option<&[u8]>, wall_ms: u64) -> Result<ExecOutcome> {
    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd.spawn().with_context(|| format!("spawn: {program}"))?;

    if let Some(bytes) = input {
        let mut stdin = child.stdin.take().context("child stdin")?;
        stdin.write_all(bytes).context("write child stdin")?;
        // Dropping closes the pipe so the child sees EOF.
    }

    let (status, timed_out) = wait_with_wall_timeout(&mut child, wall_ms)?;

    let mut stdout = Vec::new();
    if let Some(mut pipe) = child.stdout.take() {
        pipe.read_to_end(&mut stdout).context("read child stdout")?;
    }
    let mut stderr = Vec::new();
    if let Some(mut pipe) = child.stderr.take() {
        pipe.read_to_end(&mut stderr).context("read child stderr")?;
    }

    Ok(ExecOutcome {
        exit_code: status.code().unwrap_or(-1),
        timed_out,
        stdout,
        stderr,
    })
}

/// Syntax/object compile of one generated source into a throwaway object.
pub fn compile_object(
    tc: &Toolchain,
    source: &Path,
    include_dir: &Path,
    out_obj: &Path,
) -> Result<ExecOutcome> {
    let mut cmd = Command::new(&tc.program);
    match tc.family {
        ToolchainFamily::Gnu => {
            cmd.args(["-std=c11", "-Wall", "-Wextra", "-Werror", "-c"]);
            cmd.arg(source);
            cmd.arg("-I").arg(include_dir);
            cmd.arg("-o").arg(out_obj);
        }
        ToolchainFamily::Msvc => {
            cmd.args(["/nologo", "/std:c11", "/W4", "/WX", "/c"]);
            cmd.arg(source);
            cmd.arg(format!("/I{}", include_dir.display()));
            cmd.arg(format!("/Fo:{}", out_obj.display()));
        }
    }
    run_with_timeout(cmd, None, COMPILE_TIMEOUT_MS)
}

/// Link one or more C sources into an executable.
pub fn compile_exe(
    tc: &Toolchain,
    sources: &[PathBuf],
    include_dir: &Path,
    out_exe: &Path,
) -> Result<ExecOutcome> {
    let mut cmd = Command::new(&tc.program);
    match tc.family {
        ToolchainFamily::Gnu => {
            cmd.args(["-std=c11", "-Wall", "-Wextra", "-Werror"]);
            cmd.args(sources);
            cmd.arg("-I").arg(include_dir);
            cmd.arg("-o").arg(out_exe);
        }
        ToolchainFamily::Msvc => {
            cmd.args(["/nologo", "/std:c11", "/W4", "/WX"]);
            cmd.args(sources);
            cmd.arg(format!("/I{}", include_dir.display()));
            cmd.arg(format!("/Fe:{}", out_exe.display()));
        }
    }
    run_with_timeout(cmd, None, COMPILE_TIMEOUT_MS)
}

/// Run a compiled driver with the given stdin bytes, capturing stdout.
pub fn run_exe(exe: &Path, input: &[u8]) -> Result<ExecOutcome> {
    run_with_timeout(Command::new(exe), Some(input), RUN_TIMEOUT_MS)
}
