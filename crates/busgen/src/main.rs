use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use walkdir::WalkDir;

use busgenc::{c_emit, ir, validate};

mod campaign;
mod config;
mod gate;
mod report;
mod seed;
mod toolchain;
mod util;

#[derive(Parser, Debug)]
#[command(name = "busgen")]
#[command(about = "Bus protocol codec generation and verification.", long_about = None)]
struct Cli {
    /// Workspace config file (defaults apply when absent).
    #[arg(long, global = true, value_name = "PATH", default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate an IR document: schema first, then semantics.
    Validate(ValidateArgs),
    /// Generate the protocol header/source from a validated IR.
    Codegen(CodegenArgs),
    /// Gate generated artifacts: determinism, presence, native compile.
    Gate(GateArgs),
    /// Run a seeded roundtrip campaign against compiled artifacts.
    Roundtrip(RoundtripArgs),
}

#[derive(Debug, Clone, Args)]
struct ValidateArgs {
    #[arg(long, value_name = "PATH")]
    ir: PathBuf,
    /// Emit a machine-readable JSON report to stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Args)]
struct CodegenArgs {
    #[arg(long, value_name = "PATH")]
    ir: PathBuf,
    /// Output directory (defaults to `<output_root>/gen`).
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct GateArgs {
    #[arg(long, value_name = "PATH")]
    ir: PathBuf,
    /// Directory holding the artifacts under test (defaults to `<output_root>/gen`).
    #[arg(long, value_name = "DIR")]
    gen: Option<PathBuf>,
    /// Emit a machine-readable JSON report to stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Args)]
struct RoundtripArgs {
    /// IR file or directory searched for `*.ir.yaml`. May be passed multiple times.
    #[arg(long, value_name = "PATH", required = true)]
    ir: Vec<PathBuf>,
    /// Use pre-built artifacts from this directory instead of regenerating.
    #[arg(long, value_name = "DIR")]
    artifact_dir: Option<PathBuf>,
    /// Number of seeded loops (defaults to the configured `default_loops`).
    #[arg(long, value_name = "N")]
    loops: Option<u32>,
    /// Cases sampled per property per message per loop.
    #[arg(long, value_name = "N", default_value_t = 8)]
    cases_per_seed: u32,
    /// Master seed; derived from the clock when omitted. Reports record it.
    #[arg(long, value_name = "SEED")]
    master_seed: Option<u64>,
    #[arg(long, value_enum)]
    fail_policy: Option<config::FailPolicy>,
    /// Report directory (defaults next to the artifact dir, under `raw_reports`).
    #[arg(long, value_name = "DIR")]
    report_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("busgen: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let cfg = config::load(&cli.config).context("load config")?;
    match cli.command {
        Command::Validate(args) => cmd_validate(args),
        Command::Codegen(args) => cmd_codegen(&cfg, args),
        Command::Gate(args) => cmd_gate(&cfg, args),
        Command::Roundtrip(args) => cmd_roundtrip(&cfg, args),
    }
}

#[derive(Debug, Clone, Serialize)]
struct ValidationOutput {
    ok: bool,
    schema_issues: Vec<ir::SchemaIssue>,
    semantic_issues: Vec<validate::SemanticIssue>,
}

fn cmd_validate(args: ValidateArgs) -> Result<ExitCode> {
    let text = std::fs::read_to_string(&args.ir)
        .with_context(|| format!("read IR: {}", args.ir.display()))?;

    let (spec, schema_issues) = match ir::parse_ir_str(&text) {
        Ok(spec) => (Some(spec), Vec::new()),
        Err(issues) => (None, issues),
    };
    let semantic_issues = spec
        .as_ref()
        .map(validate::validate_semantic)
        .unwrap_or_default();

    let output = ValidationOutput {
        ok: schema_issues.is_empty() && semantic_issues.is_empty(),
        schema_issues,
        semantic_issues,
    };

    if args.json {
        print_json(&output)?;
    } else {
        for issue in &output.schema_issues {
            if issue.ptr.is_empty() {
                println!("schema: {}", issue.message);
            } else {
                println!("schema: {}: {}", issue.ptr, issue.message);
            }
        }
        for issue in &output.semantic_issues {
            println!(
                "semantic[{}] {}: {}",
                issue.category.as_str(),
                issue.ptr,
                issue.message
            );
        }
        if output.ok {
            if let Some(spec) = &spec {
                let signal_count: usize = spec.messages.iter().map(|m| m.signals.len()).sum();
                println!(
                    "ok: {}: {} messages, {} signals",
                    spec.meta.name,
                    spec.messages.len(),
                    signal_count
                );
            }
        }
    }

    Ok(if output.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

/// Load an IR file and insist it passes both validation layers.
fn load_validated(ir_path: &Path) -> Result<ir::SpecIr> {
    let text = std::fs::read_to_string(ir_path)
        .with_context(|| format!("read IR: {}", ir_path.display()))?;
    let spec = ir::parse_ir_str(&text).map_err(|issues| {
        anyhow::anyhow!(
            "{} failed schema validation: {}",
            ir_path.display(),
            issues
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        )
    })?;
    let semantic = validate::validate_semantic(&spec);
    if !semantic.is_empty() {
        anyhow::bail!(
            "{} failed semantic validation: {}",
            ir_path.display(),
            semantic
                .iter()
                .map(|i| format!("[{}] {}", i.category.as_str(), i.message))
                .collect::<Vec<_>>()
                .join("; ")
        );
    }
    Ok(spec)
}

fn cmd_codegen(cfg: &config::Config, args: CodegenArgs) -> Result<ExitCode> {
    let spec = load_validated(&args.ir)?;
    let out_dir = args.out.unwrap_or_else(|| cfg.gen_dir());

    let generated = c_emit::emit_protocol(&spec).map_err(|e| anyhow::anyhow!("{e}"))?;
    let header_path = out_dir.join(&generated.header_name);
    let source_path = out_dir.join(&generated.source_name);
    util::write_atomic(&header_path, generated.header.as_bytes())?;
    util::write_atomic(&source_path, generated.source.as_bytes())?;

    println!("generated: {}", header_path.display());
    println!("generated: {}", source_path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_gate(cfg: &config::Config, args: GateArgs) -> Result<ExitCode> {
    let spec = load_validated(&args.ir)?;
    let gen_dir = args.gen.unwrap_or_else(|| cfg.gen_dir());

    let report = gate::run_gate(&spec, &gen_dir, cfg.toolchain_hint.as_deref())?;
    if args.json {
        print_json(&report)?;
    } else {
        print!("{}", report.render_text());
    }

    Ok(if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn cmd_roundtrip(cfg: &config::Config, args: RoundtripArgs) -> Result<ExitCode> {
    let ir_paths = collect_ir_inputs(&args.ir)?;
    let tc = toolchain::discover(cfg.toolchain_hint.as_deref())?;

    let artifact_dir = args.artifact_dir.clone().or_else(|| {
        let gen = cfg.gen_dir();
        gen.is_dir().then_some(gen)
    });
    let report_dir = args
        .report_dir
        .clone()
        .or_else(|| {
            artifact_dir
                .as_ref()
                .and_then(|d| d.parent().map(|p| p.join("raw_reports")))
        })
        .unwrap_or_else(|| cfg.report_dir());

    let opts = campaign::CampaignOptions {
        loops: args.loops.unwrap_or(cfg.default_loops),
        cases_per_seed: args.cases_per_seed,
        master_seed: args.master_seed.unwrap_or_else(clock_seed),
        fail_policy: args.fail_policy.unwrap_or(cfg.fail_policy),
        artifact_dir,
    };

    let outcome = campaign::run_campaign(&ir_paths, &opts, &tc)?;
    let run_stamp = util::utc_timestamp_slug();
    let (summary_path, error_path) = report::write_reports(
        &report_dir,
        &run_stamp,
        &outcome.summary,
        outcome.errors.as_ref(),
    )?;

    let totals = &outcome.summary.totals;
    let failed = totals.failure_count > 0;
    println!(
        "roundtrip: {}: {} loops, {} cases, {} failures (master_seed {})",
        if failed { "FAILED" } else { "PASSED" },
        totals.loops_executed,
        totals.cases_run,
        totals.failure_count,
        opts.master_seed
    );
    println!("summary report: {}", summary_path.display());
    if let Some(path) = error_path {
        println!("error report: {}", path.display());
    }

    Ok(if failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn collect_ir_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out: Vec<PathBuf> = Vec::new();
    let mut seen: BTreeSet<PathBuf> = BTreeSet::new();

    for input in inputs {
        if input.is_file() {
            if seen.insert(input.clone()) {
                out.push(input.clone());
            }
            continue;
        }
        if input.is_dir() {
            let mut files: Vec<PathBuf> = WalkDir::new(input)
                .follow_links(false)
                .into_iter()
                .flatten()
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| {
                    path.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(".ir.yaml"))
                })
                .collect();
            files.sort();
            for file in files {
                if seen.insert(file.clone()) {
                    out.push(file);
                }
            }
            continue;
        }
        anyhow::bail!(
            "--ir does not exist or is not a file/dir: {}",
            input.display()
        );
    }

    if out.is_empty() {
        anyhow::bail!("no *.ir.yaml inputs found");
    }
    Ok(out)
}

fn clock_seed() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    seed::mix64(nanos ^ std::process::id() as u64)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut out = serde_json::to_string(value).context("encode JSON report")?;
    out.push('\n');
    print!("{out}");
    Ok(())
}
