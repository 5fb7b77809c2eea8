//! Seeded raw roundtrip campaign.
//!
//! The campaign compiles the generated codec together with its roundtrip
//! driver, then drives the resulting executable one framed case at a time.
//! Loops are serial so report ordering is total; every sampled value is
//! reconstructible from `(master_seed, loop_index)` alone.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_yaml::Value;

use busgenc::{c_emit, ir, layout, naming, validate};

use crate::config::FailPolicy;
use crate::report;
use crate::seed::{self, SplitMix64};
use crate::toolchain::{self, Toolchain};
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundtripProperty {
    RawEncodeDecodeRoundtrip,
    RawDecodeEncodeMaskedRoundtrip,
    RawFunctionCoverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ValueMismatch,
    MaskViolation,
    EncodeRejected,
    DecodeRejected,
    CoverageGap,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundtripFailure {
    pub loop_index: u32,
    pub loop_seed: u64,
    pub spec: String,
    pub message: String,
    pub property: RoundtripProperty,
    pub kind: FailureKind,
    pub case_index: u32,
    pub input: Value,
    pub encoded: Vec<u8>,
    pub decoded: Value,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct CampaignOptions {
    pub loops: u32,
    pub cases_per_seed: u32,
    pub master_seed: u64,
    pub fail_policy: FailPolicy,
    pub artifact_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CampaignOutcome {
    pub summary: report::SummaryReport,
    pub errors: Option<report::ErrorReport>,
}

#[derive(Debug, Clone)]
struct SignalBinding {
    name: String,
    bit_length: u32,
    signed: bool,
}

#[derive(Debug, Clone)]
struct MessageBinding {
    index: u32,
    name: String,
    encode_fn: String,
    decode_fn: String,
    dlc: usize,
    signals: Vec<SignalBinding>,
    /// Per-byte OR of every signal's position mask.
    mask: Vec<u8>,
}

#[derive(Debug, Clone)]
struct SpecBinding {
    spec_name: String,
    exe: PathBuf,
    messages: Vec<MessageBinding>,
}

pub fn run_campaign(
    ir_paths: &[PathBuf],
    opts: &CampaignOptions,
    tc: &Toolchain,
) -> Result<CampaignOutcome> {
    if opts.loops < 1 {
        bail!("loops must be >= 1");
    }
    if opts.cases_per_seed < 1 {
        bail!("cases_per_seed must be >= 1");
    }
    if ir_paths.is_empty() {
        bail!("no IR inputs given");
    }

    let scratch = util::scratch_dir("roundtrip")?;
    let result = campaign_in_scratch(ir_paths, opts, tc, &scratch);
    let _ = std::fs::remove_dir_all(&scratch);
    result
}

fn campaign_in_scratch(
    ir_paths: &[PathBuf],
    opts: &CampaignOptions,
    tc: &Toolchain,
    scratch: &Path,
) -> Result<CampaignOutcome> {
    let loop_seeds: Vec<u64> = (0..opts.loops)
        .map(|i| seed::derive_loop_seed(opts.master_seed, i))
        .collect();

    let mut inputs: Vec<report::IrInput> = Vec::new();
    let mut artifacts: Vec<report::FileHash> = Vec::new();
    let mut bindings: Vec<SpecBinding> = Vec::new();
    let mut artifact_dir_display = String::new();

    for ir_path in ir_paths {
        let text = std::fs::read_to_string(ir_path)
            .with_context(|| format!("read IR: {}", ir_path.display()))?;
        let spec = match ir::parse_ir_str(&text) {
            Ok(spec) => spec,
            Err(issues) => bail!(
                "IR {} failed schema validation: {}",
                ir_path.display(),
                issues
                    .iter()
                    .map(|i| i.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
        };
        let semantic = validate::validate_semantic(&spec);
        if !semantic.is_empty() {
            bail!(
                "IR {} failed semantic validation: {}",
                ir_path.display(),
                semantic
                    .iter()
                    .map(|i| format!("[{}] {}", i.category.as_str(), i.message))
                    .collect::<Vec<_>>()
                    .join("; ")
            );
        }

        inputs.push(report::IrInput {
            name: spec.meta.name.clone(),
            path: ir_path.display().to_string(),
            sha256: util::sha256_hex(text.as_bytes()),
            ir_version: spec.ir_version.clone(),
        });

        let (header_name, source_name) = naming::output_filenames(&spec.meta.name);
        let artifact_dir = match &opts.artifact_dir {
            Some(dir) => {
                for name in [&header_name, &source_name] {
                    let path = dir.join(name);
                    if !path.is_file() {
                        bail!("missing artifact: {}", path.display());
                    }
                }
                dir.clone()
            }
            None => {
                let dir = scratch.join("gen").join(naming::spec_c_name(&spec.meta.name));
                let generated = c_emit::emit_protocol(&spec)
                    .with_context(|| format!("emit protocol for {:?}", spec.meta.name))?;
                util::write_atomic(&dir.join(&generated.header_name), generated.header.as_bytes())?;
                util::write_atomic(&dir.join(&generated.source_name), generated.source.as_bytes())?;
                dir
            }
        };
        artifact_dir_display = artifact_dir.display().to_string();

        for name in [&header_name, &source_name] {
            let path = artifact_dir.join(name);
            artifacts.push(report::FileHash {
                path: name.clone(),
                sha256: util::file_sha256(&path)?,
            });
        }

        let driver_dir = scratch.join("driver");
        let driver_path = driver_dir.join(naming::driver_filename(&spec.meta.name));
        let driver = c_emit::emit_roundtrip_driver(&spec)
            .with_context(|| format!("emit roundtrip driver for {:?}", spec.meta.name))?;
        util::write_atomic(&driver_path, driver.as_bytes())?;

        let mut exe = driver_dir.join(format!("{}_driver", naming::spec_c_name(&spec.meta.name)));
        if cfg!(windows) {
            exe.set_extension("exe");
        }
        let sources = vec![driver_path, artifact_dir.join(&source_name)];
        let compile = toolchain::compile_exe(tc, &sources, &artifact_dir, &exe)?;
        if !compile.success() {
            bail!(
                "compile roundtrip driver for {:?} failed (exit {}{}): {}",
                spec.meta.name,
                compile.exit_code,
                if compile.timed_out { ", timed out" } else { "" },
                compile.stderr_trimmed()
            );
        }

        bindings.push(bind_spec(&spec, exe));
    }

    artifacts.sort_by(|a, b| a.path.cmp(&b.path));

    let mut all_failures: Vec<RoundtripFailure> = Vec::new();
    let mut loop_summaries: Vec<report::LoopSummary> = Vec::new();
    let mut total_cases: u64 = 0;

    'loops: for (loop_index, &loop_seed) in loop_seeds.iter().enumerate() {
        let loop_index = loop_index as u32;
        let mut outcomes: Vec<report::MessageOutcome> = Vec::new();
        let mut loop_failures: u32 = 0;

        for binding in &bindings {
            let mut touched_encode: BTreeSet<&str> = BTreeSet::new();
            let mut touched_decode: BTreeSet<&str> = BTreeSet::new();

            for msg in &binding.messages {
                let stream = format!("{}:{}", binding.spec_name, msg.name);
                let mut rng = SplitMix64::new(loop_seed ^ seed::fnv1a64(&stream));
                let mut failures_here: u32 = 0;
                let mut cases_here: u32 = 0;

                for case_index in 0..opts.cases_per_seed {
                    cases_here += 1;
                    total_cases += 1;
                    if let Some(failure) = run_encode_decode_case(
                        binding, msg, &mut rng, loop_index, loop_seed, case_index,
                    )? {
                        failures_here += 1;
                        all_failures.push(failure);
                    }
                }

                for case_index in 0..opts.cases_per_seed {
                    cases_here += 1;
                    total_cases += 1;
                    if let Some(failure) = run_masked_roundtrip_case(
                        binding, msg, &mut rng, loop_index, loop_seed, case_index,
                    )? {
                        failures_here += 1;
                        all_failures.push(failure);
                    }
                }

                touched_encode.insert(msg.encode_fn.as_str());
                touched_decode.insert(msg.decode_fn.as_str());

                loop_failures += failures_here;
                outcomes.push(report::MessageOutcome {
                    message: stream.replace(':', "."),
                    cases_run: cases_here,
                    failure_count: failures_here,
                    status: report::RunStatus::from_failures(failures_here as u64),
                });
            }

            // Every message's encode/decode pair must have been exercised
            // this loop.
            let expected_encode: BTreeSet<&str> = binding
                .messages
                .iter()
                .map(|m| m.encode_fn.as_str())
                .collect();
            let expected_decode: BTreeSet<&str> = binding
                .messages
                .iter()
                .map(|m| m.decode_fn.as_str())
                .collect();
            if touched_encode != expected_encode {
                loop_failures += 1;
                all_failures.push(coverage_failure(
                    binding,
                    loop_index,
                    loop_seed,
                    format!(
                        "encode coverage mismatch: touched {touched_encode:?}, expected {expected_encode:?}"
                    ),
                ));
            }
            if touched_decode != expected_decode {
                loop_failures += 1;
                all_failures.push(coverage_failure(
                    binding,
                    loop_index,
                    loop_seed,
                    format!(
                        "decode coverage mismatch: touched {touched_decode:?}, expected {expected_decode:?}"
                    ),
                ));
            }
        }

        loop_summaries.push(report::LoopSummary {
            loop_index,
            loop_seed,
            messages: outcomes,
            failure_count: loop_failures,
            status: report::RunStatus::from_failures(loop_failures as u64),
        });

        if loop_failures > 0 && opts.fail_policy == FailPolicy::StopOnFail {
            break 'loops;
        }
    }

    let failed_loops = loop_summaries
        .iter()
        .filter(|l| l.failure_count > 0)
        .count() as u32;
    let loops_executed = loop_summaries.len() as u32;
    let failure_count = all_failures.len() as u64;

    let toolchain_info = report::ToolchainInfo {
        compiler: tc.program.display().to_string(),
        compiler_version: tc.version_line(),
    };
    let campaign_config = report::CampaignConfig {
        loops: opts.loops,
        cases_per_seed: opts.cases_per_seed,
        fail_policy: opts.fail_policy,
        master_seed: opts.master_seed,
        loop_seeds,
    };

    let summary = report::SummaryReport {
        schema_version: busgenc::RAW_REPORT_SCHEMA_VERSION.to_string(),
        timestamp_utc: util::utc_now_iso(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        codec_version: busgenc::BUSGENC_VERSION.to_string(),
        toolchain: toolchain_info.clone(),
        inputs: inputs.clone(),
        artifact_dir: artifact_dir_display,
        artifacts,
        config: campaign_config.clone(),
        loops: loop_summaries,
        totals: report::Totals {
            loops_executed,
            passed_loops: loops_executed - failed_loops,
            failed_loops,
            cases_run: total_cases,
            failure_count,
            status: report::RunStatus::from_failures(failure_count),
        },
    };

    let errors = (!all_failures.is_empty()).then(|| report::ErrorReport {
        schema_version: busgenc::RAW_ERROR_REPORT_SCHEMA_VERSION.to_string(),
        timestamp_utc: summary.timestamp_utc.clone(),
        tool_version: summary.tool_version.clone(),
        codec_version: summary.codec_version.clone(),
        toolchain: toolchain_info,
        inputs,
        config: campaign_config,
        failure_count,
        failures: all_failures,
    });

    Ok(CampaignOutcome { summary, errors })
}

fn coverage_failure(
    binding: &SpecBinding,
    loop_index: u32,
    loop_seed: u64,
    detail: String,
) -> RoundtripFailure {
    RoundtripFailure {
        loop_index,
        loop_seed,
        spec: binding.spec_name.clone(),
        message: "*".to_string(),
        property: RoundtripProperty::RawFunctionCoverage,
        kind: FailureKind::CoverageGap,
        case_index: 0,
        input: Value::Null,
        encoded: Vec::new(),
        decoded: Value::Null,
        detail,
    }
}

fn bind_spec(spec: &ir::SpecIr, exe: PathBuf) -> SpecBinding {
    let messages = spec
        .messages
        .iter()
        .enumerate()
        .map(|(idx, msg)| {
            let occupied: BTreeSet<u32> = layout::message_occupied_bits(msg);
            let mut mask = vec![0u8; msg.dlc as usize];
            for &bit in &occupied {
                mask[(bit / 8) as usize] |= 1u8 << (bit % 8);
            }
            let syms = naming::message_symbols(&spec.meta.name, &msg.name);
            MessageBinding {
                index: idx as u32,
                name: msg.name.clone(),
                encode_fn: syms.encode_fn,
                decode_fn: syms.decode_fn,
                dlc: msg.dlc as usize,
                signals: msg
                    .signals
                    .iter()
                    .map(|sig| SignalBinding {
                        name: naming::signal_field_name(&sig.name),
                        bit_length: sig.bit_length,
                        signed: sig.signed,
                    })
                    .collect(),
                mask,
            }
        })
        .collect();

    SpecBinding {
        spec_name: spec.meta.name.clone(),
        exe,
        messages,
    }
}

fn frame_fields(msg_index: u32, raws: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + raws.len() * 8);
    out.extend_from_slice(&msg_index.to_le_bytes());
    out.push(0);
    for raw in raws {
        out.extend_from_slice(&raw.to_le_bytes());
    }
    out
}

fn frame_payload(msg_index: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + payload.len());
    out.extend_from_slice(&msg_index.to_le_bytes());
    out.push(1);
    out.extend_from_slice(payload);
    out
}

struct Response<'a> {
    bytes: &'a [u8],
    off: usize,
}

impl<'a> Response<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, off: 0 }
    }

    fn i32(&mut self) -> i32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.bytes[self.off..self.off + 4]);
        self.off += 4;
        i32::from_le_bytes(b)
    }

    fn u64(&mut self) -> u64 {
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.bytes[self.off..self.off + 8]);
        self.off += 8;
        u64::from_le_bytes(b)
    }

    fn payload(&mut self, dlc: usize) -> Vec<u8> {
        let out = self.bytes[self.off..self.off + dlc].to_vec();
        self.off += dlc;
        out
    }
}

fn exec_case(exe: &Path, frame: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let out = toolchain::run_exe(exe, frame)?;
    if out.timed_out {
        bail!("roundtrip driver timed out");
    }
    if out.exit_code != 0 {
        bail!(
            "roundtrip driver exited with {}: {}",
            out.exit_code,
            out.stderr_trimmed()
        );
    }
    if out.stdout.len() != expected_len {
        bail!(
            "roundtrip driver protocol mismatch: expected {expected_len} bytes, got {}",
            out.stdout.len()
        );
    }
    Ok(out.stdout)
}

fn field_map(signals: &[SignalBinding], raws: &[u64]) -> Value {
    let mut map = serde_yaml::Mapping::new();
    for (sig, &raw) in signals.iter().zip(raws) {
        let number = if sig.signed {
            Value::Number(serde_yaml::Number::from(raw as i64))
        } else {
            Value::Number(serde_yaml::Number::from(raw))
        };
        map.insert(Value::String(sig.name.clone()), number);
    }
    Value::Mapping(map)
}

fn bytes_value(bytes: &[u8]) -> Value {
    Value::Sequence(
        bytes
            .iter()
            .map(|&b| Value::Number(serde_yaml::Number::from(b)))
            .collect(),
    )
}

fn run_encode_decode_case(
    binding: &SpecBinding,
    msg: &MessageBinding,
    rng: &mut SplitMix64,
    loop_index: u32,
    loop_seed: u64,
    case_index: u32,
) -> Result<Option<RoundtripFailure>> {
    let raws: Vec<u64> = msg
        .signals
        .iter()
        .map(|sig| seed::sample_raw(rng, sig.bit_length, sig.signed))
        .collect();

    let frame = frame_fields(msg.index, &raws);
    let expected_len = 4 + msg.dlc + 4 + msg.signals.len() * 8;
    let response = exec_case(&binding.exe, &frame, expected_len)?;
    let mut r = Response::new(&response);

    let encode_status = r.i32();
    let payload = r.payload(msg.dlc);
    let decode_status = r.i32();
    let decoded: Vec<u64> = (0..msg.signals.len()).map(|_| r.u64()).collect();

    let failure = |kind, detail: String, decoded_value: Value| {
        Some(RoundtripFailure {
            loop_index,
            loop_seed,
            spec: binding.spec_name.clone(),
            message: msg.name.clone(),
            property: RoundtripProperty::RawEncodeDecodeRoundtrip,
            kind,
            case_index,
            input: field_map(&msg.signals, &raws),
            encoded: payload.clone(),
            decoded: decoded_value,
            detail,
        })
    };

    if encode_status != 0 {
        return Ok(failure(
            FailureKind::EncodeRejected,
            format!("encode returned status {encode_status} for in-range input"),
            Value::Null,
        ));
    }

    for (byte_index, (&got, &mask)) in payload.iter().zip(&msg.mask).enumerate() {
        let stray = got & !mask;
        if stray != 0 {
            return Ok(failure(
                FailureKind::MaskViolation,
                format!("byte {byte_index}: bits 0x{stray:02x} set outside any signal"),
                Value::Null,
            ));
        }
    }

    if decode_status != 0 {
        return Ok(failure(
            FailureKind::DecodeRejected,
            format!("decode returned status {decode_status}"),
            Value::Null,
        ));
    }

    for (sig, (&expected, &got)) in msg.signals.iter().zip(raws.iter().zip(&decoded)) {
        if expected != got {
            let detail = if sig.signed {
                format!(
                    "field {:?}: expected {} got {}",
                    sig.name, expected as i64, got as i64
                )
            } else {
                format!("field {:?}: expected {expected} got {got}", sig.name)
            };
            return Ok(failure(
                FailureKind::ValueMismatch,
                detail,
                field_map(&msg.signals, &decoded),
            ));
        }
    }

    Ok(None)
}

fn run_masked_roundtrip_case(
    binding: &SpecBinding,
    msg: &MessageBinding,
    rng: &mut SplitMix64,
    loop_index: u32,
    loop_seed: u64,
    case_index: u32,
) -> Result<Option<RoundtripFailure>> {
    let mut payload_in = vec![0u8; msg.dlc];
    rng.fill_bytes(&mut payload_in);

    let frame = frame_payload(msg.index, &payload_in);
    let expected_len = 4 + msg.signals.len() * 8 + 4 + msg.dlc;
    let response = exec_case(&binding.exe, &frame, expected_len)?;
    let mut r = Response::new(&response);

    let decode_status = r.i32();
    let decoded: Vec<u64> = (0..msg.signals.len()).map(|_| r.u64()).collect();
    let encode_status = r.i32();
    let payload_out = r.payload(msg.dlc);

    let failure = |kind, detail: String| {
        Some(RoundtripFailure {
            loop_index,
            loop_seed,
            spec: binding.spec_name.clone(),
            message: msg.name.clone(),
            property: RoundtripProperty::RawDecodeEncodeMaskedRoundtrip,
            kind,
            case_index,
            input: bytes_value(&payload_in),
            encoded: payload_out.clone(),
            decoded: field_map(&msg.signals, &decoded),
            detail,
        })
    };

    if decode_status != 0 {
        return Ok(failure(
            FailureKind::DecodeRejected,
            format!("decode returned status {decode_status}"),
        ));
    }
    if encode_status != 0 {
        return Ok(failure(
            FailureKind::EncodeRejected,
            format!("re-encode returned status {encode_status}"),
        ));
    }

    for (byte_index, ((&got, &orig), &mask)) in payload_out
        .iter()
        .zip(&payload_in)
        .zip(&msg.mask)
        .enumerate()
    {
        let expected = orig & mask;
        if got != expected {
            return Ok(failure(
                FailureKind::MaskViolation,
                format!(
                    "byte {byte_index}: expected 0x{expected:02x} (input masked to signal bits) got 0x{got:02x}"
                ),
            ));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_frames_carry_index_opcode_and_raws() {
        let frame = frame_fields(3, &[0x1122, u64::MAX]);
        assert_eq!(frame.len(), 4 + 1 + 16);
        assert_eq!(&frame[..4], &3u32.to_le_bytes());
        assert_eq!(frame[4], 0);
        assert_eq!(&frame[5..13], &0x1122u64.to_le_bytes());
        assert_eq!(&frame[13..21], &u64::MAX.to_le_bytes());
    }

    #[test]
    fn payload_frames_use_opcode_one() {
        let frame = frame_payload(0, &[0xA5, 0x01]);
        assert_eq!(frame[4], 1);
        assert_eq!(&frame[5..], &[0xA5, 0x01]);
    }

    #[test]
    fn responses_parse_in_declared_order() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&[0xA5]);
        bytes.extend_from_slice(&(-3i32).to_le_bytes());
        bytes.extend_from_slice(&7u64.to_le_bytes());

        let mut r = Response::new(&bytes);
        assert_eq!(r.i32(), 0);
        assert_eq!(r.payload(1), vec![0xA5]);
        assert_eq!(r.i32(), -3);
        assert_eq!(r.u64(), 7);
    }

    #[test]
    fn masks_cover_exactly_the_occupied_bits() {
        let text = r#"
ir_version: "0.1"
meta:
  name: demo
  version: "1"
  source: demo.dbc
  format: dbc
bus_type:
  bustype: CAN
messages:
  - id: 1
    name: status
    dlc: 2
    signals:
      - name: low_nibble
        start_bit: 0
        bit_length: 4
        byte_order: little_endian
      - name: high_bits
        start_bit: 15
        bit_length: 8
        byte_order: big_endian
"#;
        let spec = ir::parse_ir_str(text).unwrap();
        let binding = bind_spec(&spec, PathBuf::from("unused"));
        assert_eq!(binding.messages.len(), 1);
        // Motorola signal at start bit 15 covers all of byte 1.
        assert_eq!(binding.messages[0].mask, vec![0x0F, 0xFF]);
        assert_eq!(binding.messages[0].encode_fn, "busgen_demo_encode_status");
        assert_eq!(binding.messages[0].decode_fn, "busgen_demo_decode_status");
    }
}
