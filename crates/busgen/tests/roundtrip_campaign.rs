//! End-to-end gate and campaign tests. These compile and execute generated C,
//! so each test discovers a toolchain first and returns early when none is
//! available.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

static TMP_N: AtomicUsize = AtomicUsize::new(0);

fn tmp_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let n = TMP_N.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("busgen_rt_{prefix}_{pid}_{n}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn busgen() -> Command {
    Command::new(env!("CARGO_BIN_EXE_busgen"))
}

fn write_file(path: &Path, text: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, text).unwrap();
}

fn have_c_toolchain() -> bool {
    ["cc", "gcc", "clang"].iter().any(|cand| {
        Command::new(cand)
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok()
    })
}

const ALPHA_IR: &str = r#"
ir_version: "0.1"
meta:
  name: alpha
  version: "1.0"
  source: alpha.dbc
  format: dbc
bus_type:
  bustype: CAN
  busmode: fd
messages:
  - id: 32
    name: mixed
    dlc: 4
    signals:
      - name: counter
        start_bit: 0
        bit_length: 4
        byte_order: little_endian
      - name: mode
        start_bit: 4
        bit_length: 4
        byte_order: little_endian
      - name: temp
        start_bit: 15
        bit_length: 12
        byte_order: big_endian
        signed: true
      - name: flag
        start_bit: 16
        bit_length: 1
        byte_order: little_endian
  - id: 33
    name: wide
    dlc: 8
    signals:
      - name: payload_word
        start_bit: 0
        bit_length: 64
        byte_order: little_endian
"#;

#[test]
fn gate_passes_on_freshly_generated_artifacts() {
    if !have_c_toolchain() {
        return;
    }

    let root = tmp_root("gate_ok");
    let ir = root.join("alpha.ir.yaml");
    write_file(&ir, ALPHA_IR);
    let gen = root.join("gen");

    let out = busgen()
        .args(["codegen", "--ir"])
        .arg(&ir)
        .arg("--out")
        .arg(&gen)
        .output()
        .unwrap();
    assert!(out.status.success());

    let out = busgen()
        .args(["gate", "--ir"])
        .arg(&ir)
        .arg("--gen")
        .arg(&gen)
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(out.status.success(), "gate output: {stdout}");
    assert!(stdout.contains("Codegen Gate: PASSED"));
    assert!(stdout.contains("[PASS] determinism"));
    assert!(stdout.contains("[PASS] presence"));
    assert!(stdout.contains("[PASS] compile"));

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn campaign_roundtrips_generated_codecs() {
    if !have_c_toolchain() {
        return;
    }

    let root = tmp_root("campaign_ok");
    let ir = root.join("alpha.ir.yaml");
    write_file(&ir, ALPHA_IR);
    let gen = root.join("gen");
    let reports = root.join("raw_reports");

    let out = busgen()
        .args(["codegen", "--ir"])
        .arg(&ir)
        .arg("--out")
        .arg(&gen)
        .output()
        .unwrap();
    assert!(out.status.success());

    let out = busgen()
        .args(["roundtrip", "--ir"])
        .arg(&ir)
        .arg("--artifact-dir")
        .arg(&gen)
        .args(["--loops", "2", "--cases-per-seed", "4", "--master-seed", "7"])
        .arg("--report-dir")
        .arg(&reports)
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(out.status.success(), "stdout: {stdout}\nstderr: {stderr}");
    assert!(stdout.contains("roundtrip: PASSED"));
    assert!(stdout.contains("master_seed 7"));

    let summaries: Vec<_> = std::fs::read_dir(&reports)
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().ends_with("-raw.report.yaml"))
        .collect();
    assert_eq!(summaries.len(), 1);
    let summary = std::fs::read_to_string(summaries[0].path()).unwrap();
    assert!(summary.contains("master_seed: 7"));
    assert!(summary.contains("status: PASSED"));
    assert!(summary.contains("alpha.mixed"));
    assert!(summary.contains("alpha.wide"));

    let _ = std::fs::remove_dir_all(&root);
}

const BUG_IR: &str = r#"
ir_version: "0.1"
meta:
  name: bug
  version: "1.0"
  source: bug.dbc
  format: dbc
bus_type:
  bustype: CAN
messages:
  - id: 16
    name: counterpair
    dlc: 1
    signals:
      - name: counter
        start_bit: 0
        bit_length: 4
        byte_order: little_endian
      - name: mode
        start_bit: 4
        bit_length: 4
        byte_order: little_endian
"#;

const BUG_HEADER: &str = r#"#ifndef BUSGEN_BUG_PROTOCOL_H
#define BUSGEN_BUG_PROTOCOL_H

#include <stddef.h>
#include <stdint.h>

#ifndef BUSGEN_STATUS_T_DEFINED
#define BUSGEN_STATUS_T_DEFINED
typedef enum {
    BUSGEN_OK = 0,
    BUSGEN_ERR_NULL = -1,
    BUSGEN_ERR_SIZE = -2,
    BUSGEN_ERR_RANGE = -3
} busgen_status_t;
#endif /* BUSGEN_STATUS_T_DEFINED */

enum {
    BUSGEN_BUG_COUNTERPAIR_ID = 16
};

enum {
    BUSGEN_BUG_COUNTERPAIR_DLC = 1
};

typedef struct {
    uint64_t counter;
    uint64_t mode;
} busgen_bug_counterpair_t;

int busgen_bug_encode_counterpair(
    uint8_t *out_payload,
    size_t out_size,
    const busgen_bug_counterpair_t *in
);

int busgen_bug_decode_counterpair(
    const uint8_t *payload,
    size_t payload_size,
    busgen_bug_counterpair_t *out
);

#endif /* BUSGEN_BUG_PROTOCOL_H */
"#;

const BUG_SOURCE: &str = r#"#include "bug_protocol.h"

#include <string.h>

int busgen_bug_encode_counterpair(
    uint8_t *out_payload,
    size_t out_size,
    const busgen_bug_counterpair_t *in
) {
    if (out_payload == NULL || in == NULL) {
        return BUSGEN_ERR_NULL;
    }
    if (out_size < (size_t)BUSGEN_BUG_COUNTERPAIR_DLC) {
        return BUSGEN_ERR_SIZE;
    }
    if (in->counter > 15ULL || in->mode > 15ULL) {
        return BUSGEN_ERR_RANGE;
    }

    memset(out_payload, 0, (size_t)BUSGEN_BUG_COUNTERPAIR_DLC);
    out_payload[0] = (uint8_t)((in->counter & 0x0FULL) | ((in->mode & 0x0FULL) << 4));
    return BUSGEN_OK;
}

int busgen_bug_decode_counterpair(
    const uint8_t *payload,
    size_t payload_size,
    busgen_bug_counterpair_t *out
) {
    uint8_t counter_raw;
    if (payload == NULL || out == NULL) {
        return BUSGEN_ERR_NULL;
    }
    if (payload_size < (size_t)BUSGEN_BUG_COUNTERPAIR_DLC) {
        return BUSGEN_ERR_SIZE;
    }

    memset(out, 0, sizeof(*out));
    counter_raw = (uint8_t)(payload[0] & 0x0FU);
    out->counter = (uint64_t)((counter_raw + 1U) & 0x0FU);
    out->mode = (uint64_t)((payload[0] >> 4) & 0x0FU);
    return BUSGEN_OK;
}
"#;

#[test]
fn injected_decoder_bug_is_caught_with_inputs_captured() {
    if !have_c_toolchain() {
        return;
    }

    let root = tmp_root("bug");
    let ir = root.join("bug.ir.yaml");
    write_file(&ir, BUG_IR);
    let artifacts = root.join("gen");
    write_file(&artifacts.join("bug_protocol.h"), BUG_HEADER);
    write_file(&artifacts.join("bug_protocol.c"), BUG_SOURCE);
    let reports = root.join("raw_reports");

    let out = busgen()
        .args(["roundtrip", "--ir"])
        .arg(&ir)
        .arg("--artifact-dir")
        .arg(&artifacts)
        .args(["--loops", "1", "--cases-per-seed", "4", "--master-seed", "1"])
        .arg("--report-dir")
        .arg(&reports)
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_eq!(
        out.status.code(),
        Some(1),
        "stdout: {stdout}\nstderr: {stderr}"
    );
    assert!(stdout.contains("roundtrip: FAILED"));

    let errors: Vec<_> = std::fs::read_dir(&reports)
        .unwrap()
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .ends_with("-raw.error.report.yaml")
        })
        .collect();
    assert_eq!(errors.len(), 1);
    let error_report = std::fs::read_to_string(errors[0].path()).unwrap();
    // The off-by-one decoder must surface as a value mismatch on loop 0 with
    // both the sampled input and the observed decode captured.
    assert!(error_report.contains("kind: value_mismatch"));
    assert!(error_report.contains("loop_index: 0"));
    assert!(error_report.contains("property: raw_encode_decode_roundtrip"));
    assert!(error_report.contains("input:"));
    assert!(error_report.contains("decoded:"));
    assert!(error_report.contains("counter"));

    let _ = std::fs::remove_dir_all(&root);
}
