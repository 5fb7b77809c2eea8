//! Deterministic C emission for protocol codecs.
//!
//! Output is built with plain string builders; nothing here consults a clock,
//! a path, or an unordered map, so two runs over the same IR produce
//! byte-identical sources. Messages and signals are emitted in IR order.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::fmt::Write as _;

use crate::ir::{Message, Signal, SpecIr};
use crate::layout;
use crate::naming;

/// Internal contradiction detected during emission. Unreachable on validated
/// input except for post-sanitization name collisions.
#[derive(Debug, Clone)]
pub struct CodegenError {
    pub message: String,
}

impl Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "codegen error: {}", self.message)
    }
}

impl std::error::Error for CodegenError {}

#[derive(Debug, Clone)]
pub struct GeneratedProtocol {
    pub header_name: String,
    pub source_name: String,
    pub header: String,
    pub source: String,
}

pub fn emit_protocol(spec: &SpecIr) -> Result<GeneratedProtocol, CodegenError> {
    check_collisions(spec)?;
    let (header_name, source_name) = naming::output_filenames(&spec.meta.name);
    Ok(GeneratedProtocol {
        header: emit_header(spec, &header_name),
        source: emit_source(spec, &header_name),
        header_name,
        source_name,
    })
}

fn check_collisions(spec: &SpecIr) -> Result<(), CodegenError> {
    let mut message_names: BTreeSet<String> = BTreeSet::new();
    for msg in &spec.messages {
        let c_name = naming::sanitize_ident(&msg.name);
        if !message_names.insert(c_name.clone()) {
            return Err(CodegenError {
                message: format!(
                    "messages {:?} and another message both sanitize to {c_name:?}",
                    msg.name
                ),
            });
        }
        let mut field_names: BTreeSet<String> = BTreeSet::new();
        for sig in &msg.signals {
            let field = naming::signal_field_name(&sig.name);
            if !field_names.insert(field.clone()) {
                return Err(CodegenError {
                    message: format!(
                        "message {:?}: signals {:?} and another signal both sanitize to {field:?}",
                        msg.name, sig.name
                    ),
                });
            }
        }
    }
    Ok(())
}

fn c_type(sig: &Signal) -> &'static str {
    if sig.signed {
        "int64_t"
    } else {
        "uint64_t"
    }
}

fn unsigned_max(bit_length: u32) -> u64 {
    if bit_length >= 64 {
        u64::MAX
    } else {
        (1u64 << bit_length) - 1
    }
}

fn mask_literal(bit_length: u32) -> String {
    format!("0x{:X}ULL", unsigned_max(bit_length))
}

fn emit_header(spec: &SpecIr, header_name: &str) -> String {
    let guard = naming::header_guard(&spec.meta.name);
    let mut out = String::new();

    let _ = writeln!(
        out,
        "/* Protocol codec for {:?}. Generated; do not edit. */",
        spec.meta.name
    );
    let _ = writeln!(out, "#ifndef {guard}");
    let _ = writeln!(out, "#define {guard}");
    out.push('\n');
    out.push_str("#include <stddef.h>\n");
    out.push_str("#include <stdint.h>\n");
    out.push('\n');
    out.push_str("#ifdef __cplusplus\n");
    out.push_str("extern \"C\" {\n");
    out.push_str("#endif\n");
    out.push('\n');
    out.push_str("#ifndef BUSGEN_STATUS_T_DEFINED\n");
    out.push_str("#define BUSGEN_STATUS_T_DEFINED\n");
    out.push_str("typedef enum {\n");
    out.push_str("    BUSGEN_OK = 0,\n");
    out.push_str("    BUSGEN_ERR_NULL = -1,\n");
    out.push_str("    BUSGEN_ERR_SIZE = -2,\n");
    out.push_str("    BUSGEN_ERR_RANGE = -3\n");
    out.push_str("} busgen_status_t;\n");
    out.push_str("#endif /* BUSGEN_STATUS_T_DEFINED */\n");

    for msg in &spec.messages {
        let syms = naming::message_symbols(&spec.meta.name, &msg.name);
        out.push('\n');
        let _ = writeln!(out, "enum {{");
        let _ = writeln!(out, "    {} = {}", syms.id_macro, msg.id);
        let _ = writeln!(out, "}};");
        out.push('\n');
        let _ = writeln!(out, "enum {{");
        let _ = writeln!(out, "    {} = {}", syms.dlc_macro, msg.dlc);
        let _ = writeln!(out, "}};");
        out.push('\n');
        let _ = writeln!(out, "typedef struct {{");
        for sig in &msg.signals {
            let _ = writeln!(
                out,
                "    {} {};",
                c_type(sig),
                naming::signal_field_name(&sig.name)
            );
        }
        let _ = writeln!(out, "}} {};", syms.struct_name);
        out.push('\n');
        let _ = writeln!(out, "int {}(", syms.encode_fn);
        out.push_str("    uint8_t *out_payload,\n");
        out.push_str("    size_t out_size,\n");
        let _ = writeln!(out, "    const {} *in", syms.struct_name);
        out.push_str(");\n");
        out.push('\n');
        let _ = writeln!(out, "int {}(", syms.decode_fn);
        out.push_str("    const uint8_t *payload,\n");
        out.push_str("    size_t payload_size,\n");
        let _ = writeln!(out, "    {} *out", syms.struct_name);
        out.push_str(");\n");
    }

    out.push('\n');
    out.push_str("#ifdef __cplusplus\n");
    out.push_str("}\n");
    out.push_str("#endif\n");
    out.push('\n');
    let _ = writeln!(out, "#endif /* {guard} */");
    out
}

fn emit_source(spec: &SpecIr, header_name: &str) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "/* Protocol codec for {:?}. Generated; do not edit. */",
        spec.meta.name
    );
    let _ = writeln!(out, "#include \"{header_name}\"");
    out.push('\n');
    out.push_str("#include <string.h>\n");

    for msg in &spec.messages {
        out.push('\n');
        for sig in &msg.signals {
            let positions = layout::signal_bit_positions(sig);
            let array = naming::signal_bits_array(&spec.meta.name, &msg.name, &sig.name);
            let _ = writeln!(
                out,
                "/* {}: {}, {} bits, {} */",
                naming::signal_field_name(&sig.name),
                sig.byte_order.as_str(),
                sig.bit_length,
                if sig.signed { "signed" } else { "unsigned" }
            );
            let items: Vec<String> = positions.iter().map(|p| format!("{p}U")).collect();
            let _ = writeln!(
                out,
                "static const uint32_t {array}[{}] = {{{}}};",
                positions.len(),
                items.join(", ")
            );
        }
    }

    for msg in &spec.messages {
        let syms = naming::message_symbols(&spec.meta.name, &msg.name);
        emit_encode_fn(&mut out, spec, msg, &syms);
        emit_decode_fn(&mut out, spec, msg, &syms);
    }

    out
}

fn emit_encode_fn(out: &mut String, spec: &SpecIr, msg: &Message, syms: &naming::MessageSymbols) {
    out.push('\n');
    let _ = writeln!(out, "int {}(", syms.encode_fn);
    out.push_str("    uint8_t *out_payload,\n");
    out.push_str("    size_t out_size,\n");
    let _ = writeln!(out, "    const {} *in", syms.struct_name);
    out.push_str(") {\n");
    out.push_str("    if (out_payload == NULL || in == NULL) {\n");
    out.push_str("        return BUSGEN_ERR_NULL;\n");
    out.push_str("    }\n");
    let _ = writeln!(out, "    if (out_size < (size_t){}) {{", syms.dlc_macro);
    out.push_str("        return BUSGEN_ERR_SIZE;\n");
    out.push_str("    }\n");

    for sig in &msg.signals {
        let field = naming::signal_field_name(&sig.name);
        if sig.bit_length >= 64 {
            continue;
        }
        if sig.signed {
            let lo = -(1i64 << (sig.bit_length - 1));
            let hi = (1i64 << (sig.bit_length - 1)) - 1;
            let _ = writeln!(
                out,
                "    if (in->{field} < {lo}LL || in->{field} > {hi}LL) {{"
            );
        } else {
            let _ = writeln!(
                out,
                "    if (in->{field} > {}ULL) {{",
                unsigned_max(sig.bit_length)
            );
        }
        out.push_str("        return BUSGEN_ERR_RANGE;\n");
        out.push_str("    }\n");
    }

    out.push('\n');
    let _ = writeln!(out, "    memset(out_payload, 0, (size_t){});", syms.dlc_macro);

    for sig in &msg.signals {
        let field = naming::signal_field_name(&sig.name);
        let array = naming::signal_bits_array(&spec.meta.name, &msg.name, &sig.name);
        out.push_str("    {\n");
        if sig.bit_length >= 64 {
            let _ = writeln!(out, "        uint64_t raw = (uint64_t)in->{field};");
        } else {
            let _ = writeln!(
                out,
                "        uint64_t raw = (uint64_t)in->{field} & {};",
                mask_literal(sig.bit_length)
            );
        }
        out.push_str("        size_t i;\n");
        let _ = writeln!(out, "        for (i = 0; i < {}U; i++) {{", sig.bit_length);
        out.push_str("            if ((raw >> i) & 1ULL) {\n");
        let _ = writeln!(
            out,
            "                out_payload[{array}[i] / 8U] |= (uint8_t)(1U << ({array}[i] % 8U));"
        );
        out.push_str("            }\n");
        out.push_str("        }\n");
        out.push_str("    }\n");
    }

    out.push_str("    return BUSGEN_OK;\n");
    out.push_str("}\n");
}

fn emit_decode_fn(out: &mut String, spec: &SpecIr, msg: &Message, syms: &naming::MessageSymbols) {
    out.push('\n');
    let _ = writeln!(out, "int {}(", syms.decode_fn);
    out.push_str("    const uint8_t *payload,\n");
    out.push_str("    size_t payload_size,\n");
    let _ = writeln!(out, "    {} *out", syms.struct_name);
    out.push_str(") {\n");
    out.push_str("    if (payload == NULL || out == NULL) {\n");
    out.push_str("        return BUSGEN_ERR_NULL;\n");
    out.push_str("    }\n");
    let _ = writeln!(out, "    if (payload_size < (size_t){}) {{", syms.dlc_macro);
    out.push_str("        return BUSGEN_ERR_SIZE;\n");
    out.push_str("    }\n");
    out.push('\n');
    out.push_str("    memset(out, 0, sizeof(*out));\n");

    for sig in &msg.signals {
        let field = naming::signal_field_name(&sig.name);
        let array = naming::signal_bits_array(&spec.meta.name, &msg.name, &sig.name);
        out.push_str("    {\n");
        out.push_str("        uint64_t raw = 0U;\n");
        out.push_str("        size_t i;\n");
        let _ = writeln!(out, "        for (i = 0; i < {}U; i++) {{", sig.bit_length);
        let _ = writeln!(
            out,
            "            if ((payload[{array}[i] / 8U] >> ({array}[i] % 8U)) & 1U) {{"
        );
        out.push_str("                raw |= (uint64_t)1U << i;\n");
        out.push_str("            }\n");
        out.push_str("        }\n");
        if sig.signed {
            if sig.bit_length < 64 {
                let sign_bit = 1u64 << (sig.bit_length - 1);
                let _ = writeln!(out, "        if ((raw & 0x{sign_bit:X}ULL) != 0U) {{");
                let _ = writeln!(out, "            raw |= ~{};", mask_literal(sig.bit_length));
                out.push_str("        }\n");
            }
            let _ = writeln!(out, "        out->{field} = (int64_t)raw;");
        } else {
            let _ = writeln!(out, "        out->{field} = raw;");
        }
        out.push_str("    }\n");
    }

    out.push_str("    return BUSGEN_OK;\n");
    out.push_str("}\n");
}

/// Emit the roundtrip driver: a `main()` that reads one framed test case from
/// stdin, exercises the generated encode/decode pair, and writes statuses and
/// resulting bytes/fields back on stdout (all integers little-endian).
///
/// Frame in: `u32 message_index`, `u8 opcode`, then for opcode 0 one `u64`
/// per signal (raw field bits), for opcode 1 `dlc` payload bytes.
/// Frame out, opcode 0: `i32 encode_status`, payload, `i32 decode_status`,
/// decoded fields. Opcode 1: `i32 decode_status`, decoded fields,
/// `i32 encode_status`, re-encoded payload.
pub fn emit_roundtrip_driver(spec: &SpecIr) -> Result<String, CodegenError> {
    check_collisions(spec)?;
    let (header_name, _) = naming::output_filenames(&spec.meta.name);
    let mut out = String::new();

    let _ = writeln!(
        out,
        "/* Roundtrip test driver for {:?}. Generated; do not edit. */",
        spec.meta.name
    );
    let _ = writeln!(out, "#include \"{header_name}\"");
    out.push('\n');
    out.push_str("#include <stdio.h>\n");
    out.push_str("#include <string.h>\n");
    out.push('\n');
    out.push_str("static int read_exact(uint8_t *buf, size_t len) {\n");
    out.push_str("    return fread(buf, 1U, len, stdin) == len;\n");
    out.push_str("}\n");
    out.push('\n');
    out.push_str("static int read_u32_le(uint32_t *out) {\n");
    out.push_str("    uint8_t b[4];\n");
    out.push_str("    if (!read_exact(b, 4U)) {\n");
    out.push_str("        return 0;\n");
    out.push_str("    }\n");
    out.push_str("    *out = (uint32_t)b[0] | ((uint32_t)b[1] << 8) | ((uint32_t)b[2] << 16) |\n");
    out.push_str("           ((uint32_t)b[3] << 24);\n");
    out.push_str("    return 1;\n");
    out.push_str("}\n");
    out.push('\n');
    out.push_str("static int read_u64_le(uint64_t *out) {\n");
    out.push_str("    uint8_t b[8];\n");
    out.push_str("    size_t i;\n");
    out.push_str("    if (!read_exact(b, 8U)) {\n");
    out.push_str("        return 0;\n");
    out.push_str("    }\n");
    out.push_str("    *out = 0U;\n");
    out.push_str("    for (i = 0; i < 8U; i++) {\n");
    out.push_str("        *out |= (uint64_t)b[i] << (8U * i);\n");
    out.push_str("    }\n");
    out.push_str("    return 1;\n");
    out.push_str("}\n");
    out.push('\n');
    out.push_str("static int write_all(const uint8_t *buf, size_t len) {\n");
    out.push_str("    return fwrite(buf, 1U, len, stdout) == len;\n");
    out.push_str("}\n");
    out.push('\n');
    out.push_str("static int write_i32_le(int32_t v) {\n");
    out.push_str("    uint32_t u = (uint32_t)v;\n");
    out.push_str("    uint8_t b[4];\n");
    out.push_str("    b[0] = (uint8_t)(u & 0xFFU);\n");
    out.push_str("    b[1] = (uint8_t)((u >> 8) & 0xFFU);\n");
    out.push_str("    b[2] = (uint8_t)((u >> 16) & 0xFFU);\n");
    out.push_str("    b[3] = (uint8_t)((u >> 24) & 0xFFU);\n");
    out.push_str("    return write_all(b, 4U);\n");
    out.push_str("}\n");
    out.push('\n');
    out.push_str("static int write_u64_le(uint64_t v) {\n");
    out.push_str("    uint8_t b[8];\n");
    out.push_str("    size_t i;\n");
    out.push_str("    for (i = 0; i < 8U; i++) {\n");
    out.push_str("        b[i] = (uint8_t)((v >> (8U * i)) & 0xFFU);\n");
    out.push_str("    }\n");
    out.push_str("    return write_all(b, 8U);\n");
    out.push_str("}\n");
    out.push('\n');
    out.push_str("int main(void) {\n");
    out.push_str("    uint32_t msg_index;\n");
    out.push_str("    uint8_t op;\n");
    out.push_str("    if (!read_u32_le(&msg_index)) {\n");
    out.push_str("        return 1;\n");
    out.push_str("    }\n");
    out.push_str("    if (!read_exact(&op, 1U)) {\n");
    out.push_str("        return 1;\n");
    out.push_str("    }\n");
    out.push_str("    switch (msg_index) {\n");

    for (midx, msg) in spec.messages.iter().enumerate() {
        let syms = naming::message_symbols(&spec.meta.name, &msg.name);
        let _ = writeln!(out, "    case {midx}U: {{");
        let _ = writeln!(out, "        {} in;", syms.struct_name);
        let _ = writeln!(out, "        {} decoded;", syms.struct_name);
        let _ = writeln!(out, "        uint8_t payload[{}];", syms.dlc_macro);
        out.push_str("        int status;\n");
        out.push_str("        memset(&in, 0, sizeof(in));\n");
        out.push_str("        memset(&decoded, 0, sizeof(decoded));\n");
        out.push_str("        memset(payload, 0, sizeof(payload));\n");
        out.push_str("        if (op == 0U) {\n");
        out.push_str("            uint64_t v;\n");
        for sig in &msg.signals {
            let field = naming::signal_field_name(&sig.name);
            out.push_str("            if (!read_u64_le(&v)) {\n");
            out.push_str("                return 1;\n");
            out.push_str("            }\n");
            if sig.signed {
                let _ = writeln!(out, "            in.{field} = (int64_t)v;");
            } else {
                let _ = writeln!(out, "            in.{field} = v;");
            }
        }
        let _ = writeln!(
            out,
            "            status = {}(payload, sizeof(payload), &in);",
            syms.encode_fn
        );
        out.push_str("            if (!write_i32_le(status)) {\n");
        out.push_str("                return 1;\n");
        out.push_str("            }\n");
        out.push_str("            if (!write_all(payload, sizeof(payload))) {\n");
        out.push_str("                return 1;\n");
        out.push_str("            }\n");
        let _ = writeln!(
            out,
            "            status = {}(payload, sizeof(payload), &decoded);",
            syms.decode_fn
        );
        out.push_str("            if (!write_i32_le(status)) {\n");
        out.push_str("                return 1;\n");
        out.push_str("            }\n");
        for sig in &msg.signals {
            let field = naming::signal_field_name(&sig.name);
            let _ = writeln!(
                out,
                "            if (!write_u64_le((uint64_t)decoded.{field})) {{"
            );
            out.push_str("                return 1;\n");
            out.push_str("            }\n");
        }
        out.push_str("        } else {\n");
        out.push_str("            if (!read_exact(payload, sizeof(payload))) {\n");
        out.push_str("                return 1;\n");
        out.push_str("            }\n");
        let _ = writeln!(
            out,
            "            status = {}(payload, sizeof(payload), &decoded);",
            syms.decode_fn
        );
        out.push_str("            if (!write_i32_le(status)) {\n");
        out.push_str("                return 1;\n");
        out.push_str("            }\n");
        for sig in &msg.signals {
            let field = naming::signal_field_name(&sig.name);
            let _ = writeln!(
                out,
                "            if (!write_u64_le((uint64_t)decoded.{field})) {{"
            );
            out.push_str("                return 1;\n");
            out.push_str("            }\n");
        }
        out.push_str("            memset(payload, 0, sizeof(payload));\n");
        let _ = writeln!(
            out,
            "            status = {}(payload, sizeof(payload), &decoded);",
            syms.encode_fn
        );
        out.push_str("            if (!write_i32_le(status)) {\n");
        out.push_str("                return 1;\n");
        out.push_str("            }\n");
        out.push_str("            if (!write_all(payload, sizeof(payload))) {\n");
        out.push_str("                return 1;\n");
        out.push_str("            }\n");
        out.push_str("        }\n");
        out.push_str("        break;\n");
        out.push_str("    }\n");
    }

    out.push_str("    default:\n");
    out.push_str("        return 1;\n");
    out.push_str("    }\n");
    out.push_str("    if (fflush(stdout) != 0) {\n");
    out.push_str("        return 1;\n");
    out.push_str("    }\n");
    out.push_str("    return 0;\n");
    out.push_str("}\n");

    Ok(out)
}
