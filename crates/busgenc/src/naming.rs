//! Central naming policy for generated C artifacts and symbols.
//!
//! Every public name is derived purely from IR content: sanitize to a
//! lowercase snake_case identifier, then prefix with the fixed vendor prefix
//! and the sanitized spec name so symbols never collide across specs.

pub const VENDOR_PREFIX: &str = "busgen";

/// Normalize arbitrary text into a lowercase C-safe identifier.
///
/// Non-alphanumeric characters map to `_`, runs collapse, leading and
/// trailing underscores are trimmed, a leading digit gets an underscore
/// prefix, and an empty result becomes `unnamed`.
pub fn sanitize_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_underscore = false;
        } else if !prev_underscore {
            out.push('_');
            prev_underscore = true;
        }
    }

    let trimmed = out.trim_matches('_');
    let mut cleaned = if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    };
    if cleaned.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        cleaned.insert(0, '_');
    }
    cleaned
}

pub fn spec_c_name(spec_name: &str) -> String {
    sanitize_ident(spec_name)
}

pub fn header_guard(spec_name: &str) -> String {
    format!(
        "{}_{}_PROTOCOL_H",
        VENDOR_PREFIX.to_ascii_uppercase(),
        spec_c_name(spec_name).to_ascii_uppercase()
    )
}

/// Expected (header, source) output file names for one spec.
pub fn output_filenames(spec_name: &str) -> (String, String) {
    let c = spec_c_name(spec_name);
    (format!("{c}_protocol.h"), format!("{c}_protocol.c"))
}

pub fn driver_filename(spec_name: &str) -> String {
    format!("{}_roundtrip_driver.c", spec_c_name(spec_name))
}

/// Resolved C symbols for one message of one spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSymbols {
    pub message_c_name: String,
    pub struct_name: String,
    pub encode_fn: String,
    pub decode_fn: String,
    pub id_macro: String,
    pub dlc_macro: String,
}

pub fn message_symbols(spec_name: &str, message_name: &str) -> MessageSymbols {
    let p = spec_c_name(spec_name);
    let m = sanitize_ident(message_name);
    let macro_prefix = format!(
        "{}_{}_{}",
        VENDOR_PREFIX.to_ascii_uppercase(),
        p.to_ascii_uppercase(),
        m.to_ascii_uppercase()
    );
    MessageSymbols {
        message_c_name: m.clone(),
        struct_name: format!("{VENDOR_PREFIX}_{p}_{m}_t"),
        encode_fn: format!("{VENDOR_PREFIX}_{p}_encode_{m}"),
        decode_fn: format!("{VENDOR_PREFIX}_{p}_decode_{m}"),
        id_macro: format!("{macro_prefix}_ID"),
        dlc_macro: format!("{macro_prefix}_DLC"),
    }
}

pub fn signal_field_name(signal_name: &str) -> String {
    sanitize_ident(signal_name)
}

/// File-scope array holding one signal's absolute bit positions.
pub fn signal_bits_array(spec_name: &str, message_name: &str, signal_name: &str) -> String {
    format!(
        "{VENDOR_PREFIX}_{}_{}_{}_bits",
        spec_c_name(spec_name),
        sanitize_ident(message_name),
        sanitize_ident(signal_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_maps_punctuation_and_collapses_runs() {
        assert_eq!(sanitize_ident("Motor Speed (rpm)"), "motor_speed_rpm");
        assert_eq!(sanitize_ident("a--b__c"), "a_b_c");
        assert_eq!(sanitize_ident("___"), "unnamed");
        assert_eq!(sanitize_ident(""), "unnamed");
    }

    #[test]
    fn sanitize_prefixes_leading_digits() {
        assert_eq!(sanitize_ident("42volts"), "_42volts");
        assert_eq!(sanitize_ident("1 shot"), "_1_shot");
    }

    #[test]
    fn message_symbols_carry_vendor_and_spec_prefixes() {
        let syms = message_symbols("Demo Bus", "Engine.Status");
        assert_eq!(syms.struct_name, "busgen_demo_bus_engine_status_t");
        assert_eq!(syms.encode_fn, "busgen_demo_bus_encode_engine_status");
        assert_eq!(syms.decode_fn, "busgen_demo_bus_decode_engine_status");
        assert_eq!(syms.id_macro, "BUSGEN_DEMO_BUS_ENGINE_STATUS_ID");
        assert_eq!(syms.dlc_macro, "BUSGEN_DEMO_BUS_ENGINE_STATUS_DLC");
    }

    #[test]
    fn output_filenames_follow_the_sanitized_spec_name() {
        let (h, c) = output_filenames("Demo Bus");
        assert_eq!(h, "demo_bus_protocol.h");
        assert_eq!(c, "demo_bus_protocol.c");
        assert_eq!(driver_filename("Demo Bus"), "demo_bus_roundtrip_driver.c");
    }
}
