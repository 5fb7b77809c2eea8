//! Layer-1 semantic validation.
//!
//! Cross-field constraints that the structural walker cannot express: bit
//! layouts must fit the declared payload, signals must not overlap, ranges
//! must be ordered, defaults must fall inside them, scale must be nonzero,
//! and enum values must be representable. The validator is pure and collects
//! every issue in one batch; it never mutates the IR and never short-circuits.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::ir::{Message, Signal, SpecIr};
use crate::layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SemanticCategory {
    DlcOverflow,
    BitOverlap,
    RangeInverted,
    DefaultOutOfRange,
    ScaleZero,
    EnumOutOfRange,
}

impl SemanticCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            SemanticCategory::DlcOverflow => "DLC_OVERFLOW",
            SemanticCategory::BitOverlap => "BIT_OVERLAP",
            SemanticCategory::RangeInverted => "RANGE_INVERTED",
            SemanticCategory::DefaultOutOfRange => "DEFAULT_OUT_OF_RANGE",
            SemanticCategory::ScaleZero => "SCALE_ZERO",
            SemanticCategory::EnumOutOfRange => "ENUM_OUT_OF_RANGE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticIssue {
    pub category: SemanticCategory,
    pub ptr: String,
    pub message: String,
}

/// Representable raw range for a signal as (lo, hi), inclusive.
pub fn signal_raw_range(bit_length: u32, signed: bool) -> (i128, i128) {
    if signed {
        (-(1i128 << (bit_length - 1)), (1i128 << (bit_length - 1)) - 1)
    } else {
        (0, (1i128 << bit_length) - 1)
    }
}

pub fn validate_semantic(spec: &SpecIr) -> Vec<SemanticIssue> {
    let mut issues = Vec::new();
    for (midx, msg) in spec.messages.iter().enumerate() {
        check_message(msg, midx, &mut issues);
    }
    issues
}

fn check_message(msg: &Message, midx: usize, issues: &mut Vec<SemanticIssue>) {
    let dlc_bits = msg.dlc * 8;
    let mut claimed: Vec<(&str, BTreeSet<u32>)> = Vec::with_capacity(msg.signals.len());

    for (sidx, sig) in msg.signals.iter().enumerate() {
        let ptr = format!("/messages/{midx}/signals/{sidx}");
        let bits: BTreeSet<u32> = layout::signal_occupied_bits(sig);

        if let Some(&bad) = bits.iter().find(|&&b| b >= dlc_bits) {
            issues.push(SemanticIssue {
                category: SemanticCategory::DlcOverflow,
                ptr: ptr.clone(),
                message: format!(
                    "message {:?} signal {:?}: bit {bad} exceeds dlc ({} bytes = {dlc_bits} bits)",
                    msg.name, sig.name, msg.dlc
                ),
            });
        }

        for (other_name, other_bits) in &claimed {
            let overlap: Vec<u32> = bits.intersection(other_bits).copied().collect();
            if !overlap.is_empty() {
                issues.push(SemanticIssue {
                    category: SemanticCategory::BitOverlap,
                    ptr: ptr.clone(),
                    message: format!(
                        "message {:?}: signal {:?} overlaps signal {:?} at bits {overlap:?}",
                        msg.name, sig.name, other_name
                    ),
                });
            }
        }
        claimed.push((sig.name.as_str(), bits));

        check_signal_values(msg, sig, &ptr, issues);
    }
}

fn check_signal_values(msg: &Message, sig: &Signal, ptr: &str, issues: &mut Vec<SemanticIssue>) {
    if let (Some(min), Some(max)) = (sig.min, sig.max) {
        if min >= max {
            issues.push(SemanticIssue {
                category: SemanticCategory::RangeInverted,
                ptr: format!("{ptr}/min"),
                message: format!(
                    "message {:?} signal {:?}: min ({min}) is not less than max ({max})",
                    msg.name, sig.name
                ),
            });
        }
    }

    if let Some(default) = sig.default {
        let below = sig.min.is_some_and(|min| default < min);
        let above = sig.max.is_some_and(|max| default > max);
        if below || above {
            issues.push(SemanticIssue {
                category: SemanticCategory::DefaultOutOfRange,
                ptr: format!("{ptr}/default"),
                message: format!(
                    "message {:?} signal {:?}: default ({default}) is outside [{:?}, {:?}]",
                    msg.name, sig.name, sig.min, sig.max
                ),
            });
        }
    }

    if sig.scale == 0.0 {
        issues.push(SemanticIssue {
            category: SemanticCategory::ScaleZero,
            ptr: format!("{ptr}/scale"),
            message: format!("message {:?} signal {:?}: scale is 0", msg.name, sig.name),
        });
    }

    if let Some(entries) = &sig.enum_entries {
        let (lo, hi) = signal_raw_range(sig.bit_length, sig.signed);
        for (eidx, entry) in entries.iter().enumerate() {
            let value = entry.value as i128;
            if value < lo || value > hi {
                issues.push(SemanticIssue {
                    category: SemanticCategory::EnumOutOfRange,
                    ptr: format!("{ptr}/enum/{eidx}/value"),
                    message: format!(
                        "message {:?} signal {:?} enum {:?}: value {} is outside [{lo}, {hi}] for a {}-bit {} signal",
                        msg.name,
                        sig.name,
                        entry.name,
                        entry.value,
                        sig.bit_length,
                        if sig.signed { "signed" } else { "unsigned" }
                    ),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BusFamily, BusMode, BusType, ByteOrder, EnumEntry, Meta, SourceFormat};

    fn signal(name: &str, start_bit: u32, bit_length: u32) -> Signal {
        Signal {
            name: name.to_string(),
            start_bit,
            bit_length,
            byte_order: ByteOrder::LittleEndian,
            signed: false,
            scale: 1.0,
            offset: 0.0,
            min: None,
            max: None,
            default: None,
            unit: None,
            enum_entries: None,
        }
    }

    fn spec_with(signals: Vec<Signal>, dlc: u32) -> SpecIr {
        SpecIr {
            ir_version: crate::IR_VERSION.to_string(),
            meta: Meta {
                name: "demo".to_string(),
                version: "1.0".to_string(),
                source: "demo.dbc".to_string(),
                format: SourceFormat::Dbc,
            },
            bus_type: BusType {
                bustype: BusFamily::Can,
                busmode: Some(BusMode::Classic),
            },
            messages: vec![Message {
                id: 0x100,
                name: "status".to_string(),
                dlc,
                is_extended: false,
                signals,
            }],
        }
    }

    #[test]
    fn clean_spec_has_no_issues() {
        let spec = spec_with(vec![signal("a", 0, 4), signal("b", 4, 4)], 1);
        assert!(validate_semantic(&spec).is_empty());
    }

    #[test]
    fn zero_scale_is_the_only_reported_issue() {
        let mut sig = signal("a", 0, 4);
        sig.scale = 0.0;
        let issues = validate_semantic(&spec_with(vec![sig], 1));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, SemanticCategory::ScaleZero);
        assert_eq!(issues[0].ptr, "/messages/0/signals/0/scale");
    }

    #[test]
    fn overlapping_signals_cite_both_names_without_dlc_noise() {
        let spec = spec_with(vec![signal("first", 0, 5), signal("second", 3, 5)], 1);
        let issues = validate_semantic(&spec);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, SemanticCategory::BitOverlap);
        assert!(issues[0].message.contains("\"first\""));
        assert!(issues[0].message.contains("\"second\""));
        assert!(issues
            .iter()
            .all(|i| i.category != SemanticCategory::DlcOverflow));
    }

    #[test]
    fn dlc_overflow_cites_the_first_out_of_range_bit() {
        let spec = spec_with(vec![signal("wide", 4, 8)], 1);
        let issues = validate_semantic(&spec);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, SemanticCategory::DlcOverflow);
        assert!(issues[0].message.contains("bit 8"));
    }

    #[test]
    fn inverted_range_and_bad_default_are_separate_issues() {
        let mut sig = signal("a", 0, 8);
        sig.min = Some(10.0);
        sig.max = Some(1.0);
        let issues = validate_semantic(&spec_with(vec![sig], 1));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, SemanticCategory::RangeInverted);

        let mut sig = signal("a", 0, 8);
        sig.min = Some(0.0);
        sig.max = Some(10.0);
        sig.default = Some(11.0);
        let issues = validate_semantic(&spec_with(vec![sig], 1));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, SemanticCategory::DefaultOutOfRange);
    }

    #[test]
    fn combined_issues_keep_the_per_signal_check_order() {
        let mut sig = signal("a", 0, 4);
        sig.scale = 0.0;
        sig.min = Some(5.0);
        sig.max = Some(1.0);
        sig.default = Some(9.0);
        let issues = validate_semantic(&spec_with(vec![sig], 1));
        let categories: Vec<SemanticCategory> = issues.iter().map(|i| i.category).collect();
        assert_eq!(
            categories,
            vec![
                SemanticCategory::RangeInverted,
                SemanticCategory::DefaultOutOfRange,
                SemanticCategory::ScaleZero,
            ]
        );
    }

    #[test]
    fn enum_values_must_fit_length_and_signedness() {
        let mut sig = signal("mode", 0, 4);
        sig.signed = true;
        sig.enum_entries = Some(vec![
            EnumEntry {
                name: "ok".to_string(),
                value: 7,
            },
            EnumEntry {
                name: "too_big".to_string(),
                value: 8,
            },
            EnumEntry {
                name: "too_small".to_string(),
                value: -9,
            },
        ]);
        let issues = validate_semantic(&spec_with(vec![sig], 1));
        assert_eq!(issues.len(), 2);
        assert!(issues
            .iter()
            .all(|i| i.category == SemanticCategory::EnumOutOfRange));

        let mut sig = signal("mode", 0, 64);
        sig.enum_entries = Some(vec![EnumEntry {
            name: "max".to_string(),
            value: i64::MAX,
        }]);
        assert!(validate_semantic(&spec_with(vec![sig], 8)).is_empty());
    }
}
