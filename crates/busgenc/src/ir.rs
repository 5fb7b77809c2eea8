use std::collections::BTreeSet;
use std::fmt::Display;

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::IR_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            ByteOrder::LittleEndian => "little_endian",
            ByteOrder::BigEndian => "big_endian",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Dbc,
    Pdf,
    Text,
    Md,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BusFamily {
    #[serde(rename = "CAN")]
    Can,
    #[serde(rename = "UART")]
    Uart,
    #[serde(rename = "SPI")]
    Spi,
    #[serde(rename = "I2C")]
    I2c,
    #[serde(rename = "unknown")]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusMode {
    Classic,
    Fd,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Meta {
    pub name: String,
    pub version: String,
    pub source: String,
    pub format: SourceFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusType {
    pub bustype: BusFamily,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub busmode: Option<BusMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumEntry {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub name: String,
    pub start_bit: u32,
    pub bit_length: u32,
    pub byte_order: ByteOrder,
    pub signed: bool,
    pub scale: f64,
    pub offset: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_entries: Option<Vec<EnumEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: u32,
    pub name: String,
    pub dlc: u32,
    pub is_extended: bool,
    pub signals: Vec<Signal>,
}

/// Root IR document for one protocol spec.
///
/// Values are produced once by [`parse_ir_str`] and never mutated afterwards;
/// validation and codegen only borrow them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecIr {
    pub ir_version: String,
    pub meta: Meta,
    pub bus_type: BusType,
    pub messages: Vec<Message>,
}

/// Layer-0 structural issue: the document does not match the typed IR model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaIssue {
    pub ptr: String,
    pub message: String,
}

impl Display for SchemaIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.ptr)
    }
}

/// Parse an IR document from YAML text.
///
/// The schema is closed: unknown keys are rejected. Structural issues are
/// accumulated rather than short-circuited, so a single pass reports every
/// problem a document has.
pub fn parse_ir_str(text: &str) -> Result<SpecIr, Vec<SchemaIssue>> {
    let doc: Value = serde_yaml::from_str(text).map_err(|e| {
        vec![SchemaIssue {
            ptr: String::new(),
            message: format!("invalid YAML: {e}"),
        }]
    })?;
    parse_ir_value(&doc)
}

pub fn parse_ir_value(root: &Value) -> Result<SpecIr, Vec<SchemaIssue>> {
    let mut cx = Cx { issues: Vec::new() };

    let spec = (|| {
        let root_map = cx.mapping(root, "")?;
        cx.reject_unknown(root_map, "", &["ir_version", "meta", "bus_type", "messages"]);

        let ir_version = cx.req_str(root_map, "", "ir_version");
        if let Some(v) = ir_version.as_deref() {
            if v != IR_VERSION {
                cx.push(
                    "/ir_version",
                    format!("unsupported ir_version: got {v:?}, supported: {IR_VERSION}"),
                );
            }
        }

        let meta = root_map
            .get("meta")
            .map(|v| cx.parse_meta(v))
            .unwrap_or_else(|| {
                cx.push("", "missing required field: meta".to_string());
                None
            });
        let bus_type = root_map
            .get("bus_type")
            .map(|v| cx.parse_bus_type(v))
            .unwrap_or_else(|| {
                cx.push("", "missing required field: bus_type".to_string());
                None
            });
        let messages = root_map
            .get("messages")
            .map(|v| cx.parse_messages(v))
            .unwrap_or_else(|| {
                cx.push("", "missing required field: messages".to_string());
                None
            });

        Some(SpecIr {
            ir_version: ir_version?,
            meta: meta?,
            bus_type: bus_type?,
            messages: messages?,
        })
    })();

    match spec {
        Some(spec) if cx.issues.is_empty() => Ok(spec),
        _ => Err(cx.issues),
    }
}

/// Emit the canonical YAML form: stable key order, optional fields omitted.
pub fn emit_ir(spec: &SpecIr) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(spec)
}

struct Cx {
    issues: Vec<SchemaIssue>,
}

impl Cx {
    fn push(&mut self, ptr: impl Into<String>, message: String) {
        self.issues.push(SchemaIssue {
            ptr: ptr.into(),
            message,
        });
    }

    fn mapping<'v>(&mut self, v: &'v Value, ptr: &str) -> Option<&'v Mapping> {
        match v.as_mapping() {
            Some(m) => Some(m),
            None => {
                self.push(ptr, "expected a mapping".to_string());
                None
            }
        }
    }

    fn reject_unknown(&mut self, map: &Mapping, ptr: &str, allowed: &[&str]) {
        for (key, _) in map {
            let name = key.as_str().unwrap_or("<non-string key>");
            if !allowed.contains(&name) {
                self.push(format!("{ptr}/{name}"), format!("unknown field: {name:?}"));
            }
        }
    }

    fn req_str(&mut self, map: &Mapping, ptr: &str, key: &str) -> Option<String> {
        match map.get(key) {
            None => {
                self.push(ptr, format!("missing required field: {key}"));
                None
            }
            Some(v) => match v.as_str() {
                Some(s) => Some(s.to_string()),
                None => {
                    self.push(format!("{ptr}/{key}"), format!("{key} must be a string"));
                    None
                }
            },
        }
    }

    fn req_u32(&mut self, map: &Mapping, ptr: &str, key: &str) -> Option<u32> {
        match map.get(key) {
            None => {
                self.push(ptr, format!("missing required field: {key}"));
                None
            }
            Some(v) => match v.as_u64() {
                Some(n) if n <= u32::MAX as u64 => Some(n as u32),
                Some(n) => {
                    self.push(
                        format!("{ptr}/{key}"),
                        format!("{key} is out of range: {n}"),
                    );
                    None
                }
                None => {
                    self.push(
                        format!("{ptr}/{key}"),
                        format!("{key} must be a non-negative integer"),
                    );
                    None
                }
            },
        }
    }

    fn opt_f64(&mut self, map: &Mapping, ptr: &str, key: &str) -> Option<f64> {
        let v = map.get(key)?;
        match v.as_f64() {
            Some(f) => Some(f),
            None => {
                self.push(format!("{ptr}/{key}"), format!("{key} must be a number"));
                None
            }
        }
    }

    fn opt_bool(&mut self, map: &Mapping, ptr: &str, key: &str, default: bool) -> bool {
        match map.get(key) {
            None => default,
            Some(v) => match v.as_bool() {
                Some(b) => b,
                None => {
                    self.push(format!("{ptr}/{key}"), format!("{key} must be a boolean"));
                    default
                }
            },
        }
    }

    fn parse_meta(&mut self, v: &Value) -> Option<Meta> {
        let ptr = "/meta";
        let map = self.mapping(v, ptr)?;
        self.reject_unknown(map, ptr, &["name", "version", "source", "format"]);

        let name = self.req_str(map, ptr, "name");
        let version = self.req_str(map, ptr, "version");
        let source = self.req_str(map, ptr, "source");
        let format = self.req_str(map, ptr, "format").and_then(|s| {
            let parsed = match s.as_str() {
                "dbc" => Some(SourceFormat::Dbc),
                "pdf" => Some(SourceFormat::Pdf),
                "text" => Some(SourceFormat::Text),
                "md" => Some(SourceFormat::Md),
                _ => None,
            };
            if parsed.is_none() {
                self.push(
                    format!("{ptr}/format"),
                    format!("invalid format: {s:?}, expected one of dbc, pdf, text, md"),
                );
            }
            parsed
        });

        Some(Meta {
            name: name?,
            version: version?,
            source: source?,
            format: format?,
        })
    }

    fn parse_bus_type(&mut self, v: &Value) -> Option<BusType> {
        let ptr = "/bus_type";
        let map = self.mapping(v, ptr)?;
        self.reject_unknown(map, ptr, &["bustype", "busmode"]);

        let bustype = self.req_str(map, ptr, "bustype").and_then(|s| {
            let parsed = match s.as_str() {
                "CAN" => Some(BusFamily::Can),
                "UART" => Some(BusFamily::Uart),
                "SPI" => Some(BusFamily::Spi),
                "I2C" => Some(BusFamily::I2c),
                "unknown" => Some(BusFamily::Unknown),
                _ => None,
            };
            if parsed.is_none() {
                self.push(
                    format!("{ptr}/bustype"),
                    format!("invalid bustype: {s:?}, expected one of CAN, UART, SPI, I2C, unknown"),
                );
            }
            parsed
        });

        let busmode = match map.get("busmode") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v) => match v.as_str() {
                Some("classic") => Some(BusMode::Classic),
                Some("fd") => Some(BusMode::Fd),
                _ => {
                    self.push(
                        format!("{ptr}/busmode"),
                        "invalid busmode: expected classic or fd".to_string(),
                    );
                    None
                }
            },
        };

        Some(BusType {
            bustype: bustype?,
            busmode,
        })
    }

    fn parse_messages(&mut self, v: &Value) -> Option<Vec<Message>> {
        let ptr = "/messages";
        let seq = match v.as_sequence() {
            Some(s) => s,
            None => {
                self.push(ptr, "messages must be a sequence".to_string());
                return None;
            }
        };
        if seq.is_empty() {
            self.push(ptr, "messages must contain at least one entry".to_string());
            return None;
        }

        let mut seen_ids: BTreeSet<u32> = BTreeSet::new();
        let mut seen_names: BTreeSet<String> = BTreeSet::new();
        let mut out = Vec::with_capacity(seq.len());
        let mut complete = true;

        for (idx, item) in seq.iter().enumerate() {
            let mptr = format!("{ptr}/{idx}");
            match self.parse_message(item, &mptr) {
                Some(msg) => {
                    if !seen_ids.insert(msg.id) {
                        self.push(format!("{mptr}/id"), format!("duplicate message id: {}", msg.id));
                    }
                    if !seen_names.insert(msg.name.clone()) {
                        self.push(
                            format!("{mptr}/name"),
                            format!("duplicate message name: {:?}", msg.name),
                        );
                    }
                    out.push(msg);
                }
                None => complete = false,
            }
        }

        complete.then_some(out)
    }

    fn parse_message(&mut self, v: &Value, ptr: &str) -> Option<Message> {
        let map = self.mapping(v, ptr)?;
        self.reject_unknown(map, ptr, &["id", "name", "dlc", "is_extended", "signals"]);

        let id = self.req_u32(map, ptr, "id");
        let name = self.req_str(map, ptr, "name");
        let dlc = self.req_u32(map, ptr, "dlc").and_then(|d| {
            if (1..=64).contains(&d) {
                Some(d)
            } else {
                self.push(format!("{ptr}/dlc"), format!("dlc must be 1..=64, got {d}"));
                None
            }
        });
        let is_extended = self.opt_bool(map, ptr, "is_extended", false);

        let signals = match map.get("signals") {
            None => {
                self.push(ptr, "missing required field: signals".to_string());
                None
            }
            Some(v) => self.parse_signals(v, ptr),
        };

        Some(Message {
            id: id?,
            name: name?,
            dlc: dlc?,
            is_extended,
            signals: signals?,
        })
    }

    fn parse_signals(&mut self, v: &Value, msg_ptr: &str) -> Option<Vec<Signal>> {
        let ptr = format!("{msg_ptr}/signals");
        let seq = match v.as_sequence() {
            Some(s) => s,
            None => {
                self.push(ptr, "signals must be a sequence".to_string());
                return None;
            }
        };
        if seq.is_empty() {
            self.push(ptr, "signals must contain at least one entry".to_string());
            return None;
        }

        let mut seen_names: BTreeSet<String> = BTreeSet::new();
        let mut out = Vec::with_capacity(seq.len());
        let mut complete = true;

        for (idx, item) in seq.iter().enumerate() {
            let sptr = format!("{ptr}/{idx}");
            match self.parse_signal(item, &sptr) {
                Some(sig) => {
                    if !seen_names.insert(sig.name.clone()) {
                        self.push(
                            format!("{sptr}/name"),
                            format!("duplicate signal name: {:?}", sig.name),
                        );
                    }
                    out.push(sig);
                }
                None => complete = false,
            }
        }

        complete.then_some(out)
    }

    fn parse_signal(&mut self, v: &Value, ptr: &str) -> Option<Signal> {
        let map = self.mapping(v, ptr)?;
        self.reject_unknown(
            map,
            ptr,
            &[
                "name",
                "start_bit",
                "bit_length",
                "byte_order",
                "signed",
                "scale",
                "offset",
                "min",
                "max",
                "default",
                "unit",
                "enum",
            ],
        );

        let name = self.req_str(map, ptr, "name");
        let start_bit = self.req_u32(map, ptr, "start_bit");
        let bit_length = self.req_u32(map, ptr, "bit_length").and_then(|n| {
            if (1..=64).contains(&n) {
                Some(n)
            } else {
                self.push(
                    format!("{ptr}/bit_length"),
                    format!("bit_length must be 1..=64, got {n}"),
                );
                None
            }
        });
        let byte_order = self.req_str(map, ptr, "byte_order").and_then(|s| {
            let parsed = match s.as_str() {
                "little_endian" => Some(ByteOrder::LittleEndian),
                "big_endian" => Some(ByteOrder::BigEndian),
                _ => None,
            };
            if parsed.is_none() {
                self.push(
                    format!("{ptr}/byte_order"),
                    format!("invalid byte_order: {s:?}, expected little_endian or big_endian"),
                );
            }
            parsed
        });

        let signed = self.opt_bool(map, ptr, "signed", false);
        let scale = match map.get("scale") {
            None => 1.0,
            Some(_) => self.opt_f64(map, ptr, "scale").unwrap_or(1.0),
        };
        let offset = match map.get("offset") {
            None => 0.0,
            Some(_) => self.opt_f64(map, ptr, "offset").unwrap_or(0.0),
        };
        let min = self.opt_f64(map, ptr, "min");
        let max = self.opt_f64(map, ptr, "max");
        let default = self.opt_f64(map, ptr, "default");
        let unit = match map.get("unit") {
            None => None,
            Some(v) => match v.as_str() {
                Some(s) => Some(s.to_string()),
                None => {
                    self.push(format!("{ptr}/unit"), "unit must be a string".to_string());
                    None
                }
            },
        };

        let enum_entries = map.get("enum").and_then(|v| self.parse_enum(v, ptr));

        Some(Signal {
            name: name?,
            start_bit: start_bit?,
            bit_length: bit_length?,
            byte_order: byte_order?,
            signed,
            scale,
            offset,
            min,
            max,
            default,
            unit,
            enum_entries,
        })
    }

    fn parse_enum(&mut self, v: &Value, sig_ptr: &str) -> Option<Vec<EnumEntry>> {
        let ptr = format!("{sig_ptr}/enum");
        let seq = match v.as_sequence() {
            Some(s) => s,
            None => {
                self.push(ptr, "enum must be a sequence".to_string());
                return None;
            }
        };

        let mut seen_names: BTreeSet<String> = BTreeSet::new();
        let mut seen_values: BTreeSet<i64> = BTreeSet::new();
        let mut out = Vec::with_capacity(seq.len());

        for (idx, item) in seq.iter().enumerate() {
            let eptr = format!("{ptr}/{idx}");
            let Some(map) = self.mapping(item, &eptr) else {
                continue;
            };
            self.reject_unknown(map, &eptr, &["name", "value"]);
            let name = self.req_str(map, &eptr, "name");
            let value = match map.get("value") {
                None => {
                    self.push(&eptr, "missing required field: value".to_string());
                    None
                }
                Some(v) => match v.as_i64() {
                    Some(n) => Some(n),
                    None => {
                        self.push(format!("{eptr}/value"), "value must be an integer".to_string());
                        None
                    }
                },
            };
            let (Some(name), Some(value)) = (name, value) else {
                continue;
            };
            if !seen_names.insert(name.clone()) {
                self.push(format!("{eptr}/name"), format!("duplicate enum label: {name:?}"));
            }
            if !seen_values.insert(value) {
                self.push(format!("{eptr}/value"), format!("duplicate enum value: {value}"));
            }
            out.push(EnumEntry { name, value });
        }

        Some(out)
    }
}
