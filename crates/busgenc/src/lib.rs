pub mod c_emit;
pub mod ir;
pub mod layout;
pub mod naming;
pub mod validate;

pub const BUSGENC_VERSION: &str = env!("CARGO_PKG_VERSION");

/// IR document version understood by this build.
pub const IR_VERSION: &str = "0.1";

pub const RAW_REPORT_SCHEMA_VERSION: &str = "busgen.raw.report@0.1.0";
pub const RAW_ERROR_REPORT_SCHEMA_VERSION: &str = "busgen.raw.error.report@0.1.0";
