// Dataset constants
// Format versions, reserved names and chunking limits shared by readers and writers

/// Library version reported by the CLI
pub const EDDYNET_VER_MAJOR: u32 = 0;
pub const EDDYNET_VER_MINOR: u32 = 1;
pub const EDDYNET_VER_BUGFIX: u32 = 0;

/// Version of the `_schema` stream encoding
pub const SCHEMA_FORMAT_VERSION: u64 = 1;

/// Reserved stream holding the encoded schema
pub const SCHEMA_STREAM: &str = "_schema";

/// Record dimension: one entry per observation
pub const OBS_DIM: &str = "obs";

/// Per-observation contour sample dimension
pub const SAMPLE_DIM: &str = "NbSample";

/// Chunk length caps, in records
pub const CHUNK_ROWS_1D: usize = 250_000;
pub const CHUNK_ROWS_SAMPLED: usize = 25_000;

/// Variable attributes that describe the data range and are invalidated by a merge
pub const STALE_ATTRIBUTES: [&str; 2] = ["min", "max"];

/// Attributes driving masked/scaled reads
pub const FILL_VALUE_ATTR: &str = "_FillValue";
pub const SCALE_FACTOR_ATTR: &str = "scale_factor";
pub const ADD_OFFSET_ATTR: &str = "add_offset";

/// Default zstd level for chunk payloads
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

pub fn eddynet_version() -> String {
    format!(
        "eddynet v. {}.{}.{} (schema format {})",
        EDDYNET_VER_MAJOR, EDDYNET_VER_MINOR, EDDYNET_VER_BUGFIX, SCHEMA_FORMAT_VERSION
    )
}
