// eddynet common library
// Dataset storage shared by the network builder and the CLI

pub mod archive;
pub mod dataset;
pub mod schema;
pub mod types;
pub mod varint;

// Re-export commonly used types
pub use archive::Archive;
pub use dataset::{decode_values, encode_values, Dataset, DatasetWriter, Element};
pub use schema::{chunk_rows_for, AttrValue, Attributes, DType, Dimension, Schema, Variable};
pub use types::{
    eddynet_version, DEFAULT_COMPRESSION_LEVEL, OBS_DIM, SAMPLE_DIM, SCHEMA_FORMAT_VERSION,
};
