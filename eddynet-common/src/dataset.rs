// Dataset reader and writer
// A schema stream plus one chunked, zstd-compressed stream per variable

use crate::archive::Archive;
use crate::schema::{DType, Schema, Variable};
use crate::types::{ADD_OFFSET_ATTR, FILL_VALUE_ATTR, SCALE_FACTOR_ATTR, SCHEMA_STREAM};
use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use zstd::stream::{decode_all, encode_all};

/// Rust types that map one-to-one onto a [`DType`]
pub trait Element: Copy {
    const DTYPE: DType;
    fn put_le(self, out: &mut Vec<u8>);
    fn get_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty => $d:ident),* $(,)?) => {$(
        impl Element for $t {
            const DTYPE: DType = DType::$d;

            #[inline]
            fn put_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn get_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(buf)
            }
        }
    )*};
}

impl_element!(
    i8 => I8, u8 => U8, i16 => I16, u16 => U16, i32 => I32,
    u32 => U32, i64 => I64, u64 => U64, f32 => F32, f64 => F64,
);

pub fn encode_values<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::DTYPE.size());
    for &v in values {
        v.put_le(&mut out);
    }
    out
}

pub fn decode_values<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(T::DTYPE.size())
        .map(T::get_le)
        .collect()
}

/// Writes a dataset. Every variable in the schema must be written exactly once
/// before [`DatasetWriter::finish`]. A writer dropped without a successful
/// `finish` deletes its partial file.
pub struct DatasetWriter {
    archive: Archive,
    schema: Schema,
    level: i32,
    streams: Vec<usize>,
    written: Vec<bool>,
    path: PathBuf,
    finished: bool,
}

impl DatasetWriter {
    pub fn create<P: AsRef<Path>>(path: P, schema: Schema, level: i32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        schema.validate().context("Refusing to write an invalid schema")?;
        if schema.var(SCHEMA_STREAM).is_some() {
            bail!("variable name {SCHEMA_STREAM:?} is reserved");
        }

        let encoded = schema.encode()?;
        let mut archive = Archive::create(&path)?;
        let schema_id = archive.register_stream(SCHEMA_STREAM);
        archive.set_raw_size(schema_id, encoded.len() as u64);
        let streams = schema
            .vars
            .iter()
            .map(|v| archive.register_stream(&v.name))
            .collect();
        let written = vec![false; schema.vars.len()];

        let mut writer = DatasetWriter {
            archive,
            schema,
            level,
            streams,
            written,
            path,
            finished: false,
        };
        writer
            .archive
            .add_part(schema_id, &encoded, 0)
            .with_context(|| format!("Failed to write schema of {}", writer.path.display()))?;
        Ok(writer)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Write a variable's complete raw (little-endian, unscaled) contents
    pub fn write_raw(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let idx = self
            .schema
            .vars
            .iter()
            .position(|v| v.name == name)
            .with_context(|| format!("{}: no variable named {name}", self.path.display()))?;
        if self.written[idx] {
            bail!("{}: variable {name} written twice", self.path.display());
        }

        let var = &self.schema.vars[idx];
        let record_size = self.schema.record_size(var)?;
        let expected = self
            .schema
            .obs_len()
            .checked_mul(record_size)
            .with_context(|| format!("{}: variable {name} is too large", self.path.display()))?;
        if data.len() != expected {
            bail!(
                "{}: variable {name} needs {expected} bytes, got {}",
                self.path.display(),
                data.len()
            );
        }

        let stream_id = self.streams[idx];
        let chunk_bytes = var.chunk_rows.saturating_mul(record_size);
        if chunk_bytes > 0 {
            for chunk in data.chunks(chunk_bytes) {
                let packed = encode_all(chunk, self.level)
                    .with_context(|| format!("Failed to compress chunk of {name}"))?;
                let rows = (chunk.len() / record_size) as u64;
                self.archive.add_part(stream_id, &packed, rows)?;
            }
        }
        self.archive.set_raw_size(stream_id, data.len() as u64);
        self.written[idx] = true;
        Ok(())
    }

    pub fn write_values<T: Element>(&mut self, name: &str, values: &[T]) -> Result<()> {
        let var = self
            .schema
            .var(name)
            .with_context(|| format!("{}: no variable named {name}", self.path.display()))?;
        if var.dtype != T::DTYPE {
            bail!(
                "variable {name} is {}, cannot write {} values",
                var.dtype,
                T::DTYPE
            );
        }
        self.write_raw(name, &encode_values(values))
    }

    /// Check completeness and write the footer. On error the partial file is removed.
    pub fn finish(mut self) -> Result<()> {
        if let Some(idx) = self.written.iter().position(|w| !w) {
            bail!(
                "{}: variable {} was never written",
                self.path.display(),
                self.schema.vars[idx].name
            );
        }
        self.archive.close()?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for DatasetWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.archive.discard();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Read access to a dataset
pub struct Dataset {
    archive: Archive,
    schema: Schema,
    path: PathBuf,
}

impl Dataset {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut archive = Archive::open_read(&path)?;
        let schema_id = archive
            .get_stream_id(SCHEMA_STREAM)
            .with_context(|| format!("{} is not a dataset (no schema stream)", path.display()))?;
        let (encoded, _) = archive.get_part_by_id(schema_id, 0)?;
        let schema = Schema::decode(&encoded)
            .with_context(|| format!("Failed to decode schema of {}", path.display()))?;
        Ok(Dataset {
            archive,
            schema,
            path,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn obs_len(&self) -> usize {
        self.schema.obs_len()
    }

    fn variable(&self, name: &str) -> Result<&Variable> {
        self.schema
            .var(name)
            .with_context(|| format!("{}: no variable named {name}", self.path.display()))
    }

    /// Exact stored bytes of a variable, with no masking or scaling
    pub fn read_raw(&mut self, name: &str) -> Result<Vec<u8>> {
        let var = self.variable(name)?.clone();
        let record_size = self.schema.record_size(&var)?;
        let stream_id = self
            .archive
            .get_stream_id(name)
            .with_context(|| format!("{}: variable {name} has no data", self.path.display()))?;

        let expected = self
            .obs_len()
            .checked_mul(record_size)
            .with_context(|| format!("{}: variable {name} is too large", self.path.display()))?;
        let raw_size = self.archive.get_raw_size(stream_id);
        if raw_size != expected as u64 {
            bail!(
                "{}: variable {name} is stored as {raw_size} bytes, expected {expected}",
                self.path.display()
            );
        }

        let mut data = Vec::new();
        for part_id in 0..self.archive.get_num_parts(stream_id) {
            let (packed, rows) = self.archive.get_part_by_id(stream_id, part_id)?;
            let chunk = decode_all(packed.as_slice()).with_context(|| {
                format!("{}: corrupt chunk {part_id} of {name}", self.path.display())
            })?;
            let chunk_size = usize::try_from(rows).ok().and_then(|r| r.checked_mul(record_size));
            if chunk_size != Some(chunk.len()) {
                bail!(
                    "{}: chunk {part_id} of {name} holds {} bytes, expected {} records",
                    self.path.display(),
                    chunk.len(),
                    rows
                );
            }
            data.extend_from_slice(&chunk);
        }

        if data.len() != expected {
            bail!(
                "{}: variable {name} holds {} bytes, expected {expected}",
                self.path.display(),
                data.len()
            );
        }
        Ok(data)
    }

    pub fn read_values<T: Element>(&mut self, name: &str) -> Result<Vec<T>> {
        let dtype = self.variable(name)?.dtype;
        if dtype != T::DTYPE {
            bail!("variable {name} is {dtype}, cannot read as {}", T::DTYPE);
        }
        Ok(decode_values(&self.read_raw(name)?))
    }

    /// Masked and scaled values: `_FillValue` entries become NaN, then
    /// `scale_factor` and `add_offset` apply.
    pub fn read_f64(&mut self, name: &str) -> Result<Vec<f64>> {
        let var = self.variable(name)?.clone();
        let fill = var.attrs.get(FILL_VALUE_ATTR).and_then(|v| v.as_f64());
        let scale = var
            .attrs
            .get(SCALE_FACTOR_ATTR)
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0);
        let offset = var
            .attrs
            .get(ADD_OFFSET_ATTR)
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        let raw = self.read_raw(name)?;
        Ok(raw
            .chunks_exact(var.dtype.size())
            .map(|bytes| {
                let value = var.dtype.decode_f64(bytes);
                if fill == Some(value) {
                    f64::NAN
                } else {
                    value * scale + offset
                }
            })
            .collect())
    }

    /// Hex SHA-256 of a variable's raw bytes
    pub fn digest(&mut self, name: &str) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.read_raw(name)?);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttrValue, Attributes};
    use tempfile::tempdir;

    fn small_schema(nb_obs: usize) -> Schema {
        let mut schema = Schema::new();
        schema.add_dim("obs", nb_obs).add_dim("NbSample", 3);
        let mut attrs = Attributes::new();
        attrs.set("scale_factor", AttrValue::Float(0.5));
        attrs.set("add_offset", AttrValue::Float(10.0));
        attrs.set("_FillValue", AttrValue::Int(-1));
        schema.add_var("lat", DType::I16, &["obs", "NbSample"], attrs);
        schema.add_var("id", DType::U32, &["obs"], Attributes::new());
        schema
    }

    #[test]
    fn test_write_read_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("step.eds");

        let mut writer = DatasetWriter::create(&path, small_schema(2), 3).unwrap();
        writer
            .write_values::<i16>("lat", &[0, 2, -1, 4, 6, 8])
            .unwrap();
        writer.write_values::<u32>("id", &[7, 9]).unwrap();
        writer.finish().unwrap();

        let mut ds = Dataset::open(&path).unwrap();
        assert_eq!(ds.obs_len(), 2);
        assert_eq!(ds.read_values::<u32>("id").unwrap(), vec![7, 9]);
        assert_eq!(
            ds.read_values::<i16>("lat").unwrap(),
            vec![0, 2, -1, 4, 6, 8]
        );

        let scaled = ds.read_f64("lat").unwrap();
        assert_eq!(scaled[0], 10.0);
        assert_eq!(scaled[1], 11.0);
        assert!(scaled[2].is_nan());
        assert_eq!(scaled[5], 14.0);
    }

    #[test]
    fn test_chunked_variable_spans_parts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunked.eds");

        let mut schema = small_schema(5);
        schema.vars[1].chunk_rows = 2;
        let mut writer = DatasetWriter::create(&path, schema, 1).unwrap();
        writer.write_values::<i16>("lat", &[0; 15]).unwrap();
        writer.write_values::<u32>("id", &[1, 2, 3, 4, 5]).unwrap();
        writer.finish().unwrap();

        let mut ds = Dataset::open(&path).unwrap();
        assert_eq!(ds.read_values::<u32>("id").unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_writer_rejects_wrong_sizes_and_types() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.eds");

        let mut writer = DatasetWriter::create(&path, small_schema(2), 3).unwrap();
        assert!(writer.write_values::<u32>("id", &[1]).is_err());
        assert!(writer.write_values::<u64>("id", &[1, 2]).is_err());
        assert!(writer.write_raw("nope", &[]).is_err());
        writer.write_values::<u32>("id", &[1, 2]).unwrap();
        assert!(writer.write_values::<u32>("id", &[1, 2]).is_err());
        // lat never written
        assert!(writer.finish().is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_unfinished_writer_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.eds");

        {
            let mut writer = DatasetWriter::create(&path, small_schema(2), 3).unwrap();
            writer.write_values::<u32>("id", &[1, 2]).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
        assert!(Dataset::open(&path).is_err());
    }

    #[test]
    fn test_stored_size_mismatch_names_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grown.eds");

        // Declare more records than the streams hold
        let mut writer = DatasetWriter::create(&path, small_schema(2), 3).unwrap();
        writer.write_values::<i16>("lat", &[0; 6]).unwrap();
        writer.write_values::<u32>("id", &[1, 2]).unwrap();
        writer.finish().unwrap();
        let mut archive = Archive::open_read(&path).unwrap();
        let schema_id = archive.get_stream_id(SCHEMA_STREAM).unwrap();
        let (encoded, _) = archive.get_part_by_id(schema_id, 0).unwrap();
        let mut schema = Schema::decode(&encoded).unwrap();
        let streams: Vec<(String, Vec<(Vec<u8>, u64)>, u64)> = archive
            .get_stream_names()
            .into_iter()
            .filter(|n| n != SCHEMA_STREAM)
            .map(|n| {
                let id = archive.get_stream_id(&n).unwrap();
                let parts = (0..archive.get_num_parts(id))
                    .map(|p| archive.get_part_by_id(id, p).unwrap())
                    .collect();
                (n, parts, archive.get_raw_size(id))
            })
            .collect();
        drop(archive);

        schema.add_dim("obs", 3);
        let mut out = Archive::create(&path).unwrap();
        let encoded = schema.encode().unwrap();
        let schema_id = out.register_stream(SCHEMA_STREAM);
        out.add_part(schema_id, &encoded, 0).unwrap();
        for (name, parts, raw_size) in streams {
            let id = out.register_stream(&name);
            for (data, rows) in parts {
                out.add_part(id, &data, rows).unwrap();
            }
            out.set_raw_size(id, raw_size);
        }
        out.close().unwrap();

        let mut ds = Dataset::open(&path).unwrap();
        assert_eq!(ds.obs_len(), 3);
        let err = ds.read_raw("id").unwrap_err();
        assert!(format!("{err:#}").contains("grown.eds"));
    }

    #[test]
    fn test_empty_dataset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.eds");

        let mut writer = DatasetWriter::create(&path, small_schema(0), 3).unwrap();
        writer.write_raw("lat", &[]).unwrap();
        writer.write_raw("id", &[]).unwrap();
        writer.finish().unwrap();

        let mut ds = Dataset::open(&path).unwrap();
        assert_eq!(ds.obs_len(), 0);
        assert!(ds.read_raw("lat").unwrap().is_empty());
    }

    #[test]
    fn test_digest_tracks_content() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.eds");
        let b = dir.path().join("b.eds");

        for (path, ids) in [(&a, [1u32, 2]), (&b, [2u32, 1])] {
            let mut writer = DatasetWriter::create(path, small_schema(2), 3).unwrap();
            writer.write_values::<i16>("lat", &[0; 6]).unwrap();
            writer.write_values::<u32>("id", &ids).unwrap();
            writer.finish().unwrap();
        }

        let mut da = Dataset::open(&a).unwrap();
        let mut db = Dataset::open(&b).unwrap();
        assert_eq!(da.digest("lat").unwrap(), db.digest("lat").unwrap());
        assert_ne!(da.digest("id").unwrap(), db.digest("id").unwrap());
        assert_eq!(da.digest("id").unwrap().len(), 64);
    }
}
