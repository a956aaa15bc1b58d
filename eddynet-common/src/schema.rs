// Dataset schema
// Dimensions, attributes and typed variables, plus their binary encoding

use crate::types::{
    CHUNK_ROWS_1D, CHUNK_ROWS_SAMPLED, OBS_DIM, SCHEMA_FORMAT_VERSION, STALE_ATTRIBUTES,
};
use crate::varint::{
    read_bytes, read_cstr, read_f64, read_signed, read_varint, write_bytes, write_cstr, write_f64,
    write_signed, write_varint,
};
use anyhow::{bail, Context, Result};
use std::fmt;
use std::io::Cursor;

/// Element type of a variable. Values are stored little endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl DType {
    pub fn size(self) -> usize {
        match self {
            DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }

    fn tag(self) -> u8 {
        match self {
            DType::I8 => 0,
            DType::U8 => 1,
            DType::I16 => 2,
            DType::U16 => 3,
            DType::I32 => 4,
            DType::U32 => 5,
            DType::I64 => 6,
            DType::U64 => 7,
            DType::F32 => 8,
            DType::F64 => 9,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => DType::I8,
            1 => DType::U8,
            2 => DType::I16,
            3 => DType::U16,
            4 => DType::I32,
            5 => DType::U32,
            6 => DType::I64,
            7 => DType::U64,
            8 => DType::F32,
            9 => DType::F64,
            other => bail!("unknown dtype tag {other}"),
        })
    }

    /// Decode one little-endian element as f64
    pub fn decode_f64(self, bytes: &[u8]) -> f64 {
        macro_rules! le {
            ($t:ty) => {{
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(buf) as f64
            }};
        }
        match self {
            DType::I8 => le!(i8),
            DType::U8 => le!(u8),
            DType::I16 => le!(i16),
            DType::U16 => le!(u16),
            DType::I32 => le!(i32),
            DType::U32 => le!(u32),
            DType::I64 => le!(i64),
            DType::U64 => le!(u64),
            DType::F32 => le!(f32),
            DType::F64 => le!(f64),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::I8 => "i8",
            DType::U8 => "u8",
            DType::I16 => "i16",
            DType::U16 => "u16",
            DType::I32 => "i32",
            DType::U32 => "u32",
            DType::I64 => "i64",
            DType::U64 => "u64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Attribute value attached to the dataset or to a variable
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Float(v) => Some(*v),
            AttrValue::Text(_) => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(s) => write!(f, "{s:?}"),
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Insertion-ordered attribute list; setting an existing name replaces it in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    entries: Vec<(String, AttrValue)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: AttrValue) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of these attributes without precomputed extrema, which go stale when
    /// records are rearranged or concatenated.
    pub fn without_stale(&self) -> Attributes {
        Attributes {
            entries: self
                .entries
                .iter()
                .filter(|(n, _)| !STALE_ATTRIBUTES.contains(&n.as_str()))
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub dtype: DType,
    /// The first dimension is always the record dimension
    pub dims: Vec<String>,
    pub attrs: Attributes,
    pub chunk_rows: usize,
}

impl Variable {
    /// Variables with more than one dimension carry per-record sample arrays
    pub fn is_sampled(&self) -> bool {
        self.dims.len() > 1
    }
}

/// Chunk length, in records, for a variable of the given shape in a dataset of `nb_obs` records
pub fn chunk_rows_for(sampled: bool, nb_obs: usize) -> usize {
    let cap = if sampled {
        CHUNK_ROWS_SAMPLED
    } else {
        CHUNK_ROWS_1D
    };
    cap.min(nb_obs).max(1)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub dims: Vec<Dimension>,
    pub attrs: Attributes,
    pub vars: Vec<Variable>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dim(&mut self, name: &str, len: usize) -> &mut Self {
        match self.dims.iter_mut().find(|d| d.name == name) {
            Some(dim) => dim.len = len,
            None => self.dims.push(Dimension {
                name: name.to_string(),
                len,
            }),
        }
        self
    }

    /// Add a variable with the default chunking for its shape
    pub fn add_var(&mut self, name: &str, dtype: DType, dims: &[&str], attrs: Attributes) -> &mut Self {
        let sampled = dims.len() > 1;
        let chunk_rows = chunk_rows_for(sampled, self.dim_len(OBS_DIM).unwrap_or(0));
        self.vars.push(Variable {
            name: name.to_string(),
            dtype,
            dims: dims.iter().map(|d| d.to_string()).collect(),
            attrs,
            chunk_rows,
        });
        self
    }

    pub fn dim_len(&self, name: &str) -> Option<usize> {
        self.dims.iter().find(|d| d.name == name).map(|d| d.len)
    }

    pub fn var(&self, name: &str) -> Option<&Variable> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn obs_len(&self) -> usize {
        self.dim_len(OBS_DIM).unwrap_or(0)
    }

    /// Bytes occupied by one record of `var`
    pub fn record_size(&self, var: &Variable) -> Result<usize> {
        let mut elements = 1usize;
        for dim in var.dims.iter().skip(1) {
            let len = self
                .dim_len(dim)
                .with_context(|| format!("variable {} uses undeclared dimension {dim}", var.name))?;
            elements = elements
                .checked_mul(len)
                .with_context(|| format!("record of variable {} overflows", var.name))?;
        }
        elements
            .checked_mul(var.dtype.size())
            .with_context(|| format!("record of variable {} overflows", var.name))
    }

    /// Structural checks: unique names, record dimension first, declared dimensions
    pub fn validate(&self) -> Result<()> {
        if self.dim_len(OBS_DIM).is_none() {
            bail!("schema has no {OBS_DIM:?} dimension");
        }
        for (i, var) in self.vars.iter().enumerate() {
            if self.vars[..i].iter().any(|v| v.name == var.name) {
                bail!("duplicate variable {}", var.name);
            }
            if var.dims.first().map(String::as_str) != Some(OBS_DIM) {
                bail!("variable {} must have {OBS_DIM:?} as first dimension", var.name);
            }
            if var.chunk_rows == 0 {
                bail!("variable {} has a zero chunk length", var.name);
            }
            self.record_size(var)?;
        }
        Ok(())
    }

    /// Check that `other` stores the same variables with the same record layout.
    /// The record dimension length and attribute values may differ.
    pub fn check_compatible(&self, other: &Schema) -> Result<()> {
        for dim in self.dims.iter().filter(|d| d.name != OBS_DIM) {
            match other.dim_len(&dim.name) {
                Some(len) if len == dim.len => {}
                Some(len) => bail!(
                    "dimension {} has length {len}, expected {}",
                    dim.name,
                    dim.len
                ),
                None => bail!("dimension {} is missing", dim.name),
            }
        }
        for var in &self.vars {
            let theirs = other
                .var(&var.name)
                .with_context(|| format!("variable {} is missing", var.name))?;
            if theirs.dtype != var.dtype {
                bail!(
                    "variable {} has dtype {}, expected {}",
                    var.name,
                    theirs.dtype,
                    var.dtype
                );
            }
            if theirs.dims != var.dims {
                bail!(
                    "variable {} has dimensions {:?}, expected {:?}",
                    var.name,
                    theirs.dims,
                    var.dims
                );
            }
        }
        if let Some(extra) = other.vars.iter().find(|v| self.var(&v.name).is_none()) {
            bail!("unexpected variable {}", extra.name);
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        write_varint(&mut buf, SCHEMA_FORMAT_VERSION)?;

        write_varint(&mut buf, self.dims.len() as u64)?;
        for dim in &self.dims {
            write_cstr(&mut buf, &dim.name)?;
            write_varint(&mut buf, dim.len as u64)?;
        }

        encode_attrs(&mut buf, &self.attrs)?;

        write_varint(&mut buf, self.vars.len() as u64)?;
        for var in &self.vars {
            write_cstr(&mut buf, &var.name)?;
            buf.push(var.dtype.tag());
            write_varint(&mut buf, var.dims.len() as u64)?;
            for dim in &var.dims {
                write_cstr(&mut buf, dim)?;
            }
            encode_attrs(&mut buf, &var.attrs)?;
            write_varint(&mut buf, var.chunk_rows as u64)?;
        }
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Schema> {
        let mut cur = Cursor::new(data);
        let (version, _) = read_varint(&mut cur)?;
        if version != SCHEMA_FORMAT_VERSION {
            bail!("unsupported schema version {version} (expected {SCHEMA_FORMAT_VERSION})");
        }

        let mut schema = Schema::new();
        let num_dims = read_count(&mut cur, "dimensions")?;
        for _ in 0..num_dims {
            let name = read_cstr(&mut cur)?;
            let (len, _) = read_varint(&mut cur)?;
            let len = usize::try_from(len).with_context(|| format!("dimension {name} is too long"))?;
            schema.dims.push(Dimension { name, len });
        }

        schema.attrs = decode_attrs(&mut cur)?;

        let num_vars = read_count(&mut cur, "variables")?;
        for _ in 0..num_vars {
            let name = read_cstr(&mut cur)?;
            let mut tag = [0u8; 1];
            std::io::Read::read_exact(&mut cur, &mut tag)?;
            let dtype = DType::from_tag(tag[0])?;
            let ndims = read_count(&mut cur, "dimension names")?;
            let mut dims = Vec::new();
            for _ in 0..ndims {
                dims.push(read_cstr(&mut cur)?);
            }
            let attrs = decode_attrs(&mut cur)?;
            let (chunk_rows, _) = read_varint(&mut cur)?;
            schema.vars.push(Variable {
                name,
                dtype,
                dims,
                attrs,
                chunk_rows: usize::try_from(chunk_rows).unwrap_or(usize::MAX),
            });
        }

        schema.validate()?;
        Ok(schema)
    }
}

const ATTR_TEXT: u8 = 0;
const ATTR_INT: u8 = 1;
const ATTR_FLOAT: u8 = 2;

fn encode_attrs(buf: &mut Vec<u8>, attrs: &Attributes) -> Result<()> {
    write_varint(buf, attrs.len() as u64)?;
    for (name, value) in attrs.iter() {
        write_cstr(buf, name)?;
        match value {
            AttrValue::Text(s) => {
                buf.push(ATTR_TEXT);
                write_bytes(buf, s.as_bytes())?;
            }
            AttrValue::Int(v) => {
                buf.push(ATTR_INT);
                write_signed(buf, *v)?;
            }
            AttrValue::Float(v) => {
                buf.push(ATTR_FLOAT);
                write_f64(buf, *v)?;
            }
        }
    }
    Ok(())
}

/// An entry count; every entry takes at least one byte, so a count beyond the
/// remaining input is corrupt
fn read_count(cur: &mut Cursor<&[u8]>, what: &str) -> Result<u64> {
    let (count, _) = read_varint(cur)?;
    let remaining = (cur.get_ref().len() as u64).saturating_sub(cur.position());
    if count > remaining {
        bail!("{count} {what} declared but only {remaining} bytes remain");
    }
    Ok(count)
}

fn decode_attrs(cur: &mut Cursor<&[u8]>) -> Result<Attributes> {
    let mut attrs = Attributes::new();
    let count = read_count(cur, "attributes")?;
    for _ in 0..count {
        let name = read_cstr(cur)?;
        let mut tag = [0u8; 1];
        std::io::Read::read_exact(cur, &mut tag)?;
        let value = match tag[0] {
            ATTR_TEXT => AttrValue::Text(
                String::from_utf8(read_bytes(cur)?).context("attribute text is not UTF-8")?,
            ),
            ATTR_INT => AttrValue::Int(read_signed(cur)?),
            ATTR_FLOAT => AttrValue::Float(read_f64(cur)?),
            other => bail!("unknown attribute tag {other} for {name}"),
        };
        attrs.set(&name, value);
    }
    Ok(attrs)
}
