// Container I/O
// Named streams of parts with a trailing footer; the byte layer under datasets

use crate::varint::{read_cstr, read_fixed_u64, read_varint, write_cstr, write_fixed_u64, write_varint};
use ahash::AHashMap;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A part starts at `offset` with its metadata varint; `size` counts the payload only
#[derive(Debug, Clone, Copy)]
struct Part {
    offset: u64,
    size: u64,
}

#[derive(Debug)]
struct Stream {
    name: String,
    raw_size: u64,
    parts: Vec<Part>,
}

impl Stream {
    fn new(name: &str) -> Self {
        Stream {
            name: name.to_string(),
            raw_size: 0,
            parts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

/// Streams of opaque parts in a single file.
///
/// Layout: `part*` then footer, then the footer length as a fixed u64.
/// Each part is `[metadata varint][payload]`; the footer lists, per stream,
/// its name, part count, raw size and every part's `(offset, size)`.
pub struct Archive {
    mode: Mode,
    reader: Option<BufReader<File>>,
    writer: Option<BufWriter<File>>,
    f_offset: u64,
    streams: Vec<Stream>,
    stream_map: AHashMap<String, usize>,
}

impl Archive {
    fn empty(mode: Mode) -> Self {
        Archive {
            mode,
            reader: None,
            writer: None,
            f_offset: 0,
            streams: Vec::new(),
            stream_map: AHashMap::new(),
        }
    }

    /// Open an existing container and load its footer
    pub fn open_read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open {} for reading", path.display()))?;
        let mut archive = Self::empty(Mode::Read);
        archive.reader = Some(BufReader::new(file));
        archive
            .deserialize()
            .with_context(|| format!("Corrupt container footer in {}", path.display()))?;
        Ok(archive)
    }

    /// Create (truncate) a container for writing
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create {} for writing", path.display()))?;
        let mut archive = Self::empty(Mode::Write);
        archive.writer = Some(BufWriter::new(file));
        Ok(archive)
    }

    /// Write the footer and release the file. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.mode == Mode::Write && self.writer.is_some() {
            self.serialize()?;
        }
        self.reader = None;
        self.writer = None;
        Ok(())
    }

    /// Release the file without writing a footer
    pub fn discard(&mut self) {
        self.reader = None;
        self.writer = None;
    }

    /// Register a stream, returning the existing id if the name is taken
    pub fn register_stream(&mut self, name: &str) -> usize {
        if let Some(&id) = self.stream_map.get(name) {
            return id;
        }
        let id = self.streams.len();
        self.streams.push(Stream::new(name));
        self.stream_map.insert(name.to_string(), id);
        id
    }

    pub fn get_stream_id(&self, name: &str) -> Option<usize> {
        self.stream_map.get(name).copied()
    }

    pub fn get_stream_names(&self) -> Vec<String> {
        self.streams.iter().map(|s| s.name.clone()).collect()
    }

    pub fn get_num_parts(&self, stream_id: usize) -> usize {
        self.streams.get(stream_id).map_or(0, |s| s.parts.len())
    }

    pub fn set_raw_size(&mut self, stream_id: usize, raw_size: u64) {
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.raw_size = raw_size;
        }
    }

    pub fn get_raw_size(&self, stream_id: usize) -> u64 {
        self.streams.get(stream_id).map_or(0, |s| s.raw_size)
    }

    /// Append a part to a stream
    pub fn add_part(&mut self, stream_id: usize, data: &[u8], metadata: u64) -> Result<()> {
        if stream_id >= self.streams.len() {
            anyhow::bail!("Invalid stream ID: {stream_id}");
        }
        let writer = self
            .writer
            .as_mut()
            .context("Container not open for writing")?;

        let part_offset = self.f_offset;
        let header_len = write_varint(writer, metadata)?;
        writer.write_all(data)?;
        self.f_offset += (header_len + data.len()) as u64;

        self.streams[stream_id].parts.push(Part {
            offset: part_offset,
            size: data.len() as u64,
        });
        Ok(())
    }

    /// Random access to one part: `(payload, metadata)`
    pub fn get_part_by_id(&mut self, stream_id: usize, part_id: usize) -> Result<(Vec<u8>, u64)> {
        let stream = self
            .streams
            .get(stream_id)
            .with_context(|| format!("Invalid stream ID: {stream_id}"))?;
        let part = *stream.parts.get(part_id).with_context(|| {
            format!("Invalid part ID {part_id} in stream {}", stream.name)
        })?;
        let reader = self
            .reader
            .as_mut()
            .context("Container not open for reading")?;

        reader.seek(SeekFrom::Start(part.offset))?;
        let (metadata, _) = read_varint(reader)?;
        let mut data = vec![0u8; part.size as usize];
        reader.read_exact(&mut data)?;
        Ok((data, metadata))
    }

    fn serialize(&mut self) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .context("Container not open for writing")?;

        let mut footer = Vec::new();
        write_varint(&mut footer, self.streams.len() as u64)?;
        for stream in &self.streams {
            write_cstr(&mut footer, &stream.name)?;
            write_varint(&mut footer, stream.parts.len() as u64)?;
            write_varint(&mut footer, stream.raw_size)?;
            for part in &stream.parts {
                write_varint(&mut footer, part.offset)?;
                write_varint(&mut footer, part.size)?;
            }
        }

        writer.write_all(&footer)?;
        write_fixed_u64(writer, footer.len() as u64)?;
        writer.flush()?;
        Ok(())
    }

    fn deserialize(&mut self) -> Result<()> {
        let reader = self.reader.as_mut().context("Container not open")?;

        let file_size = reader.seek(SeekFrom::End(0))?;
        if file_size < 8 {
            anyhow::bail!("file too short ({file_size} bytes) to hold a footer");
        }
        reader.seek(SeekFrom::End(-8))?;
        let footer_size = read_fixed_u64(reader)?;
        if footer_size > file_size - 8 {
            anyhow::bail!("footer size {footer_size} exceeds file size {file_size}");
        }

        reader.seek(SeekFrom::Start(file_size - 8 - footer_size))?;
        let mut footer = vec![0u8; footer_size as usize];
        reader.read_exact(&mut footer)?;
        let mut cursor = Cursor::new(&footer);

        // Each stream entry and each part entry spans at least two footer bytes
        let (num_streams, _) = read_varint(&mut cursor)?;
        if num_streams > footer_size / 2 {
            anyhow::bail!("{num_streams} streams cannot fit a {footer_size}-byte footer");
        }
        self.streams.clear();
        self.stream_map.clear();
        for id in 0..num_streams as usize {
            let name = read_cstr(&mut cursor)?;
            let (num_parts, _) = read_varint(&mut cursor)?;
            let (raw_size, _) = read_varint(&mut cursor)?;
            if num_parts > footer_size / 2 {
                anyhow::bail!("stream {name} lists {num_parts} parts in a {footer_size}-byte footer");
            }

            let mut stream = Stream::new(&name);
            stream.raw_size = raw_size;
            for _ in 0..num_parts {
                let (offset, _) = read_varint(&mut cursor)?;
                let (size, _) = read_varint(&mut cursor)?;
                let end = offset
                    .checked_add(size)
                    .with_context(|| format!("part of stream {name} has an overflowing extent"))?;
                if end > file_size {
                    anyhow::bail!("part of stream {name} extends past end of file");
                }
                stream.parts.push(Part { offset, size });
            }
            self.streams.push(stream);
            self.stream_map.insert(name, id);
        }
        Ok(())
    }
}

/// Closing on drop writes the footer; callers abandoning a write use [`Archive::discard`]
impl Drop for Archive {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_archive_write_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parts.bin");

        {
            let mut archive = Archive::create(&path).unwrap();
            let id = archive.register_stream("lon");
            archive.add_part(id, b"Hello", 42).unwrap();
            archive.add_part(id, b"World", 300).unwrap();
            archive.set_raw_size(id, 10);
            archive.close().unwrap();
        }

        let mut archive = Archive::open_read(&path).unwrap();
        let id = archive.get_stream_id("lon").unwrap();
        assert_eq!(archive.get_num_parts(id), 2);
        assert_eq!(archive.get_raw_size(id), 10);
        assert_eq!(archive.get_part_by_id(id, 0).unwrap(), (b"Hello".to_vec(), 42));
        assert_eq!(archive.get_part_by_id(id, 1).unwrap(), (b"World".to_vec(), 300));
        assert!(archive.get_part_by_id(id, 2).is_err());
    }

    #[test]
    fn test_interleaved_streams_and_empty_parts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("multi.bin");

        {
            let mut archive = Archive::create(&path).unwrap();
            let a = archive.register_stream("a");
            let b = archive.register_stream("b");
            assert_eq!(archive.register_stream("a"), a);
            archive.add_part(a, b"A1", 0).unwrap();
            archive.add_part(b, b"", 7).unwrap();
            archive.add_part(a, b"A2", u64::MAX).unwrap();
        }

        let mut archive = Archive::open_read(&path).unwrap();
        assert_eq!(archive.get_stream_names(), vec!["a", "b"]);
        let a = archive.get_stream_id("a").unwrap();
        let b = archive.get_stream_id("b").unwrap();
        assert_eq!(archive.get_part_by_id(a, 1).unwrap(), (b"A2".to_vec(), u64::MAX));
        assert_eq!(archive.get_part_by_id(b, 0).unwrap(), (Vec::new(), 7));
        assert!(archive.get_stream_id("c").is_none());
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(Archive::open_read(&path).is_err());
    }

    fn write_with_footer(path: &Path, footer: &[u8]) {
        let mut bytes = b"payload".to_vec();
        bytes.extend_from_slice(footer);
        write_fixed_u64(&mut bytes, footer.len() as u64).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_corrupt_footer_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.bin");

        // Part whose offset + size wraps around u64
        let mut footer = Vec::new();
        write_varint(&mut footer, 1).unwrap();
        write_cstr(&mut footer, "lon").unwrap();
        write_varint(&mut footer, 1).unwrap();
        write_varint(&mut footer, 0).unwrap();
        write_varint(&mut footer, u64::MAX).unwrap();
        write_varint(&mut footer, 2).unwrap();
        write_with_footer(&path, &footer);
        let err = Archive::open_read(&path).err().unwrap();
        assert!(format!("{err:#}").contains("corrupt.bin"));
        assert!(format!("{err:#}").contains("overflowing"));

        // Stream and part counts far beyond the footer
        let mut footer = Vec::new();
        write_varint(&mut footer, u64::MAX).unwrap();
        write_with_footer(&path, &footer);
        assert!(Archive::open_read(&path).is_err());

        let mut footer = Vec::new();
        write_varint(&mut footer, 1).unwrap();
        write_cstr(&mut footer, "lon").unwrap();
        write_varint(&mut footer, 1 << 50).unwrap();
        write_varint(&mut footer, 0).unwrap();
        write_with_footer(&path, &footer);
        assert!(Archive::open_read(&path).is_err());

        // Footer length larger than the file
        let mut bytes = Vec::new();
        write_fixed_u64(&mut bytes, 1 << 40).unwrap();
        std::fs::write(&path, bytes).unwrap();
        assert!(Archive::open_read(&path).is_err());
    }
}
