//! Shared string table (`SST`) with `CONTINUE`-aware reading and writing.

use std::collections::HashMap;

use crate::error::ReadError;

use super::records::{Payload, Record, CONTINUE, EXTSST, MAX_RECORD_DATA, SST};

/// One shared string. Formatting runs of rich text are kept as raw 4-byte
/// entries so they are written back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedString {
    pub text: String,
    pub runs: Vec<u8>,
}

/// The workbook's shared string table.
#[derive(Debug, Clone, Default)]
pub struct SharedStrings {
    strings: Vec<SharedString>,
    plain: HashMap<String, u32>,
}

impl SharedStrings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `SST` payload and the payloads of the `CONTINUE` records
    /// that follow it.
    pub fn parse(segments: Vec<&[u8]>) -> Result<Self, ReadError> {
        let mut reader = SegmentReader::new(segments);
        let _total = reader.u32()?;
        let unique = reader.u32()?;

        let mut table = Self::new();
        for _ in 0..unique {
            if reader.at_end() {
                break;
            }
            let cch = reader.u16()? as usize;
            let flags = reader.u8()?;
            let runs = if flags & 0x08 != 0 { reader.u16()? as usize } else { 0 };
            let ext = if flags & 0x04 != 0 { reader.u32()? as usize } else { 0 };

            let text = reader.chars(cch, flags & 0x01 != 0)?;
            let runs = reader.bytes(runs * 4)?;
            reader.bytes(ext)?;

            table.push(SharedString { text, runs });
        }

        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| s.text.as_str())
    }

    /// Index of `text`, adding it as a plain string if needed.
    pub fn intern(&mut self, text: &str) -> u32 {
        if let Some(&index) = self.plain.get(text) {
            return index;
        }
        self.push(SharedString {
            text: text.to_string(),
            runs: Vec::new(),
        })
    }

    fn push(&mut self, string: SharedString) -> u32 {
        let index = self.strings.len() as u32;
        if string.runs.is_empty() {
            self.plain.entry(string.text.clone()).or_insert(index);
        }
        self.strings.push(string);
        index
    }

    /// Lay the table out as `SST` + `CONTINUE` records. `references` is the
    /// number of `LABELSST` cells in the workbook.
    pub fn layout(&self, references: u32) -> Result<SstLayout, ReadError> {
        let bucket_size = (self.strings.len().div_ceil(128)).max(8);
        let mut writer = SplitWriter::new();
        writer.put(&references.to_le_bytes());
        writer.put(&(self.strings.len() as u32).to_le_bytes());

        let mut buckets = Vec::new();
        for (i, string) in self.strings.iter().enumerate() {
            let units: Vec<u16> = string.text.encode_utf16().collect();
            let rich = !string.runs.is_empty();
            let header = if rich { 5 } else { 3 };

            // Header and the first character stay in one record
            writer.reserve(header + 2);
            if i % bucket_size == 0 {
                buckets.push(writer.position());
            }

            let count = u16::try_from(units.len()).map_err(|_| {
                ReadError::Biff(format!("string of {} characters is too long", units.len()))
            })?;
            writer.put(&count.to_le_bytes());
            writer.put(&[if rich { 0x09 } else { 0x01 }]);
            if rich {
                writer.put(&((string.runs.len() / 4) as u16).to_le_bytes());
            }

            let mut rest = units.as_slice();
            loop {
                let take = (writer.space() / 2).min(rest.len());
                for unit in &rest[..take] {
                    writer.put(&unit.to_le_bytes());
                }
                rest = &rest[take..];
                if rest.is_empty() {
                    break;
                }
                writer.flush();
                // Continued characters repeat the high-byte flag
                writer.put(&[0x01]);
            }

            for run in string.runs.chunks(4) {
                writer.reserve(run.len());
                writer.put(run);
            }
        }

        Ok(SstLayout {
            records: writer.finish(),
            buckets,
            bucket_size: u16::try_from(bucket_size)
                .map_err(|_| ReadError::Biff("too many shared strings".to_string()))?,
        })
    }
}

/// `SST` records ready to be placed in the stream.
#[derive(Debug)]
pub struct SstLayout {
    pub records: Vec<Record>,
    /// (record index, payload offset) of the first string of each bucket.
    buckets: Vec<(usize, usize)>,
    bucket_size: u16,
}

impl SstLayout {
    pub fn stream_len(&self) -> usize {
        self.records.iter().map(Record::stream_len).sum()
    }

    /// `EXTSST` index for the table placed at stream offset `sst_offset`.
    pub fn extsst(&self, sst_offset: usize) -> Record {
        let mut starts = Vec::with_capacity(self.records.len());
        let mut pos = sst_offset;
        for record in &self.records {
            starts.push(pos);
            pos += record.stream_len();
        }

        let mut payload = Payload::new().u16(self.bucket_size);
        for &(record, offset) in &self.buckets {
            payload = payload
                .u32((starts[record] + 4 + offset) as u32)
                .u16((4 + offset) as u16)
                .u16(0);
        }
        payload.record(EXTSST)
    }
}

/// Fills `SST` then `CONTINUE` payloads up to the record size limit.
struct SplitWriter {
    done: Vec<Record>,
    current: Vec<u8>,
}

impl SplitWriter {
    fn new() -> Self {
        Self {
            done: Vec::new(),
            current: Vec::new(),
        }
    }

    fn space(&self) -> usize {
        MAX_RECORD_DATA - self.current.len()
    }

    fn reserve(&mut self, len: usize) {
        if self.space() < len {
            self.flush();
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.current.extend_from_slice(bytes);
    }

    fn position(&self) -> (usize, usize) {
        (self.done.len(), self.current.len())
    }

    fn flush(&mut self) {
        let id = if self.done.is_empty() { SST } else { CONTINUE };
        let data = std::mem::take(&mut self.current);
        self.done.push(Record::new(id, data));
    }

    fn finish(mut self) -> Vec<Record> {
        self.flush();
        self.done
    }
}

/// Reads across record boundaries. Only character data restarts with a
/// flags byte after a boundary.
struct SegmentReader<'a> {
    segments: Vec<&'a [u8]>,
    index: usize,
    pos: usize,
}

impl<'a> SegmentReader<'a> {
    fn new(segments: Vec<&'a [u8]>) -> Self {
        Self {
            segments,
            index: 0,
            pos: 0,
        }
    }

    fn current(&self) -> &'a [u8] {
        self.segments.get(self.index).copied().unwrap_or_default()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.current().len() && self.index + 1 >= self.segments.len()
    }

    fn next_segment(&mut self) -> Result<(), ReadError> {
        self.index += 1;
        self.pos = 0;
        if self.index >= self.segments.len() {
            return Err(ReadError::Biff("shared string table truncated".to_string()));
        }
        Ok(())
    }

    fn bytes(&mut self, mut len: usize) -> Result<Vec<u8>, ReadError> {
        let mut out = Vec::with_capacity(len);
        while len > 0 {
            if self.pos >= self.current().len() {
                self.next_segment()?;
            }
            let segment = self.current();
            let take = len.min(segment.len() - self.pos);
            out.extend_from_slice(&segment[self.pos..self.pos + take]);
            self.pos += take;
            len -= take;
        }
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ReadError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ReadError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn chars(&mut self, count: usize, mut high_byte: bool) -> Result<String, ReadError> {
        let mut units: Vec<u16> = Vec::with_capacity(count);
        let mut remaining = count;

        while remaining > 0 {
            if self.pos >= self.current().len() {
                self.next_segment()?;
                high_byte = self.u8()? & 0x01 != 0;
            }
            let segment = self.current();
            let size = if high_byte { 2 } else { 1 };
            let available = (segment.len() - self.pos) / size;
            if available == 0 {
                return Err(ReadError::Biff("split character in shared string".to_string()));
            }
            let take = remaining.min(available);
            let bytes = &segment[self.pos..self.pos + take * size];
            if high_byte {
                units.extend(bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])));
            } else {
                units.extend(bytes.iter().map(|&b| b as u16));
            }
            self.pos += take * size;
            remaining -= take;
        }

        Ok(String::from_utf16_lossy(&units))
    }
}
