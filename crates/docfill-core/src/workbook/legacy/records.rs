//! BIFF8 record framing.
//!
//! A workbook stream is a flat sequence of records: a 2-byte id, a 2-byte
//! payload length, then the payload. Payloads longer than
//! [`MAX_RECORD_DATA`] spill into `CONTINUE` records.

use crate::error::ReadError;

pub const MAX_RECORD_DATA: usize = 8224;

pub const BOF: u16 = 0x0809;
pub const EOF: u16 = 0x000A;
pub const CONTINUE: u16 = 0x003C;
pub const CODEPAGE: u16 = 0x0042;
pub const WINDOW1: u16 = 0x003D;
pub const FONT: u16 = 0x0031;
pub const XF: u16 = 0x00E0;
pub const STYLE: u16 = 0x0293;
pub const BOUNDSHEET: u16 = 0x0085;
pub const SST: u16 = 0x00FC;
pub const EXTSST: u16 = 0x00FF;

pub const INDEX: u16 = 0x020B;
pub const DIMENSIONS: u16 = 0x0200;
pub const ROW: u16 = 0x0208;
pub const DBCELL: u16 = 0x00D7;
pub const WINDOW2: u16 = 0x023E;
pub const PANE: u16 = 0x0041;
pub const SELECTION: u16 = 0x001D;
pub const SCL: u16 = 0x00A0;
pub const MERGEDCELLS: u16 = 0x00E5;

pub const LABELSST: u16 = 0x00FD;
pub const LABEL: u16 = 0x0204;
pub const RSTRING: u16 = 0x00D6;
pub const NUMBER: u16 = 0x0203;
pub const RK: u16 = 0x027E;
pub const MULRK: u16 = 0x00BD;
pub const BLANK: u16 = 0x0201;
pub const MULBLANK: u16 = 0x00BE;
pub const BOOLERR: u16 = 0x0205;
pub const FORMULA: u16 = 0x0006;
pub const STRING: u16 = 0x0207;
pub const SHRFMLA: u16 = 0x04BC;
pub const ARRAY: u16 = 0x0221;
pub const TABLE: u16 = 0x0236;

/// BOF substream types.
pub const BOF_GLOBALS: u16 = 0x0005;
pub const BOF_WORKSHEET: u16 = 0x0010;

/// One record with its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: u16,
    pub data: Vec<u8>,
}

impl Record {
    pub fn new(id: u16, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    /// Bytes this record occupies in the stream.
    pub fn stream_len(&self) -> usize {
        4 + self.data.len()
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.data);
    }
}

/// Read one record at `pos`. Returns it with the position of the next one.
pub fn read_record(stream: &[u8], pos: usize) -> Result<(Record, usize), ReadError> {
    let id = u16_at(stream, pos)?;
    let len = u16_at(stream, pos + 2)? as usize;
    let start = pos + 4;
    let end = start + len;
    if end > stream.len() {
        return Err(ReadError::Biff(format!(
            "record 0x{:04X} at {} runs past the end of the stream",
            id, pos
        )));
    }
    Ok((Record::new(id, stream[start..end].to_vec()), end))
}

/// Records of the substream whose `BOF` sits at `offset`, through its
/// matching `EOF`. Nested substreams (embedded charts) are included.
pub fn read_substream(stream: &[u8], offset: usize) -> Result<Vec<Record>, ReadError> {
    let mut records = Vec::new();
    let mut pos = offset;
    let mut depth = 0usize;

    loop {
        let (record, next) = read_record(stream, pos)?;
        if records.is_empty() && record.id != BOF {
            return Err(ReadError::Biff(format!("no BOF record at offset {}", offset)));
        }
        match record.id {
            BOF => depth += 1,
            EOF => depth = depth.saturating_sub(1),
            _ => {}
        }
        records.push(record);
        pos = next;
        if depth == 0 {
            return Ok(records);
        }
    }
}

pub fn u16_at(data: &[u8], pos: usize) -> Result<u16, ReadError> {
    data.get(pos..pos + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| truncated(pos))
}

pub fn u32_at(data: &[u8], pos: usize) -> Result<u32, ReadError> {
    data.get(pos..pos + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| truncated(pos))
}

pub fn f64_at(data: &[u8], pos: usize) -> Result<f64, ReadError> {
    let bytes = data.get(pos..pos + 8).ok_or_else(|| truncated(pos))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(f64::from_le_bytes(buf))
}

fn truncated(pos: usize) -> ReadError {
    ReadError::Biff(format!("record payload truncated at byte {}", pos))
}

/// Decode an RK number.
pub fn decode_rk(rk: u32) -> f64 {
    let value = if rk & 0x02 != 0 {
        ((rk as i32) >> 2) as f64
    } else {
        f64::from_bits(((rk & 0xFFFF_FFFC) as u64) << 32)
    };
    if rk & 0x01 != 0 { value / 100.0 } else { value }
}

/// Decode characters of an `XLUnicodeString` body: `high_byte` selects
/// UTF-16LE, otherwise each byte is one Latin-1 character.
pub fn decode_chars(bytes: &[u8], high_byte: bool) -> String {
    if high_byte {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// Read an `XLUnicodeString` (16-bit length) at `pos`. Returns the text and
/// the position after its characters. Rich-text runs and phonetic data are
/// skipped.
pub fn read_unicode_string(data: &[u8], pos: usize) -> Result<(String, usize), ReadError> {
    let cch = u16_at(data, pos)? as usize;
    read_string_body(data, pos + 2, cch)
}

/// Read a `ShortXLUnicodeString` (8-bit length) at `pos`.
pub fn read_short_string(data: &[u8], pos: usize) -> Result<(String, usize), ReadError> {
    let cch = *data.get(pos).ok_or_else(|| truncated(pos))? as usize;
    read_string_body(data, pos + 1, cch)
}

fn read_string_body(data: &[u8], pos: usize, cch: usize) -> Result<(String, usize), ReadError> {
    let flags = *data.get(pos).ok_or_else(|| truncated(pos))?;
    let high_byte = flags & 0x01 != 0;
    let mut pos = pos + 1;

    let mut runs = 0usize;
    let mut ext = 0usize;
    if flags & 0x08 != 0 {
        runs = u16_at(data, pos)? as usize;
        pos += 2;
    }
    if flags & 0x04 != 0 {
        ext = u32_at(data, pos)? as usize;
        pos += 4;
    }

    let len = if high_byte { cch * 2 } else { cch };
    let bytes = data.get(pos..pos + len).ok_or_else(|| truncated(pos))?;
    let text = decode_chars(bytes, high_byte);
    Ok((text, pos + len + runs * 4 + ext))
}

/// Encode text as UTF-16 string characters with the high-byte flag.
pub fn encode_utf16(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// `XLUnicodeString`: 16-bit length, flags, UTF-16 characters.
pub fn unicode_string(text: &str) -> Result<Vec<u8>, ReadError> {
    let units = text.encode_utf16().count();
    let count = u16::try_from(units)
        .map_err(|_| ReadError::Biff(format!("string of {} characters is too long", units)))?;
    let mut out = Vec::with_capacity(3 + units * 2);
    out.extend_from_slice(&count.to_le_bytes());
    out.push(0x01);
    out.extend(encode_utf16(text));
    Ok(out)
}

/// `ShortXLUnicodeString`: 8-bit length, flags, UTF-16 characters.
pub fn short_string(text: &str) -> Vec<u8> {
    let units: Vec<u16> = text.encode_utf16().take(255).collect();
    let mut out = Vec::with_capacity(2 + units.len() * 2);
    out.push(units.len() as u8);
    out.push(0x01);
    out.extend(units.iter().flat_map(|u| u.to_le_bytes()));
    out
}

/// Payload builder for little-endian fields.
#[derive(Debug, Default)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.0.push(v);
        self
    }

    pub fn u16(mut self, v: u16) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f64(mut self, v: f64) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn bytes(mut self, v: &[u8]) -> Self {
        self.0.extend_from_slice(v);
        self
    }

    pub fn record(self, id: u16) -> Record {
        Record::new(id, self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rk_forms() {
        // Integer 5
        assert_eq!(decode_rk((5 << 2) | 0x02), 5.0);
        // Integer 1234 / 100
        assert_eq!(decode_rk((1234 << 2) | 0x03), 12.34);
        // IEEE 1.0: upper 30 bits of the double
        let bits = (1.0f64.to_bits() >> 32) as u32;
        assert_eq!(decode_rk(bits), 1.0);
        // Negative integer
        assert_eq!(decode_rk(((-7i32 << 2) as u32) | 0x02), -7.0);
    }

    #[test]
    fn test_strings() {
        let encoded = unicode_string("Цена").unwrap();
        let (text, end) = read_unicode_string(&encoded, 0).unwrap();
        assert_eq!(text, "Цена");
        assert_eq!(end, encoded.len());
        assert!(unicode_string(&"a".repeat(70_000)).is_err());

        // Compressed (Latin-1) form
        let compressed = [3u8, 0, 0, b'a', b'b', b'c'];
        assert_eq!(read_unicode_string(&compressed, 0).unwrap().0, "abc");

        let short = short_string("Лист1");
        assert_eq!(read_short_string(&short, 0).unwrap().0, "Лист1");
    }

    #[test]
    fn test_read_substream_skips_nested() {
        let mut stream = Vec::new();
        let bof = |dt: u16| Payload::new().u16(0x0600).u16(dt).u32(0).u32(0).u32(0).record(BOF);
        bof(BOF_WORKSHEET).write_to(&mut stream);
        bof(0x0020).write_to(&mut stream);
        Record::new(EOF, Vec::new()).write_to(&mut stream);
        Payload::new().u16(1).record(CODEPAGE).write_to(&mut stream);
        Record::new(EOF, Vec::new()).write_to(&mut stream);
        Payload::new().u16(2).record(CODEPAGE).write_to(&mut stream);

        let records = read_substream(&stream, 0).unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[4].id, EOF);

        assert!(read_substream(&stream, stream.len() - 6).is_err());
        let broken = [0x09, 0x08, 0x05, 0x00, 0x01];
        assert!(read_substream(&broken, 0).is_err());
    }
}
