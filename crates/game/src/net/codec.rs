use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("truncated packet: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
}

/// Appends fields to an outgoing buffer in network byte order.
#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(tag: u8) -> Self {
        let mut writer = Self::new();
        writer.write_u8(tag);
        writer
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(value as u8)
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        // Writing into a Vec cannot fail.
        let _ = self.buffer.write_u16::<BigEndian>(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        let _ = self.buffer.write_u32::<BigEndian>(value);
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        let _ = self.buffer.write_i32::<BigEndian>(value);
        self
    }

    pub fn write_string(&mut self, value: &str) -> &mut Self {
        self.write_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
        self
    }

    /// Writes `value` into exactly `width` bytes, NUL padded and cut on a
    /// character boundary when too long.
    pub fn write_fixed_string(&mut self, value: &str, width: usize) -> &mut Self {
        let truncated = truncate_to_boundary(value, width);
        self.buffer.extend_from_slice(truncated.as_bytes());
        self.buffer
            .resize(self.buffer.len() + width - truncated.len(), 0);
        self
    }

    pub fn write<T: WireFormat>(&mut self, value: &T) -> &mut Self {
        value.encode(self);
        self
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Consumes fields written by [`PacketWriter`].
#[derive(Debug)]
pub struct PacketReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len();
        len.saturating_sub(self.cursor.position() as usize)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(CodecError::Truncated { needed, remaining });
        }
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<(), CodecError> {
        self.ensure(count)?;
        self.cursor.set_position(self.cursor.position() + count as u64);
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        self.cursor.read_u8().map_err(|_| truncated(1))
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.ensure(2)?;
        self.cursor.read_u16::<BigEndian>().map_err(|_| truncated(2))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.ensure(4)?;
        self.cursor.read_u32::<BigEndian>().map_err(|_| truncated(4))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        self.cursor.read_i32::<BigEndian>().map_err(|_| truncated(4))
    }

    fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(count)?;
        let start = self.cursor.position() as usize;
        let data: &'a [u8] = *self.cursor.get_ref();
        self.cursor.set_position((start + count) as u64);
        Ok(&data[start..start + count])
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Fixed-width fields are C strings of unknown encoding; bytes that are
    /// not UTF-8 become replacement characters.
    pub fn read_fixed_string(&mut self, width: usize) -> Result<String, CodecError> {
        let bytes = self.read_bytes(width)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(width);
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    pub fn read<T: WireFormat>(&mut self) -> Result<T, CodecError> {
        T::decode(self)
    }
}

fn truncated(needed: usize) -> CodecError {
    CodecError::Truncated {
        needed,
        remaining: 0,
    }
}

fn truncate_to_boundary(value: &str, width: usize) -> &str {
    if value.len() <= width {
        return value;
    }
    let mut end = width;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Types with a canonical wire form, so that vectors of them can be written
/// generically as a count followed by the elements.
pub trait WireFormat: Sized {
    fn encode(&self, writer: &mut PacketWriter);
    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, CodecError>;
}

impl WireFormat for u8 {
    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_u8(*self);
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_u8()
    }
}

impl WireFormat for bool {
    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_bool(*self);
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_bool()
    }
}

impl WireFormat for u32 {
    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_u32(*self);
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_u32()
    }
}

impl WireFormat for i32 {
    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_i32(*self);
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_i32()
    }
}

impl WireFormat for String {
    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_string(self);
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        reader.read_string()
    }
}

impl<T: WireFormat> WireFormat for Vec<T> {
    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.len() as u32);
        for item in self {
            item.encode(writer);
        }
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        let count = reader.read_u32()? as usize;
        // Every element takes at least one byte, so a larger count is a lie.
        if count > reader.remaining() {
            return Err(CodecError::Truncated {
                needed: count,
                remaining: reader.remaining(),
            });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode(reader)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_are_big_endian() {
        let mut writer = PacketWriter::new();
        writer.write_u16(0x0102).write_u32(0x03040506).write_i32(-1);
        assert_eq!(
            writer.as_bytes(),
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0xFF, 0xFF, 0xFF, 0xFF]
        );

        let mut reader = PacketReader::new(writer.as_bytes());
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        assert_eq!(reader.read_u32().unwrap(), 0x03040506);
        assert_eq!(reader.read_i32().unwrap(), -1);
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_truncated_read_fails() {
        let mut reader = PacketReader::new(&[0x00, 0x01]);
        assert_eq!(
            reader.read_u32(),
            Err(CodecError::Truncated {
                needed: 4,
                remaining: 2
            })
        );
    }

    #[test]
    fn test_string_keeps_embedded_nul() {
        let mut writer = PacketWriter::new();
        writer.write_string("a\0b");
        let mut reader = PacketReader::new(writer.as_bytes());
        assert_eq!(reader.read_string().unwrap(), "a\0b");
    }

    #[test]
    fn test_fixed_string_pads_and_truncates() {
        let mut writer = PacketWriter::new();
        writer.write_fixed_string("abc", 5);
        writer.write_fixed_string("äöü", 5);
        assert_eq!(writer.len(), 10);

        let mut reader = PacketReader::new(writer.as_bytes());
        assert_eq!(reader.read_fixed_string(5).unwrap(), "abc");
        // Each umlaut is two bytes; the third does not fit.
        assert_eq!(reader.read_fixed_string(5).unwrap(), "äö");
    }

    #[test]
    fn test_fixed_string_tolerates_latin1() {
        let data = [b'c', b'a', b'f', 0xE9, 0];
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_fixed_string(5).unwrap(), "caf\u{FFFD}");
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_vector_with_bogus_count_is_rejected() {
        let mut writer = PacketWriter::new();
        writer.write_u32(1_000_000).write_u8(1);
        let mut reader = PacketReader::new(writer.as_bytes());
        assert!(matches!(
            reader.read::<Vec<u8>>(),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_nested_vectors() {
        let names = vec!["left".to_string(), "right".to_string()];
        let mut writer = PacketWriter::new();
        writer.write(&names).write(&vec![true, false, true]);

        let mut reader = PacketReader::new(writer.as_bytes());
        assert_eq!(reader.read::<Vec<String>>().unwrap(), names);
        assert_eq!(reader.read::<Vec<bool>>().unwrap(), vec![true, false, true]);
    }
}
