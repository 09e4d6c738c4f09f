//! Little-endian cursor over a byte slice.

use super::LoadError;

pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn seek(&mut self, pos: usize) -> Result<(), LoadError> {
        if pos > self.data.len() {
            return Err(LoadError::UnexpectedEof { offset: pos });
        }
        self.pos = pos;
        Ok(())
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<(), LoadError> {
        self.read_slice(len).map(|_| ())
    }

    pub(crate) fn read_slice(&mut self, len: usize) -> Result<&'a [u8], LoadError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(LoadError::UnexpectedEof { offset: self.pos })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, LoadError> {
        Ok(self.read_slice(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, LoadError> {
        let b = self.read_slice(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, LoadError> {
        let b = self.read_slice(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, LoadError> {
        let lo = self.read_u32()? as u64;
        let hi = self.read_u32()? as u64;
        Ok(lo | (hi << 32))
    }

    /// Read a 2- or 4-byte index column.
    pub(crate) fn read_index(&mut self, width: usize) -> Result<u32, LoadError> {
        match width {
            2 => self.read_u16().map(u32::from),
            _ => self.read_u32(),
        }
    }

    /// Read a NUL-terminated ASCII name, then realign to a 4-byte boundary.
    pub(crate) fn read_padded_name(&mut self) -> Result<&'a str, LoadError> {
        let start = self.pos;
        let len = self.data[start..]
            .iter()
            .position(|b| *b == 0)
            .ok_or(LoadError::UnexpectedEof { offset: start })?;
        let name = std::str::from_utf8(&self.data[start..start + len])?;
        let consumed = len + 1;
        let padded = (consumed + 3) & !3;
        self.seek(start + padded)?;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_values() {
        let data = [0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xff];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0x1234_5678);
        assert_eq!(r.read_u8().unwrap(), 0xff);
        assert_eq!(r.position(), data.len());
    }

    #[test]
    fn eof_is_reported_with_offset() {
        let data = [1, 2, 3];
        let mut r = ByteReader::new(&data);
        r.skip(2).unwrap();
        match r.read_u16() {
            Err(LoadError::UnexpectedEof { offset }) => assert_eq!(offset, 2),
            other => panic!("expected eof, got {:?}", other),
        }
    }

    #[test]
    fn padded_names_realign() {
        let data = b"#~\0\0#Strings\0\0\0\0X";
        let mut r = ByteReader::new(data);
        assert_eq!(r.read_padded_name().unwrap(), "#~");
        assert_eq!(r.position(), 4);
        assert_eq!(r.read_padded_name().unwrap(), "#Strings");
        assert_eq!(r.position(), 16);
    }

    #[test]
    fn index_width_selects_size() {
        let data = [1, 0, 2, 0, 0, 0];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_index(2).unwrap(), 1);
        assert_eq!(r.read_index(4).unwrap(), 2);
    }
}
