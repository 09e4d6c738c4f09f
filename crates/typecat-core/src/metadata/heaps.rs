//! `#Strings` and `#Blob` heaps.

use super::LoadError;

#[derive(Clone, Copy)]
pub(crate) struct StringHeap<'a>(&'a [u8]);

impl<'a> StringHeap<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self(data)
    }

    pub(crate) fn get(&self, index: u32) -> Result<&'a str, LoadError> {
        let start = index as usize;
        if start == 0 {
            return Ok("");
        }
        let tail = self.0.get(start..).ok_or(LoadError::InvalidIndex {
            table: "#Strings",
            index,
        })?;
        let len = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or(LoadError::UnexpectedEof {
                offset: self.0.len(),
            })?;
        Ok(std::str::from_utf8(&tail[..len])?)
    }
}

#[derive(Clone, Copy)]
pub(crate) struct BlobHeap<'a>(&'a [u8]);

impl<'a> BlobHeap<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self(data)
    }

    pub(crate) fn get(&self, index: u32) -> Result<&'a [u8], LoadError> {
        let start = index as usize;
        if start == 0 {
            return Ok(&[]);
        }
        let tail = self.0.get(start..).ok_or(LoadError::InvalidIndex {
            table: "#Blob",
            index,
        })?;
        let (len, header) = read_compressed(tail, 0)?;
        tail.get(header..header + len as usize)
            .ok_or(LoadError::UnexpectedEof {
                offset: start + header,
            })
    }
}

/// Decode an ECMA-335 compressed unsigned integer at `pos`.
/// Returns the value and the position just past it.
pub(crate) fn read_compressed(data: &[u8], pos: usize) -> Result<(u32, usize), LoadError> {
    let eof = LoadError::UnexpectedEof { offset: pos };
    let first = *data.get(pos).ok_or(eof)?;
    if first & 0x80 == 0 {
        return Ok((first as u32, pos + 1));
    }
    if first & 0xc0 == 0x80 {
        let second = *data
            .get(pos + 1)
            .ok_or(LoadError::UnexpectedEof { offset: pos + 1 })?;
        return Ok(((((first & 0x3f) as u32) << 8) | second as u32, pos + 2));
    }
    if first & 0xe0 == 0xc0 {
        let rest = data
            .get(pos + 1..pos + 4)
            .ok_or(LoadError::UnexpectedEof { offset: pos + 1 })?;
        let value = (((first & 0x1f) as u32) << 24)
            | ((rest[0] as u32) << 16)
            | ((rest[1] as u32) << 8)
            | rest[2] as u32;
        return Ok((value, pos + 4));
    }
    Err(LoadError::InvalidSignature(format!(
        "bad compressed integer lead byte {first:#04x}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_integers_decode_per_width() {
        let cases: &[(&[u8], u32, usize)] = &[
            (&[0x03], 0x03, 1),
            (&[0x7f], 0x7f, 1),
            (&[0x80, 0x80], 0x80, 2),
            (&[0xae, 0x57], 0x2e57, 2),
            (&[0xbf, 0xff], 0x3fff, 2),
            (&[0xc0, 0x00, 0x40, 0x00], 0x4000, 4),
            (&[0xdf, 0xff, 0xff, 0xff], 0x1fff_ffff, 4),
        ];
        for (bytes, value, next) in cases {
            assert_eq!(read_compressed(bytes, 0).unwrap(), (*value, *next));
        }
    }

    #[test]
    fn truncated_compressed_integer_is_eof() {
        assert!(matches!(
            read_compressed(&[0xc0, 0x00], 0),
            Err(LoadError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn string_heap_reads_nul_terminated() {
        let heap = StringHeap::new(b"\0Widget\0Sample\0");
        assert_eq!(heap.get(0).unwrap(), "");
        assert_eq!(heap.get(1).unwrap(), "Widget");
        assert_eq!(heap.get(8).unwrap(), "Sample");
        assert!(heap.get(99).is_err());
    }

    #[test]
    fn blob_heap_reads_length_prefixed() {
        let heap = BlobHeap::new(&[0x00, 0x03, 0x20, 0x00, 0x08, 0x01, 0xff]);
        assert_eq!(heap.get(1).unwrap(), &[0x20, 0x00, 0x08]);
        assert_eq!(heap.get(5).unwrap(), &[0xff]);
        assert_eq!(heap.get(0).unwrap(), &[] as &[u8]);
    }
}
