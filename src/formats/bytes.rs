//! Byte cursor and layout primitives shared by every format.

/// Byte order of multi-byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Extension trait for reading primitive types from byte slices
pub trait ReadExt {
    fn read_u8_at(&self, offset: usize) -> Option<u8>;
    fn read_u16_at(&self, offset: usize, endian: Endian) -> Option<u16>;
    fn read_u32_at(&self, offset: usize, endian: Endian) -> Option<u32>;
    fn read_u64_at(&self, offset: usize, endian: Endian) -> Option<u64>;
    fn read_i32_at(&self, offset: usize, endian: Endian) -> Option<i32>;
    fn read_cstring_at(&self, offset: usize, max_len: usize) -> Option<&str>;
    fn read_slice_at(&self, offset: usize, len: usize) -> Option<&[u8]>;
}

impl ReadExt for [u8] {
    #[inline(always)]
    fn read_u8_at(&self, offset: usize) -> Option<u8> {
        self.get(offset).copied()
    }

    #[inline(always)]
    fn read_u16_at(&self, offset: usize, endian: Endian) -> Option<u16> {
        let bytes: [u8; 2] = self.get(offset..offset.checked_add(2)?)?.try_into().ok()?;
        Some(match endian {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        })
    }

    #[inline(always)]
    fn read_u32_at(&self, offset: usize, endian: Endian) -> Option<u32> {
        let bytes: [u8; 4] = self.get(offset..offset.checked_add(4)?)?.try_into().ok()?;
        Some(match endian {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        })
    }

    #[inline(always)]
    fn read_u64_at(&self, offset: usize, endian: Endian) -> Option<u64> {
        let bytes: [u8; 8] = self.get(offset..offset.checked_add(8)?)?.try_into().ok()?;
        Some(match endian {
            Endian::Little => u64::from_le_bytes(bytes),
            Endian::Big => u64::from_be_bytes(bytes),
        })
    }

    #[inline(always)]
    fn read_i32_at(&self, offset: usize, endian: Endian) -> Option<i32> {
        self.read_u32_at(offset, endian).map(|v| v as i32)
    }

    fn read_cstring_at(&self, offset: usize, max_len: usize) -> Option<&str> {
        let end = offset.saturating_add(max_len).min(self.len());
        let slice = self.get(offset..end)?;

        // Find null terminator
        let len = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
        std::str::from_utf8(&slice[..len]).ok()
    }

    #[inline(always)]
    fn read_slice_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.get(offset..offset.checked_add(len)?)
    }
}

/// Bounded in-place writes. `None` means the field does not fit.
pub trait WriteExt {
    fn write_u16_at(&mut self, offset: usize, value: u16, endian: Endian) -> Option<()>;
    fn write_u32_at(&mut self, offset: usize, value: u32, endian: Endian) -> Option<()>;
    fn write_u64_at(&mut self, offset: usize, value: u64, endian: Endian) -> Option<()>;
    fn write_slice_at(&mut self, offset: usize, bytes: &[u8]) -> Option<()>;
}

impl WriteExt for [u8] {
    fn write_u16_at(&mut self, offset: usize, value: u16, endian: Endian) -> Option<()> {
        let bytes = match endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.write_slice_at(offset, &bytes)
    }

    fn write_u32_at(&mut self, offset: usize, value: u32, endian: Endian) -> Option<()> {
        let bytes = match endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.write_slice_at(offset, &bytes)
    }

    fn write_u64_at(&mut self, offset: usize, value: u64, endian: Endian) -> Option<()> {
        let bytes = match endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.write_slice_at(offset, &bytes)
    }

    fn write_slice_at(&mut self, offset: usize, bytes: &[u8]) -> Option<()> {
        self.get_mut(offset..offset.checked_add(bytes.len())?)?
            .copy_from_slice(bytes);
        Some(())
    }
}

/// Append-only encoder used to re-emit headers and tables.
#[derive(Debug, Clone)]
pub struct ByteSink {
    buf: Vec<u8>,
    endian: Endian,
}

impl ByteSink {
    pub fn new(endian: Endian) -> Self {
        Self {
            buf: Vec::new(),
            endian,
        }
    }

    pub fn with_capacity(endian: Endian, capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            endian,
        }
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        match self.endian {
            Endian::Little => self.buf.extend_from_slice(&value.to_le_bytes()),
            Endian::Big => self.buf.extend_from_slice(&value.to_be_bytes()),
        }
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        match self.endian {
            Endian::Little => self.buf.extend_from_slice(&value.to_le_bytes()),
            Endian::Big => self.buf.extend_from_slice(&value.to_be_bytes()),
        }
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        match self.endian {
            Endian::Little => self.buf.extend_from_slice(&value.to_le_bytes()),
            Endian::Big => self.buf.extend_from_slice(&value.to_be_bytes()),
        }
        self
    }

    /// Word-sized field: 8 bytes when `wide`, otherwise the low 4 bytes.
    pub fn addr(&mut self, value: u64, wide: bool) -> &mut Self {
        if wide {
            self.u64(value)
        } else {
            self.u32(value as u32)
        }
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn zeros(&mut self, count: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + count, 0);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Align a value up to the specified alignment
///
/// Alignments of 0 and 1 leave the value unchanged. Saturates at `u64::MAX`.
#[inline(always)]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.checked_next_multiple_of(alignment).unwrap_or(u64::MAX)
    }
}

/// Decode a NUL-padded fixed-width name field.
pub fn fixed_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Read a NUL-terminated string-table entry, replacing invalid UTF-8.
pub fn cstring_lossy_at(data: &[u8], offset: usize) -> Option<String> {
    let slice = data.get(offset..)?;
    let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
    Some(String::from_utf8_lossy(&slice[..end]).into_owned())
}

/// Zero `data[start..end]`, clamped to the buffer.
pub fn zero_range(data: &mut [u8], start: usize, end: usize) {
    let end = end.min(data.len());
    if start < end {
        data[start..end].fill(0);
    }
}
