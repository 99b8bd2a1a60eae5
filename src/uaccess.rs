// Quotactl Caller Memory - length-checked copies across the transport boundary

use crate::{QuotaError, QuotaResult};

/// Longest path accepted from caller memory, terminator included
pub const PATH_MAX: usize = 4096;

/// Memory owned by the caller of a quota command.
///
/// Every copy is all-or-nothing: a copy that does not fit fails with
/// [`QuotaError::TransportFault`] and leaves both sides untouched.
pub trait UserMemory {
    /// Number of addressable bytes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `dst` from the start of caller memory
    fn copy_from(&self, dst: &mut [u8]) -> QuotaResult<()>;

    /// Write `src` to the start of caller memory
    fn copy_to(&mut self, src: &[u8]) -> QuotaResult<()>;

    /// Read a NUL-terminated path.
    fn read_path(&self) -> QuotaResult<String> {
        let len = self.len().min(PATH_MAX);
        let mut buf = vec![0u8; len];
        self.copy_from(&mut buf)?;
        let end = buf
            .iter()
            .position(|&b| b == 0)
            .ok_or(QuotaError::TransportFault)?;
        buf.truncate(end);
        String::from_utf8(buf).map_err(|_| QuotaError::InvalidArgument)
    }
}

/// Caller memory backed by a byte slice
pub struct UserSlice<'a> {
    bytes: &'a mut [u8],
}

impl<'a> UserSlice<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }
}

impl UserMemory for UserSlice<'_> {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn copy_from(&self, dst: &mut [u8]) -> QuotaResult<()> {
        let src = self
            .bytes
            .get(..dst.len())
            .ok_or(QuotaError::TransportFault)?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn copy_to(&mut self, src: &[u8]) -> QuotaResult<()> {
        let dst = self
            .bytes
            .get_mut(..src.len())
            .ok_or(QuotaError::TransportFault)?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

/// A null caller pointer: every access faults
pub struct NullMemory;

impl UserMemory for NullMemory {
    fn len(&self) -> usize {
        0
    }

    fn copy_from(&self, _dst: &mut [u8]) -> QuotaResult<()> {
        Err(QuotaError::TransportFault)
    }

    fn copy_to(&mut self, _src: &[u8]) -> QuotaResult<()> {
        Err(QuotaError::TransportFault)
    }

    fn read_path(&self) -> QuotaResult<String> {
        Err(QuotaError::TransportFault)
    }
}

/// Read a little-endian `u32` (flag words, format ids)
pub(crate) fn read_u32(addr: &dyn UserMemory) -> QuotaResult<u32> {
    let mut raw = [0u8; 4];
    addr.copy_from(&mut raw)?;
    Ok(u32::from_le_bytes(raw))
}

pub(crate) fn write_u32(addr: &mut dyn UserMemory, value: u32) -> QuotaResult<usize> {
    addr.copy_to(&value.to_le_bytes())?;
    Ok(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_buffer_faults_without_writing() {
        let mut raw = [0xAAu8; 3];
        let mut mem = UserSlice::new(&mut raw);
        assert_eq!(write_u32(&mut mem, 7), Err(QuotaError::TransportFault));
        assert_eq!(raw, [0xAA; 3]);
    }

    #[test]
    fn test_u32_roundtrip() {
        let mut raw = [0u8; 8];
        let mut mem = UserSlice::new(&mut raw);
        assert_eq!(write_u32(&mut mem, 0xDEAD_BEEF), Ok(4));
        assert_eq!(read_u32(&mem), Ok(0xDEAD_BEEF));
    }

    #[test]
    fn test_read_path() {
        let mut raw = *b"/quota.user\0garbage";
        let mem = UserSlice::new(&mut raw);
        assert_eq!(mem.read_path().as_deref(), Ok("/quota.user"));

        let mut unterminated = *b"/quota";
        let mem = UserSlice::new(&mut unterminated);
        assert_eq!(mem.read_path(), Err(QuotaError::TransportFault));

        assert_eq!(NullMemory.read_path(), Err(QuotaError::TransportFault));
    }
}
