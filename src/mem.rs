//! mem.rs — bounded physical address space capability
//!
//! Every payload buffer in the pipeline is a fixed physical region named by
//! address and length. All access goes through [`AddressSpace`] so the core
//! never touches raw pointers; an embedded port maps the trait straight onto
//! physical memory, the host harness and the tests use [`RamSpace`].

use crate::error::{BootError, Result};

/// Bounded read/write access to the boot-time physical address space.
pub trait AddressSpace {
    /// Read `len` bytes starting at `addr`.
    fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>>;

    /// Write `bytes` starting at `addr`.
    fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<()>;

    /// Copy `len` bytes from `src` to `dst`. Regions may overlap.
    fn copy_within(&mut self, src: u64, dst: u64, len: usize) -> Result<()> {
        let bytes = self.read_bytes(src, len)?;
        self.write_bytes(dst, &bytes)
    }

    /// Fill `len` bytes at `addr` with `byte`.
    fn fill(&mut self, addr: u64, len: usize, byte: u8) -> Result<()> {
        self.write_bytes(addr, &vec![byte; len])
    }
}

/// RAM-backed address space starting at a fixed base address.
pub struct RamSpace {
    base: u64,
    bytes: Vec<u8>,
}

impl RamSpace {
    pub fn new(base: u64, size: usize) -> Self {
        Self { base, bytes: vec![0u8; size] }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn range(&self, addr: u64, len: usize) -> Result<core::ops::Range<usize>> {
        let oob = || BootError::AddressSpace { addr, len: len as u64 };
        let start = addr.checked_sub(self.base).ok_or_else(oob)? as usize;
        let end = start.checked_add(len).ok_or_else(oob)?;
        if end > self.bytes.len() {
            return Err(oob());
        }
        Ok(start..end)
    }
}

impl AddressSpace for RamSpace {
    fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let r = self.range(addr, len)?;
        Ok(self.bytes[r].to_vec())
    }

    fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<()> {
        let r = self.range(addr, bytes.len())?;
        self.bytes[r].copy_from_slice(bytes);
        Ok(())
    }

    fn copy_within(&mut self, src: u64, dst: u64, len: usize) -> Result<()> {
        let s = self.range(src, len)?;
        self.range(dst, len)?;
        let dst_start = (dst - self.base) as usize;
        self.bytes.copy_within(s, dst_start);
        Ok(())
    }

    fn fill(&mut self, addr: u64, len: usize, byte: u8) -> Result<()> {
        let r = self.range(addr, len)?;
        self.bytes[r].fill(byte);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_roundtrip() {
        let mut space = RamSpace::new(0x1000, 64);
        space.write_bytes(0x1010, b"hello").unwrap();
        assert_eq!(space.read_bytes(0x1010, 5).unwrap(), b"hello");
    }

    #[test]
    fn rejects_below_base() {
        let space = RamSpace::new(0x1000, 64);
        assert!(matches!(
            space.read_bytes(0xfff, 1),
            Err(BootError::AddressSpace { .. })
        ));
    }

    #[test]
    fn rejects_past_end() {
        let mut space = RamSpace::new(0x1000, 64);
        assert!(space.write_bytes(0x103f, &[0, 0]).is_err());
        assert!(space.write_bytes(0x103f, &[0]).is_ok());
    }

    #[test]
    fn overlapping_copy() {
        let mut space = RamSpace::new(0, 16);
        space.write_bytes(0, b"abcd").unwrap();
        space.copy_within(0, 2, 4).unwrap();
        assert_eq!(space.read_bytes(2, 4).unwrap(), b"abcd");
    }

    #[test]
    fn fill_zeroizes() {
        let mut space = RamSpace::new(0, 8);
        space.write_bytes(0, &[0xff; 8]).unwrap();
        space.fill(2, 4, 0).unwrap();
        assert_eq!(space.read_bytes(0, 8).unwrap(), [0xff, 0xff, 0, 0, 0, 0, 0xff, 0xff]);
    }
}
