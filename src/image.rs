//! image.rs — packaged boot image header
//!
//! Fixed little-endian layout, offsets owned by the external image format:
//!
//!   +--------------------+ 0
//!   | magic = "ANDROID!" | 8  (u8[8])
//!   | kernel_size        | 4  (u32 LE)
//!   | kernel_addr        | 4  (u32 LE)
//!   | ramdisk_size       | 4  (u32 LE)
//!   | ramdisk_addr       | 4  (u32 LE)
//!   | second_size        | 4  (u32 LE)
//!   | second_addr        | 4  (u32 LE)
//!   | tags_addr          | 4  (u32 LE)
//!   | page_size          | 4  (u32 LE)
//!   +--------------------+ 40
//!
//! Every payload is stored page-aligned behind the (page-aligned) header,
//! so layout math always rounds sizes up to the next page multiple.

use crate::error::{BootError, Result};
use crate::mem::AddressSpace;

/// Image magic, first 8 bytes of the header.
pub const BOOT_MAGIC: &[u8; 8] = b"ANDROID!";

/// Slack for the certificate + signed hash appended behind the payloads.
pub const MAX_SIGN_SIZE: u64 = 2048;

const OFF_KERNEL_SIZE: usize = 8;
const OFF_KERNEL_ADDR: usize = 12;
const OFF_RAMDISK_SIZE: usize = 16;
const OFF_RAMDISK_ADDR: usize = 20;
const OFF_SECOND_SIZE: usize = 24;
const OFF_SECOND_ADDR: usize = 28;
const OFF_TAGS_ADDR: usize = 32;
const OFF_PAGE_SIZE: usize = 36;

/// Parsed view of a packaged image header.
///
/// Immutable after parsing, except for the three load addresses which are
/// rewritten in place when the image arrived through the just-in-time RAM
/// path (see [`BootImageHeader::rebase_in_place`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootImageHeader {
    pub kernel_size: u32,
    pub kernel_addr: u32,
    pub ramdisk_size: u32,
    pub ramdisk_addr: u32,
    pub second_size: u32,
    pub second_addr: u32,
    pub tags_addr: u32,
    pub page_size: u32,
}

/// Smallest multiple of `page` that is >= `size`. `page` must be non-zero.
pub fn align_up(size: u64, page: u64) -> u64 {
    ((size + page - 1) / page) * page
}

impl BootImageHeader {
    /// Serialized header length.
    pub const SIZE: usize = 40;

    /// Parse the header stored at `addr`. Checks magic and page size.
    pub fn parse(space: &dyn AddressSpace, addr: u64) -> Result<Self> {
        let raw = space.read_bytes(addr, Self::SIZE)?;
        if &raw[..BOOT_MAGIC.len()] != BOOT_MAGIC {
            return Err(BootError::InvalidImage("bad magic"));
        }
        let hdr = Self {
            kernel_size: le32(&raw, OFF_KERNEL_SIZE),
            kernel_addr: le32(&raw, OFF_KERNEL_ADDR),
            ramdisk_size: le32(&raw, OFF_RAMDISK_SIZE),
            ramdisk_addr: le32(&raw, OFF_RAMDISK_ADDR),
            second_size: le32(&raw, OFF_SECOND_SIZE),
            second_addr: le32(&raw, OFF_SECOND_ADDR),
            tags_addr: le32(&raw, OFF_TAGS_ADDR),
            page_size: le32(&raw, OFF_PAGE_SIZE),
        };
        if hdr.page_size == 0 {
            return Err(BootError::InvalidImage("zero page size"));
        }
        Ok(hdr)
    }

    /// Byte span covered by the image signature: one header page plus each
    /// payload rounded up to page size. Excludes the trailing sign slack.
    pub fn signable_size(&self) -> u64 {
        let page = self.page_size as u64;
        page + align_up(self.kernel_size as u64, page)
            + align_up(self.ramdisk_size as u64, page)
            + align_up(self.second_size as u64, page)
    }

    /// Overwrite the load addresses of the header stored at `addr` with the
    /// defaults for a RAM-sourced image, and mirror the change into `self`.
    /// Images pushed over the wire carry whatever addresses the packer put
    /// in; they must be rebased before the pipeline lays anything out.
    pub fn rebase_in_place(
        &mut self,
        space: &mut dyn AddressSpace,
        addr: u64,
        kernel_addr: u32,
        ramdisk_addr: u32,
        second_addr: u32,
    ) -> Result<()> {
        space.write_bytes(addr + OFF_KERNEL_ADDR as u64, &kernel_addr.to_le_bytes())?;
        space.write_bytes(addr + OFF_RAMDISK_ADDR as u64, &ramdisk_addr.to_le_bytes())?;
        space.write_bytes(addr + OFF_SECOND_ADDR as u64, &second_addr.to_le_bytes())?;
        self.kernel_addr = kernel_addr;
        self.ramdisk_addr = ramdisk_addr;
        self.second_addr = second_addr;
        Ok(())
    }

    /// Serialize a header. Test and image-packing helper.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut raw = [0u8; Self::SIZE];
        raw[..8].copy_from_slice(BOOT_MAGIC);
        raw[OFF_KERNEL_SIZE..OFF_KERNEL_SIZE + 4].copy_from_slice(&self.kernel_size.to_le_bytes());
        raw[OFF_KERNEL_ADDR..OFF_KERNEL_ADDR + 4].copy_from_slice(&self.kernel_addr.to_le_bytes());
        raw[OFF_RAMDISK_SIZE..OFF_RAMDISK_SIZE + 4]
            .copy_from_slice(&self.ramdisk_size.to_le_bytes());
        raw[OFF_RAMDISK_ADDR..OFF_RAMDISK_ADDR + 4]
            .copy_from_slice(&self.ramdisk_addr.to_le_bytes());
        raw[OFF_SECOND_SIZE..OFF_SECOND_SIZE + 4].copy_from_slice(&self.second_size.to_le_bytes());
        raw[OFF_SECOND_ADDR..OFF_SECOND_ADDR + 4].copy_from_slice(&self.second_addr.to_le_bytes());
        raw[OFF_TAGS_ADDR..OFF_TAGS_ADDR + 4].copy_from_slice(&self.tags_addr.to_le_bytes());
        raw[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 4].copy_from_slice(&self.page_size.to_le_bytes());
        raw
    }
}

fn le32(raw: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&raw[off..off + 4]);
    u32::from_le_bytes(b)
}
