//! handoff.rs — final payload placement and next-stage argument vector
//!
//! Once the kernel has been unpacked to its load address, the ramdisk is
//! moved to its own address (skipped when it already sits there) and the
//! three load addresses are encoded for the next boot stage's argv.

use crate::error::Result;
use crate::image::{align_up, BootImageHeader};
use crate::mem::AddressSpace;

/// Addresses handed to the next boot stage, each as 8 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffArgs {
    pub kernel: String,
    pub ramdisk: String,
    pub tables: String,
}

impl HandoffArgs {
    pub fn from_header(hdr: &BootImageHeader) -> Self {
        Self {
            kernel: encode_addr(hdr.kernel_addr),
            ramdisk: encode_addr(hdr.ramdisk_addr),
            tables: encode_addr(hdr.second_addr),
        }
    }

    /// Argument vector for the next stage, kernel address first.
    pub fn argv(&self) -> [&str; 3] {
        [&self.kernel, &self.ramdisk, &self.tables]
    }
}

/// 8 lowercase hex digits, no `0x` prefix.
pub fn encode_addr(addr: u32) -> String {
    format!("{addr:08x}")
}

/// Copy the page-aligned ramdisk from its in-image offset to its load
/// address. A ramdisk already at its destination is left alone.
pub fn place_ramdisk(
    space: &mut dyn AddressSpace,
    hdr: &BootImageHeader,
    ramdisk_offset: u64,
) -> Result<()> {
    let size = align_up(hdr.ramdisk_size as u64, hdr.page_size as u64);
    log::info!(
        "ramdisk offset = {ramdisk_offset:#x}, size = {size:#x}, address = {:#x}",
        hdr.ramdisk_addr
    );
    if hdr.ramdisk_addr as u64 != ramdisk_offset {
        space.copy_within(ramdisk_offset, hdr.ramdisk_addr as u64, size as usize)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::RamSpace;

    fn header(ramdisk_size: u32, ramdisk_addr: u32) -> BootImageHeader {
        BootImageHeader {
            kernel_size: 0,
            kernel_addr: 0,
            ramdisk_size,
            ramdisk_addr,
            second_size: 0,
            second_addr: 0,
            tags_addr: 0,
            page_size: 512,
        }
    }

    #[test]
    fn encodes_eight_lowercase_hex_digits() {
        assert_eq!(encode_addr(0x4800_0800), "48000800");
        assert_eq!(encode_addr(0xAB), "000000ab");
        assert_eq!(encode_addr(0xDEAD_BEEF), "deadbeef");
    }

    #[test]
    fn argv_orders_kernel_ramdisk_tables() {
        let args = HandoffArgs::from_header(&BootImageHeader {
            kernel_size: 0,
            kernel_addr: 1,
            ramdisk_size: 0,
            ramdisk_addr: 2,
            second_size: 0,
            second_addr: 3,
            tags_addr: 0,
            page_size: 512,
        });
        assert_eq!(args.argv(), ["00000001", "00000002", "00000003"]);
    }

    #[test]
    fn ramdisk_is_copied_page_aligned() {
        let mut space = RamSpace::new(0, 0x4000);
        space.write_bytes(0x800, &[0x11u8; 600]).unwrap();
        let hdr = header(600, 0x2000);
        place_ramdisk(&mut space, &hdr, 0x800).unwrap();
        assert_eq!(space.read_bytes(0x2000, 600).unwrap(), vec![0x11u8; 600]);
    }

    #[test]
    fn coinciding_addresses_skip_the_copy() {
        struct CountingSpace {
            inner: RamSpace,
            copies: u32,
        }
        impl AddressSpace for CountingSpace {
            fn read_bytes(&self, addr: u64, len: usize) -> crate::error::Result<Vec<u8>> {
                self.inner.read_bytes(addr, len)
            }
            fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> crate::error::Result<()> {
                self.inner.write_bytes(addr, bytes)
            }
            fn copy_within(&mut self, src: u64, dst: u64, len: usize) -> crate::error::Result<()> {
                self.copies += 1;
                self.inner.copy_within(src, dst, len)
            }
        }

        let mut space = CountingSpace { inner: RamSpace::new(0, 0x1000), copies: 0 };
        space.write_bytes(0x800, &[0x22u8; 512]).unwrap();
        let hdr = header(512, 0x800);
        place_ramdisk(&mut space, &hdr, 0x800).unwrap();
        assert_eq!(space.copies, 0);

        let hdr = header(512, 0x200);
        place_ramdisk(&mut space, &hdr, 0x800).unwrap();
        assert_eq!(space.copies, 1);
        assert_eq!(space.read_bytes(0x200, 512).unwrap(), vec![0x22u8; 512]);
    }
}
