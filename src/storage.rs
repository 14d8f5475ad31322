//! storage.rs — block storage contract and image locator
//!
//! The physical read driver is a collaborator; the pipeline only sees
//! [`BlockDevice`]. The locator reads the fixed header block group first,
//! sizes the one bounded payload read from the parsed header, and loads the
//! device-tree tables from their own partitions.

use crate::error::{BootError, Result};
use crate::image::{BootImageHeader, MAX_SIGN_SIZE};
use crate::mem::AddressSpace;

/// Header block group at the front of a boot partition.
pub const HEADER_BLOCKS: u64 = 4;
/// Block size the on-disk image layout is defined in.
pub const BLOCK_SIZE: u64 = 512;
/// Byte span of the header block group.
pub const HEADER_BYTES: u64 = HEADER_BLOCKS * BLOCK_SIZE;

/// Read-only partition geometry supplied by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub name: String,
    /// First block of the partition.
    pub start: u64,
    /// Block size in bytes.
    pub block_size: u64,
    /// Partition length in blocks.
    pub blocks: u64,
}

/// Block-granular read access to one storage device.
pub trait BlockDevice {
    /// Look up a partition by exact name.
    fn partition(&self, name: &str) -> Option<PartitionDescriptor>;

    /// Read `count` blocks starting at absolute block `start` into the
    /// address space at `dest`.
    fn read_blocks(
        &self,
        start: u64,
        count: u64,
        dest: u64,
        space: &mut dyn AddressSpace,
    ) -> Result<()>;
}

/// A located, fully read-in packaged image.
#[derive(Debug, PartialEq, Eq)]
pub struct LocatedImage {
    pub header: BootImageHeader,
    /// Address of the header block group; payloads follow page-aligned.
    pub header_addr: u64,
}

/// Find `boot_part`, read its header block group to `addr`, then read the
/// whole signable span (plus certificate/sign slack) in one bounded read.
pub fn locate_boot_image(
    dev: &dyn BlockDevice,
    space: &mut dyn AddressSpace,
    boot_part: &str,
    addr: u64,
) -> Result<LocatedImage> {
    let part = dev
        .partition(boot_part)
        .ok_or_else(|| BootError::ResourceNotFound(format!("partition '{boot_part}'")))?;
    log::info!(
        "{}: block start = {:#x}, block size = {}",
        part.name,
        part.start,
        part.block_size
    );

    // every offset below (header group, signable span, payload destination)
    // is defined in BLOCK_SIZE units
    if part.block_size != BLOCK_SIZE {
        return Err(BootError::StorageIo(format!(
            "{}: unsupported block size {}",
            part.name, part.block_size
        )));
    }

    dev.read_blocks(part.start, HEADER_BLOCKS, addr, space)?;
    let header = BootImageHeader::parse(space, addr)?;

    let signable_blocks = (header.signable_size() + MAX_SIGN_SIZE) / BLOCK_SIZE;
    if signable_blocks == 0 || signable_blocks > part.blocks {
        return Err(BootError::SizeViolation(signable_blocks));
    }

    dev.read_blocks(
        part.start + HEADER_BLOCKS,
        signable_blocks,
        addr + HEADER_BYTES,
        space,
    )?;

    Ok(LocatedImage { header, header_addr: addr })
}

/// Read a whole device-tree table partition to `addr`. The caller decides
/// whether a failure is fatal (base table) or ignorable (overlay table).
pub fn load_dt_table(
    dev: &dyn BlockDevice,
    space: &mut dyn AddressSpace,
    part_name: &str,
    addr: u64,
) -> Result<u64> {
    let part = dev
        .partition(part_name)
        .ok_or_else(|| BootError::ResourceNotFound(format!("partition '{part_name}'")))?;
    dev.read_blocks(part.start, part.blocks, addr, space)?;
    Ok(addr)
}

/// In-memory block device. Backs the host harness (loaded from a disk image
/// file) and the unit tests.
pub struct MemBlockDevice {
    block_size: u64,
    data: Vec<u8>,
    parts: Vec<PartitionDescriptor>,
}

impl MemBlockDevice {
    pub fn new(block_size: u64, blocks: u64) -> Self {
        Self {
            block_size,
            data: vec![0u8; (block_size * blocks) as usize],
            parts: Vec::new(),
        }
    }

    /// Wrap an existing disk image.
    pub fn from_image(block_size: u64, data: Vec<u8>) -> Self {
        Self { block_size, data, parts: Vec::new() }
    }

    pub fn add_partition(&mut self, name: &str, start: u64, blocks: u64) {
        self.parts.push(PartitionDescriptor {
            name: name.to_string(),
            start,
            block_size: self.block_size,
            blocks,
        });
    }

    /// Place raw bytes at a block offset (image packing helper).
    pub fn write_at_block(&mut self, block: u64, bytes: &[u8]) {
        let off = (block * self.block_size) as usize;
        self.data[off..off + bytes.len()].copy_from_slice(bytes);
    }
}

impl BlockDevice for MemBlockDevice {
    fn partition(&self, name: &str) -> Option<PartitionDescriptor> {
        self.parts.iter().find(|p| p.name == name).cloned()
    }

    fn read_blocks(
        &self,
        start: u64,
        count: u64,
        dest: u64,
        space: &mut dyn AddressSpace,
    ) -> Result<()> {
        let off = (start * self.block_size) as usize;
        let len = (count * self.block_size) as usize;
        if off + len > self.data.len() {
            return Err(BootError::StorageIo(format!(
                "blocks {start}..{} beyond device end",
                start + count
            )));
        }
        space.write_bytes(dest, &self.data[off..off + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::RamSpace;

    fn header(kernel_size: u32) -> BootImageHeader {
        BootImageHeader {
            kernel_size,
            kernel_addr: 0x10_0000,
            ramdisk_size: 1024,
            ramdisk_addr: 0x20_0000,
            second_size: 512,
            second_addr: 0x30_0000,
            tags_addr: 0,
            page_size: 2048,
        }
    }

    fn device_with_boot(hdr: &BootImageHeader, blocks: u64) -> MemBlockDevice {
        let mut dev = MemBlockDevice::new(512, blocks + 16);
        dev.add_partition("boot", 8, blocks);
        dev.write_at_block(8, &hdr.encode());
        dev
    }

    #[test]
    fn locates_and_reads_payload() {
        let hdr = header(4096);
        // signable = 2048 + 4096 + 2048 + 2048 = 10240; + 2048 slack = 24 blocks
        let dev = device_with_boot(&hdr, 64);
        let mut space = RamSpace::new(0, 64 * 1024);
        let img = locate_boot_image(&dev, &mut space, "boot", 0x400).unwrap();
        assert_eq!(img.header, hdr);
        assert_eq!(img.header_addr, 0x400);
    }

    #[test]
    fn unknown_partition_is_fatal() {
        let dev = MemBlockDevice::new(512, 8);
        let mut space = RamSpace::new(0, 4096);
        assert_eq!(
            locate_boot_image(&dev, &mut space, "boot_a", 0),
            Err(BootError::ResourceNotFound("partition 'boot_a'".into()))
        );
    }

    #[test]
    fn image_larger_than_partition_is_rejected() {
        let hdr = header(4096);
        // 24 signable blocks, but the partition only has 16
        let dev = device_with_boot(&hdr, 16);
        let mut space = RamSpace::new(0, 64 * 1024);
        assert_eq!(
            locate_boot_image(&dev, &mut space, "boot", 0),
            Err(BootError::SizeViolation(24))
        );
    }

    #[test]
    fn zero_block_size_is_rejected_without_dividing() {
        let mut dev = MemBlockDevice::from_image(0, vec![0u8; 4096]);
        dev.add_partition("boot", 0, 8);
        let mut space = RamSpace::new(0, 4096);
        assert!(matches!(
            locate_boot_image(&dev, &mut space, "boot", 0),
            Err(BootError::StorageIo(_))
        ));
    }

    #[test]
    fn foreign_block_size_is_rejected() {
        let mut dev = MemBlockDevice::new(4096, 32);
        dev.add_partition("boot", 0, 16);
        dev.write_at_block(0, &header(4096).encode());
        let mut space = RamSpace::new(0, 64 * 1024);
        assert!(matches!(
            locate_boot_image(&dev, &mut space, "boot", 0),
            Err(BootError::StorageIo(_))
        ));
    }

    #[test]
    fn dt_table_load_reads_whole_partition() {
        let mut dev = MemBlockDevice::new(512, 16);
        dev.add_partition("dtb", 2, 4);
        dev.write_at_block(2, b"devicetree");
        let mut space = RamSpace::new(0, 8192);
        let addr = load_dt_table(&dev, &mut space, "dtb", 0x100).unwrap();
        assert_eq!(addr, 0x100);
        assert_eq!(space.read_bytes(0x100, 10).unwrap(), b"devicetree");
    }

    #[test]
    fn missing_dt_table_names_partition() {
        let dev = MemBlockDevice::new(512, 8);
        let mut space = RamSpace::new(0, 4096);
        let err = load_dt_table(&dev, &mut space, "dtbo", 0).unwrap_err();
        assert_eq!(err, BootError::ResourceNotFound("partition 'dtbo'".into()));
    }
}
