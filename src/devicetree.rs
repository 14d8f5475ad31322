//! devicetree.rs — device-tree table walking and overlay assembly
//!
//! The packed table format is decoded here (big-endian, as the tree blobs
//! themselves are); structural edits on a tree — overlay application, node
//! deletion, region lookup — belong to the tree-manipulation collaborator
//! behind [`DeviceTreeOps`].
//!
//! Table layout (all u32 BE):
//!
//!   +------------------+ 0
//!   | magic            |      0xd7b7ab1e
//!   | total_size       |
//!   | header_size      |
//!   | dt_entry_size    |
//!   | dt_entry_count   |
//!   | dt_entries_offset|
//!   +------------------+ header_size
//!   | entries: dt_size, dt_offset, ... per entry
//!   +------------------+

use crate::error::{BootError, Result};
use crate::mem::AddressSpace;

/// Packed device-tree table magic.
pub const DT_TABLE_MAGIC: u32 = 0xd7b7_ab1e;

/// Tree node advertising verified-boot capability. Removed from the
/// assembled tree when the current boot did not go through verification,
/// so an unverified OS never sees a verified-boot marker.
pub const VBMETA_NODE: &str = "/firmware/android/vbmeta";

/// Reserved-memory node carrying the RAM boot-reason record address.
pub const RAM_REASON_NODE: &str = "/reserved-memory/rambootreason";

/// Tree-manipulation contract. Implemented over the platform's flattened
/// device-tree library; faked in tests.
pub trait DeviceTreeOps {
    /// Apply one overlay blob on top of the tree at `tree`.
    fn apply_overlay(
        &mut self,
        space: &mut dyn AddressSpace,
        tree: u64,
        overlay: u64,
        overlay_size: u32,
    ) -> Result<()>;

    /// Delete the node at `path`. Returns `Ok(false)` when absent.
    fn delete_node(&mut self, space: &mut dyn AddressSpace, tree: u64, path: &str)
        -> Result<bool>;

    /// Address recorded in the `reg` property of the node at `path`.
    fn reserved_region(&self, space: &dyn AddressSpace, tree: u64, path: &str) -> Option<u64>;
}

/// One table entry: absolute blob address and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtTableEntry {
    pub addr: u64,
    pub size: u32,
}

/// Decode the entry list of the packed table at `table`.
pub fn table_entries(space: &dyn AddressSpace, table: u64) -> Result<Vec<DtTableEntry>> {
    let raw = space.read_bytes(table, 24)?;
    if be32(&raw, 0) != DT_TABLE_MAGIC {
        return Err(BootError::DeviceTree("bad table magic".into()));
    }
    let total_size = be32(&raw, 4) as u64;
    let entry_size = be32(&raw, 12) as u64;
    let entry_count = be32(&raw, 16) as u64;
    let entries_offset = be32(&raw, 20) as u64;
    if entry_size < 8 {
        return Err(BootError::DeviceTree("runt table entry".into()));
    }
    // the count is an on-disk field; cap it by what the declared table span
    // can hold before reserving anything
    if entry_count > total_size.saturating_sub(entries_offset) / entry_size {
        return Err(BootError::DeviceTree("entry count exceeds table size".into()));
    }

    let mut entries = Vec::with_capacity(entry_count as usize);
    for i in 0..entry_count {
        let ent = space.read_bytes(table + entries_offset + i * entry_size, 8)?;
        entries.push(DtTableEntry {
            size: be32(&ent, 0),
            addr: table + be32(&ent, 4) as u64,
        });
    }
    Ok(entries)
}

/// Build a packed table around `blobs` (test and image-packing helper).
/// Blobs land back to back behind the entry list.
pub fn pack_table(blobs: &[&[u8]]) -> Vec<u8> {
    const HEADER_SIZE: u32 = 32;
    const ENTRY_SIZE: u32 = 32;
    let entries_offset = HEADER_SIZE;
    let blobs_offset = entries_offset + ENTRY_SIZE * blobs.len() as u32;
    let total: u32 = blobs_offset + blobs.iter().map(|b| b.len() as u32).sum::<u32>();

    let mut out = vec![0u8; total as usize];
    out[0..4].copy_from_slice(&DT_TABLE_MAGIC.to_be_bytes());
    out[4..8].copy_from_slice(&total.to_be_bytes());
    out[8..12].copy_from_slice(&HEADER_SIZE.to_be_bytes());
    out[12..16].copy_from_slice(&ENTRY_SIZE.to_be_bytes());
    out[16..20].copy_from_slice(&(blobs.len() as u32).to_be_bytes());
    out[20..24].copy_from_slice(&entries_offset.to_be_bytes());

    let mut blob_off = blobs_offset;
    for (i, blob) in blobs.iter().enumerate() {
        let e = (entries_offset + ENTRY_SIZE * i as u32) as usize;
        out[e..e + 4].copy_from_slice(&(blob.len() as u32).to_be_bytes());
        out[e + 4..e + 8].copy_from_slice(&blob_off.to_be_bytes());
        out[blob_off as usize..blob_off as usize + blob.len()].copy_from_slice(blob);
        blob_off += blob.len() as u32;
    }
    out
}

/// Place the base tree at `dest` and apply every overlay in table order.
///
/// The base table is load-bearing: an unreadable or empty base table is
/// fatal. Overlays are each independent — a failing overlay is logged and
/// skipped, and a missing or unreadable overlay table means none at all.
pub fn assemble(
    space: &mut dyn AddressSpace,
    dt: &mut dyn DeviceTreeOps,
    dt_table: u64,
    dto_table: Option<u64>,
    dest: u64,
) -> Result<()> {
    let base = *table_entries(space, dt_table)?
        .first()
        .ok_or_else(|| BootError::DeviceTree("base table has no tree".into()))?;
    space.copy_within(base.addr, dest, base.size as usize)?;

    let Some(dto_table) = dto_table else {
        log::info!("no overlay table, booting base tree");
        return Ok(());
    };
    match table_entries(space, dto_table) {
        Ok(overlays) => {
            for (i, ov) in overlays.iter().enumerate() {
                match dt.apply_overlay(space, dest, ov.addr, ov.size) {
                    Ok(()) => log::info!("overlay {i} applied"),
                    Err(e) => log::warn!("overlay {i} failed ({e}), skipped"),
                }
            }
        }
        Err(e) => log::warn!("overlay table unreadable ({e}), continuing without overlays"),
    }
    Ok(())
}

/// Drop the verified-boot marker node from the tree at `tree`.
pub fn strip_vbmeta(
    space: &mut dyn AddressSpace,
    dt: &mut dyn DeviceTreeOps,
    tree: u64,
) -> Result<()> {
    if dt.delete_node(space, tree, VBMETA_NODE)? {
        log::info!("DTB node '{VBMETA_NODE}' was deleted");
    }
    Ok(())
}

fn be32(raw: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&raw[off..off + 4]);
    u32::from_be_bytes(b)
}
