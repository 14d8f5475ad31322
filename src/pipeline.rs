//! pipeline.rs — end-to-end boot orchestration
//!
//! Two entry paths converge on one in-RAM boot routine: the legacy path
//! locates the packaged image on block storage (slot-suffixing partition
//! names itself), the verified path receives role-mapped buffers from the
//! slot-verification coordinator. Fatal errors abort the whole attempt and
//! propagate; there is no alternate boot path behind a failure.

use crate::avb::{self, BootSource, VerifyOps};
use crate::bootargs::{
    append_blkdevparts, append_board_id, append_boot_reason, append_cpu_revision, BoardInfo,
    BootArgs,
};
use crate::codec;
use crate::devicetree::{self, DeviceTreeOps};
use crate::error::{BootError, Result};
use crate::handoff::{place_ramdisk, HandoffArgs};
use crate::image::{align_up, BootImageHeader};
use crate::mem::AddressSpace;
use crate::reason::{extract_boot_reason, BcbStore};
use crate::storage::{self, BlockDevice, HEADER_BYTES};
use crate::ui::{Console, DEFAULT_WARN_TICKS};

/// Fixed addresses and knobs for one platform. Built once by the invoking
/// layer and passed down explicitly.
#[derive(Debug, Clone)]
pub struct BootConfig {
    /// Verification-warning countdown length in one-second ticks.
    pub warn_ticks: u32,
    /// Command line known before the builder steps run.
    pub initial_cmdline: String,
    /// Kernel load address used when rebasing RAM-sourced images.
    pub kernel_addr: u32,
    /// Ramdisk load address for RAM-sourced images.
    pub ramdisk_addr: u32,
    /// Device-tree destination for RAM-sourced images.
    pub tables_addr: u32,
    /// Upper bound for in-place kernel unpacking when the ramdisk sits
    /// below the kernel (the bootloader's own text base).
    pub text_base: u64,
    /// Scratch address the base device-tree table is read to.
    pub dt_table_addr: u64,
    /// Scratch address the overlay table is read to.
    pub dto_table_addr: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            warn_ticks: DEFAULT_WARN_TICKS,
            initial_cmdline: String::new(),
            kernel_addr: 0x5800_0000,
            ramdisk_addr: 0x4910_0000,
            tables_addr: 0x4800_0800,
            text_base: 0x5000_0000,
            dt_table_addr: 0x4a00_0000,
            dto_table_addr: 0x4b00_0000,
        }
    }
}

/// One boot attempt as requested on the command surface.
#[derive(Debug, Clone)]
pub struct BootRequest {
    /// Boot partition name; `None` selects the canonical `boot`.
    pub partition: Option<String>,
    /// Load / image address.
    pub addr: u64,
    /// Route through the slot-verification engine.
    pub verify: bool,
    /// The image is already resident at `addr` (verified path only).
    pub ram_source: bool,
}

/// What a successful attempt hands to the next stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootOutcome {
    pub cmdline: String,
    pub handoff: HandoffArgs,
}

/// Collaborator bundle for one boot attempt.
pub struct BootContext<'a> {
    pub space: &'a mut dyn AddressSpace,
    pub dt: &'a mut dyn DeviceTreeOps,
    pub board: &'a dyn BoardInfo,
    pub bcb: &'a mut dyn BcbStore,
    pub console: &'a mut dyn Console,
}

/// Run one boot attempt end to end.
pub fn run_boot(
    ctx: &mut BootContext<'_>,
    dev: &dyn BlockDevice,
    verify_ops: Option<&mut dyn VerifyOps>,
    cfg: &BootConfig,
    request: &BootRequest,
) -> Result<BootOutcome> {
    let mut args = BootArgs::new(cfg.initial_cmdline.clone());

    let handoff = if request.verify {
        let ops = verify_ops
            .ok_or_else(|| BootError::ResourceNotFound("verification engine".into()))?;
        let source = if request.ram_source {
            BootSource::Ram { addr: request.addr }
        } else {
            BootSource::Storage
        };
        let set = avb::run_slot_verification(ops, ctx.console, ctx.space, cfg, source)?;
        let hdr = BootImageHeader::parse(ctx.space, set.boot)?;
        boot_packaged_image(
            ctx,
            cfg,
            &mut args,
            &hdr,
            set.boot,
            set.dtb,
            Some(set.dtbo),
            true,
        )?
    } else {
        // Legacy path: resolve slot-suffixed partition names and pull the
        // image in from block storage.
        let slot = ctx.board.active_slot();
        let boot_part = suffixed(request.partition.as_deref().unwrap_or("boot"), slot);
        let dtb_part = suffixed("dtb", slot);
        let dtbo_part = suffixed("dtbo", slot);
        log::info!("boot from storage ({boot_part}, {dtb_part}, {dtbo_part}) addr={:#x}", request.addr);

        let img = storage::locate_boot_image(dev, ctx.space, &boot_part, request.addr)?;
        let dt_table = storage::load_dt_table(dev, ctx.space, &dtb_part, cfg.dt_table_addr)?;
        let dto_table = match storage::load_dt_table(dev, ctx.space, &dtbo_part, cfg.dto_table_addr)
        {
            Ok(addr) => Some(addr),
            // this partition is not critical for booting
            Err(e) => {
                log::warn!("overlay table unavailable ({e}), continuing without overlays");
                None
            }
        };
        boot_packaged_image(
            ctx,
            cfg,
            &mut args,
            &img.header,
            img.header_addr,
            dt_table,
            dto_table,
            false,
        )?
    };

    Ok(BootOutcome { cmdline: args.into_string(), handoff })
}

/// Boot an image already resident in memory: command-line side effects,
/// kernel unpack, ramdisk placement, tree assembly, reason extraction,
/// handoff encoding.
#[allow(clippy::too_many_arguments)]
pub fn boot_packaged_image(
    ctx: &mut BootContext<'_>,
    cfg: &BootConfig,
    args: &mut BootArgs,
    hdr: &BootImageHeader,
    hdr_addr: u64,
    dt_table: u64,
    dto_table: Option<u64>,
    verified: bool,
) -> Result<HandoffArgs> {
    append_board_id(args, ctx.board);
    append_cpu_revision(args, ctx.board);
    append_blkdevparts(args, ctx.board);

    let kernel_offset = hdr_addr + HEADER_BYTES;
    let capacity = codec::unpack_capacity(hdr, cfg.text_base);
    let unpacked = codec::unpack_kernel(ctx.space, hdr, kernel_offset, capacity)?;
    log::info!(
        "kernel offset = {kernel_offset:#x}, size = {unpacked:#x}, address {:#x}",
        hdr.kernel_addr
    );

    // the ramdisk follows the original (compressed) kernel span, not the
    // unpacked one
    let ramdisk_offset = kernel_offset + align_up(hdr.kernel_size as u64, hdr.page_size as u64);
    place_ramdisk(ctx.space, hdr, ramdisk_offset)?;

    devicetree::assemble(ctx.space, ctx.dt, dt_table, dto_table, hdr.second_addr as u64)?;
    if !verified {
        // an unverified boot must not advertise the verified-boot node
        devicetree::strip_vbmeta(ctx.space, ctx.dt, hdr.second_addr as u64)?;
    }

    let reason = extract_boot_reason(ctx.space, ctx.dt, hdr.second_addr as u64, ctx.bcb);
    append_boot_reason(args, reason.as_deref());

    Ok(HandoffArgs::from_header(hdr))
}

/// `name_<slot>` when a slot letter is active, plain `name` otherwise.
fn suffixed(name: &str, slot: Option<char>) -> String {
    match slot {
        Some(letter) => format!("{name}_{letter}"),
        None => name.to_string(),
    }
}
