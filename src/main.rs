//! Host harness around the boot pipeline.
//!
//! Runs one boot attempt against a disk image file instead of real block
//! hardware, with pass-through stand-ins for the platform collaborators.
//! The command grammar mirrors the on-target console command:
//!
//!   boota --disk disk.img --table parts.txt <device> [<partition>] [avb] <address>

use std::fs;
use std::path::PathBuf;

use clap::Parser;

use boota::avb::{LoadedPartition, SlotData, SlotVerifyFlags, SlotVerifyResult, VerifyOps};
use boota::bootargs::BoardInfo;
use boota::devicetree::DeviceTreeOps;
use boota::error::{BootError, Result as BootResult};
use boota::mem::{AddressSpace, RamSpace};
use boota::pipeline::{run_boot, BootConfig, BootContext, BootRequest};
use boota::reason::{BootloaderMessage, RamBcb};
use boota::storage::{BlockDevice, MemBlockDevice};
use boota::ui::{HostConsole, DEFAULT_WARN_TICKS};

/// Verification warning delay override, in seconds.
const AVB_DELAY_ENV: &str = "BOOTA_AVB_DELAY";

/// Host address map, scaled down from the target map so the whole space
/// fits in one allocation.
const SPACE_SIZE: usize = 32 * 1024 * 1024;
const KERNEL_ADDR: u32 = 0x0080_0000;
const RAMDISK_ADDR: u32 = 0x0100_0000;
const TABLES_ADDR: u32 = 0x0060_0000;
const TEXT_BASE: u64 = 0x0180_0000;
const DT_TABLE_ADDR: u64 = 0x0020_0000;
const DTO_TABLE_ADDR: u64 = 0x0030_0000;
const VERIFIED_BOOT_ADDR: u64 = 0x0040_0000;

#[derive(Parser)]
#[command(
    name = "boota",
    version,
    about = "boot a packaged OS image from a disk image file",
    long_about = "Runs the packaged-image boot pipeline against a disk image: locate, \
                  verify (optional), unpack, assemble the device tree, build the kernel \
                  command line and print the next-stage handoff."
)]
struct Cli {
    /// Disk image backing the block device
    #[arg(long)]
    disk: PathBuf,

    /// Partition table manifest: one `name start-block block-count` per line
    #[arg(long)]
    table: PathBuf,

    /// Block size of the disk image
    #[arg(long, default_value = "512", value_parser = clap::value_parser!(u64).range(1..))]
    block_size: u64,

    /// Image file staged at the load address for a RAM-sourced boot
    /// (`RAM avb <address>`)
    #[arg(long)]
    ram_image: Option<PathBuf>,

    /// Initial kernel command line
    #[arg(long, default_value = "")]
    cmdline: String,

    /// Active A/B slot letter for legacy partition naming
    #[arg(long)]
    slot: Option<char>,

    /// Report the device as verified-locked
    #[arg(long)]
    locked: bool,

    /// Platform identifier for the board_id token
    #[arg(long, default_value = "0x2a", value_parser = parse_hex_u32)]
    board_id: u32,

    /// Device number (accepted for command compatibility, single-disk here)
    device: u32,

    /// `[<partition>] [avb] <address>` as on the target console
    #[arg(trailing_var_arg = true, required = true)]
    rest: Vec<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        log::error!("boot failed: {e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let (partition, verify, addr) = parse_request(&cli.rest)?;
    let request = build_request(partition, verify, addr)?;
    log::info!("device {} (single-disk harness)", cli.device);

    let data = fs::read(&cli.disk)?;
    let manifest = fs::read_to_string(&cli.table)?;
    let dev = build_device(cli.block_size, data, &manifest)?;

    let mut space = RamSpace::new(0, SPACE_SIZE);
    let mut dt = FlatTreeOps;
    let board = HostBoard {
        platform_id: cli.board_id,
        locked: cli.locked,
        slot: cli.slot,
        bootloader_blocks: bootloader_blocks(&dev),
    };
    let mut bcb = RamBcb::new(load_bcb(&dev, &mut space));
    let mut console = HostConsole;

    let cfg = BootConfig {
        warn_ticks: warn_ticks_from_env(),
        initial_cmdline: cli.cmdline.clone(),
        kernel_addr: KERNEL_ADDR,
        ramdisk_addr: RAMDISK_ADDR,
        tables_addr: TABLES_ADDR,
        text_base: TEXT_BASE,
        dt_table_addr: DT_TABLE_ADDR,
        dto_table_addr: DTO_TABLE_ADDR,
    };

    if request.ram_source {
        let path = cli
            .ram_image
            .as_ref()
            .ok_or("RAM-sourced boot needs --ram-image")?;
        let image = fs::read(path)?;
        space.write_bytes(request.addr, &image)?;
        log::info!("staged {} image bytes at {:#x}", image.len(), request.addr);
    }

    let mut engine = if request.verify {
        Some(stage_for_verification(&dev, &mut space, cli, !cli.locked, request.ram_source)?)
    } else {
        None
    };

    let mut ctx = BootContext {
        space: &mut space,
        dt: &mut dt,
        board: &board,
        bcb: &mut bcb,
        console: &mut console,
    };
    let outcome = run_boot(
        &mut ctx,
        &dev,
        engine.as_mut().map(|e| e as &mut dyn VerifyOps),
        &cfg,
        &request,
    )?;

    println!("bootargs: {}", outcome.cmdline);
    println!("handoff:  {}", outcome.handoff.argv().join(" "));
    Ok(())
}

/// `[<partition>] [avb] <address>`: the address is always last, `avb`
/// directly in front of it selects verification, anything before that
/// names the boot partition.
fn parse_request(rest: &[String]) -> Result<(Option<String>, bool, u64), Box<dyn std::error::Error>> {
    let (addr_token, mut before) = match rest.split_last() {
        Some((last, before)) => (last, before),
        None => return Err("missing load address".into()),
    };
    let addr = parse_hex_u64(addr_token)?;

    let mut verify = false;
    if let Some((last, front)) = before.split_last() {
        if last == "avb" {
            verify = true;
            before = front;
        }
    }
    let partition = match before {
        [] => None,
        [name] => Some(name.clone()),
        _ => return Err("too many arguments".into()),
    };
    Ok((partition, verify, addr))
}

/// The virtual partition name `RAM` selects the resident-image boot path:
/// the image is already at the load address and only the tree partitions go
/// through the verification flow. Permitted only together with `avb`.
fn build_request(
    partition: Option<String>,
    verify: bool,
    addr: u64,
) -> Result<BootRequest, Box<dyn std::error::Error>> {
    let ram_source = partition.as_deref() == Some("RAM");
    if ram_source && !verify {
        return Err("RAM source is only supported with avb".into());
    }
    Ok(BootRequest {
        partition: if ram_source { None } else { partition },
        addr,
        verify,
        ram_source,
    })
}

fn parse_hex_u64(token: &str) -> Result<u64, std::num::ParseIntError> {
    let digits = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")).unwrap_or(token);
    u64::from_str_radix(digits, 16)
}

fn parse_hex_u32(token: &str) -> Result<u32, std::num::ParseIntError> {
    parse_hex_u64(token).map(|v| v as u32)
}

fn warn_ticks_from_env() -> u32 {
    match std::env::var(AVB_DELAY_ENV) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            log::warn!("bad {AVB_DELAY_ENV} value '{v}', using default");
            DEFAULT_WARN_TICKS
        }),
        Err(_) => DEFAULT_WARN_TICKS,
    }
}

/// Manifest lines are `name start-block block-count`; `#` starts a comment.
fn build_device(
    block_size: u64,
    data: Vec<u8>,
    manifest: &str,
) -> Result<MemBlockDevice, Box<dyn std::error::Error>> {
    let mut dev = MemBlockDevice::from_image(block_size, data);
    for line in manifest.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [name, start, blocks] = fields[..] else {
            return Err(format!("bad manifest line: '{line}'").into());
        };
        dev.add_partition(name, start.parse()?, blocks.parse()?);
    }
    Ok(dev)
}

/// Carve-out size source: the `bootloader` partition length when the
/// manifest declares one.
fn bootloader_blocks(dev: &dyn BlockDevice) -> Option<u32> {
    dev.partition("bootloader").map(|p| p.blocks as u32)
}

/// Seed the control message from a `misc` partition when present.
fn load_bcb(dev: &dyn BlockDevice, space: &mut dyn AddressSpace) -> BootloaderMessage {
    let mut msg = BootloaderMessage::zeroed();
    let Some(part) = dev.partition("misc") else {
        return msg;
    };
    let scratch = VERIFIED_BOOT_ADDR;
    let blocks = (2048 / part.block_size).max(1);
    if dev.read_blocks(part.start, blocks, scratch, space).is_err() {
        log::warn!("misc partition unreadable, control message zeroed");
        return msg;
    }
    if let Ok(raw) = space.read_bytes(scratch, 2048) {
        msg.command.copy_from_slice(&raw[0..32]);
        msg.status.copy_from_slice(&raw[32..64]);
        msg.recovery.copy_from_slice(&raw[64..832]);
        msg.stage.copy_from_slice(&raw[832..864]);
        msg.reserved.copy_from_slice(&raw[864..2048]);
    }
    msg
}

/// Pre-load the role partitions the way the on-target engine would, then
/// hand their addresses over through a pass-through flow. No signatures are
/// checked on the host; that is logged loudly on every run.
fn stage_for_verification(
    dev: &dyn BlockDevice,
    space: &mut dyn AddressSpace,
    cli: &Cli,
    unlocked: bool,
    ram_source: bool,
) -> Result<HostVerify, Box<dyn std::error::Error>> {
    // a RAM-sourced image supplies the boot buffer itself
    let stage: &[(&str, u64)] = if ram_source {
        &[("dtb", DT_TABLE_ADDR), ("dtbo", DTO_TABLE_ADDR)]
    } else {
        &[
            ("boot", VERIFIED_BOOT_ADDR),
            ("dtb", DT_TABLE_ADDR),
            ("dtbo", DTO_TABLE_ADDR),
        ]
    };
    let mut loaded = Vec::new();
    for &(role, addr) in stage {
        let name = match cli.slot {
            Some(letter) => format!("{role}_{letter}"),
            None => role.to_string(),
        };
        let part = dev
            .partition(&name)
            .ok_or_else(|| BootError::ResourceNotFound(format!("partition '{name}'")))?;
        dev.read_blocks(part.start, part.blocks, addr, space)?;
        // the flow reports base role names; the slot suffix only picks the
        // on-disk partition
        loaded.push(LoadedPartition {
            name: role.to_string(),
            addr,
            size: part.blocks * part.block_size,
        });
    }
    let suffix = cli.slot.map(|l| format!("_{l}")).unwrap_or_default();
    Ok(HostVerify {
        unlocked,
        data: SlotData {
            ab_suffix: suffix,
            cmdline: String::new(),
            loaded_partitions: loaded,
        },
    })
}

/// Pass-through verification engine for the host harness.
struct HostVerify {
    unlocked: bool,
    data: SlotData,
}

impl VerifyOps for HostVerify {
    fn read_is_device_unlocked(&mut self) -> BootResult<bool> {
        Ok(self.unlocked)
    }

    fn ab_flow(&mut self, requested: &[&str], _flags: SlotVerifyFlags) -> SlotVerifyResult {
        log::warn!("host engine: pass-through flow over {requested:?}, NO signatures checked");
        let kept: Vec<LoadedPartition> = self
            .data
            .loaded_partitions
            .iter()
            .filter(|p| requested.iter().any(|r| p.name.starts_with(r)))
            .cloned()
            .collect();
        SlotVerifyResult::Ok(SlotData {
            ab_suffix: self.data.ab_suffix.clone(),
            cmdline: self.data.cmdline.clone(),
            loaded_partitions: kept,
        })
    }
}

/// Tree collaborator for the host: the base tree is carried as-is, overlay
/// application and node edits are logged no-ops. The embedded port binds a
/// flattened-device-tree library here.
struct FlatTreeOps;

impl DeviceTreeOps for FlatTreeOps {
    fn apply_overlay(
        &mut self,
        _space: &mut dyn AddressSpace,
        tree: u64,
        overlay: u64,
        overlay_size: u32,
    ) -> BootResult<()> {
        log::info!("host tree: overlay {overlay:#x}+{overlay_size:#x} on {tree:#x} (no-op)");
        Ok(())
    }

    fn delete_node(
        &mut self,
        _space: &mut dyn AddressSpace,
        _tree: u64,
        path: &str,
    ) -> BootResult<bool> {
        log::info!("host tree: delete '{path}' (no-op)");
        Ok(false)
    }

    fn reserved_region(&self, _space: &dyn AddressSpace, _tree: u64, _path: &str) -> Option<u64> {
        None
    }
}

/// Board answers for the host, taken from the command line and manifest.
struct HostBoard {
    platform_id: u32,
    locked: bool,
    slot: Option<char>,
    bootloader_blocks: Option<u32>,
}

impl BoardInfo for HostBoard {
    fn platform_id(&self) -> BootResult<u32> {
        Ok(self.platform_id)
    }

    fn cpu_type(&self) -> BootResult<u32> {
        Err(BootError::ResourceNotFound("cpu product register".into()))
    }

    fn cpu_revision(&self) -> BootResult<(u32, u32)> {
        Err(BootError::ResourceNotFound("cpu revision register".into()))
    }

    fn lock_status(&self) -> BootResult<bool> {
        Ok(self.locked)
    }

    fn bootloader_size(&self) -> BootResult<u32> {
        self.bootloader_blocks
            .ok_or_else(|| BootError::ResourceNotFound("bootloader partition".into()))
    }

    fn active_slot(&self) -> Option<char> {
        self.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_grammar_variants() {
        let r = |toks: &[&str]| {
            parse_request(&toks.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap()
        };
        assert_eq!(r(&["0x10000"]), (None, false, 0x10000));
        assert_eq!(r(&["recovery", "0x10000"]), (Some("recovery".into()), false, 0x10000));
        assert_eq!(r(&["avb", "10000"]), (None, true, 0x10000));
        assert_eq!(
            r(&["boot_b", "avb", "0x10000"]),
            (Some("boot_b".into()), true, 0x10000)
        );
    }

    #[test]
    fn request_grammar_rejects_garbage() {
        assert!(parse_request(&[]).is_err());
        assert!(parse_request(&["zz".into()]).is_err());
        assert!(parse_request(&["a".into(), "b".into(), "avb".into(), "1".into()]).is_err());
    }

    #[test]
    fn ram_partition_selects_the_resident_image_path() {
        let req = build_request(Some("RAM".into()), true, 0x10000).unwrap();
        assert!(req.ram_source);
        assert!(req.verify);
        assert_eq!(req.partition, None);
        assert_eq!(req.addr, 0x10000);
    }

    #[test]
    fn ram_partition_without_avb_is_rejected() {
        assert!(build_request(Some("RAM".into()), false, 0x10000).is_err());
    }

    #[test]
    fn named_partitions_boot_from_storage() {
        let req = build_request(Some("boot_b".into()), true, 0x10000).unwrap();
        assert!(!req.ram_source);
        assert_eq!(req.partition.as_deref(), Some("boot_b"));
    }

    #[test]
    fn manifest_parses_with_comments() {
        let dev = build_device(
            512,
            vec![0; 512 * 64],
            "# disk layout\nboot_a 0 32  # packaged image\ndtb_a 32 8\n\n",
        )
        .unwrap();
        assert!(dev.partition("boot_a").is_some());
        assert_eq!(dev.partition("dtb_a").unwrap().start, 32);
        assert!(dev.partition("misc").is_none());
    }
}
