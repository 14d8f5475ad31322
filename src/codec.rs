//! codec.rs — kernel payload format sniffing and unpacking
//!
//! The first two payload bytes, read as a little-endian u16, pick the path:
//! gzip (`0x8B1F`), LZ4 frame (`0x2204`, behind the `lz4` cargo feature) or
//! a raw page-aligned copy. Decompression output is bounded by the address
//! gap in front of the kernel load address; blowing that budget is a codec
//! failure, never a silent truncation.

use std::io::Read;

use crate::error::{BootError, Result};
use crate::image::{align_up, BootImageHeader};
use crate::mem::AddressSpace;

/// gzip member magic, little-endian view of `1f 8b`.
pub const GZIP_MAGIC: u16 = 0x8B1F;
/// LZ4 frame magic low half, little-endian view of `04 22`.
pub const LZ4_MAGIC: u16 = 0x2204;

/// Unpack budget when neither the ramdisk address nor the fallback base
/// bounds the kernel region.
pub const KERNEL_UNPACKED_LIMIT: u64 = 0x108_0000;

/// Kernel payload encodings the sniffing step can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Gzip,
    Lz4,
    Raw,
}

/// Sniff the payload at `addr`. Exactly two bytes are inspected.
pub fn sniff(space: &dyn AddressSpace, addr: u64) -> Result<PayloadFormat> {
    let b = space.read_bytes(addr, 2)?;
    let magic = u16::from_le_bytes([b[0], b[1]]);
    Ok(match magic {
        GZIP_MAGIC => PayloadFormat::Gzip,
        #[cfg(feature = "lz4")]
        LZ4_MAGIC => PayloadFormat::Lz4,
        _ => PayloadFormat::Raw,
    })
}

/// Number of bytes the unpacked kernel may occupy at `kernel_addr`:
/// the gap to `ramdisk_addr` when the ramdisk sits above the kernel, else
/// the gap to `fallback_base`, else the fixed unpack limit.
pub fn unpack_capacity(hdr: &BootImageHeader, fallback_base: u64) -> u64 {
    let kernel = hdr.kernel_addr as u64;
    let ramdisk = hdr.ramdisk_addr as u64;
    if kernel < ramdisk {
        ramdisk - kernel
    } else if kernel < fallback_base {
        fallback_base - kernel
    } else {
        KERNEL_UNPACKED_LIMIT
    }
}

/// Unpack (or copy) the kernel payload at `payload_addr` to its load
/// address. Returns the achieved output size. Later layout math must keep
/// using the original `kernel_size`, not this value.
pub fn unpack_kernel(
    space: &mut dyn AddressSpace,
    hdr: &BootImageHeader,
    payload_addr: u64,
    capacity: u64,
) -> Result<u64> {
    match sniff(space, payload_addr)? {
        PayloadFormat::Gzip => {
            let src = space.read_bytes(payload_addr, hdr.kernel_size as usize)?;
            let decoder = flate2::read::GzDecoder::new(&src[..]);
            let out = bounded_decode(decoder, capacity)?;
            space.write_bytes(hdr.kernel_addr as u64, &out)?;
            log::info!("unzipped kernel image size: {}", out.len());
            Ok(out.len() as u64)
        }
        #[cfg(feature = "lz4")]
        PayloadFormat::Lz4 => {
            let src = space.read_bytes(payload_addr, hdr.kernel_size as usize)?;
            let decoder = lz4_flex::frame::FrameDecoder::new(&src[..]);
            let out = bounded_decode(decoder, capacity)?;
            space.write_bytes(hdr.kernel_addr as u64, &out)?;
            log::info!("LZ4 decompressed kernel image size: {}", out.len());
            Ok(out.len() as u64)
        }
        #[cfg(not(feature = "lz4"))]
        PayloadFormat::Lz4 => Err(BootError::Codec {
            detail: "LZ4 payload but codec not enabled".into(),
            partial: 0,
        }),
        PayloadFormat::Raw => {
            let len = align_up(hdr.kernel_size as u64, hdr.page_size as u64);
            space.copy_within(payload_addr, hdr.kernel_addr as u64, len as usize)?;
            Ok(len)
        }
    }
}

/// Drain a decoder, refusing to produce more than `capacity` bytes.
fn bounded_decode(decoder: impl Read, capacity: u64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut limited = decoder.take(capacity + 1);
    limited.read_to_end(&mut out).map_err(|e| BootError::Codec {
        detail: e.to_string(),
        partial: out.len() as u64,
    })?;
    if out.len() as u64 > capacity {
        return Err(BootError::Codec {
            detail: format!("output exceeds {capacity} byte budget"),
            partial: out.len() as u64,
        });
    }
    Ok(out)
}
