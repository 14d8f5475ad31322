//! Verified-boot orchestration core for packaged OS images.
//!
//! The pipeline takes a packaged image (header plus page-aligned kernel,
//! ramdisk and tree payloads) from block storage or RAM to a next-stage
//! handoff: locate, optionally verify through the A/B slot engine, unpack
//! the kernel, assemble the device tree with its overlays, build the kernel
//! command line and extract the previous boot's reason.
//!
//! Everything platform-shaped sits behind a trait so the core itself stays
//! host-testable: memory access ([`mem::AddressSpace`]), block storage
//! ([`storage::BlockDevice`]), the verification engine
//! ([`avb::VerifyOps`]), tree manipulation ([`devicetree::DeviceTreeOps`]),
//! the persistent control message ([`reason::BcbStore`]), board queries
//! ([`bootargs::BoardInfo`]) and the operator console ([`ui::Console`]).
//! An embedded port implements those seven traits; the pipeline does not
//! change.

pub mod avb;
pub mod bootargs;
pub mod codec;
pub mod devicetree;
pub mod error;
pub mod handoff;
pub mod image;
pub mod mem;
pub mod pipeline;
pub mod reason;
pub mod storage;
pub mod ui;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{BootError, Result};
pub use pipeline::{run_boot, BootConfig, BootContext, BootOutcome, BootRequest};
