//! Shared test doubles for the collaborator traits.

use std::collections::HashMap;

use crate::avb::{SlotVerifyFlags, SlotVerifyResult, VerifyOps};
use crate::bootargs::BoardInfo;
use crate::devicetree::DeviceTreeOps;
use crate::error::{BootError, Result};
use crate::mem::AddressSpace;
use crate::ui::Console;

/// Records tree edits instead of performing them.
#[derive(Default)]
pub struct FakeDeviceTree {
    /// (tree address, overlay size) per successful overlay application.
    pub applied: Vec<(u64, u32)>,
    /// Overlay call indices that report failure.
    pub fail_overlay_indices: Vec<usize>,
    /// Node paths present in the fake tree.
    pub nodes: Vec<String>,
    /// Node paths deleted through [`DeviceTreeOps::delete_node`].
    pub deleted: Vec<String>,
    /// Node path -> `reg` address answers for reserved-region lookups.
    pub reserved: HashMap<String, u64>,
    calls: usize,
}

impl DeviceTreeOps for FakeDeviceTree {
    fn apply_overlay(
        &mut self,
        _space: &mut dyn AddressSpace,
        tree: u64,
        _overlay: u64,
        overlay_size: u32,
    ) -> Result<()> {
        let index = self.calls;
        self.calls += 1;
        if self.fail_overlay_indices.contains(&index) {
            return Err(BootError::DeviceTree(format!("overlay {index} rejected")));
        }
        self.applied.push((tree, overlay_size));
        Ok(())
    }

    fn delete_node(
        &mut self,
        _space: &mut dyn AddressSpace,
        _tree: u64,
        path: &str,
    ) -> Result<bool> {
        match self.nodes.iter().position(|n| n == path) {
            Some(i) => {
                self.deleted.push(self.nodes.remove(i));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn reserved_region(&self, _space: &dyn AddressSpace, _tree: u64, path: &str) -> Option<u64> {
        self.reserved.get(path).copied()
    }
}

/// Console with a scripted key press.
pub struct ScriptedConsole {
    /// `key_pressed` calls seen so far.
    pub polls: u32,
    /// `consume_key` calls seen so far.
    pub consumed: u32,
    key_at: Option<u32>,
}

impl ScriptedConsole {
    /// Never reports a key.
    pub fn no_keys() -> Self {
        Self { polls: 0, consumed: 0, key_at: None }
    }

    /// Reports a key once more than `polls` polls have happened.
    pub fn key_after(polls: u32) -> Self {
        Self { polls: 0, consumed: 0, key_at: Some(polls) }
    }
}

impl Console for ScriptedConsole {
    fn key_pressed(&mut self) -> bool {
        self.polls += 1;
        match self.key_at {
            Some(at) => self.polls > at,
            None => false,
        }
    }

    fn consume_key(&mut self) {
        self.consumed += 1;
    }

    fn tick_slice(&mut self) {}
}

/// Verification engine double with a canned flow result.
pub struct FakeVerifyOps {
    unlocked: bool,
    lock_query_fails: bool,
    result: SlotVerifyResult,
    /// Partition names the flow was asked for, once it ran.
    pub seen_requested: Option<Vec<String>>,
    /// Flags the flow received, once it ran.
    pub seen_flags: Option<SlotVerifyFlags>,
}

impl FakeVerifyOps {
    pub fn new(unlocked: bool, result: SlotVerifyResult) -> Self {
        Self {
            unlocked,
            lock_query_fails: false,
            result,
            seen_requested: None,
            seen_flags: None,
        }
    }

    pub fn lock_query_fails() -> Self {
        let mut ops = Self::new(false, SlotVerifyResult::ErrorIo);
        ops.lock_query_fails = true;
        ops
    }
}

impl VerifyOps for FakeVerifyOps {
    fn read_is_device_unlocked(&mut self) -> Result<bool> {
        if self.lock_query_fails {
            return Err(BootError::LockStateUnavailable);
        }
        Ok(self.unlocked)
    }

    fn ab_flow(&mut self, requested: &[&str], flags: SlotVerifyFlags) -> SlotVerifyResult {
        self.seen_requested = Some(requested.iter().map(|s| s.to_string()).collect());
        self.seen_flags = Some(flags);
        self.result.clone()
    }
}

/// Board double; `fail` makes every fallible query return that error.
pub struct FakeBoard {
    pub platform_id: u32,
    pub cpu_type: u32,
    pub cpu_revision: (u32, u32),
    pub locked: bool,
    pub bootloader_size: u32,
    pub slot: Option<char>,
    pub fail: Option<BootError>,
}

impl Default for FakeBoard {
    fn default() -> Self {
        Self {
            platform_id: 0x2a,
            cpu_type: 0x4f,
            cpu_revision: (1, 0),
            locked: false,
            bootloader_size: 512,
            slot: None,
            fail: None,
        }
    }
}

impl FakeBoard {
    fn get<T>(&self, value: T) -> Result<T> {
        match &self.fail {
            Some(e) => Err(e.clone()),
            None => Ok(value),
        }
    }
}

impl BoardInfo for FakeBoard {
    fn platform_id(&self) -> Result<u32> {
        self.get(self.platform_id)
    }

    fn cpu_type(&self) -> Result<u32> {
        self.get(self.cpu_type)
    }

    fn cpu_revision(&self) -> Result<(u32, u32)> {
        self.get(self.cpu_revision)
    }

    fn lock_status(&self) -> Result<bool> {
        self.get(self.locked)
    }

    fn bootloader_size(&self) -> Result<u32> {
        self.get(self.bootloader_size)
    }

    fn active_slot(&self) -> Option<char> {
        self.slot
    }
}
