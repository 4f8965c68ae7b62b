//! Reset lines.
//!
//! Each reset is a bit-field in a control register. Most resets use the generic
//! handler; a few have side effects on power domains and isolation and run a custom
//! handler (see [custom]). Reading the state is always a plain bit test.

pub mod custom;

use alloc::vec::Vec;
use config::build_flags::{MAX_RESET_HANDLES, MAX_RESET_PARENTS, MAX_RESETS};
use heapless::Vec as BoundedVec;
use log::warn;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use utils::{bits, table::FixedTable};

use crate::{
    device::DeviceIdx,
    error::{PmError, PmResult},
    hw::{Platform, RegisterIo},
    node::{Node, NodeId},
    power::{PowerIdx, PowerTree},
    registry::Registry,
};

pub type ResetIdx = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ResetAction {
    Release = 0,
    Assert = 1,
    Pulse = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ResetState {
    Released = 0,
    Asserted = 1,
}

/// A cross-domain isolation cell, enabled by setting `mask` at `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsolationCell {
    pub address: u32,
    pub mask: u32,
}

#[derive(Debug, Clone)]
pub enum ResetOps {
    Generic,
    /// Takes the listed domains down in memory and closes the isolation cells before
    /// the reset bit is written.
    SystemReset {
        domains: Vec<PowerIdx>,
        isolation: Vec<IsolationCell>,
    },
    /// Generic assert and release; pulse does nothing yet.
    LowPowerDomain,
}

#[derive(Debug, Clone)]
pub struct ResetNode {
    /// The base address is the control register.
    pub node: Node<ResetState>,
    pub shift: u32,
    pub width: u32,
    pub parents: BoundedVec<ResetIdx, MAX_RESET_PARENTS>,
    pub ops: ResetOps,
    /// Head of this reset's handle list.
    pub devices: Option<usize>,
}

impl ResetNode {
    pub fn new(id: NodeId, address: u32, shift: u32, width: u32, ops: ResetOps) -> ResetNode {
        ResetNode {
            node: Node::new(id, ResetState::Released, address),
            shift,
            width,
            parents: BoundedVec::new(),
            ops,
            devices: None,
        }
    }

    fn mask(&self) -> u32 {
        bits::field_mask(self.shift, self.width)
    }
}

/// One (reset, device) pair.
#[derive(Debug, Clone)]
pub struct ResetHandle {
    pub reset: ResetIdx,
    pub device: DeviceIdx,
    pub next_for_device: Option<usize>,
    pub next_for_reset: Option<usize>,
}

pub struct ResetController {
    resets: FixedTable<ResetNode>,
    handles: FixedTable<ResetHandle>,
}

impl Default for ResetController {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetController {
    pub fn new() -> ResetController {
        ResetController {
            resets: FixedTable::with_capacity(MAX_RESETS),
            handles: FixedTable::with_capacity(MAX_RESET_HANDLES),
        }
    }

    pub fn add(&mut self, reset: ResetNode) -> PmResult<ResetIdx> {
        Ok(self.resets.push(reset)?)
    }

    pub fn len(&self) -> usize {
        self.resets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resets.is_empty()
    }

    pub fn get(&self, idx: ResetIdx) -> PmResult<&ResetNode> {
        self.resets.get(idx).ok_or(PmError::InvalidParameter)
    }

    /// Record that `device` sits behind `reset`, prepending to both lists.
    pub fn attach(
        &mut self,
        reset: ResetIdx,
        device: DeviceIdx,
        device_head: &mut Option<usize>,
    ) -> PmResult<usize> {
        let next_for_reset = self.get(reset)?.devices;
        let handle = self.handles.push(ResetHandle {
            reset,
            device,
            next_for_device: *device_head,
            next_for_reset,
        })?;
        *device_head = Some(handle);
        self.resets[reset].devices = Some(handle);
        Ok(handle)
    }

    pub fn handle(&self, handle: usize) -> &ResetHandle {
        &self.handles[handle]
    }

    /// Resets of a device's list starting at `head`.
    pub fn device_resets(&self, head: Option<usize>) -> impl Iterator<Item = ResetIdx> + '_ {
        core::iter::successors(head, move |&h| self.handles[h].next_for_device)
            .map(move |h| self.handles[h].reset)
    }

    /// Devices attached to `reset`.
    pub fn reset_devices(&self, reset: ResetIdx) -> impl Iterator<Item = DeviceIdx> + '_ {
        let head = self.resets.get(reset).and_then(|rst| rst.devices);
        core::iter::successors(head, move |&h| self.handles[h].next_for_reset)
            .map(move |h| self.handles[h].device)
    }

    /// Generic bit test, whatever handler the reset uses.
    pub fn state<R: RegisterIo + ?Sized>(&self, io: &mut R, idx: ResetIdx) -> PmResult<ResetState> {
        let rst = self.get(idx)?;
        if io.read(rst.node.base_address) & rst.mask() != 0 {
            Ok(ResetState::Asserted)
        } else {
            Ok(ResetState::Released)
        }
    }

    pub fn set_state<R: RegisterIo + ?Sized>(
        &mut self,
        io: &mut R,
        power: &mut PowerTree,
        idx: ResetIdx,
        action: ResetAction,
    ) -> PmResult<()> {
        let rst = self.get(idx)?;
        if action == ResetAction::Release {
            for &parent in rst.parents.iter() {
                if self.state(io, parent)? == ResetState::Asserted {
                    warn!(
                        "Reset #{}: parent #{} still asserted",
                        rst.node.id, self.resets[parent].node.id
                    );
                    return Err(PmError::Failure);
                }
            }
        }
        match &rst.ops {
            ResetOps::Generic => generic(io, rst, action),
            ResetOps::SystemReset { domains, isolation } => {
                custom::system_reset(io, power, rst, domains, isolation, action)
            }
            ResetOps::LowPowerDomain => custom::low_power_domain(io, rst, action),
        }
        let state = self.state(io, idx)?;
        let rst = &mut self.resets[idx];
        rst.node.state = state;
        debug_ex!("Reset #{} {:?} -> {:?}", rst.node.id, action, state);
        Ok(())
    }
}

impl Registry {
    /// Apply `action` to `reset`. Before a system reset takes its domains down, the
    /// devices inside them are dropped to `Unused`.
    pub fn apply_reset<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        reset: ResetIdx,
        action: ResetAction,
    ) -> PmResult<()> {
        let forced = match &self.resets.get(reset)?.ops {
            ResetOps::SystemReset { domains, .. } if action != ResetAction::Release => {
                Some(domains.clone())
            }
            _ => None,
        };
        if let Some(domains) = forced {
            self.detach_devices(hw, &domains);
        }
        let Registry { resets, power, .. } = self;
        resets.set_state(hw, power, reset, action)
    }
}

fn generic<R: RegisterIo + ?Sized>(io: &mut R, rst: &ResetNode, action: ResetAction) {
    let mask = rst.mask();
    let address = rst.node.base_address;
    match action {
        ResetAction::Assert => io.read_modify_write(address, mask, mask),
        ResetAction::Release => io.read_modify_write(address, mask, 0),
        ResetAction::Pulse => {
            io.read_modify_write(address, mask, mask);
            io.read_modify_write(address, mask, 0);
        }
    }
}
