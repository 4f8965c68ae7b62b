//! Subsystem registry: partitions, their lifecycle, and who may control what.
//!
//! Slot [PLATFORM_SUBSYSTEM] is the platform owner. It is online from the start, never
//! destroyed, and passes every permission check.

use alloc::{boxed::Box, vec::Vec};
use log::{info, warn};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    clock::ClockIdx,
    device::{DeviceIdx, fsm::DeviceState},
    error::{PmError, PmResult},
    hw::Platform,
    node::{NodeClass, NodeId},
    registry::{NodeRef, Registry},
    requirement::{CommitPolicy, ReleaseScope, ReqIdx},
    reset::ResetIdx,
};

pub type SubsystemIdx = usize;

pub const PLATFORM_SUBSYSTEM: SubsystemIdx = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum SubsystemState {
    Offline = 0,
    /// Slot claimed, configuration in progress.
    Reserved = 1,
    Online = 2,
    /// Requirement writes are scheduled, not applied.
    Suspending = 3,
    /// Scheduled requirements applied; the previous ones are kept for resume.
    Suspended = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A device the subsystem holds settled in a new state.
    StateChange { device: NodeId, state: DeviceState },
    /// Nobody holds the device any more.
    ZeroUsers { device: NodeId },
}

pub type Notifier = Box<dyn FnMut(Notification)>;

pub struct Subsystem {
    pub id: NodeId,
    pub state: SubsystemState,
    /// Configured at least once, so it may come back online from offline.
    pub created: bool,
    /// Head of this subsystem's requirement list.
    pub requirements: Option<ReqIdx>,
    notifier: Option<Notifier>,
}

impl Subsystem {
    pub fn new(id: NodeId) -> Subsystem {
        Subsystem {
            id,
            state: SubsystemState::Offline,
            created: false,
            requirements: None,
            notifier: None,
        }
    }
}

impl core::fmt::Debug for Subsystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subsystem")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("created", &self.created)
            .field("requirements", &self.requirements)
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

impl Registry {
    // region: Lifecycle

    /// Claim a free slot. Only one slot may be reserved at a time.
    pub fn create_subsystem(&mut self) -> PmResult<SubsystemIdx> {
        if let Some(pending) = self.reserved {
            warn!("Subsystem #{} still being created", self.subsystems[pending].id);
            return Err(PmError::NoAccess);
        }
        let slot = (0..self.subsystems.len())
            .filter(|&s| s != PLATFORM_SUBSYSTEM)
            .find(|&s| {
                let ss = &self.subsystems[s];
                !ss.created && ss.state == SubsystemState::Offline
            })
            .ok_or(PmError::BufferExhausted)?;
        self.subsystems[slot].state = SubsystemState::Reserved;
        self.reserved = Some(slot);
        info!("Subsystem #{} reserved", self.subsystems[slot].id);
        Ok(slot)
    }

    /// Release everything `subsystem` holds and free its slot.
    pub fn destroy_subsystem<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        subsystem: SubsystemIdx,
    ) -> PmResult<()> {
        if subsystem == PLATFORM_SUBSYSTEM {
            return Err(PmError::InvalidParameter);
        }
        self.subsystem(subsystem)?;
        self.release_all(hw, subsystem)?;
        let ss = &mut self.subsystems[subsystem];
        ss.state = SubsystemState::Offline;
        ss.created = false;
        ss.notifier = None;
        if self.reserved == Some(subsystem) {
            self.reserved = None;
        }
        info!("Subsystem #{} destroyed", self.subsystems[subsystem].id);
        Ok(())
    }

    fn release_all<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        subsystem: SubsystemIdx,
    ) -> PmResult<()> {
        let Some(head) = self.subsystems[subsystem].requirements else {
            return Ok(());
        };
        self.release_requirement(hw, head, ReleaseScope::SubsystemAllocated)?;
        self.release_requirement(hw, head, ReleaseScope::SubsystemUnallocated)
    }

    /// Move `subsystem` to `next`, committing its requirements where the transition
    /// asks for it.
    pub fn set_subsystem_state<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        subsystem: SubsystemIdx,
        next: SubsystemState,
    ) -> PmResult<()> {
        use SubsystemState::*;

        let ss = self.subsystem(subsystem)?;
        let (id, curr) = (ss.id, ss.state);
        if subsystem == PLATFORM_SUBSYSTEM && next != Online {
            return Err(PmError::InvalidParameter);
        }
        match (curr, next) {
            (a, b) if a == b => return Ok(()),
            (Reserved, Online) => {
                self.reserved = None;
                self.subsystems[subsystem].created = true;
            }
            (Reserved, Offline) => return self.destroy_subsystem(hw, subsystem),
            (Offline, Online) if self.subsystems[subsystem].created => {}
            (Online, Suspending) => {}
            (Suspending, Online) => {
                // Suspend aborted: drop what was scheduled.
                for r in self.subsystem_requirements(subsystem).collect::<Vec<_>>() {
                    let req = &mut self.requirements[r];
                    req.next = req.curr;
                }
            }
            (Suspending, Suspended) | (Suspended, Online) => {
                self.commit(hw, subsystem, CommitPolicy::Swapping)?;
            }
            (Online | Suspending | Suspended, Offline) => {
                self.commit(hw, subsystem, CommitPolicy::Immediate)?;
            }
            _ => {
                warn!("Subsystem #{}: {:?} -> {:?} not allowed", id, curr, next);
                return Err(PmError::InvalidParameter);
            }
        }
        self.subsystems[subsystem].state = next;
        info!("Subsystem #{} {:?} -> {:?}", id, curr, next);
        Ok(())
    }

    pub fn register_notifier(
        &mut self,
        subsystem: SubsystemIdx,
        notifier: Option<Notifier>,
    ) -> PmResult<()> {
        self.subsystem(subsystem)?;
        self.subsystems[subsystem].notifier = notifier;
        Ok(())
    }

    pub(crate) fn notify(&mut self, subsystem: SubsystemIdx, event: Notification) {
        if let Some(notifier) = self
            .subsystems
            .get_mut(subsystem)
            .and_then(|ss| ss.notifier.as_mut())
        {
            notifier(event);
        }
    }

    // endregion

    // region: Permissions

    /// Whether `subsystem` may control `node`. `Err(NoAccess)` when it may not.
    pub fn check_access(&self, subsystem: SubsystemIdx, node: NodeId) -> PmResult<()> {
        self.subsystem(subsystem)?;
        let target = self.node(node)?;
        if subsystem == PLATFORM_SUBSYSTEM {
            return Ok(());
        }
        let allowed = match target {
            NodeRef::Device(device) => self.device_exclusive_to(subsystem, device),
            NodeRef::Clock(clock) => self.clock_exclusive_to(subsystem, clock),
            NodeRef::Reset(reset) => self.reset_used_by(subsystem, reset),
            NodeRef::Power(_) => false,
        };
        if allowed {
            Ok(())
        } else {
            debug_ex!("Subsystem #{}: no access to #{}", self.subsystems[subsystem].id, node);
            Err(PmError::NoAccess)
        }
    }

    /// `subsystem` holds `device`, and nobody else does.
    fn device_exclusive_to(&self, subsystem: SubsystemIdx, device: DeviceIdx) -> bool {
        self.held_only_by(subsystem, self.device_requirements(device))
    }

    /// Among `reqms`, the allocated ones all belong to `subsystem`, and there is one.
    fn held_only_by(&self, subsystem: SubsystemIdx, reqms: impl Iterator<Item = ReqIdx>) -> bool {
        let mut held = false;
        for r in reqms {
            let req = &self.requirements[r];
            if !req.allocated {
                continue;
            }
            if req.subsystem != subsystem {
                return false;
            }
            held = true;
        }
        held
    }

    /// Every device fed by `clock` that anyone holds is held by `subsystem` alone,
    /// and there is at least one.
    fn clock_exclusive_to(&self, subsystem: SubsystemIdx, clock: ClockIdx) -> bool {
        let reqms = self
            .clocks
            .clock_devices(clock)
            .flat_map(|device| self.device_requirements(device));
        self.held_only_by(subsystem, reqms)
    }

    /// `subsystem` actively uses a device behind `reset`.
    fn reset_used_by(&self, subsystem: SubsystemIdx, reset: ResetIdx) -> bool {
        self.resets.reset_devices(reset).any(|device| {
            self.find_requirement(subsystem, device).is_some_and(|r| {
                let req = &self.requirements[r];
                req.allocated && !req.curr.caps.is_empty()
            })
        })
    }

    // endregion

    pub fn subsystem_index(&self, id: NodeId) -> PmResult<SubsystemIdx> {
        let idx = id.index() as usize;
        if !id.is(NodeClass::Subsystem) || self.subsystems.get(idx).is_none_or(|ss| ss.id != id) {
            return Err(PmError::InvalidParameter);
        }
        Ok(idx)
    }
}
