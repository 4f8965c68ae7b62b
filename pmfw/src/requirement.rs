//! Requirement tracker.
//!
//! A [Requirement] binds one subsystem to one device. It sits in two index lists: the
//! device's list (every subsystem that ever referenced the device) and the subsystem's
//! list (every device it ever referenced). Requirements are never unlinked; releasing
//! one clears it back to minimum values.
//!
//! `curr` is what the device currently honours. `next` is what the subsystem scheduled
//! while suspending, or what it held before suspending once the slots were swapped.

use alloc::vec::Vec;
use bitflags::bitflags;
use log::warn;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    device::DeviceIdx,
    error::{PmError, PmResult},
    hw::Platform,
    registry::Registry,
    subsystem::{Notification, SubsystemIdx, SubsystemState},
};

bitflags! {
    pub struct Capabilities: u32 {
        const ACCESS   = 1 << 0;
        const CONTEXT  = 1 << 1;
        const WAKEUP   = 1 << 2;
        /// The device may sit in a low power state it cannot be accessed in.
        const UNUSABLE = 1 << 3;
        const MAX_CAP  = Self::ACCESS.bits | Self::CONTEXT.bits | Self::WAKEUP.bits;
    }
}

pub const MAX_LATENCY: u32 = 0xFFFF;
pub const DEF_LATENCY: u32 = MAX_LATENCY;
pub const MAX_QOS: u32 = 100;
pub const DEF_QOS: u32 = MAX_QOS;

/// Usage bit: the querying subsystem holds the device.
pub const USAGE_CURRENT_SUBSYSTEM: u32 = 1 << 0;
/// Usage bit: some other subsystem holds the device.
pub const USAGE_OTHER_SUBSYSTEM: u32 = 1 << 1;

pub type ReqIdx = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReqSlot {
    pub caps: Capabilities,
    pub latency: u32,
    pub qos: u32,
}

impl ReqSlot {
    pub const MIN: ReqSlot = ReqSlot {
        caps: Capabilities::empty(),
        latency: MAX_LATENCY,
        qos: MAX_QOS,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum UsagePolicy {
    Shared = 0,
    /// Only one subsystem may hold the device.
    NonShared = 1,
    /// Held by one subsystem at a time, handed over on release.
    TimeShared = 2,
}

#[derive(Debug, Clone)]
pub struct Requirement {
    pub subsystem: SubsystemIdx,
    pub device: DeviceIdx,
    pub curr: ReqSlot,
    pub next: ReqSlot,
    /// The subsystem actively requested the device, as opposed to merely being linked.
    pub allocated: bool,
    /// `next.latency` was set explicitly and constrains the device state.
    pub set_latency: bool,
    pub policy: UsagePolicy,
    pub next_for_device: Option<ReqIdx>,
    pub next_for_subsystem: Option<ReqIdx>,
}

impl Requirement {
    pub(crate) fn clear(&mut self) {
        self.curr = ReqSlot::MIN;
        self.next = ReqSlot::MIN;
        self.allocated = false;
        self.set_latency = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ReleaseScope {
    /// Exactly the given requirement.
    One = 0,
    /// Every requirement on the same device, across subsystems.
    Device = 1,
    /// Every allocated requirement of the same subsystem.
    SubsystemAllocated = 2,
    /// Every unallocated requirement of the same subsystem.
    SubsystemUnallocated = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    /// `next` overwrites `curr`; the previous values are lost.
    Immediate,
    /// `curr` and `next` trade places, so a later swap restores them.
    Swapping,
}

impl Registry {
    // region: Lists

    pub fn device_requirements(&self, device: DeviceIdx) -> impl Iterator<Item = ReqIdx> + '_ {
        let head = self.devices.get(device).and_then(|dev| dev.requirements);
        core::iter::successors(head, move |&r| self.requirements[r].next_for_device)
    }

    pub fn subsystem_requirements(
        &self,
        subsystem: SubsystemIdx,
    ) -> impl Iterator<Item = ReqIdx> + '_ {
        let head = self.subsystems.get(subsystem).and_then(|ss| ss.requirements);
        core::iter::successors(head, move |&r| self.requirements[r].next_for_subsystem)
    }

    pub fn find_requirement(&self, subsystem: SubsystemIdx, device: DeviceIdx) -> Option<ReqIdx> {
        self.device_requirements(device)
            .find(|&r| self.requirements[r].subsystem == subsystem)
    }

    /// Link `subsystem` to `device`, reusing the existing requirement if there is one.
    pub fn add_requirement(
        &mut self,
        subsystem: SubsystemIdx,
        device: DeviceIdx,
    ) -> PmResult<ReqIdx> {
        self.subsystem(subsystem)?;
        self.device(device)?;
        if let Some(existing) = self.find_requirement(subsystem, device) {
            return Ok(existing);
        }
        let reqm = self.requirements.push(Requirement {
            subsystem,
            device,
            curr: ReqSlot::MIN,
            next: ReqSlot::MIN,
            allocated: false,
            set_latency: false,
            policy: UsagePolicy::Shared,
            next_for_device: self.devices[device].requirements,
            next_for_subsystem: self.subsystems[subsystem].requirements,
        })?;
        self.devices[device].requirements = Some(reqm);
        self.subsystems[subsystem].requirements = Some(reqm);
        debug_ex!(
            "Requirement #{}: subsystem #{} -> device #{}",
            reqm,
            self.subsystems[subsystem].id,
            self.devices[device].node.id
        );
        Ok(reqm)
    }

    pub fn set_usage_policy(
        &mut self,
        subsystem: SubsystemIdx,
        device: DeviceIdx,
        policy: UsagePolicy,
    ) -> PmResult<()> {
        let reqm = self.add_requirement(subsystem, device)?;
        self.requirements[reqm].policy = policy;
        Ok(())
    }

    // endregion

    // region: Request / set / release

    /// Allocate `device` to `subsystem` and apply `caps` and `qos`.
    pub fn request<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        subsystem: SubsystemIdx,
        device: DeviceIdx,
        caps: Capabilities,
        qos: u32,
    ) -> PmResult<()> {
        self.ensure_stable(device)?;
        let reqm = self.add_requirement(subsystem, device)?;
        if self.requirements[reqm].allocated {
            return Ok(());
        }
        if self.requirements[reqm].policy != UsagePolicy::Shared {
            let taken = self.device_requirements(device).any(|r| {
                let other = &self.requirements[r];
                r != reqm && other.allocated
            });
            if taken {
                warn!(
                    "Device #{}: held exclusively, subsystem #{} denied",
                    self.devices[device].node.id, self.subsystems[subsystem].id
                );
                return Err(PmError::NoAccess);
            }
        }
        self.requirements[reqm].allocated = true;
        let result = self.set_requirement(hw, subsystem, device, caps, qos);
        if result.is_err() {
            self.requirements[reqm].allocated = false;
        }
        result
    }

    /// Update what `subsystem` demands from `device`.
    ///
    /// While the subsystem is suspending the values are only scheduled into `next`;
    /// otherwise they take effect at once and the device follows.
    pub fn set_requirement<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        subsystem: SubsystemIdx,
        device: DeviceIdx,
        caps: Capabilities,
        qos: u32,
    ) -> PmResult<()> {
        self.ensure_stable(device)?;
        let reqm = self.find_requirement(subsystem, device).ok_or(PmError::NoAccess)?;
        self.devices[device].pending_reqm = Some(reqm);

        if self.subsystems[subsystem].state == SubsystemState::Suspending {
            let next = &mut self.requirements[reqm].next;
            next.caps = caps;
            next.qos = qos;
            return Ok(());
        }

        let saved = self.requirements[reqm].curr;
        let curr = &mut self.requirements[reqm].curr;
        curr.caps = caps;
        curr.qos = qos;
        if let Err(err) = self.update_status(hw, device) {
            self.requirements[reqm].curr = saved;
            return Err(err);
        }
        let req = &mut self.requirements[reqm];
        if caps == Capabilities::UNUSABLE {
            // Nothing to bring back on resume.
            req.next.caps = Capabilities::empty();
            req.next.qos = qos;
        } else {
            req.next = req.curr;
        }
        Ok(())
    }

    pub fn set_max_latency<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        subsystem: SubsystemIdx,
        device: DeviceIdx,
        latency: u32,
    ) -> PmResult<()> {
        let reqm = self.find_requirement(subsystem, device).ok_or(PmError::NoAccess)?;
        let req = &mut self.requirements[reqm];
        let saved = (req.next.latency, req.set_latency);
        req.next.latency = latency;
        req.set_latency = true;
        if let Err(err) = self.update_status(hw, device) {
            let req = &mut self.requirements[reqm];
            (req.next.latency, req.set_latency) = saved;
            return Err(err);
        }
        self.requirements[reqm].curr.latency = latency;
        Ok(())
    }

    /// Release `subsystem`'s hold on `device`. Releasing something never allocated
    /// succeeds.
    pub fn release<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        subsystem: SubsystemIdx,
        device: DeviceIdx,
    ) -> PmResult<()> {
        self.device(device)?;
        let reqm = self.find_requirement(subsystem, device).ok_or(PmError::NoAccess)?;
        self.release_requirement(hw, reqm, ReleaseScope::One)
    }

    /// Clear every requirement `scope` selects relative to `reqm` and let the affected
    /// devices drop. Stops at the first failure.
    pub fn release_requirement<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        reqm: ReqIdx,
        scope: ReleaseScope,
    ) -> PmResult<()> {
        let req = self.requirements.get(reqm).ok_or(PmError::InvalidParameter)?;
        let (subsystem, device) = (req.subsystem, req.device);
        let targets: Vec<ReqIdx> = match scope {
            ReleaseScope::One => alloc::vec![reqm],
            ReleaseScope::Device => self.device_requirements(device).collect(),
            ReleaseScope::SubsystemAllocated => self
                .subsystem_requirements(subsystem)
                .filter(|&r| self.requirements[r].allocated)
                .collect(),
            ReleaseScope::SubsystemUnallocated => self
                .subsystem_requirements(subsystem)
                .filter(|&r| !self.requirements[r].allocated)
                .collect(),
        };
        let force = scope == ReleaseScope::SubsystemUnallocated;
        for r in targets {
            self.release_one(hw, r, force)?;
        }
        Ok(())
    }

    fn release_one<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        reqm: ReqIdx,
        unallocated: bool,
    ) -> PmResult<()> {
        let req = &self.requirements[reqm];
        let device = req.device;
        if !req.allocated && !unallocated {
            return Ok(());
        }
        self.ensure_stable(device)?;
        let saved = self.requirements[reqm].clone();
        self.requirements[reqm].clear();
        self.devices[device].pending_reqm = Some(reqm);
        if let Err(err) = self.update_status(hw, device) {
            self.requirements[reqm] = saved;
            return Err(err);
        }
        if saved.allocated && !self.device_requirements(device).any(|r| self.requirements[r].allocated) {
            let id = self.devices[device].node.id;
            let linked: Vec<SubsystemIdx> = self
                .device_requirements(device)
                .map(|r| self.requirements[r].subsystem)
                .collect();
            for subsystem in linked {
                self.notify(subsystem, Notification::ZeroUsers { device: id });
            }
        }
        Ok(())
    }

    // endregion

    /// Move every requirement of `subsystem` from `next` into `curr` and let the
    /// devices follow.
    pub fn commit<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        subsystem: SubsystemIdx,
        policy: CommitPolicy,
    ) -> PmResult<()> {
        let reqms: Vec<ReqIdx> = self.subsystem_requirements(subsystem).collect();
        let mut touched: Vec<DeviceIdx> = Vec::new();
        for &r in &reqms {
            let req = &mut self.requirements[r];
            match policy {
                CommitPolicy::Immediate => req.curr = req.next,
                CommitPolicy::Swapping => core::mem::swap(&mut req.curr, &mut req.next),
            }
            if !touched.contains(&req.device) {
                touched.push(req.device);
            }
        }
        debug_ex!(
            "Subsystem #{}: committed {} requirements ({:?})",
            self.subsystems[subsystem].id,
            reqms.len(),
            policy
        );
        for device in touched {
            self.update_status(hw, device)?;
        }
        Ok(())
    }

    // region: Queries

    /// Bit 0: `subsystem` holds the device. Bit 1: another subsystem holds it.
    pub fn usage_status(&self, subsystem: SubsystemIdx, device: DeviceIdx) -> u32 {
        self.device_requirements(device)
            .map(|r| &self.requirements[r])
            .filter(|req| req.allocated)
            .fold(0, |usage, req| {
                usage
                    | if req.subsystem == subsystem {
                        USAGE_CURRENT_SUBSYSTEM
                    } else {
                        USAGE_OTHER_SUBSYSTEM
                    }
            })
    }

    /// One bit per subsystem slot holding `device`.
    pub fn permission_mask(&self, device: DeviceIdx) -> u32 {
        self.device_requirements(device)
            .map(|r| &self.requirements[r])
            .filter(|req| req.allocated)
            .fold(0, |mask, req| mask | 1 << req.subsystem)
    }

    pub fn is_requested(&self, subsystem: SubsystemIdx, device: DeviceIdx) -> bool {
        self.find_requirement(subsystem, device)
            .is_some_and(|r| self.requirements[r].allocated)
    }

    /// Union of the current capabilities every subsystem asks of `device`.
    pub fn max_caps(&self, device: DeviceIdx) -> Capabilities {
        self.device_requirements(device)
            .fold(Capabilities::empty(), |caps, r| caps | self.requirements[r].curr.caps)
    }

    /// Tightest latency any subsystem set explicitly for `device`.
    pub fn min_requested_latency(&self, device: DeviceIdx) -> u32 {
        self.device_requirements(device)
            .map(|r| &self.requirements[r])
            .filter(|req| req.set_latency)
            .map(|req| req.next.latency)
            .min()
            .unwrap_or(MAX_LATENCY)
    }

    // endregion
}
