//! The command surface.
//!
//! An [Orchestrator] owns the [Registry] and the platform. Every operation names its
//! caller by subsystem id; control operations are authorized before anything is
//! touched, and every failure comes back as a [PmError] status.

use log::{info, warn};

use crate::{
    clock::ClockIdx,
    command::{Command, Response, split_u64},
    device::fsm::DeviceState,
    error::{PmError, PmResult},
    hw::Platform,
    node::NodeId,
    registry::Registry,
    requirement::{Capabilities, ReleaseScope, UsagePolicy},
    reset::{ResetAction, ResetState},
    subsystem::{Notifier, PLATFORM_SUBSYSTEM, SubsystemIdx, SubsystemState},
    topology::TopologyDesc,
};

/// What [Orchestrator::get_device_status] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub state: DeviceState,
    /// The caller's current requirement on the device.
    pub caps: Capabilities,
    /// `USAGE_*` bits, seen from the caller.
    pub usage: u32,
}

pub struct Orchestrator<P: Platform> {
    registry: Registry,
    platform: P,
}

impl<P: Platform> Orchestrator<P> {
    pub fn new(desc: &TopologyDesc, mut platform: P) -> PmResult<Self> {
        let registry = Registry::build(desc, &mut platform)?;
        Ok(Orchestrator { registry, platform })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Resolve a calling subsystem. Slots that are offline cannot issue commands.
    fn caller(&self, id: NodeId) -> PmResult<SubsystemIdx> {
        let subsystem = self.registry.subsystem_index(id)?;
        if self.registry.subsystem(subsystem)?.state == SubsystemState::Offline {
            warn!("Subsystem #{} is offline", id);
            return Err(PmError::NoAccess);
        }
        Ok(subsystem)
    }

    /// Resolve `target`, which `caller` must be or own.
    fn managed(&self, caller: NodeId, target: NodeId) -> PmResult<SubsystemIdx> {
        let caller = self.caller(caller)?;
        let target = self.registry.subsystem_index(target)?;
        if caller != PLATFORM_SUBSYSTEM && caller != target {
            return Err(PmError::NoAccess);
        }
        Ok(target)
    }

    // region: Subsystems

    /// Reserve a subsystem slot. Only the platform owner creates subsystems.
    pub fn create_subsystem(&mut self, caller: NodeId) -> PmResult<NodeId> {
        if self.caller(caller)? != PLATFORM_SUBSYSTEM {
            return Err(PmError::NoAccess);
        }
        let slot = self.registry.create_subsystem()?;
        Ok(self.registry.subsystem(slot)?.id)
    }

    pub fn destroy_subsystem(&mut self, caller: NodeId, subsystem: NodeId) -> PmResult<()> {
        let target = self.managed(caller, subsystem)?;
        self.registry.destroy_subsystem(&mut self.platform, target)
    }

    pub fn set_subsystem_state(
        &mut self,
        caller: NodeId,
        subsystem: NodeId,
        state: SubsystemState,
    ) -> PmResult<()> {
        let target = self.managed(caller, subsystem)?;
        self.registry.set_subsystem_state(&mut self.platform, target, state)
    }

    pub fn register_notifier(&mut self, subsystem: NodeId, notifier: Option<Notifier>) -> PmResult<()> {
        let subsystem = self.registry.subsystem_index(subsystem)?;
        self.registry.register_notifier(subsystem, notifier)
    }

    // endregion

    // region: Devices and requirements

    /// Link `subsystem` to `device` under `policy`, without requesting it.
    pub fn add_requirement(
        &mut self,
        caller: NodeId,
        subsystem: NodeId,
        device: NodeId,
        policy: UsagePolicy,
    ) -> PmResult<()> {
        let target = self.managed(caller, subsystem)?;
        let device = self.registry.device_index(device)?;
        self.registry.set_usage_policy(target, device, policy)
    }

    pub fn request_device(
        &mut self,
        caller: NodeId,
        device: NodeId,
        caps: Capabilities,
        qos: u32,
    ) -> PmResult<()> {
        let subsystem = self.caller(caller)?;
        let device = self.registry.device_index(device)?;
        self.registry.request(&mut self.platform, subsystem, device, caps, qos)
    }

    pub fn release_device(&mut self, caller: NodeId, device: NodeId) -> PmResult<()> {
        let subsystem = self.caller(caller)?;
        let device = self.registry.device_index(device)?;
        self.registry.release(&mut self.platform, subsystem, device)
    }

    pub fn set_requirement(
        &mut self,
        caller: NodeId,
        device: NodeId,
        caps: Capabilities,
        qos: u32,
    ) -> PmResult<()> {
        let subsystem = self.caller(caller)?;
        let device = self.registry.device_index(device)?;
        self.registry
            .set_requirement(&mut self.platform, subsystem, device, caps, qos)
    }

    pub fn set_max_latency(&mut self, caller: NodeId, device: NodeId, latency: u32) -> PmResult<()> {
        let subsystem = self.caller(caller)?;
        let device = self.registry.device_index(device)?;
        self.registry
            .set_max_latency(&mut self.platform, subsystem, device, latency)
    }

    pub fn get_device_status(&self, caller: NodeId, device: NodeId) -> PmResult<DeviceStatus> {
        let subsystem = self.caller(caller)?;
        let idx = self.registry.device_index(device)?;
        let caps = match self.registry.find_requirement(subsystem, idx) {
            Some(r) => self.registry.requirement(r)?.curr.caps,
            None => Capabilities::empty(),
        };
        Ok(DeviceStatus {
            state: self.registry.device(idx)?.state(),
            caps,
            usage: self.registry.usage_status(subsystem, idx),
        })
    }

    // endregion

    // region: Resets and clocks

    pub fn set_reset_state(&mut self, caller: NodeId, reset: NodeId, action: ResetAction) -> PmResult<()> {
        let subsystem = self.caller(caller)?;
        let idx = self.registry.reset_index(reset)?;
        self.registry.check_access(subsystem, reset)?;
        self.registry.apply_reset(&mut self.platform, idx, action)
    }

    pub fn get_reset_state(&mut self, reset: NodeId) -> PmResult<ResetState> {
        let idx = self.registry.reset_index(reset)?;
        self.registry.resets.state(&mut self.platform, idx)
    }

    /// Resolve `clock` and check that `caller` may control it.
    fn controlled_clock(&self, caller: NodeId, clock: NodeId) -> PmResult<ClockIdx> {
        let subsystem = self.caller(caller)?;
        let idx = self.registry.clock_index(clock)?;
        self.registry.check_access(subsystem, clock)?;
        Ok(idx)
    }

    pub fn set_clock_parent(&mut self, caller: NodeId, clock: NodeId, parent_index: u32) -> PmResult<()> {
        let idx = self.controlled_clock(caller, clock)?;
        self.registry.clocks.set_parent(&mut self.platform, idx, parent_index)
    }

    pub fn set_clock_divider(&mut self, caller: NodeId, clock: NodeId, divider: u32) -> PmResult<()> {
        let idx = self.controlled_clock(caller, clock)?;
        self.registry.clocks.set_divider(&mut self.platform, idx, divider)
    }

    pub fn set_clock_gate(&mut self, caller: NodeId, clock: NodeId, enable: bool) -> PmResult<()> {
        let idx = self.controlled_clock(caller, clock)?;
        self.registry.clocks.set_gate(&mut self.platform, idx, enable)
    }

    pub fn clock_parent(&self, clock: NodeId) -> PmResult<u32> {
        self.registry.clocks.parent_index(self.registry.clock_index(clock)?)
    }

    pub fn clock_divider(&mut self, clock: NodeId) -> PmResult<u32> {
        let idx = self.registry.clock_index(clock)?;
        self.registry.clocks.divider(&mut self.platform, idx)
    }

    pub fn clock_gate(&mut self, clock: NodeId) -> PmResult<bool> {
        let idx = self.registry.clock_index(clock)?;
        self.registry.clocks.gate_enabled(&mut self.platform, idx)
    }

    pub fn clock_rate(&mut self, clock: NodeId) -> PmResult<u64> {
        let idx = self.registry.clock_index(clock)?;
        self.registry.clocks.rate(&mut self.platform, idx)
    }

    // endregion

    // region: Power

    pub fn check_permission(&self, caller: NodeId, node: NodeId) -> PmResult<()> {
        let subsystem = self.caller(caller)?;
        self.registry.check_access(subsystem, node)
    }

    /// The power controller finished the transition it deferred for `domain`. Devices
    /// waiting on it continue their bring-up.
    pub fn power_event(&mut self, domain: NodeId) -> PmResult<()> {
        let idx = self.registry.power_index(domain)?;
        self.registry.power.handle_event(&mut self.platform, idx)?;
        self.registry.resume_waiting_devices(&mut self.platform);
        Ok(())
    }

    /// Take `domain` down whoever uses it: every requirement on a device inside it is
    /// released, then the domain is powered down if anything still holds it.
    pub fn force_power_down(&mut self, caller: NodeId, domain: NodeId) -> PmResult<()> {
        if self.caller(caller)? != PLATFORM_SUBSYSTEM {
            return Err(PmError::NoAccess);
        }
        let idx = self.registry.power_index(domain)?;
        let inside: alloc::vec::Vec<_> = (0..self.registry.devices.len())
            .filter(|&d| {
                self.registry.devices[d]
                    .power
                    .is_some_and(|p| self.registry.power.is_within(p, idx))
            })
            .collect();
        for device in inside {
            let first = self.registry.device_requirements(device).next();
            if let Some(reqm) = first {
                self.registry
                    .release_requirement(&mut self.platform, reqm, ReleaseScope::Device)?;
            }
        }
        if self.registry.power.is_on(idx) {
            warn!("Power #{}: still in use after releasing its devices, forcing", domain);
            self.platform.power_down(domain)?;
            self.registry.power.force_off(idx);
        }
        info!("Power #{} forced down", domain);
        Ok(())
    }

    // endregion

    // region: Raw commands

    /// Run `cmd` on behalf of `caller`.
    pub fn handle(&mut self, caller: NodeId, cmd: Command) -> Response {
        let result = self.run(caller, cmd);
        if let Err(err) = &result {
            warn!("Command {:?} from #{} rejected: {}", cmd, caller, err);
        }
        Response::from_result(result)
    }

    /// Decode and run a raw command.
    pub fn dispatch(&mut self, caller: NodeId, api_id: u32, args: &[u32]) -> Response {
        match Command::decode(api_id, args) {
            Ok(cmd) => self.handle(caller, cmd),
            Err(err) => {
                warn!("Command {:#x} from #{}: malformed arguments {:?}", api_id, caller, args);
                Response::error(err)
            }
        }
    }

    fn run(&mut self, caller: NodeId, cmd: Command) -> PmResult<Response> {
        let done = || Response::ok(&[]);
        match cmd {
            Command::GetDeviceStatus { device } => {
                let status = self.get_device_status(caller, device)?;
                Ok(Response::ok(&[
                    u32::from(u8::from(status.state)),
                    status.caps.bits(),
                    status.usage,
                ]))
            }
            Command::ForcePowerDown { domain } => self.force_power_down(caller, domain).map(|()| done()),
            Command::RequestDevice { device, caps, qos } => {
                self.request_device(caller, device, caps, qos).map(|()| done())
            }
            Command::ReleaseDevice { device } => self.release_device(caller, device).map(|()| done()),
            Command::SetRequirement { device, caps, qos } => {
                self.set_requirement(caller, device, caps, qos).map(|()| done())
            }
            Command::SetMaxLatency { device, latency } => {
                self.set_max_latency(caller, device, latency).map(|()| done())
            }
            Command::SetResetState { reset, action } => {
                self.set_reset_state(caller, reset, action).map(|()| done())
            }
            Command::GetResetState { reset } => {
                let state = self.get_reset_state(reset)?;
                Ok(Response::ok(&[u32::from(state)]))
            }
            Command::SetClockGate { clock, enable } => {
                self.set_clock_gate(caller, clock, enable).map(|()| done())
            }
            Command::GetClockGate { clock } => Ok(Response::ok(&[self.clock_gate(clock)? as u32])),
            Command::SetClockDivider { clock, divider } => {
                self.set_clock_divider(caller, clock, divider).map(|()| done())
            }
            Command::GetClockDivider { clock } => Ok(Response::ok(&[self.clock_divider(clock)?])),
            Command::GetClockRate { clock } => Ok(Response::ok(&split_u64(self.clock_rate(clock)?))),
            Command::SetClockParent { clock, parent_index } => {
                self.set_clock_parent(caller, clock, parent_index).map(|()| done())
            }
            Command::GetClockParent { clock } => Ok(Response::ok(&[self.clock_parent(clock)?])),
            Command::AddRequirement {
                subsystem,
                device,
                policy,
            } => self
                .add_requirement(caller, subsystem, device, policy)
                .map(|()| done()),
            Command::CreateSubsystem => {
                let id = self.create_subsystem(caller)?;
                Ok(Response::ok(&[u32::from(id)]))
            }
            Command::DestroySubsystem { subsystem } => {
                self.destroy_subsystem(caller, subsystem).map(|()| done())
            }
            Command::SetSubsystemState { subsystem, state } => {
                self.set_subsystem_state(caller, subsystem, state).map(|()| done())
            }
            Command::CheckPermission { node } => self.check_permission(caller, node).map(|()| done()),
            Command::PowerEvent { domain } => self.power_event(domain).map(|()| done()),
        }
    }

    // endregion
}
