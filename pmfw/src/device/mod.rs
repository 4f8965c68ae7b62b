//! Logical devices and their bring-up and shutdown sequences.
//!
//! A device aggregates a power node, a list of clocks and a list of resets. Bring-up
//! walks `PwrOn -> ClkOn -> RstOff -> Running`; shutdown walks
//! `RstOn -> ClkOff -> PwrOff -> Unused`. When the power domain acknowledges later, the
//! device waits in `PwrOn` and [Registry::resume_waiting_devices] finishes the walk.
//!
//! Every sub-step is recorded per handle (clock handles) or per device (power), so a
//! sequence that failed half-way resumes where it stopped on the next attempt.

pub mod fsm;

use alloc::vec::Vec;
use log::{error, warn};

use crate::{
    error::{PmError, PmResult},
    hw::Platform,
    node::{Node, NodeId},
    power::PowerIdx,
    registry::Registry,
    requirement::ReqIdx,
    reset::{ResetAction, ResetIdx},
    subsystem::{Notification, SubsystemIdx},
};
use fsm::{DeviceFsm, DeviceState};

pub type DeviceIdx = usize;

#[derive(Debug)]
pub struct Device {
    pub node: Node<DeviceState>,
    pub power: Option<PowerIdx>,
    /// Head of the device's clock handle list.
    pub clocks: Option<usize>,
    /// Head of the device's reset handle list.
    pub resets: Option<usize>,
    /// Head of the device's requirement list.
    pub requirements: Option<ReqIdx>,
    /// Requirement whose change is being serviced.
    pub pending_reqm: Option<ReqIdx>,
    pub fsm: &'static DeviceFsm,
    /// State a bring-up waiting on the power domain is heading for.
    pub target: Option<DeviceState>,
    /// The device holds a reference on its power node.
    power_held: bool,
    /// The reference is kept only to meet a latency requirement.
    latency_hold: bool,
}

impl Device {
    pub fn new(id: NodeId, base_address: u32, power: Option<PowerIdx>, fsm: &'static DeviceFsm) -> Device {
        Device {
            node: Node::new(id, DeviceState::Unused, base_address),
            power,
            clocks: None,
            resets: None,
            requirements: None,
            pending_reqm: None,
            fsm,
            target: None,
            power_held: false,
            latency_hold: false,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.node.state
    }

    pub fn holds_power(&self) -> bool {
        self.power_held
    }
}

impl Registry {
    pub(crate) fn ensure_stable(&self, device: DeviceIdx) -> PmResult<()> {
        if self.device(device)?.node.state.is_stable() {
            Ok(())
        } else {
            Err(PmError::Busy)
        }
    }

    /// Drive `device` from its current state to `next` along a transition of its FSM.
    ///
    /// On failure the recorded state goes back to where it was; sub-steps already
    /// applied stay applied.
    pub fn change_state<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        device: DeviceIdx,
        next: DeviceState,
    ) -> PmResult<()> {
        let dev = self.device(device)?;
        let (id, from) = (dev.node.id, dev.node.state);
        if from == next {
            return Ok(());
        }
        if dev.fsm.transition(from, next).is_none() {
            warn!("Device #{}: no transition {:?} -> {:?}", id, from, next);
            return Err(PmError::InvalidParameter);
        }
        let result = match (from, next) {
            (DeviceState::Unused, DeviceState::Running | DeviceState::RuntimeSuspend) => {
                self.bring_up(hw, device, next)
            }
            (DeviceState::Running, DeviceState::Unused) => self.shut_down(hw, device),
            (DeviceState::Running, DeviceState::RuntimeSuspend) => {
                self.set_state(device, DeviceState::RuntimeSuspend);
                self.set_clocks(hw, device, false)
            }
            (DeviceState::RuntimeSuspend, DeviceState::Running) => {
                self.set_clocks(hw, device, true)
                    .map(|()| self.set_state(device, DeviceState::Running))
            }
            (DeviceState::RuntimeSuspend, DeviceState::Unused) => {
                // Clocks are already off.
                self.reset_device(hw, device, ResetAction::Assert)
                    .and_then(|()| {
                        self.set_state(device, DeviceState::ClkOff);
                        self.power_off(hw, device)
                    })
            }
            _ => {
                self.set_state(device, next);
                Ok(())
            }
        };
        if let Err(err) = result {
            error!("Device #{}: {:?} -> {:?} failed: {}", id, from, next, err);
            self.set_state(device, from);
            self.devices[device].target = None;
            return Err(err);
        }
        self.settled(device, from);
        Ok(())
    }

    fn set_state(&mut self, device: DeviceIdx, state: DeviceState) {
        let dev = &mut self.devices[device];
        dev.node.state = state;
        log::trace!("Device #{} -> {:?}", dev.node.id, state);
    }

    /// Notify holders if `device` came to rest somewhere other than `from`.
    fn settled(&mut self, device: DeviceIdx, from: DeviceState) {
        let dev = &mut self.devices[device];
        let state = dev.node.state;
        if !state.is_stable() {
            return;
        }
        dev.pending_reqm = None;
        if state == from {
            return;
        }
        let id = dev.node.id;
        let holders: Vec<SubsystemIdx> = self
            .device_requirements(device)
            .map(|r| &self.requirements[r])
            .filter(|req| req.allocated)
            .map(|req| req.subsystem)
            .collect();
        for subsystem in holders {
            self.notify(subsystem, Notification::StateChange { device: id, state });
        }
    }

    // region: Sequences

    /// Power up, then clocks (only when heading for `Running`), then resets.
    fn bring_up<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        device: DeviceIdx,
        target: DeviceState,
    ) -> PmResult<()> {
        self.set_state(device, DeviceState::PwrOn);
        let dev = &mut self.devices[device];
        let Some(power) = dev.power else {
            return self.finish_bring_up(hw, device, target);
        };
        if !dev.power_held {
            self.power.request(hw, power)?;
            self.devices[device].power_held = true;
        }
        self.devices[device].latency_hold = false;
        if !self.power.is_on(power) {
            debug_ex!("Device #{} waiting for power #{}", self.devices[device].node.id, self.power.get(power)?.node.id);
            self.devices[device].target = Some(target);
            return Ok(());
        }
        self.finish_bring_up(hw, device, target)
    }

    fn finish_bring_up<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        device: DeviceIdx,
        target: DeviceState,
    ) -> PmResult<()> {
        if target == DeviceState::Running {
            self.set_state(device, DeviceState::ClkOn);
            self.set_clocks(hw, device, true)?;
        }
        self.set_state(device, DeviceState::RstOff);
        self.reset_device(hw, device, ResetAction::Release)?;
        self.devices[device].target = None;
        self.set_state(device, target);
        Ok(())
    }

    fn shut_down<P: Platform + ?Sized>(&mut self, hw: &mut P, device: DeviceIdx) -> PmResult<()> {
        self.set_state(device, DeviceState::RstOn);
        self.reset_device(hw, device, ResetAction::Assert)?;
        self.set_state(device, DeviceState::ClkOff);
        self.set_clocks(hw, device, false)?;
        self.power_off(hw, device)
    }

    fn power_off<P: Platform + ?Sized>(&mut self, hw: &mut P, device: DeviceIdx) -> PmResult<()> {
        self.set_state(device, DeviceState::PwrOff);
        let dev = &self.devices[device];
        if let (true, Some(power)) = (dev.power_held, dev.power) {
            if self.needs_latency_hold(device) {
                self.devices[device].latency_hold = true;
            } else {
                self.power.release(hw, power)?;
                self.devices[device].power_held = false;
            }
        }
        self.set_state(device, DeviceState::Unused);
        Ok(())
    }

    /// Finish the bring-up of every device parked in `PwrOn` whose domain is now on.
    /// Failures are logged; the device falls back to `Unused` and keeps its power
    /// reference for the next attempt.
    pub fn resume_waiting_devices<P: Platform + ?Sized>(&mut self, hw: &mut P) {
        let waiting: Vec<DeviceIdx> = (0..self.devices.len())
            .filter(|&d| {
                let dev = &self.devices[d];
                dev.node.state == DeviceState::PwrOn
                    && dev.power.is_some_and(|p| self.power.is_on(p))
            })
            .collect();
        for device in waiting {
            let target = self.devices[device].target.unwrap_or(DeviceState::Running);
            if let Err(err) = self.finish_bring_up(hw, device, target) {
                error!("Device #{}: resume failed: {}", self.devices[device].node.id, err);
                self.set_state(device, DeviceState::Unused);
                self.devices[device].target = None;
            }
            self.settled(device, DeviceState::Unused);
        }
    }

    /// Drop every device inside `domains` to `Unused` with no power controller access,
    /// for domains about to be forced off. Clocks are released, requirements cleared
    /// and power references forgotten.
    pub(crate) fn detach_devices<P: Platform + ?Sized>(&mut self, hw: &mut P, domains: &[PowerIdx]) {
        let inside: Vec<DeviceIdx> = (0..self.devices.len())
            .filter(|&d| {
                self.devices[d]
                    .power
                    .is_some_and(|p| domains.iter().any(|&domain| self.power.is_within(p, domain)))
            })
            .collect();
        for device in inside {
            if let Err(err) = self.set_clocks(hw, device, false) {
                error!("Device #{}: releasing clocks failed: {}", self.devices[device].node.id, err);
            }
            let reqms: Vec<ReqIdx> = self.device_requirements(device).collect();
            for r in reqms {
                self.requirements[r].clear();
            }
            let dev = &mut self.devices[device];
            let from = dev.node.state;
            dev.power_held = false;
            dev.latency_hold = false;
            dev.target = None;
            self.set_state(device, DeviceState::Unused);
            self.settled(device, from);
        }
    }

    // endregion

    // region: Resources

    /// Take or drop the device's reference on every clock it uses. Handles already
    /// in the wanted state are skipped.
    fn set_clocks<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        device: DeviceIdx,
        enable: bool,
    ) -> PmResult<()> {
        let handles: Vec<usize> = self.clocks.device_handles(self.devices[device].clocks).collect();
        for h in handles {
            let handle = self.clocks.handle(h);
            if handle.active == enable {
                continue;
            }
            let clock = handle.clock;
            if enable {
                self.clocks.request(hw, clock)?;
            } else {
                self.clocks.release(hw, clock)?;
            }
            self.clocks.handle_mut(h).active = enable;
        }
        Ok(())
    }

    /// Apply `action` to every reset of the device. A shared reset is only asserted
    /// once no other running device sits behind it.
    pub fn reset_device<P: Platform + ?Sized>(
        &mut self,
        hw: &mut P,
        device: DeviceIdx,
        action: ResetAction,
    ) -> PmResult<()> {
        let resets: Vec<ResetIdx> = self.resets.device_resets(self.device(device)?.resets).collect();
        for reset in resets {
            if action != ResetAction::Release && self.reset_in_use_by_others(reset, device) {
                debug_ex!("Reset #{} still used, left released", self.resets.get(reset)?.node.id);
                continue;
            }
            self.resets.set_state(hw, &mut self.power, reset, action)?;
        }
        Ok(())
    }

    fn reset_in_use_by_others(&self, reset: ResetIdx, device: DeviceIdx) -> bool {
        self.resets
            .reset_devices(reset)
            .any(|other| {
                other != device
                    && matches!(
                        self.devices[other].node.state,
                        DeviceState::Running | DeviceState::RuntimeSuspend
                    )
            })
    }

    // endregion

    /// Recompute the lowest state that satisfies every current requirement on
    /// `device` and move it there.
    pub fn update_status<P: Platform + ?Sized>(&mut self, hw: &mut P, device: DeviceIdx) -> PmResult<()> {
        self.ensure_stable(device)?;
        let fsm = self.devices[device].fsm;
        let caps = self.max_caps(device);
        let mut state = fsm.state_with_caps(caps)?;
        let min_latency = self.min_requested_latency(device);
        let mut wakeup = fsm.wakeup_latency(state);
        if wakeup > min_latency {
            state = fsm.constrain_by_latency(state, caps, min_latency).ok_or_else(|| {
                warn!(
                    "Device #{}: no state meets {} us latency",
                    self.devices[device].node.id, min_latency
                );
                PmError::Failure
            })?;
            wakeup = fsm.wakeup_latency(state);
        }
        self.devices[device].node.latency_marg = min_latency - wakeup;
        self.change_state(hw, device, state)?;
        if self.devices[device].node.state == DeviceState::Unused {
            self.update_power_latency(hw, device)?;
        }
        Ok(())
    }

    /// Whether an unused device must keep its power domain on to wake up in time.
    fn needs_latency_hold(&self, device: DeviceIdx) -> bool {
        let dev = &self.devices[device];
        let Some(power) = dev.power.and_then(|p| self.power.get(p).ok()) else {
            return false;
        };
        let latency_set = self
            .device_requirements(device)
            .any(|r| self.requirements[r].set_latency);
        latency_set && dev.node.latency_marg < power.up_latency + power.down_latency
    }

    fn update_power_latency<P: Platform + ?Sized>(&mut self, hw: &mut P, device: DeviceIdx) -> PmResult<()> {
        let Some(power) = self.devices[device].power else {
            return Ok(());
        };
        let needed = self.needs_latency_hold(device);
        let dev = &self.devices[device];
        if needed && !dev.power_held {
            self.power.request(hw, power)?;
            let dev = &mut self.devices[device];
            dev.power_held = true;
            dev.latency_hold = true;
            debug_ex!("Device #{} holds its power node for latency", dev.node.id);
        } else if !needed && dev.latency_hold {
            self.power.release(hw, power)?;
            let dev = &mut self.devices[device];
            dev.power_held = false;
            dev.latency_hold = false;
        }
        Ok(())
    }

    /// Worst-case time for `device` to become usable from where it is now.
    pub fn wakeup_latency(&self, device: DeviceIdx) -> PmResult<u32> {
        let dev = self.device(device)?;
        if dev.node.state == DeviceState::Running {
            return Ok(0);
        }
        let mut latency = dev.fsm.wakeup_latency(dev.node.state);
        let mut cur = dev.power;
        while let Some(p) = cur {
            let node = self.power.get(p)?;
            if self.power.is_on(p) {
                break;
            }
            latency = latency.saturating_add(node.up_latency);
            cur = node.parent;
        }
        Ok(latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hw::sim::{self, SimEvent, SimPlatform},
        requirement::{Capabilities, MAX_QOS},
        reset::ResetState,
        subsystem::SubsystemState,
    };

    fn setup() -> (Registry, SimPlatform, SubsystemIdx) {
        let mut sim = SimPlatform::demo();
        let mut reg = Registry::build(&sim::demo_topology(), &mut sim).unwrap();
        let s = reg.create_subsystem().unwrap();
        reg.set_subsystem_state(&mut sim, s, SubsystemState::Online).unwrap();
        (reg, sim, s)
    }

    #[test]
    fn bring_up_order_is_power_clock_reset() {
        let (mut reg, mut sim, _) = setup();
        let uart = reg.device_index(sim::DEV_UART0).unwrap();
        sim.clear_events();
        reg.change_state(&mut sim, uart, DeviceState::Running).unwrap();
        assert_eq!(reg.device(uart).unwrap().state(), DeviceState::Running);

        let power = sim.event_index(|e| matches!(e, SimEvent::PowerUp(id) if *id == sim::PD_LPD)).unwrap();
        let clock = sim.event_index(|e| e.is_write_to(sim::CLK_UART_CTRL)).unwrap();
        let reset = sim.event_index(|e| e.is_write_to(sim::RST_CTRL0)).unwrap();
        assert!(power < clock && clock < reset);
        let rst = reg.reset_index(sim::RST_UART).unwrap();
        assert_eq!(reg.resets.state(&mut sim, rst), Ok(ResetState::Released));
    }

    #[test]
    fn shutdown_runs_in_reverse() {
        let (mut reg, mut sim, _) = setup();
        let uart = reg.device_index(sim::DEV_UART0).unwrap();
        let lpd = reg.power_index(sim::PD_LPD).unwrap();
        reg.change_state(&mut sim, uart, DeviceState::Running).unwrap();
        sim.clear_events();
        reg.change_state(&mut sim, uart, DeviceState::Unused).unwrap();

        let reset = sim.event_index(|e| e.is_write_to(sim::RST_CTRL0)).unwrap();
        let clock = sim.event_index(|e| e.is_write_to(sim::CLK_UART_CTRL)).unwrap();
        let power = sim.event_index(|e| matches!(e, SimEvent::PowerDown(id) if *id == sim::PD_LPD)).unwrap();
        assert!(reset < clock && clock < power);
        assert_eq!(reg.power.get(lpd).unwrap().use_count, 0);
        assert!(!reg.device(uart).unwrap().holds_power());
    }

    #[test]
    fn missing_transition_is_rejected() {
        let (mut reg, mut sim, _) = setup();
        let uart = reg.device_index(sim::DEV_UART0).unwrap();
        sim.clear_events();
        assert_eq!(
            reg.change_state(&mut sim, uart, DeviceState::ClkOn),
            Err(PmError::InvalidParameter)
        );
        assert!(sim.events.is_empty());
        assert_eq!(reg.change_state(&mut sim, uart, DeviceState::Unused), Ok(()));
    }

    #[test]
    fn suspend_from_unused_skips_clocks() {
        let (mut reg, mut sim, _) = setup();
        let uart = reg.device_index(sim::DEV_UART0).unwrap();
        let clk = reg.clock_index(sim::CLK_UART).unwrap();
        let lpd = reg.power_index(sim::PD_LPD).unwrap();
        let rst = reg.reset_index(sim::RST_UART).unwrap();
        reg.change_state(&mut sim, uart, DeviceState::RuntimeSuspend).unwrap();
        assert_eq!(reg.device(uart).unwrap().state(), DeviceState::RuntimeSuspend);
        assert!(reg.power.is_on(lpd));
        assert_eq!(reg.clocks.get(clk).unwrap().use_count, 0);
        assert_eq!(reg.resets.state(&mut sim, rst), Ok(ResetState::Released));

        reg.change_state(&mut sim, uart, DeviceState::Running).unwrap();
        assert_eq!(reg.clocks.get(clk).unwrap().use_count, 1);
    }

    #[test]
    fn runtime_suspend_only_touches_clocks() {
        let (mut reg, mut sim, _) = setup();
        let uart = reg.device_index(sim::DEV_UART0).unwrap();
        let clk = reg.clock_index(sim::CLK_UART).unwrap();
        let lpd = reg.power_index(sim::PD_LPD).unwrap();
        reg.change_state(&mut sim, uart, DeviceState::Running).unwrap();
        reg.change_state(&mut sim, uart, DeviceState::RuntimeSuspend).unwrap();
        assert_eq!(reg.clocks.get(clk).unwrap().use_count, 0);
        assert!(reg.power.is_on(lpd));

        reg.change_state(&mut sim, uart, DeviceState::Running).unwrap();
        assert_eq!(reg.clocks.get(clk).unwrap().use_count, 1);

        reg.change_state(&mut sim, uart, DeviceState::RuntimeSuspend).unwrap();
        reg.change_state(&mut sim, uart, DeviceState::Unused).unwrap();
        assert_eq!(reg.power.get(lpd).unwrap().use_count, 0);
        let rst = reg.reset_index(sim::RST_UART).unwrap();
        assert_eq!(reg.resets.state(&mut sim, rst), Ok(ResetState::Asserted));
    }

    #[test]
    fn shared_reset_stays_released_while_sibling_runs() {
        let (mut reg, mut sim, _) = setup();
        let uart0 = reg.device_index(sim::DEV_UART0).unwrap();
        let uart1 = reg.device_index(sim::DEV_UART1).unwrap();
        let rst = reg.reset_index(sim::RST_UART).unwrap();
        reg.change_state(&mut sim, uart0, DeviceState::Running).unwrap();
        reg.change_state(&mut sim, uart1, DeviceState::Running).unwrap();
        reg.change_state(&mut sim, uart0, DeviceState::Unused).unwrap();
        assert_eq!(reg.resets.state(&mut sim, rst), Ok(ResetState::Released));
        reg.change_state(&mut sim, uart1, DeviceState::Unused).unwrap();
        assert_eq!(reg.resets.state(&mut sim, rst), Ok(ResetState::Asserted));
    }

    #[test]
    fn failed_bring_up_restores_state_and_resumes_on_retry() {
        let (mut reg, mut sim, _) = setup();
        let uart = reg.device_index(sim::DEV_UART0).unwrap();
        let lpd = reg.power_index(sim::PD_LPD).unwrap();
        sim.set_register(sim::PLL_IO_STATUS, 0);
        assert_eq!(reg.change_state(&mut sim, uart, DeviceState::Running), Err(PmError::Failure));
        assert_eq!(reg.device(uart).unwrap().state(), DeviceState::Unused);
        // The power step is not undone.
        assert!(reg.power.is_on(lpd));
        assert!(reg.device(uart).unwrap().holds_power());

        sim.set_register(sim::PLL_IO_STATUS, 1 << sim::PLL_LOCK_SHIFT);
        reg.change_state(&mut sim, uart, DeviceState::Running).unwrap();
        assert_eq!(reg.power.get(lpd).unwrap().use_count, 1);
    }

    #[test]
    fn pending_power_parks_device_until_event() {
        let (mut reg, mut sim, s) = setup();
        let gem = reg.device_index(sim::DEV_GEM0).unwrap();
        let island = reg.power_index(sim::PD_FPD_GEM).unwrap();
        sim.defer_power(sim::PD_FPD_GEM);
        reg.request(&mut sim, s, gem, Capabilities::ACCESS, MAX_QOS).unwrap();
        assert_eq!(reg.device(gem).unwrap().state(), DeviceState::PwrOn);
        assert_eq!(reg.update_status(&mut sim, gem), Err(PmError::Busy));

        reg.power.handle_event(&mut sim, island).unwrap();
        reg.resume_waiting_devices(&mut sim);
        assert_eq!(reg.device(gem).unwrap().state(), DeviceState::Running);
        assert!(reg.device(gem).unwrap().pending_reqm.is_none());
    }

    #[test]
    fn latency_keeps_power_on_for_unused_device() {
        let (mut reg, mut sim, s) = setup();
        let ttc = reg.device_index(sim::DEV_TTC0).unwrap();
        let lpd = reg.power_index(sim::PD_LPD).unwrap();
        reg.add_requirement(s, ttc).unwrap();

        // Wake-up from unused takes 10 us; 30 us leaves less margin than LPD needs.
        reg.set_max_latency(&mut sim, s, ttc, 30).unwrap();
        assert_eq!(reg.device(ttc).unwrap().state(), DeviceState::Unused);
        assert_eq!(reg.device(ttc).unwrap().node.latency_marg, 20);
        assert!(reg.power.is_on(lpd));
        assert!(reg.device(ttc).unwrap().holds_power());

        // A stricter bound than any low state allows keeps the device running.
        reg.set_max_latency(&mut sim, s, ttc, 0).unwrap();
        assert_eq!(reg.device(ttc).unwrap().state(), DeviceState::Running);

        reg.set_max_latency(&mut sim, s, ttc, 5000).unwrap();
        assert_eq!(reg.device(ttc).unwrap().state(), DeviceState::Unused);
        assert!(!reg.device(ttc).unwrap().holds_power());
        assert!(!reg.power.is_on(lpd));
    }

    #[test]
    fn wakeup_latency_adds_power_up_time() {
        let (mut reg, mut sim, _) = setup();
        let ttc = reg.device_index(sim::DEV_TTC0).unwrap();
        let soc = reg.power.get(reg.power_index(sim::PD_SOC).unwrap()).unwrap().up_latency;
        assert_eq!(reg.wakeup_latency(ttc), Ok(10 + 50 + soc));
        reg.change_state(&mut sim, ttc, DeviceState::Running).unwrap();
        assert_eq!(reg.wakeup_latency(ttc), Ok(0));
    }
}
