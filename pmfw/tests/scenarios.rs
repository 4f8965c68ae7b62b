//! End-to-end runs of the command surface against the simulated SoC.

use pmfw::{
    Orchestrator, PmError,
    device::fsm::DeviceState,
    hw::sim::{self, SimEvent, SimPlatform},
    node::NodeId,
    power::PowerState,
    requirement::{Capabilities, MAX_QOS, UsagePolicy},
    reset::ResetAction,
    subsystem::SubsystemState,
};

const OWNER: NodeId = NodeId::subsystem(0);

fn orchestrator() -> Orchestrator<SimPlatform> {
    Orchestrator::new(&sim::demo_topology(), SimPlatform::demo()).unwrap()
}

fn online(pm: &mut Orchestrator<SimPlatform>) -> NodeId {
    let id = pm.create_subsystem(OWNER).unwrap();
    pm.set_subsystem_state(OWNER, id, SubsystemState::Online).unwrap();
    id
}

fn state(pm: &Orchestrator<SimPlatform>, device: NodeId) -> DeviceState {
    pm.get_device_status(OWNER, device).unwrap().state
}

fn power_users(pm: &Orchestrator<SimPlatform>, domain: NodeId) -> u32 {
    let reg = pm.registry();
    reg.power.get(reg.power_index(domain).unwrap()).unwrap().use_count
}

#[test]
fn request_brings_device_and_domain_up() {
    let mut pm = orchestrator();
    let s1 = online(&mut pm);
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::Unused);
    assert_eq!(power_users(&pm, sim::PD_LPD), 0);

    pm.request_device(s1, sim::DEV_UART0, Capabilities::MAX_CAP, MAX_QOS).unwrap();
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::Running);
    assert_eq!(power_users(&pm, sim::PD_LPD), 1);
}

#[test]
fn second_holder_keeps_device_running() {
    let mut pm = orchestrator();
    let s1 = online(&mut pm);
    let s2 = online(&mut pm);
    pm.request_device(s1, sim::DEV_UART0, Capabilities::MAX_CAP, MAX_QOS).unwrap();
    pm.request_device(s2, sim::DEV_UART0, Capabilities::MAX_CAP, MAX_QOS).unwrap();

    pm.release_device(s1, sim::DEV_UART0).unwrap();
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::Running);
    assert_eq!(power_users(&pm, sim::PD_LPD), 1);

    pm.release_device(s2, sim::DEV_UART0).unwrap();
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::Unused);
    assert_eq!(power_users(&pm, sim::PD_LPD), 0);
}

#[test]
fn out_of_range_parent_leaves_mux_untouched() {
    let mut pm = orchestrator();
    let before = pm.platform().register(sim::CLK_GEM_CTRL);
    pm.platform_mut().clear_events();
    assert_eq!(
        pm.set_clock_parent(OWNER, sim::CLK_GEM, 8),
        Err(PmError::InvalidParameter)
    );
    assert_eq!(pm.platform().register(sim::CLK_GEM_CTRL), before);
    assert!(pm.platform().writes_to(sim::CLK_GEM_CTRL).is_empty());
}

#[test]
fn system_reset_takes_domains_down_before_the_reset_bit() {
    let mut pm = orchestrator();
    let s = online(&mut pm);
    pm.request_device(s, sim::DEV_UART0, Capabilities::ACCESS, MAX_QOS).unwrap();
    pm.request_device(s, sim::DEV_GEM0, Capabilities::ACCESS, MAX_QOS).unwrap();
    pm.platform_mut().clear_events();

    pm.set_reset_state(OWNER, sim::RST_PS_SYS, ResetAction::Assert).unwrap();

    let reg = pm.registry();
    for domain in [sim::PD_LPD, sim::PD_FPD, sim::PD_FPD_GEM] {
        let idx = reg.power_index(domain).unwrap();
        assert_eq!(reg.power.get(idx).unwrap().state(), PowerState::Off);
    }
    // No power controller round trip; the reset bit is the last thing written.
    let events = &pm.platform().events;
    assert!(events.iter().all(|e| matches!(e, SimEvent::Write { .. })));
    assert!(events.last().is_some_and(|e| e.is_write_to(sim::RST_CTRL_SYS)));
    assert!(events.len() > 1);
}

#[test]
fn pending_reservation_blocks_the_next_one() {
    let mut pm = orchestrator();
    let first = pm.create_subsystem(OWNER).unwrap();
    assert_eq!(pm.create_subsystem(OWNER), Err(PmError::NoAccess));
    pm.set_subsystem_state(OWNER, first, SubsystemState::Online).unwrap();
    assert!(pm.create_subsystem(OWNER).is_ok());
}

#[test]
fn destroyed_subsystem_holds_nothing() {
    let mut pm = orchestrator();
    let s = online(&mut pm);
    for dev in [sim::DEV_UART0, sim::DEV_GEM0, sim::DEV_TTC0] {
        pm.request_device(s, dev, Capabilities::ACCESS, MAX_QOS).unwrap();
    }
    pm.destroy_subsystem(OWNER, s).unwrap();

    let reg = pm.registry();
    let slot = reg.subsystem_index(s).unwrap();
    assert_eq!(reg.subsystem_requirements(slot).count(), 3);
    assert!(
        reg.subsystem_requirements(slot)
            .all(|r| !reg.requirement(r).unwrap().allocated)
    );
    assert!(reg.devices().all(|d| d.state() == DeviceState::Unused));
}

#[test]
fn idle_clocks_have_closed_gates() {
    let mut pm = orchestrator();
    let s = online(&mut pm);
    pm.request_device(s, sim::DEV_UART0, Capabilities::ACCESS, MAX_QOS).unwrap();
    pm.request_device(s, sim::DEV_GEM0, Capabilities::ACCESS, MAX_QOS).unwrap();
    pm.release_device(s, sim::DEV_UART0).unwrap();

    let ids: Vec<NodeId> = {
        let reg = pm.registry();
        (0..reg.clocks.len())
            .map(|c| reg.clocks.get(c).unwrap())
            .filter(|clk| clk.use_count == 0)
            .map(|clk| clk.node.id)
            .collect()
    };
    assert!(ids.contains(&sim::CLK_UART));
    for id in ids {
        // Clocks without a gate report an error, which is fine here.
        assert_ne!(pm.clock_gate(id), Ok(true), "clock {} idle but gated on", id);
    }
}

#[test]
fn deferred_power_up_finishes_on_event() {
    let mut pm = orchestrator();
    let s = online(&mut pm);
    pm.platform_mut().defer_power(sim::PD_FPD_GEM);
    pm.request_device(s, sim::DEV_GEM0, Capabilities::ACCESS, MAX_QOS).unwrap();
    assert_eq!(state(&pm, sim::DEV_GEM0), DeviceState::PwrOn);
    assert_eq!(
        pm.request_device(OWNER, sim::DEV_GEM0, Capabilities::ACCESS, MAX_QOS),
        Err(PmError::Busy)
    );

    pm.power_event(sim::PD_FPD_GEM).unwrap();
    assert_eq!(state(&pm, sim::DEV_GEM0), DeviceState::Running);
}

#[test]
fn exclusive_device_refuses_a_second_holder() {
    let mut pm = orchestrator();
    let s1 = online(&mut pm);
    let s2 = online(&mut pm);
    pm.add_requirement(OWNER, s1, sim::DEV_TTC0, UsagePolicy::NonShared).unwrap();
    pm.request_device(s1, sim::DEV_TTC0, Capabilities::ACCESS, MAX_QOS).unwrap();
    pm.add_requirement(OWNER, s2, sim::DEV_TTC0, UsagePolicy::NonShared).unwrap();
    assert_eq!(
        pm.request_device(s2, sim::DEV_TTC0, Capabilities::ACCESS, MAX_QOS),
        Err(PmError::NoAccess)
    );
    assert_eq!(
        pm.add_requirement(s1, s2, sim::DEV_UART0, UsagePolicy::Shared),
        Err(PmError::NoAccess)
    );
}

#[test]
fn suspend_then_resume_restores_requirements() {
    let mut pm = orchestrator();
    let s = online(&mut pm);
    pm.request_device(s, sim::DEV_UART0, Capabilities::ACCESS, MAX_QOS).unwrap();
    pm.set_subsystem_state(s, s, SubsystemState::Suspending).unwrap();
    pm.set_requirement(s, sim::DEV_UART0, Capabilities::empty(), MAX_QOS).unwrap();
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::Running);

    pm.set_subsystem_state(s, s, SubsystemState::Suspended).unwrap();
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::Unused);

    pm.set_subsystem_state(OWNER, s, SubsystemState::Online).unwrap();
    let status = pm.get_device_status(s, sim::DEV_UART0).unwrap();
    assert_eq!(status.state, DeviceState::Running);
    assert_eq!(status.caps, Capabilities::ACCESS);
}

#[test]
fn force_power_down_turns_the_domain_off() {
    let mut pm = orchestrator();
    let s = online(&mut pm);
    pm.request_device(s, sim::DEV_GEM0, Capabilities::ACCESS, MAX_QOS).unwrap();
    pm.force_power_down(OWNER, sim::PD_FPD).unwrap();
    assert_eq!(state(&pm, sim::DEV_GEM0), DeviceState::Unused);
    assert_eq!(power_users(&pm, sim::PD_FPD), 0);
    assert_eq!(pm.get_device_status(s, sim::DEV_GEM0).unwrap().usage, 0);
}

#[test]
fn pll_that_never_locks_fails_the_request() {
    let mut pm = orchestrator();
    let s = online(&mut pm);
    pm.platform_mut().set_register(sim::PLL_IO_STATUS, 0);
    assert_eq!(
        pm.request_device(s, sim::DEV_UART0, Capabilities::ACCESS, MAX_QOS),
        Err(PmError::Failure)
    );
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::Unused);
    assert_eq!(pm.get_device_status(s, sim::DEV_UART0).unwrap().usage, 0);

    pm.platform_mut()
        .set_register(sim::PLL_IO_STATUS, 1 << sim::PLL_LOCK_SHIFT);
    pm.request_device(s, sim::DEV_UART0, Capabilities::ACCESS, MAX_QOS).unwrap();
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::Running);
}

#[test]
fn raw_commands_round_trip_through_status_words() {
    let mut pm = orchestrator();
    let rsp = pm.dispatch(OWNER, 0x41, &[]);
    assert!(rsp.is_ok());
    let s = NodeId::from(rsp.values[0]);
    assert!(pm.dispatch(OWNER, 0x43, &[u32::from(s), 2]).is_ok());

    let uart = u32::from(sim::DEV_UART0);
    assert!(pm.dispatch(s, 0x0D, &[uart, 1, MAX_QOS]).is_ok());
    assert_eq!(pm.dispatch(s, 0x44, &[uart]).status, 0);
    assert_eq!(pm.dispatch(s, 0x44, &[u32::from(sim::PD_LPD)]).status, 2002);
    assert!(pm.dispatch(s, 0x0E, &[uart]).is_ok());
    assert_eq!(pm.dispatch(s, 0x0E, &[u32::from(sim::DEV_TTC0)]).status, 2002);
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::Unused);
}

#[test]
fn device_held_across_system_reset_releases_cleanly() {
    let mut pm = orchestrator();
    let s = online(&mut pm);
    pm.request_device(s, sim::DEV_UART0, Capabilities::ACCESS, MAX_QOS).unwrap();

    pm.set_reset_state(OWNER, sim::RST_PS_SYS, ResetAction::Assert).unwrap();
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::Unused);
    assert_eq!(pm.get_device_status(s, sim::DEV_UART0).unwrap().usage, 0);
    assert!(!pm.registry().devices().any(|d| d.holds_power()));
    pm.set_reset_state(OWNER, sim::RST_PS_SYS, ResetAction::Release).unwrap();

    pm.release_device(s, sim::DEV_UART0).unwrap();
    assert_eq!(power_users(&pm, sim::PD_LPD), 0);
    pm.request_device(s, sim::DEV_UART0, Capabilities::ACCESS, MAX_QOS).unwrap();
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::Running);
    assert_eq!(power_users(&pm, sim::PD_LPD), 1);
    pm.release_device(s, sim::DEV_UART0).unwrap();
    assert_eq!(power_users(&pm, sim::PD_LPD), 0);
}

#[test]
fn unusable_request_parks_device_in_runtime_suspend() {
    let mut pm = orchestrator();
    let s = online(&mut pm);
    pm.request_device(s, sim::DEV_UART0, Capabilities::UNUSABLE, MAX_QOS).unwrap();
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::RuntimeSuspend);
    assert_eq!(power_users(&pm, sim::PD_LPD), 1);
    assert_eq!(pm.clock_gate(sim::CLK_UART), Ok(false));

    pm.set_requirement(s, sim::DEV_UART0, Capabilities::ACCESS, MAX_QOS).unwrap();
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::Running);
    pm.release_device(s, sim::DEV_UART0).unwrap();
    assert_eq!(state(&pm, sim::DEV_UART0), DeviceState::Unused);
    assert_eq!(power_users(&pm, sim::PD_LPD), 0);
}
