//! Static state machine descriptions for devices.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    error::{PmError, PmResult},
    requirement::{Capabilities, DEF_LATENCY},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DeviceState {
    Unused = 0,
    Running = 1,
    PwrOn = 2,
    ClkOn = 3,
    RstOff = 4,
    RstOn = 5,
    ClkOff = 6,
    PwrOff = 7,
    Suspending = 8,
    RuntimeSuspend = 9,
}

impl DeviceState {
    /// States a device may rest in between commands.
    pub fn is_stable(self) -> bool {
        matches!(
            self,
            DeviceState::Unused | DeviceState::Running | DeviceState::RuntimeSuspend
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StateCap {
    pub state: DeviceState,
    /// Capabilities a device in this state satisfies.
    pub caps: Capabilities,
}

#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub from: DeviceState,
    pub to: DeviceState,
    pub latency: u32,
}

/// Legal states, ordered from lowest to highest power, and legal transitions.
#[derive(Debug)]
pub struct DeviceFsm {
    pub states: &'static [StateCap],
    pub transitions: &'static [Transition],
}

impl DeviceFsm {
    /// First state whose capabilities cover `caps`.
    pub fn state_with_caps(&self, caps: Capabilities) -> PmResult<DeviceState> {
        self.states
            .iter()
            .find(|s| s.caps.contains(caps))
            .map(|s| s.state)
            .ok_or(PmError::InvalidParameter)
    }

    pub fn transition(&self, from: DeviceState, to: DeviceState) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.from == from && t.to == to)
    }

    pub fn highest(&self) -> Option<DeviceState> {
        self.states.last().map(|s| s.state)
    }

    /// Time to get from `state` back to the highest state. Zero when the table has no
    /// such transition.
    pub fn wakeup_latency(&self, state: DeviceState) -> u32 {
        self.highest()
            .and_then(|highest| self.transition(state, highest))
            .map_or(0, |t| t.latency)
    }

    /// Lowest state at or above `target` that still covers `caps` and wakes up within
    /// `max_latency`.
    pub fn constrain_by_latency(
        &self,
        target: DeviceState,
        caps: Capabilities,
        max_latency: u32,
    ) -> Option<DeviceState> {
        let start = self.states.iter().position(|s| s.state == target)?;
        self.states[start..]
            .iter()
            .filter(|s| s.caps.contains(caps))
            .map(|s| s.state)
            .find(|&s| self.wakeup_latency(s) <= max_latency)
    }
}

// region: Built-in machines

const RUNNING_CAPS: Capabilities = Capabilities::from_bits_truncate(
    Capabilities::MAX_CAP.bits() | Capabilities::UNUSABLE.bits(),
);

static GENERIC_STATES: [StateCap; 3] = [
    StateCap { state: DeviceState::Unused, caps: Capabilities::empty() },
    StateCap { state: DeviceState::RuntimeSuspend, caps: Capabilities::UNUSABLE },
    StateCap { state: DeviceState::Running, caps: RUNNING_CAPS },
];

static GENERIC_TRANSITIONS: [Transition; 6] = [
    Transition { from: DeviceState::Running, to: DeviceState::Unused, latency: DEF_LATENCY },
    Transition { from: DeviceState::Unused, to: DeviceState::Running, latency: DEF_LATENCY },
    Transition { from: DeviceState::Unused, to: DeviceState::RuntimeSuspend, latency: DEF_LATENCY },
    Transition { from: DeviceState::RuntimeSuspend, to: DeviceState::Unused, latency: DEF_LATENCY },
    Transition { from: DeviceState::RuntimeSuspend, to: DeviceState::Running, latency: DEF_LATENCY },
    Transition { from: DeviceState::Running, to: DeviceState::RuntimeSuspend, latency: DEF_LATENCY },
];

/// Machine shared by most peripherals.
pub static GENERIC_DEVICE_FSM: DeviceFsm = DeviceFsm {
    states: &GENERIC_STATES,
    transitions: &GENERIC_TRANSITIONS,
};

static LOW_LATENCY_TRANSITIONS: [Transition; 6] = [
    Transition { from: DeviceState::Running, to: DeviceState::Unused, latency: 10 },
    Transition { from: DeviceState::Unused, to: DeviceState::Running, latency: 10 },
    Transition { from: DeviceState::Unused, to: DeviceState::RuntimeSuspend, latency: 10 },
    Transition { from: DeviceState::RuntimeSuspend, to: DeviceState::Unused, latency: 5 },
    Transition { from: DeviceState::RuntimeSuspend, to: DeviceState::Running, latency: 5 },
    Transition { from: DeviceState::Running, to: DeviceState::RuntimeSuspend, latency: 5 },
];

/// Same states as [GENERIC_DEVICE_FSM], for devices that wake in a few microseconds
/// (timers, watchdogs).
pub static LOW_LATENCY_DEVICE_FSM: DeviceFsm = DeviceFsm {
    states: &GENERIC_STATES,
    transitions: &LOW_LATENCY_TRANSITIONS,
};

// endregion
