//! Register-file platform for host runs.
//!
//! [SimPlatform] keeps every register in a map and records each write and power
//! controller call as a [SimEvent], so a sequence can be checked for ordering. The
//! power controller answers immediately unless a node was marked deferred (answers
//! [PowerAck::Pending]) or failing.
//!
//! [demo_topology] describes a small two-domain SoC wired to these registers.

use alloc::{
    collections::{BTreeMap, BTreeSet},
    vec,
    vec::Vec,
};

use super::{Platform, PowerAck, RegisterIo};
use crate::{
    clock::subnode::{ClockTopology, GenericTopology, SubNode},
    device::fsm::{GENERIC_DEVICE_FSM, LOW_LATENCY_DEVICE_FSM},
    error::{PmError, PmResult},
    node::{ClockSubclass, NodeId},
    reset::IsolationCell,
    topology::{ClockDesc, DeviceDesc, PowerDesc, ResetDesc, ResetHandlerDesc, TopologyDesc},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    Write { address: u32, value: u32 },
    PowerUp(NodeId),
    PowerDown(NodeId),
}

impl SimEvent {
    pub fn is_write_to(&self, address: u32) -> bool {
        matches!(self, SimEvent::Write { address: a, .. } if *a == address)
    }
}

#[derive(Debug, Default)]
pub struct SimPlatform {
    pub registers: BTreeMap<u32, u32>,
    pub events: Vec<SimEvent>,
    deferred: BTreeSet<NodeId>,
    failing: BTreeSet<NodeId>,
}

impl SimPlatform {
    /// Every register reads zero.
    pub fn new() -> SimPlatform {
        SimPlatform::default()
    }

    /// Registers hold the reset values of the [demo_topology] SoC: PLLs in reset and
    /// reporting lock, every gate closed, every reset released.
    pub fn demo() -> SimPlatform {
        let mut sim = SimPlatform::new();
        for &(address, value) in RESET_VALUES {
            sim.registers.insert(address, value);
        }
        sim
    }

    /// Preset a register without recording an event.
    pub fn set_register(&mut self, address: u32, value: u32) {
        self.registers.insert(address, value);
    }

    pub fn register(&self, address: u32) -> u32 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Position of the first recorded event matching `pred`.
    pub fn event_index(&self, pred: impl FnMut(&SimEvent) -> bool) -> Option<usize> {
        self.events.iter().position(pred)
    }

    /// Values written to `address`, oldest first.
    pub fn writes_to(&self, address: u32) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Write { address: a, value } if *a == address => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// Power transitions of `node` complete later, through a power event.
    pub fn defer_power(&mut self, node: NodeId) {
        self.deferred.insert(node);
    }

    /// Power transitions of `node` fail.
    pub fn fail_power(&mut self, node: NodeId) {
        self.failing.insert(node);
    }

    /// Forget every deferred and failing node.
    pub fn clear_deferred(&mut self) {
        self.deferred.clear();
        self.failing.clear();
    }

    fn ack(&self, node: NodeId) -> PmResult<PowerAck> {
        if self.failing.contains(&node) {
            Err(PmError::Failure)
        } else if self.deferred.contains(&node) {
            Ok(PowerAck::Pending)
        } else {
            Ok(PowerAck::Done)
        }
    }
}

impl RegisterIo for SimPlatform {
    fn read(&mut self, address: u32) -> u32 {
        self.register(address)
    }

    fn write(&mut self, address: u32, value: u32) {
        self.events.push(SimEvent::Write { address, value });
        self.registers.insert(address, value);
    }
}

impl Platform for SimPlatform {
    fn power_up(&mut self, node: NodeId) -> PmResult<PowerAck> {
        self.events.push(SimEvent::PowerUp(node));
        self.ack(node)
    }

    fn power_down(&mut self, node: NodeId) -> PmResult<PowerAck> {
        self.events.push(SimEvent::PowerDown(node));
        self.ack(node)
    }
}

// region: Demo SoC

pub const PD_SOC: NodeId = NodeId::power(0);
pub const PD_LPD: NodeId = NodeId::power(1);
pub const PD_FPD: NodeId = NodeId::power(2);
pub const PD_FPD_GEM: NodeId = NodeId::power(3);

pub const REF: NodeId = NodeId::clock(ClockSubclass::Ref, 0);
pub const PLL_IO: NodeId = NodeId::clock(ClockSubclass::Pll, 0);
pub const PLL_RPU: NodeId = NodeId::clock(ClockSubclass::Pll, 1);
pub const CLK_LPD_TOP: NodeId = NodeId::clock(ClockSubclass::Out, 0);
pub const CLK_UART: NodeId = NodeId::clock(ClockSubclass::Out, 1);
pub const CLK_GEM: NodeId = NodeId::clock(ClockSubclass::Out, 2);
pub const CLK_GEM_TSU: NodeId = NodeId::clock(ClockSubclass::Out, 3);
pub const CLK_TTC: NodeId = NodeId::clock(ClockSubclass::Out, 4);

pub const RST_UART: NodeId = NodeId::reset(0);
pub const RST_TTC: NodeId = NodeId::reset(1);
pub const RST_FPD: NodeId = NodeId::reset(2);
pub const RST_GEM: NodeId = NodeId::reset(3);
pub const RST_LPD: NodeId = NodeId::reset(4);
pub const RST_PS_SYS: NodeId = NodeId::reset(5);

pub const DEV_UART0: NodeId = NodeId::device(0);
pub const DEV_UART1: NodeId = NodeId::device(1);
pub const DEV_GEM0: NodeId = NodeId::device(2);
pub const DEV_TTC0: NodeId = NodeId::device(3);

pub const REF_RATE: u64 = 33_333_333;
pub const PLL_IO_MULT: u32 = 30;
pub const PLL_RPU_MULT: u32 = 24;
pub const PLL_RESET_SHIFT: u32 = 0;
pub const PLL_LOCK_SHIFT: u32 = 1;
const PLL_STATUS_OFFSET: u32 = 0x20;

pub const PLL_IO_CTRL: u32 = 0xFF5E_0020;
pub const PLL_IO_STATUS: u32 = PLL_IO_CTRL + PLL_STATUS_OFFSET;
pub const PLL_RPU_CTRL: u32 = 0xFF5E_0030;
pub const PLL_RPU_STATUS: u32 = PLL_RPU_CTRL + PLL_STATUS_OFFSET;
pub const CLK_UART_CTRL: u32 = 0xFF5E_0074;
pub const CLK_LPD_TOP_CTRL: u32 = 0xFF5E_00A8;
pub const CLK_TTC_CTRL: u32 = 0xFF5E_0124;
pub const CLK_GEM_CTRL: u32 = 0xFD1A_0050;

pub const RST_CTRL0: u32 = 0xFF5E_0238;
pub const RST_UART_SHIFT: u32 = 1;
const RST_TTC_SHIFT: u32 = 11;
pub const RST_CTRL_FPD: u32 = 0xFD1A_0100;
pub const RST_CTRL_LPD: u32 = 0xFF5E_023C;
pub const RST_CTRL_SYS: u32 = 0xFF5E_0218;

pub const ISO_CTRL0: u32 = 0xFFD8_0100;
pub const ISO_CTRL1: u32 = 0xFFD8_0104;

static RESET_VALUES: &[(u32, u32)] = &[
    (PLL_IO_CTRL, 1 << PLL_RESET_SHIFT),
    (PLL_IO_STATUS, 1 << PLL_LOCK_SHIFT),
    (PLL_RPU_CTRL, 1 << PLL_RESET_SHIFT),
    (PLL_RPU_STATUS, 1 << PLL_LOCK_SHIFT),
    (CLK_UART_CTRL, 0),
    (CLK_LPD_TOP_CTRL, 0),
    (CLK_TTC_CTRL, 0),
    (CLK_GEM_CTRL, 0),
    (RST_CTRL0, 0),
    (RST_CTRL_FPD, 0),
    (RST_CTRL_LPD, 0),
    (RST_CTRL_SYS, 0),
    (ISO_CTRL0, 0),
    (ISO_CTRL1, 0),
];

/// SoC, with a low-power and a full-power domain; the GEM sits on an island of the
/// full-power domain. Two UARTs share a clock and a reset.
pub fn demo_topology() -> TopologyDesc {
    let power = |id, parent, latency| PowerDesc {
        id,
        base_address: 0,
        parent,
        up_latency: latency,
        down_latency: latency,
    };
    let pll = |id, base_address, mult| ClockDesc::Pll {
        id,
        base_address,
        parent: REF,
        reset_shift: PLL_RESET_SHIFT,
        status_offset: PLL_STATUS_OFFSET,
        lock_shift: PLL_LOCK_SHIFT,
        mult,
    };
    let out = |id, base_address, parents, generic| ClockDesc::Out {
        id,
        base_address,
        parents,
        topology: ClockTopology::Generic(generic),
    };
    let reset = |id, address, shift, parents| ResetDesc {
        id,
        address,
        shift,
        width: 1,
        parents,
        handler: ResetHandlerDesc::Generic,
    };
    let uart = |id, base_address| DeviceDesc {
        id,
        base_address,
        power: Some(PD_LPD),
        clocks: vec![CLK_UART],
        resets: vec![RST_UART],
        fsm: &GENERIC_DEVICE_FSM,
    };

    TopologyDesc {
        power: vec![
            power(PD_SOC, None, 200),
            power(PD_LPD, Some(PD_SOC), 50),
            power(PD_FPD, Some(PD_SOC), 100),
            power(PD_FPD_GEM, Some(PD_FPD), 20),
        ],
        clocks: vec![
            ClockDesc::Ref { id: REF, rate: REF_RATE },
            pll(PLL_IO, PLL_IO_CTRL, PLL_IO_MULT),
            pll(PLL_RPU, PLL_RPU_CTRL, PLL_RPU_MULT),
            out(
                CLK_LPD_TOP,
                CLK_LPD_TOP_CTRL,
                vec![PLL_IO, PLL_RPU, REF],
                GenericTopology::MuxDivGate,
            ),
            out(CLK_UART, CLK_UART_CTRL, vec![CLK_LPD_TOP], GenericTopology::DivGate),
            out(CLK_GEM, CLK_GEM_CTRL, vec![PLL_IO, PLL_RPU], GenericTopology::MuxDivGate),
            ClockDesc::Out {
                id: CLK_GEM_TSU,
                base_address: 0,
                parents: vec![CLK_GEM],
                topology: ClockTopology::Custom(vec![SubNode::fixed_factor(1, 2)]),
            },
            out(CLK_TTC, CLK_TTC_CTRL, vec![CLK_LPD_TOP], GenericTopology::Gate),
        ],
        resets: vec![
            reset(RST_UART, RST_CTRL0, RST_UART_SHIFT, vec![]),
            reset(RST_TTC, RST_CTRL0, RST_TTC_SHIFT, vec![]),
            reset(RST_FPD, RST_CTRL_FPD, 0, vec![]),
            reset(RST_GEM, RST_CTRL_FPD, 1, vec![RST_FPD]),
            ResetDesc {
                handler: ResetHandlerDesc::LowPowerDomain,
                ..reset(RST_LPD, RST_CTRL_LPD, 14, vec![])
            },
            ResetDesc {
                handler: ResetHandlerDesc::SystemReset {
                    domains: vec![PD_LPD, PD_FPD],
                    isolation: vec![
                        IsolationCell { address: ISO_CTRL0, mask: 0b11 },
                        IsolationCell { address: ISO_CTRL1, mask: 0b100 },
                    ],
                },
                ..reset(RST_PS_SYS, RST_CTRL_SYS, 4, vec![])
            },
        ],
        devices: vec![
            uart(DEV_UART0, 0xFF00_0000),
            uart(DEV_UART1, 0xFF01_0000),
            DeviceDesc {
                id: DEV_GEM0,
                base_address: 0xFF0B_0000,
                power: Some(PD_FPD_GEM),
                clocks: vec![CLK_GEM, CLK_GEM_TSU],
                resets: vec![RST_GEM],
                fsm: &GENERIC_DEVICE_FSM,
            },
            DeviceDesc {
                id: DEV_TTC0,
                base_address: 0xFF11_0000,
                power: Some(PD_LPD),
                clocks: vec![CLK_TTC],
                resets: vec![RST_TTC],
                fsm: &LOW_LATENCY_DEVICE_FSM,
            },
        ],
    }
}

// endregion
