//! Sub-node chains describing how an output clock is derived from its parent.
//!
//! A chain is either one of the [GenericTopology] templates shared by many clocks, or a
//! custom list owned by a single clock. Register locations are offsets from the owning
//! clock's base address, which is what lets one template serve many clocks.

use alloc::vec::Vec;
use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use utils::bits;

bitflags! {
    pub struct SubNodeFlags: u32 {
        /// Rate changes are forwarded to the parent.
        const SET_RATE_PARENT     = 1 << 0;
        /// The register holds the divisor itself rather than divisor - 1.
        const DIVIDER_ONE_BASED   = 1 << 1;
        /// A register value of zero is legal and means divide by one.
        const DIVIDER_ALLOW_ZERO  = 1 << 2;
        /// Setting the gate bit stops the clock.
        const GATE_SET_TO_DISABLE = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubNodeKind {
    Mux { shift: u32, width: u32 },
    Divider { shift: u32, width: u32 },
    Gate { shift: u32 },
    FixedFactor { mult: u32, div: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubNode {
    /// Register offset from the clock's base address.
    pub offset: u32,
    pub kind: SubNodeKind,
    pub flags: SubNodeFlags,
}

impl SubNode {
    pub const fn mux(offset: u32, shift: u32, width: u32) -> SubNode {
        SubNode {
            offset,
            kind: SubNodeKind::Mux { shift, width },
            flags: SubNodeFlags::empty(),
        }
    }

    pub const fn divider(offset: u32, shift: u32, width: u32, flags: SubNodeFlags) -> SubNode {
        SubNode {
            offset,
            kind: SubNodeKind::Divider { shift, width },
            flags,
        }
    }

    pub const fn gate(offset: u32, shift: u32) -> SubNode {
        SubNode {
            offset,
            kind: SubNodeKind::Gate { shift },
            flags: SubNodeFlags::empty(),
        }
    }

    pub const fn fixed_factor(mult: u32, div: u32) -> SubNode {
        SubNode {
            offset: 0,
            kind: SubNodeKind::FixedFactor { mult, div },
            flags: SubNodeFlags::SET_RATE_PARENT,
        }
    }

    /// Bit-fields lie inside their register and a fixed factor never divides by zero.
    pub fn is_well_formed(&self) -> bool {
        match self.kind {
            SubNodeKind::Mux { shift, width } | SubNodeKind::Divider { shift, width } => {
                bits::field_in_word(shift, width)
            }
            SubNodeKind::Gate { shift } => bits::field_in_word(shift, 1),
            SubNodeKind::FixedFactor { div, .. } => div != 0,
        }
    }
}

// region: Generic templates

const GENERIC_MUX: SubNode = SubNode::mux(0, 0, 3);
const GENERIC_DIV: SubNode = SubNode::divider(
    0,
    8,
    10,
    SubNodeFlags::from_bits_truncate(
        SubNodeFlags::DIVIDER_ONE_BASED.bits() | SubNodeFlags::DIVIDER_ALLOW_ZERO.bits(),
    ),
);
const GENERIC_GATE: SubNode = SubNode::gate(0, 25);

static GATE: [SubNode; 1] = [GENERIC_GATE];
static DIV: [SubNode; 1] = [GENERIC_DIV];
static DIV_GATE: [SubNode; 2] = [GENERIC_DIV, GENERIC_GATE];
static MUX_GATE: [SubNode; 2] = [GENERIC_MUX, GENERIC_GATE];
static MUX_DIV: [SubNode; 2] = [GENERIC_MUX, GENERIC_DIV];
static MUX_DIV_GATE: [SubNode; 3] = [GENERIC_MUX, GENERIC_DIV, GENERIC_GATE];

/// Shared chains, all laid out in a single control register:
/// mux `[2:0]`, divider `[17:8]`, gate `[25]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum GenericTopology {
    Gate = 1,
    Div = 2,
    DivGate = 3,
    MuxGate = 4,
    MuxDiv = 5,
    MuxDivGate = 6,
}

impl GenericTopology {
    pub fn nodes(self) -> &'static [SubNode] {
        match self {
            GenericTopology::Gate => &GATE,
            GenericTopology::Div => &DIV,
            GenericTopology::DivGate => &DIV_GATE,
            GenericTopology::MuxGate => &MUX_GATE,
            GenericTopology::MuxDiv => &MUX_DIV,
            GenericTopology::MuxDivGate => &MUX_DIV_GATE,
        }
    }
}

// endregion

#[derive(Debug, Clone)]
pub enum ClockTopology {
    Generic(GenericTopology),
    Custom(Vec<SubNode>),
}

impl ClockTopology {
    pub fn nodes(&self) -> &[SubNode] {
        match self {
            ClockTopology::Generic(generic) => generic.nodes(),
            ClockTopology::Custom(nodes) => nodes,
        }
    }

    pub fn mux(&self) -> Option<SubNode> {
        self.find(|kind| matches!(kind, SubNodeKind::Mux { .. }))
    }

    pub fn divider(&self) -> Option<SubNode> {
        self.find(|kind| matches!(kind, SubNodeKind::Divider { .. }))
    }

    pub fn gate(&self) -> Option<SubNode> {
        self.find(|kind| matches!(kind, SubNodeKind::Gate { .. }))
    }

    fn find(&self, pred: impl Fn(&SubNodeKind) -> bool) -> Option<SubNode> {
        self.nodes().iter().find(|node| pred(&node.kind)).copied()
    }
}
