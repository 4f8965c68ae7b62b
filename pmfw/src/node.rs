//! Node identities and the state base shared by every resource.
//!
//! A [NodeId] packs class `[31:26]`, subclass `[25:20]`, type `[19:14]` and index
//! `[13:0]` into one word, so an id alone tells which table a resource lives in.

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use utils::{define_id, id_fields};

use crate::requirement::MAX_LATENCY;

define_id!(
    /// Stable identity of a resource, as used on the command channel.
    NodeId,
    u32
);

id_fields!(NodeId {
    class: 26, 6;
    subclass: 20, 6;
    node_type: 14, 6;
    index: 0, 14;
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum NodeClass {
    Power = 1,
    Clock = 2,
    Reset = 3,
    Device = 6,
    Subsystem = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ClockSubclass {
    Pll = 1,
    Out = 2,
    Ref = 3,
}

/// Subclass used for peripheral devices.
pub const DEVICE_PERIPH: u32 = 1;
/// Subclass used for power domains and islands.
pub const POWER_DOMAIN: u32 = 1;

impl NodeId {
    pub const fn new(class: NodeClass, subclass: u32, node_type: u32, index: u32) -> NodeId {
        NodeId::from_const(0)
            .with_class(class as u32)
            .with_subclass(subclass)
            .with_node_type(node_type)
            .with_index(index)
    }

    pub const fn power(index: u32) -> NodeId {
        NodeId::new(NodeClass::Power, POWER_DOMAIN, 0, index)
    }

    pub const fn clock(subclass: ClockSubclass, index: u32) -> NodeId {
        NodeId::new(NodeClass::Clock, subclass as u32, 0, index)
    }

    pub const fn reset(index: u32) -> NodeId {
        NodeId::new(NodeClass::Reset, 0, 0, index)
    }

    pub const fn device(index: u32) -> NodeId {
        NodeId::new(NodeClass::Device, DEVICE_PERIPH, 0, index)
    }

    pub const fn subsystem(index: u32) -> NodeId {
        NodeId::new(NodeClass::Subsystem, 0, 0, index)
    }

    pub fn node_class(self) -> Option<NodeClass> {
        NodeClass::try_from(self.class()).ok()
    }

    pub fn is(self, class: NodeClass) -> bool {
        self.node_class() == Some(class)
    }
}

bitflags! {
    pub struct NodeFlags: u8 {
        /// Held by at least one user.
        const REQUESTED = 0b0000_0001;
        /// Output enabled in hardware (gate open, PLL locked).
        const ON        = 0b0000_0010;
        /// Locked against further changes (PLL lock acquired).
        const LOCKED    = 0b0000_0100;
    }
}

/// Identity and state shared by every resource. `S` is the resource's own state type.
#[derive(Debug, Clone)]
pub struct Node<S> {
    pub id: NodeId,
    pub state: S,
    /// Opaque to the orchestrator beyond offsetting register locations.
    pub base_address: u32,
    /// Slack between the tightest latency requirement and the wake-up latency of the
    /// current state.
    pub latency_marg: u32,
    pub flags: NodeFlags,
}

impl<S: Copy> Node<S> {
    pub fn new(id: NodeId, state: S, base_address: u32) -> Node<S> {
        Node {
            id,
            state,
            base_address,
            latency_marg: MAX_LATENCY,
            flags: NodeFlags::empty(),
        }
    }
}
