//! The arenas every resource lives in, and lookups from node ids into them.
//!
//! A [Registry] is built once from a topology description (see [crate::topology]) and
//! owned by the [Orchestrator](crate::Orchestrator). Operations on the graph are methods on the
//! registry, spread over the modules that own each concern.

use alloc::collections::BTreeMap;
use config::build_flags::{MAX_DEVICES, MAX_REQUIREMENTS, MAX_SUBSYSTEMS};
use utils::table::FixedTable;

use crate::{
    clock::{ClockGraph, ClockIdx},
    device::{Device, DeviceIdx},
    error::{PmError, PmResult},
    node::NodeId,
    power::{PowerIdx, PowerTree},
    requirement::{ReqIdx, Requirement},
    reset::{ResetController, ResetIdx},
    subsystem::{Subsystem, SubsystemIdx},
};

/// Where a node id lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Power(PowerIdx),
    Clock(ClockIdx),
    Reset(ResetIdx),
    Device(DeviceIdx),
}

pub struct Registry {
    pub(crate) nodes: BTreeMap<NodeId, NodeRef>,
    pub power: PowerTree,
    pub clocks: ClockGraph,
    pub resets: ResetController,
    pub(crate) devices: FixedTable<Device>,
    pub(crate) requirements: FixedTable<Requirement>,
    pub(crate) subsystems: FixedTable<Subsystem>,
    /// Slot currently being created, if any.
    pub(crate) reserved: Option<SubsystemIdx>,
}

impl Registry {
    pub(crate) fn empty() -> Registry {
        Registry {
            nodes: BTreeMap::new(),
            power: PowerTree::new(),
            clocks: ClockGraph::new(),
            resets: ResetController::new(),
            devices: FixedTable::with_capacity(MAX_DEVICES),
            requirements: FixedTable::with_capacity(MAX_REQUIREMENTS),
            subsystems: FixedTable::with_capacity(MAX_SUBSYSTEMS),
            reserved: None,
        }
    }

    pub fn node(&self, id: NodeId) -> PmResult<NodeRef> {
        self.nodes.get(&id).copied().ok_or(PmError::InvalidParameter)
    }

    pub fn power_index(&self, id: NodeId) -> PmResult<PowerIdx> {
        match self.node(id)? {
            NodeRef::Power(idx) => Ok(idx),
            _ => Err(PmError::InvalidParameter),
        }
    }

    pub fn clock_index(&self, id: NodeId) -> PmResult<ClockIdx> {
        match self.node(id)? {
            NodeRef::Clock(idx) => Ok(idx),
            _ => Err(PmError::InvalidParameter),
        }
    }

    pub fn reset_index(&self, id: NodeId) -> PmResult<ResetIdx> {
        match self.node(id)? {
            NodeRef::Reset(idx) => Ok(idx),
            _ => Err(PmError::InvalidParameter),
        }
    }

    pub fn device_index(&self, id: NodeId) -> PmResult<DeviceIdx> {
        match self.node(id)? {
            NodeRef::Device(idx) => Ok(idx),
            _ => Err(PmError::InvalidParameter),
        }
    }

    pub fn device(&self, idx: DeviceIdx) -> PmResult<&Device> {
        self.devices.get(idx).ok_or(PmError::InvalidParameter)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn requirement(&self, idx: ReqIdx) -> PmResult<&Requirement> {
        self.requirements.get(idx).ok_or(PmError::InvalidParameter)
    }

    pub fn subsystem(&self, idx: SubsystemIdx) -> PmResult<&Subsystem> {
        self.subsystems.get(idx).ok_or(PmError::InvalidParameter)
    }
}
