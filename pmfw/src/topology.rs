//! Topology descriptions and the builder turning them into a [Registry].
//!
//! A description names every node by id and refers to other nodes by id; the order of
//! entries within a class does not matter. [Registry::build] checks ids, classes,
//! references and capacities, rejects parent cycles, and reads the mux selectors to
//! find each output clock's initial parent.

use alloc::vec::Vec;
use config::build_flags::{MAX_CLOCK_DEPTH, MAX_MUX_PARENTS, MAX_RESET_PARENTS, MAX_SUBSYSTEMS};
use heapless::Vec as BoundedVec;
use log::{info, warn};
use utils::bits;

use crate::{
    clock::{
        ClockIdx, ClockKind, ClockNode, OutClock, RefClock, pll::PllClock, subnode::ClockTopology,
        subnode::SubNodeKind,
    },
    device::{Device, fsm::DeviceFsm},
    error::{PmError, PmResult},
    hw::RegisterIo,
    node::{NodeClass, NodeId},
    power::PowerNode,
    registry::{NodeRef, Registry},
    reset::{IsolationCell, ResetNode, ResetOps},
    subsystem::{PLATFORM_SUBSYSTEM, Subsystem, SubsystemState},
};

#[derive(Debug, Clone)]
pub struct PowerDesc {
    pub id: NodeId,
    pub base_address: u32,
    pub parent: Option<NodeId>,
    pub up_latency: u32,
    pub down_latency: u32,
}

#[derive(Debug, Clone)]
pub enum ClockDesc {
    Ref {
        id: NodeId,
        rate: u64,
    },
    Pll {
        id: NodeId,
        base_address: u32,
        parent: NodeId,
        reset_shift: u32,
        status_offset: u32,
        lock_shift: u32,
        mult: u32,
    },
    Out {
        id: NodeId,
        base_address: u32,
        /// Candidate parents in mux selector order; exactly one without a mux.
        parents: Vec<NodeId>,
        topology: ClockTopology,
    },
}

impl ClockDesc {
    pub fn id(&self) -> NodeId {
        match self {
            ClockDesc::Ref { id, .. } | ClockDesc::Pll { id, .. } | ClockDesc::Out { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResetHandlerDesc {
    Generic,
    SystemReset {
        domains: Vec<NodeId>,
        isolation: Vec<IsolationCell>,
    },
    LowPowerDomain,
}

#[derive(Debug, Clone)]
pub struct ResetDesc {
    pub id: NodeId,
    pub address: u32,
    pub shift: u32,
    pub width: u32,
    pub parents: Vec<NodeId>,
    pub handler: ResetHandlerDesc,
}

#[derive(Debug, Clone)]
pub struct DeviceDesc {
    pub id: NodeId,
    pub base_address: u32,
    pub power: Option<NodeId>,
    pub clocks: Vec<NodeId>,
    pub resets: Vec<NodeId>,
    pub fsm: &'static DeviceFsm,
}

/// Everything the orchestrator manages, already parsed.
#[derive(Debug, Clone, Default)]
pub struct TopologyDesc {
    pub power: Vec<PowerDesc>,
    pub clocks: Vec<ClockDesc>,
    pub resets: Vec<ResetDesc>,
    pub devices: Vec<DeviceDesc>,
}

impl Registry {
    /// Build the arenas described by `desc`. `io` is only read, to pick up the current
    /// mux selections.
    pub fn build<R: RegisterIo + ?Sized>(desc: &TopologyDesc, io: &mut R) -> PmResult<Registry> {
        let mut reg = Registry::empty();
        reg.index_nodes(desc)?;
        reg.build_power(desc)?;
        reg.build_clocks(desc, io)?;
        reg.build_resets(desc)?;
        reg.build_devices(desc)?;
        reg.build_subsystems()?;
        info!(
            "Topology: {} power nodes, {} clocks, {} resets, {} devices",
            reg.power.len(),
            reg.clocks.len(),
            reg.resets.len(),
            reg.devices.len()
        );
        Ok(reg)
    }

    /// Assign every id its slot. Entries are added to each table in description
    /// order, so the slot is the position within its class.
    fn index_nodes(&mut self, desc: &TopologyDesc) -> PmResult<()> {
        let power = desc.power.iter().map(|p| (p.id, NodeClass::Power));
        let clocks = desc.clocks.iter().map(|c| (c.id(), NodeClass::Clock));
        let resets = desc.resets.iter().map(|r| (r.id, NodeClass::Reset));
        let devices = desc.devices.iter().map(|d| (d.id, NodeClass::Device));
        let mut counts = [0usize; 4];
        for (id, class) in power.chain(clocks).chain(resets).chain(devices) {
            if !id.is(class) {
                warn!("Node #{}: expected class {:?}", id, class);
                return Err(PmError::InvalidParameter);
            }
            let (slot, node) = match class {
                NodeClass::Power => (0, NodeRef::Power(counts[0])),
                NodeClass::Clock => (1, NodeRef::Clock(counts[1])),
                NodeClass::Reset => (2, NodeRef::Reset(counts[2])),
                _ => (3, NodeRef::Device(counts[3])),
            };
            if self.nodes.insert(id, node).is_some() {
                warn!("Node #{} declared twice", id);
                return Err(PmError::InvalidParameter);
            }
            counts[slot] += 1;
        }
        Ok(())
    }

    fn build_power(&mut self, desc: &TopologyDesc) -> PmResult<()> {
        for p in &desc.power {
            let parent = p.parent.map(|id| self.power_index(id)).transpose()?;
            self.power.add(PowerNode::new(
                p.id,
                p.base_address,
                parent,
                p.up_latency,
                p.down_latency,
            ))?;
        }
        for idx in 0..self.power.len() {
            if self.power.depth(idx).is_none() {
                warn!("Power #{}: parent chain loops or is too deep", self.power.get(idx)?.node.id);
                return Err(PmError::InvalidParameter);
            }
        }
        Ok(())
    }

    fn build_clocks<R: RegisterIo + ?Sized>(&mut self, desc: &TopologyDesc, io: &mut R) -> PmResult<()> {
        for c in &desc.clocks {
            let node = match c {
                ClockDesc::Ref { id, rate } => ClockNode::new(*id, 0, ClockKind::Ref(RefClock { rate: *rate })),
                ClockDesc::Pll {
                    id,
                    base_address,
                    parent,
                    reset_shift,
                    status_offset,
                    lock_shift,
                    mult,
                } => {
                    if !bits::field_in_word(*reset_shift, 1) || !bits::field_in_word(*lock_shift, 1) {
                        warn!("Clock #{}: PLL bit outside its register", id);
                        return Err(PmError::InvalidParameter);
                    }
                    let pll = PllClock {
                        parent: self.clock_index(*parent)?,
                        reset_shift: *reset_shift,
                        status_offset: *status_offset,
                        lock_shift: *lock_shift,
                        mult: *mult,
                    };
                    ClockNode::new(*id, *base_address, ClockKind::Pll(pll))
                }
                ClockDesc::Out {
                    id,
                    base_address,
                    parents,
                    topology,
                } => {
                    let out = self.out_clock(*id, *base_address, parents, topology, io)?;
                    ClockNode::new(*id, *base_address, ClockKind::Out(out))
                }
            };
            self.clocks.add(node)?;
        }
        for idx in 0..self.clocks.len() {
            self.check_clock_chain(idx)?;
        }
        Ok(())
    }

    fn out_clock<R: RegisterIo + ?Sized>(
        &self,
        id: NodeId,
        base_address: u32,
        parents: &[NodeId],
        topology: &ClockTopology,
        io: &mut R,
    ) -> PmResult<OutClock> {
        if parents.len() > MAX_MUX_PARENTS {
            return Err(PmError::BufferExhausted);
        }
        if let Some(bad) = topology.nodes().iter().find(|sub| !sub.is_well_formed()) {
            warn!("Clock #{}: malformed sub-node {:?}", id, bad.kind);
            return Err(PmError::InvalidParameter);
        }
        let mut candidates: BoundedVec<ClockIdx, MAX_MUX_PARENTS> = BoundedVec::new();
        for &parent in parents {
            candidates
                .push(self.clock_index(parent)?)
                .map_err(|_| PmError::BufferExhausted)?;
        }
        let selected = match topology.mux() {
            Some(mux) => {
                let SubNodeKind::Mux { shift, width } = mux.kind else {
                    return Err(PmError::InvalidParameter);
                };
                let raw = bits::extract(io.read(base_address.wrapping_add(mux.offset)), shift, width);
                if raw as usize >= candidates.len() {
                    warn!("Clock #{}: mux selects missing parent {}, using 0", id, raw);
                    0
                } else {
                    raw as usize
                }
            }
            None if candidates.len() == 1 => 0,
            None => {
                warn!("Clock #{}: {} parents but no mux", id, candidates.len());
                return Err(PmError::InvalidParameter);
            }
        };
        let parent = *candidates.get(selected).ok_or(PmError::InvalidParameter)?;
        Ok(OutClock {
            parent,
            parents: candidates,
            topology: topology.clone(),
        })
    }

    /// Parent chains must end at a reference clock within `MAX_CLOCK_DEPTH` steps.
    fn check_clock_chain(&self, idx: ClockIdx) -> PmResult<()> {
        let mut cur = idx;
        for _ in 0..=MAX_CLOCK_DEPTH {
            let clk = self.clocks.get(cur)?;
            match clk.parent() {
                None if matches!(clk.kind, ClockKind::Ref(_)) => return Ok(()),
                None => break,
                Some(parent) => cur = parent,
            }
        }
        warn!(
            "Clock #{}: parent chain loops or never reaches a reference clock",
            self.clocks.get(idx)?.node.id
        );
        Err(PmError::InvalidParameter)
    }

    fn build_resets(&mut self, desc: &TopologyDesc) -> PmResult<()> {
        for r in &desc.resets {
            if r.parents.len() > MAX_RESET_PARENTS {
                return Err(PmError::BufferExhausted);
            }
            if !bits::field_in_word(r.shift, r.width) {
                warn!("Reset #{}: bits [{}+{}] outside its register", r.id, r.shift, r.width);
                return Err(PmError::InvalidParameter);
            }
            let ops = match &r.handler {
                ResetHandlerDesc::Generic => ResetOps::Generic,
                ResetHandlerDesc::LowPowerDomain => ResetOps::LowPowerDomain,
                ResetHandlerDesc::SystemReset { domains, isolation } => ResetOps::SystemReset {
                    domains: domains
                        .iter()
                        .map(|&d| self.power_index(d))
                        .collect::<PmResult<Vec<_>>>()?,
                    isolation: isolation.clone(),
                },
            };
            let mut node = ResetNode::new(r.id, r.address, r.shift, r.width, ops);
            for &parent in &r.parents {
                let parent = self.reset_index(parent)?;
                node.parents.push(parent).map_err(|_| PmError::BufferExhausted)?;
            }
            self.resets.add(node)?;
        }
        Ok(())
    }

    fn build_devices(&mut self, desc: &TopologyDesc) -> PmResult<()> {
        for d in &desc.devices {
            let power = d.power.map(|id| self.power_index(id)).transpose()?;
            let mut device = Device::new(d.id, d.base_address, power, d.fsm);
            let idx = self.devices.len();
            for &clock in &d.clocks {
                let clock = self.clock_index(clock)?;
                self.clocks.attach(clock, idx, &mut device.clocks)?;
            }
            for &reset in &d.resets {
                let reset = self.reset_index(reset)?;
                self.resets.attach(reset, idx, &mut device.resets)?;
            }
            self.devices.push(device)?;
        }
        Ok(())
    }

    fn build_subsystems(&mut self) -> PmResult<()> {
        for slot in 0..MAX_SUBSYSTEMS {
            self.subsystems.push(Subsystem::new(NodeId::subsystem(slot as u32)))?;
        }
        let owner = &mut self.subsystems[PLATFORM_SUBSYSTEM];
        owner.state = SubsystemState::Online;
        owner.created = true;
        Ok(())
    }
}
