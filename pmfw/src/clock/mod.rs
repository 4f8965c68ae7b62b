//! Clock graph: reference clocks, PLLs and output clocks.
//!
//! Output clocks form chains ending at a reference clock. A clock holds one reference
//! on its parent while its own use count is non-zero, so requesting a clock only walks
//! up until it meets a parent that was already running. Walks are loops bounded by
//! `MAX_CLOCK_DEPTH`.
//!
//! Which devices use a clock is kept in [ClockHandle]s: one per (clock, device) pair,
//! threaded into two index lists, one per clock and one per device.

pub mod pll;
pub mod subnode;

use config::build_flags::{MAX_CLOCK_DEPTH, MAX_CLOCK_HANDLES, MAX_CLOCKS, MAX_MUX_PARENTS};
use heapless::Vec as BoundedVec;
use log::{error, warn};
use utils::{bits, table::FixedTable};

use crate::{
    device::DeviceIdx,
    error::{PmError, PmResult},
    hw::RegisterIo,
    node::{Node, NodeFlags, NodeId},
};
use pll::PllClock;
use subnode::{ClockTopology, SubNode, SubNodeFlags, SubNodeKind};

pub type ClockIdx = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Off,
    On,
}

#[derive(Debug, Clone)]
pub struct RefClock {
    pub rate: u64,
}

#[derive(Debug, Clone)]
pub struct OutClock {
    pub parent: ClockIdx,
    /// Candidate parents, in mux selector order. A clock without a mux has exactly one.
    pub parents: BoundedVec<ClockIdx, MAX_MUX_PARENTS>,
    pub topology: ClockTopology,
}

#[derive(Debug, Clone)]
pub enum ClockKind {
    Ref(RefClock),
    Pll(PllClock),
    Out(OutClock),
}

#[derive(Debug, Clone)]
pub struct ClockNode {
    pub node: Node<ClockState>,
    pub kind: ClockKind,
    pub use_count: u32,
    /// Head of this clock's handle list.
    pub devices: Option<usize>,
}

impl ClockNode {
    pub fn new(id: NodeId, base_address: u32, kind: ClockKind) -> ClockNode {
        let state = match kind {
            ClockKind::Ref(_) => ClockState::On,
            _ => ClockState::Off,
        };
        ClockNode {
            node: Node::new(id, state, base_address),
            kind,
            use_count: 0,
            devices: None,
        }
    }

    pub fn parent(&self) -> Option<ClockIdx> {
        match &self.kind {
            ClockKind::Ref(_) => None,
            ClockKind::Pll(pll) => Some(pll.parent),
            ClockKind::Out(out) => Some(out.parent),
        }
    }

    fn address(&self, sub: &SubNode) -> u32 {
        self.node.base_address.wrapping_add(sub.offset)
    }

    fn out(&self) -> PmResult<&OutClock> {
        match &self.kind {
            ClockKind::Out(out) => Ok(out),
            _ => Err(PmError::InvalidParameter),
        }
    }
}

/// One (clock, device) pair.
#[derive(Debug, Clone)]
pub struct ClockHandle {
    pub clock: ClockIdx,
    pub device: DeviceIdx,
    /// The device currently holds a reference on the clock through this handle.
    pub active: bool,
    pub next_for_device: Option<usize>,
    pub next_for_clock: Option<usize>,
}

pub struct ClockGraph {
    clocks: FixedTable<ClockNode>,
    handles: FixedTable<ClockHandle>,
}

impl Default for ClockGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockGraph {
    pub fn new() -> ClockGraph {
        ClockGraph {
            clocks: FixedTable::with_capacity(MAX_CLOCKS),
            handles: FixedTable::with_capacity(MAX_CLOCK_HANDLES),
        }
    }

    pub fn add(&mut self, clock: ClockNode) -> PmResult<ClockIdx> {
        Ok(self.clocks.push(clock)?)
    }

    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    pub fn get(&self, idx: ClockIdx) -> PmResult<&ClockNode> {
        self.clocks.get(idx).ok_or(PmError::InvalidParameter)
    }

    // region: Handles

    /// Record that `device` uses `clock`, prepending to both lists.
    pub fn attach(
        &mut self,
        clock: ClockIdx,
        device: DeviceIdx,
        device_head: &mut Option<usize>,
    ) -> PmResult<usize> {
        let next_for_clock = self.get(clock)?.devices;
        let handle = self.handles.push(ClockHandle {
            clock,
            device,
            active: false,
            next_for_device: *device_head,
            next_for_clock,
        })?;
        *device_head = Some(handle);
        self.clocks[clock].devices = Some(handle);
        Ok(handle)
    }

    pub fn handle(&self, handle: usize) -> &ClockHandle {
        &self.handles[handle]
    }

    pub(crate) fn handle_mut(&mut self, handle: usize) -> &mut ClockHandle {
        &mut self.handles[handle]
    }

    /// Handles of a device's list starting at `head`.
    pub fn device_handles(&self, head: Option<usize>) -> impl Iterator<Item = usize> + '_ {
        core::iter::successors(head, move |&h| self.handles[h].next_for_device)
    }

    /// Devices attached to `clock`.
    pub fn clock_devices(&self, clock: ClockIdx) -> impl Iterator<Item = DeviceIdx> + '_ {
        let head = self.clocks.get(clock).and_then(|clk| clk.devices);
        core::iter::successors(head, move |&h| self.handles[h].next_for_clock)
            .map(move |h| self.handles[h].device)
    }

    // endregion

    // region: Use counting

    /// Take one reference on `idx`.
    ///
    /// Every clock whose count goes 0→1 takes a reference on its own parent; the newly
    /// referenced chain is then enabled from the top down, so a gate never opens before
    /// its source runs. If enabling fails the whole chain is put back as it was.
    pub fn request<R: RegisterIo + ?Sized>(&mut self, io: &mut R, idx: ClockIdx) -> PmResult<()> {
        self.get(idx)?;
        let mut chain: BoundedVec<ClockIdx, MAX_CLOCK_DEPTH> = BoundedVec::new();
        let mut cur = Some(idx);
        while let Some(i) = cur {
            let clk = &mut self.clocks[i];
            if matches!(clk.kind, ClockKind::Ref(_)) {
                break;
            }
            clk.use_count += 1;
            if clk.use_count > 1 {
                break;
            }
            cur = clk.parent();
            if chain.push(i).is_err() {
                self.clocks[i].use_count -= 1;
                for &c in chain.iter() {
                    self.clocks[c].use_count -= 1;
                }
                error!(
                    "Clock #{}: parent chain deeper than {}",
                    self.clocks[idx].node.id, MAX_CLOCK_DEPTH
                );
                return Err(PmError::Failure);
            }
        }
        let mut enabled = 0;
        for &c in chain.iter().rev() {
            if let Err(err) = self.enable(io, c) {
                for &u in &chain[chain.len() - enabled..] {
                    self.disable(io, u);
                }
                for &u in chain.iter() {
                    self.clocks[u].use_count -= 1;
                }
                return Err(err);
            }
            enabled += 1;
        }
        Ok(())
    }

    /// Drop one reference on `idx`. A clock whose count reaches zero is disabled
    /// before its parent is released.
    pub fn release<R: RegisterIo + ?Sized>(&mut self, io: &mut R, idx: ClockIdx) -> PmResult<()> {
        let clk = self.get(idx)?;
        if matches!(clk.kind, ClockKind::Ref(_)) {
            return Ok(());
        }
        if clk.use_count == 0 {
            warn!("Clock #{} released with a zero use count", clk.node.id);
            return Err(PmError::InvalidParameter);
        }
        let mut cur = Some(idx);
        let mut depth = 0;
        while let Some(i) = cur {
            if matches!(self.clocks[i].kind, ClockKind::Ref(_)) {
                break;
            }
            depth += 1;
            if depth > MAX_CLOCK_DEPTH {
                error!("Clock #{}: parent chain deeper than {}", self.clocks[idx].node.id, MAX_CLOCK_DEPTH);
                return Err(PmError::Failure);
            }
            let clk = &mut self.clocks[i];
            if clk.use_count == 0 {
                error!("Clock #{}: use count underflow while releasing a child", clk.node.id);
                return Err(PmError::Failure);
            }
            clk.use_count -= 1;
            if clk.use_count > 0 {
                break;
            }
            self.disable(io, i);
            cur = self.clocks[i].parent();
        }
        Ok(())
    }

    fn enable<R: RegisterIo + ?Sized>(&mut self, io: &mut R, idx: ClockIdx) -> PmResult<()> {
        let clk = &mut self.clocks[idx];
        let base = clk.node.base_address;
        match &clk.kind {
            ClockKind::Ref(_) => {}
            ClockKind::Pll(pll) => {
                pll.lock(io, base)?;
                clk.node.flags.insert(NodeFlags::LOCKED);
            }
            ClockKind::Out(out) => {
                if let Some(gate) = out.topology.gate() {
                    write_gate(io, base, &gate, true);
                }
            }
        }
        clk.node.flags.insert(NodeFlags::REQUESTED | NodeFlags::ON);
        clk.node.state = ClockState::On;
        debug_ex!("Clock #{} on", clk.node.id);
        Ok(())
    }

    fn disable<R: RegisterIo + ?Sized>(&mut self, io: &mut R, idx: ClockIdx) {
        let clk = &mut self.clocks[idx];
        let base = clk.node.base_address;
        match &clk.kind {
            ClockKind::Ref(_) => return,
            ClockKind::Pll(pll) => pll.reset(io, base),
            ClockKind::Out(out) => {
                if let Some(gate) = out.topology.gate() {
                    write_gate(io, base, &gate, false);
                }
            }
        }
        clk.node
            .flags
            .remove(NodeFlags::REQUESTED | NodeFlags::ON | NodeFlags::LOCKED);
        clk.node.state = ClockState::Off;
        debug_ex!("Clock #{} off", clk.node.id);
    }

    /// Whether walking up from `from` reaches `target`.
    fn leads_to(&self, from: ClockIdx, target: ClockIdx) -> bool {
        let mut cur = Some(from);
        for _ in 0..MAX_CLOCK_DEPTH {
            match cur {
                Some(i) if i == target => return true,
                Some(i) => cur = self.clocks[i].parent(),
                None => return false,
            }
        }
        true
    }

    // endregion

    // region: Topology control

    /// Switch the mux of `idx` to candidate `parent_index`.
    ///
    /// While the clock is in use the new parent is referenced before the selector moves
    /// and the old one is released only afterwards.
    pub fn set_parent<R: RegisterIo + ?Sized>(
        &mut self,
        io: &mut R,
        idx: ClockIdx,
        parent_index: u32,
    ) -> PmResult<()> {
        let clk = self.get(idx)?;
        let out = clk.out()?;
        let mux = out.topology.mux().ok_or(PmError::InvalidParameter)?;
        let SubNodeKind::Mux { shift, width } = mux.kind else {
            return Err(PmError::InvalidParameter);
        };
        if !bits::fits(parent_index, width) || parent_index as usize >= out.parents.len() {
            warn!(
                "Clock #{}: parent index {} out of range ({} parents, {} bit mux)",
                clk.node.id,
                parent_index,
                out.parents.len(),
                width
            );
            return Err(PmError::InvalidParameter);
        }
        let new_parent = out.parents[parent_index as usize];
        let old_parent = out.parent;
        let address = clk.address(&mux);
        let in_use = clk.use_count > 0;
        if new_parent == old_parent {
            return Ok(());
        }
        if self.leads_to(new_parent, idx) {
            warn!("Clock #{}: parent #{} would close a loop", clk.node.id, parent_index);
            return Err(PmError::InvalidParameter);
        }

        if in_use {
            self.request(io, new_parent)?;
        }
        io.read_modify_write(address, bits::field_mask(shift, width), parent_index << shift);
        if let ClockKind::Out(out) = &mut self.clocks[idx].kind {
            out.parent = new_parent;
        }
        debug_ex!("Clock #{} parent -> #{}", self.clocks[idx].node.id, self.clocks[new_parent].node.id);
        if in_use {
            self.release(io, old_parent)?;
        }
        Ok(())
    }

    pub fn set_divider<R: RegisterIo + ?Sized>(
        &mut self,
        io: &mut R,
        idx: ClockIdx,
        value: u32,
    ) -> PmResult<()> {
        let clk = self.get(idx)?;
        let div = clk.out()?.topology.divider().ok_or(PmError::InvalidParameter)?;
        let SubNodeKind::Divider { shift, width } = div.kind else {
            return Err(PmError::InvalidParameter);
        };
        let zero_ok = !div.flags.contains(SubNodeFlags::DIVIDER_ONE_BASED)
            || div.flags.contains(SubNodeFlags::DIVIDER_ALLOW_ZERO);
        if !bits::fits(value, width) || (value == 0 && !zero_ok) {
            warn!("Clock #{}: divider {} does not fit", clk.node.id, value);
            return Err(PmError::InvalidParameter);
        }
        io.read_modify_write(clk.address(&div), bits::field_mask(shift, width), value << shift);
        Ok(())
    }

    /// Open or close the gate without touching the use count.
    pub fn set_gate<R: RegisterIo + ?Sized>(
        &mut self,
        io: &mut R,
        idx: ClockIdx,
        enable: bool,
    ) -> PmResult<()> {
        let clk = self.get(idx)?;
        let gate = clk.out()?.topology.gate().ok_or(PmError::InvalidParameter)?;
        write_gate(io, clk.node.base_address, &gate, enable);
        let clk = &mut self.clocks[idx];
        clk.node.flags.set(NodeFlags::ON, enable);
        Ok(())
    }

    // endregion

    // region: Queries

    pub fn parent_id(&self, idx: ClockIdx) -> PmResult<NodeId> {
        let parent = self.get(idx)?.parent().ok_or(PmError::InvalidParameter)?;
        Ok(self.clocks[parent].node.id)
    }

    /// Position of the current parent among the candidates.
    pub fn parent_index(&self, idx: ClockIdx) -> PmResult<u32> {
        let out = self.get(idx)?.out()?;
        out.parents
            .iter()
            .position(|&p| p == out.parent)
            .map(|pos| pos as u32)
            .ok_or(PmError::Failure)
    }

    pub fn divider<R: RegisterIo + ?Sized>(&self, io: &mut R, idx: ClockIdx) -> PmResult<u32> {
        let clk = self.get(idx)?;
        let div = clk.out()?.topology.divider().ok_or(PmError::InvalidParameter)?;
        let SubNodeKind::Divider { shift, width } = div.kind else {
            return Err(PmError::InvalidParameter);
        };
        Ok(bits::extract(io.read(clk.address(&div)), shift, width))
    }

    pub fn gate_enabled<R: RegisterIo + ?Sized>(&self, io: &mut R, idx: ClockIdx) -> PmResult<bool> {
        let clk = self.get(idx)?;
        let gate = clk.out()?.topology.gate().ok_or(PmError::InvalidParameter)?;
        let SubNodeKind::Gate { shift } = gate.kind else {
            return Err(PmError::InvalidParameter);
        };
        let set = io.read(clk.address(&gate)) & (1 << shift) != 0;
        Ok(set != gate.flags.contains(SubNodeFlags::GATE_SET_TO_DISABLE))
    }

    /// Output rate in Hz, derived from the reference clock at the root of the chain.
    /// Gates are ignored.
    pub fn rate<R: RegisterIo + ?Sized>(&self, io: &mut R, idx: ClockIdx) -> PmResult<u64> {
        self.get(idx)?;
        let mut chain: BoundedVec<ClockIdx, MAX_CLOCK_DEPTH> = BoundedVec::new();
        let mut cur = idx;
        let mut rate = loop {
            let clk = &self.clocks[cur];
            match &clk.kind {
                ClockKind::Ref(reference) => break reference.rate,
                _ => {
                    chain.push(cur).map_err(|_| PmError::Failure)?;
                    cur = clk.parent().ok_or(PmError::Failure)?;
                }
            }
        };
        for &c in chain.iter().rev() {
            rate = self.scale(io, c, rate);
        }
        Ok(rate)
    }

    fn scale<R: RegisterIo + ?Sized>(&self, io: &mut R, idx: ClockIdx, rate: u64) -> u64 {
        let clk = &self.clocks[idx];
        match &clk.kind {
            ClockKind::Ref(_) => rate,
            ClockKind::Pll(pll) => rate * pll.mult as u64,
            ClockKind::Out(out) => {
                let mut rate = rate;
                for sub in out.topology.nodes() {
                    match sub.kind {
                        SubNodeKind::Divider { shift, width } => {
                            let raw = bits::extract(io.read(clk.address(sub)), shift, width);
                            let divisor = if sub.flags.contains(SubNodeFlags::DIVIDER_ONE_BASED) {
                                raw.max(1)
                            } else {
                                raw + 1
                            };
                            rate /= divisor as u64;
                        }
                        SubNodeKind::FixedFactor { mult, div } => {
                            rate = rate * mult as u64 / div.max(1) as u64;
                        }
                        SubNodeKind::Mux { .. } | SubNodeKind::Gate { .. } => {}
                    }
                }
                rate
            }
        }
    }

    // endregion
}

fn write_gate<R: RegisterIo + ?Sized>(io: &mut R, base: u32, gate: &SubNode, enable: bool) {
    let SubNodeKind::Gate { shift } = gate.kind else {
        return;
    };
    let set = enable != gate.flags.contains(SubNodeFlags::GATE_SET_TO_DISABLE);
    io.read_modify_write(
        base.wrapping_add(gate.offset),
        1 << shift,
        if set { 1 << shift } else { 0 },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hw::sim::{self, SimPlatform},
        registry::Registry,
    };

    fn graph() -> (Registry, SimPlatform) {
        let mut sim = SimPlatform::demo();
        let registry = Registry::build(&sim::demo_topology(), &mut sim).unwrap();
        (registry, sim)
    }

    fn idx(registry: &Registry, id: NodeId) -> ClockIdx {
        registry.clock_index(id).unwrap()
    }

    #[test]
    fn request_propagates_to_parents_once() {
        let (mut reg, mut sim) = graph();
        let uart = idx(&reg, sim::CLK_UART);
        let top = idx(&reg, sim::CLK_LPD_TOP);
        let pll = idx(&reg, sim::PLL_IO);

        reg.clocks.request(&mut sim, uart).unwrap();
        reg.clocks.request(&mut sim, uart).unwrap();
        assert_eq!(reg.clocks.get(uart).unwrap().use_count, 2);
        assert_eq!(reg.clocks.get(top).unwrap().use_count, 1);
        assert_eq!(reg.clocks.get(pll).unwrap().use_count, 1);
        assert!(reg.clocks.gate_enabled(&mut sim, uart).unwrap());
        assert!(reg.clocks.get(pll).unwrap().node.flags.contains(NodeFlags::LOCKED));
    }

    #[test]
    fn gate_opens_after_parent_runs() {
        let (mut reg, mut sim) = graph();
        let uart = idx(&reg, sim::CLK_UART);
        sim.clear_events();
        reg.clocks.request(&mut sim, uart).unwrap();
        let top_gate = sim.event_index(|e| e.is_write_to(sim::CLK_LPD_TOP_CTRL)).unwrap();
        let uart_gate = sim.event_index(|e| e.is_write_to(sim::CLK_UART_CTRL)).unwrap();
        assert!(top_gate < uart_gate);
    }

    #[test]
    fn request_release_pair_restores_state() {
        let (mut reg, mut sim) = graph();
        let uart = idx(&reg, sim::CLK_UART);
        let before = sim.registers.clone();
        reg.clocks.request(&mut sim, uart).unwrap();
        reg.clocks.release(&mut sim, uart).unwrap();
        for i in 0..reg.clocks.len() {
            let clk = reg.clocks.get(i).unwrap();
            assert_eq!(clk.use_count, 0);
            assert!(!clk.node.flags.contains(NodeFlags::REQUESTED));
        }
        assert!(!reg.clocks.gate_enabled(&mut sim, uart).unwrap());
        assert_eq!(sim.registers, before);
    }

    #[test]
    fn over_release_is_rejected() {
        let (mut reg, mut sim) = graph();
        let uart = idx(&reg, sim::CLK_UART);
        assert_eq!(reg.clocks.release(&mut sim, uart), Err(PmError::InvalidParameter));
        assert_eq!(reg.clocks.get(uart).unwrap().use_count, 0);
    }

    #[test]
    fn set_parent_out_of_range_leaves_mux_alone() {
        let (mut reg, mut sim) = graph();
        let gem = idx(&reg, sim::CLK_GEM);
        sim.clear_events();
        // 3-bit mux: 8 does not fit the field.
        assert_eq!(reg.clocks.set_parent(&mut sim, gem, 8), Err(PmError::InvalidParameter));
        // Fits the field but only two candidates are declared.
        assert_eq!(reg.clocks.set_parent(&mut sim, gem, 2), Err(PmError::InvalidParameter));
        assert!(sim.events.is_empty());
    }

    #[test]
    fn set_parent_moves_reference_without_glitch() {
        let (mut reg, mut sim) = graph();
        let gem = idx(&reg, sim::CLK_GEM);
        let io_pll = idx(&reg, sim::PLL_IO);
        let rpu_pll = idx(&reg, sim::PLL_RPU);
        reg.clocks.request(&mut sim, gem).unwrap();
        assert_eq!(reg.clocks.get(io_pll).unwrap().use_count, 1);

        sim.clear_events();
        reg.clocks.set_parent(&mut sim, gem, 1).unwrap();
        assert_eq!(reg.clocks.get(io_pll).unwrap().use_count, 0);
        assert_eq!(reg.clocks.get(rpu_pll).unwrap().use_count, 1);
        assert_eq!(reg.clocks.parent_id(gem), Ok(sim::PLL_RPU));
        assert_eq!(reg.clocks.parent_index(gem), Ok(1));

        // New PLL locked before the selector moved; old PLL reset only afterwards.
        let new_on = sim.event_index(|e| e.is_write_to(sim::PLL_RPU_CTRL)).unwrap();
        let mux = sim.event_index(|e| e.is_write_to(sim::CLK_GEM_CTRL)).unwrap();
        let old_off = sim.event_index(|e| e.is_write_to(sim::PLL_IO_CTRL)).unwrap();
        assert!(new_on < mux && mux < old_off);
        assert_eq!(sim.register(sim::CLK_GEM_CTRL) & 0b111, 1);
    }

    #[test]
    fn parent_tracks_the_selector_when_old_release_fails() {
        let (mut reg, mut sim) = graph();
        let gem = idx(&reg, sim::CLK_GEM);
        let io_pll = idx(&reg, sim::PLL_IO);
        reg.clocks.request(&mut sim, gem).unwrap();
        reg.clocks.clocks[io_pll].use_count = 0;

        assert_eq!(reg.clocks.set_parent(&mut sim, gem, 1), Err(PmError::InvalidParameter));
        assert_eq!(sim.register(sim::CLK_GEM_CTRL) & 0b111, 1);
        assert_eq!(reg.clocks.parent_index(gem), Ok(1));
        assert_eq!(reg.clocks.get(idx(&reg, sim::PLL_RPU)).unwrap().use_count, 1);
    }

    #[test]
    fn set_parent_on_idle_clock_only_writes_mux() {
        let (mut reg, mut sim) = graph();
        let gem = idx(&reg, sim::CLK_GEM);
        reg.clocks.set_parent(&mut sim, gem, 1).unwrap();
        assert_eq!(reg.clocks.get(idx(&reg, sim::PLL_RPU)).unwrap().use_count, 0);
        assert_eq!(reg.clocks.parent_index(gem), Ok(1));
    }

    #[test]
    fn missing_sub_nodes_are_invalid() {
        let (mut reg, mut sim) = graph();
        let ttc = idx(&reg, sim::CLK_TTC);
        assert_eq!(reg.clocks.set_parent(&mut sim, ttc, 0), Err(PmError::InvalidParameter));
        assert_eq!(reg.clocks.set_divider(&mut sim, ttc, 2), Err(PmError::InvalidParameter));
        let pll = idx(&reg, sim::PLL_IO);
        assert_eq!(reg.clocks.set_gate(&mut sim, pll, true), Err(PmError::InvalidParameter));
        assert_eq!(reg.clocks.set_gate(&mut sim, 999, true), Err(PmError::InvalidParameter));
    }

    #[test]
    fn divider_is_range_checked() {
        let (mut reg, mut sim) = graph();
        let uart = idx(&reg, sim::CLK_UART);
        assert_eq!(reg.clocks.set_divider(&mut sim, uart, 1 << 10), Err(PmError::InvalidParameter));
        reg.clocks.set_divider(&mut sim, uart, 4).unwrap();
        assert_eq!(reg.clocks.divider(&mut sim, uart), Ok(4));
        assert_eq!(reg.clocks.get(uart).unwrap().use_count, 0);
    }

    #[test]
    fn gate_control_leaves_use_count() {
        let (mut reg, mut sim) = graph();
        let ttc = idx(&reg, sim::CLK_TTC);
        reg.clocks.set_gate(&mut sim, ttc, true).unwrap();
        assert!(reg.clocks.gate_enabled(&mut sim, ttc).unwrap());
        assert!(reg.clocks.get(ttc).unwrap().node.flags.contains(NodeFlags::ON));
        assert_eq!(reg.clocks.get(ttc).unwrap().use_count, 0);
    }

    #[test]
    fn rate_follows_the_chain() {
        let (mut reg, mut sim) = graph();
        let uart = idx(&reg, sim::CLK_UART);
        let top = idx(&reg, sim::CLK_LPD_TOP);
        let tsu = idx(&reg, sim::CLK_GEM_TSU);
        reg.clocks.set_divider(&mut sim, top, 2).unwrap();
        reg.clocks.set_divider(&mut sim, uart, 5).unwrap();
        let pll_rate = sim::REF_RATE * sim::PLL_IO_MULT as u64;
        assert_eq!(reg.clocks.rate(&mut sim, top), Ok(pll_rate / 2));
        assert_eq!(reg.clocks.rate(&mut sim, uart), Ok(pll_rate / 10));
        // TSU halves the GEM output; GEM divider reads 0, which counts as 1.
        assert_eq!(reg.clocks.rate(&mut sim, tsu), Ok(pll_rate / 2));
    }

    #[test]
    fn pll_lock_timeout_fails_the_request() {
        let (mut reg, mut sim) = graph();
        sim.set_register(sim::PLL_IO_STATUS, 0);
        let top = idx(&reg, sim::CLK_LPD_TOP);
        assert_eq!(reg.clocks.request(&mut sim, top), Err(PmError::Failure));
        let pll = reg.clocks.get(idx(&reg, sim::PLL_IO)).unwrap();
        assert!(!pll.node.flags.contains(NodeFlags::LOCKED));
        assert_eq!(pll.use_count, 0);
        assert_eq!(reg.clocks.get(top).unwrap().use_count, 0);
        // The top clock was never enabled and the PLL went back into reset.
        assert!(!reg.clocks.gate_enabled(&mut sim, top).unwrap());
        assert_ne!(sim.register(sim::PLL_IO_CTRL) & 1 << sim::PLL_RESET_SHIFT, 0);

        sim.set_register(sim::PLL_IO_STATUS, 1 << sim::PLL_LOCK_SHIFT);
        reg.clocks.request(&mut sim, top).unwrap();
        assert!(reg.clocks.gate_enabled(&mut sim, top).unwrap());
    }

    #[test]
    fn clock_devices_lists_users() {
        let (reg, _) = graph();
        let uart = idx(&reg, sim::CLK_UART);
        let users: alloc::vec::Vec<_> = reg
            .clocks
            .clock_devices(uart)
            .map(|d| reg.device(d).unwrap().node.id)
            .collect();
        assert_eq!(users.len(), 2);
        assert!(users.contains(&sim::DEV_UART0));
        assert!(users.contains(&sim::DEV_UART1));
    }
}
