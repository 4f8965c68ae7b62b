//! Power domain tree.
//!
//! Power nodes form a tree; a node holds one reference on its parent while it is
//! powered or on its way up. Use counts change immediately, while the power
//! controller may finish a transition later: a node then waits in `PwrUpSelf` or
//! `PwrDownSelf` until [PowerTree::handle_event] is called for it.

use alloc::vec::Vec;
use config::build_flags::{MAX_POWER_DEPTH, MAX_POWER_NODES};
use log::{error, info, warn};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use utils::table::FixedTable;

use crate::{
    error::{PmError, PmResult},
    hw::{Platform, PowerAck},
    node::{Node, NodeId},
};

pub type PowerIdx = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PowerState {
    Off = 0,
    /// Waiting for the parent to come up.
    PwrUpParent = 1,
    /// Waiting for the power controller to power this node up.
    PwrUpSelf = 2,
    On = 3,
    /// Waiting for the power controller to power this node down.
    PwrDownSelf = 4,
    /// Releasing the parent.
    PwrDownParent = 5,
}

#[derive(Debug, Clone)]
pub struct PowerNode {
    pub node: Node<PowerState>,
    pub parent: Option<PowerIdx>,
    pub use_count: u32,
    /// Parent use count expected once the parent has accounted for this node.
    pub wf_parent_use_cnt: u32,
    pub up_latency: u32,
    pub down_latency: u32,
    /// This node holds a reference on its parent.
    parent_held: bool,
}

impl PowerNode {
    pub fn new(
        id: NodeId,
        base_address: u32,
        parent: Option<PowerIdx>,
        up_latency: u32,
        down_latency: u32,
    ) -> PowerNode {
        PowerNode {
            node: Node::new(id, PowerState::Off, base_address),
            parent,
            use_count: 0,
            wf_parent_use_cnt: 0,
            up_latency,
            down_latency,
            parent_held: false,
        }
    }

    pub fn state(&self) -> PowerState {
        self.node.state
    }
}

pub struct PowerTree {
    nodes: FixedTable<PowerNode>,
}

impl Default for PowerTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerTree {
    pub fn new() -> PowerTree {
        PowerTree {
            nodes: FixedTable::with_capacity(MAX_POWER_NODES),
        }
    }

    pub fn add(&mut self, node: PowerNode) -> PmResult<PowerIdx> {
        Ok(self.nodes.push(node)?)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, idx: PowerIdx) -> PmResult<&PowerNode> {
        self.nodes.get(idx).ok_or(PmError::InvalidParameter)
    }

    pub fn is_on(&self, idx: PowerIdx) -> bool {
        self.nodes.get(idx).is_some_and(|n| n.node.state == PowerState::On)
    }

    /// Whether `ancestor` is `idx` or one of its ancestors.
    pub fn is_within(&self, idx: PowerIdx, ancestor: PowerIdx) -> bool {
        let mut cur = Some(idx);
        for _ in 0..=MAX_POWER_DEPTH {
            match cur {
                Some(i) if i == ancestor => return true,
                Some(i) => cur = self.nodes[i].parent,
                None => return false,
            }
        }
        false
    }

    /// Number of nodes from `idx` up to its root, or `None` past `MAX_POWER_DEPTH`.
    pub fn depth(&self, idx: PowerIdx) -> Option<usize> {
        let mut cur = self.nodes.get(idx)?.parent;
        for depth in 1..=MAX_POWER_DEPTH {
            match cur {
                Some(i) => cur = self.nodes.get(i)?.parent,
                None => return Some(depth),
            }
        }
        None
    }

    // region: Request / release

    pub fn request<P: Platform + ?Sized>(&mut self, hw: &mut P, idx: PowerIdx) -> PmResult<()> {
        let node = self.nodes.get_mut(idx).ok_or(PmError::InvalidParameter)?;
        node.use_count += 1;
        debug_ex!("Power #{} use count {}", node.node.id, node.use_count);
        // Transitions in flight settle on their completion event.
        if node.node.state != PowerState::Off {
            return Ok(());
        }
        let result = self.start_power_up(hw, idx);
        if result.is_err() {
            self.drop_failed_request(hw, idx);
        }
        result
    }

    /// Undo the reference taken by a request whose power-up failed.
    fn drop_failed_request<P: Platform + ?Sized>(&mut self, hw: &mut P, idx: PowerIdx) {
        let node = &mut self.nodes[idx];
        node.use_count = node.use_count.saturating_sub(1);
        if node.use_count > 0 || !node.parent_held || node.node.state != PowerState::Off {
            return;
        }
        node.parent_held = false;
        node.wf_parent_use_cnt = 0;
        if let Some(parent) = node.parent {
            if let Err(err) = self.release(hw, parent) {
                error!("Power #{}: releasing parent failed: {}", self.nodes[idx].node.id, err);
            }
        }
    }

    pub fn release<P: Platform + ?Sized>(&mut self, hw: &mut P, idx: PowerIdx) -> PmResult<()> {
        let node = self.nodes.get_mut(idx).ok_or(PmError::InvalidParameter)?;
        if node.use_count == 0 {
            warn!("Power #{} released with a zero use count", node.node.id);
            return Err(PmError::InvalidParameter);
        }
        node.use_count -= 1;
        debug_ex!("Power #{} use count {}", node.node.id, node.use_count);
        if node.use_count == 0 && node.node.state == PowerState::On {
            return self.start_power_down(hw, idx);
        }
        Ok(())
    }

    fn start_power_up<P: Platform + ?Sized>(&mut self, hw: &mut P, idx: PowerIdx) -> PmResult<()> {
        let Some(parent) = self.nodes[idx].parent else {
            return self.power_up_self(hw, idx);
        };
        if !self.nodes[idx].parent_held {
            let expected = self.nodes[parent].use_count + 1;
            let node = &mut self.nodes[idx];
            node.parent_held = true;
            node.wf_parent_use_cnt = expected;
            if let Err(err) = self.request(hw, parent) {
                let node = &mut self.nodes[idx];
                node.parent_held = false;
                node.wf_parent_use_cnt = 0;
                return Err(err);
            }
        }
        if self.is_on(parent) {
            self.power_up_self(hw, idx)
        } else {
            self.nodes[idx].node.state = PowerState::PwrUpParent;
            debug_ex!("Power #{} waiting for parent", self.nodes[idx].node.id);
            Ok(())
        }
    }

    fn power_up_self<P: Platform + ?Sized>(&mut self, hw: &mut P, idx: PowerIdx) -> PmResult<()> {
        let node = &mut self.nodes[idx];
        node.node.state = PowerState::PwrUpSelf;
        match hw.power_up(node.node.id) {
            Ok(PowerAck::Done) => self.complete_power_up(hw, idx),
            Ok(PowerAck::Pending) => {
                debug_ex!("Power #{} power-up pending", node.node.id);
                Ok(())
            }
            Err(err) => {
                error!("Power #{}: power-up failed: {}", node.node.id, err);
                node.node.state = PowerState::Off;
                Err(err)
            }
        }
    }

    fn complete_power_up<P: Platform + ?Sized>(&mut self, hw: &mut P, idx: PowerIdx) -> PmResult<()> {
        let node = &mut self.nodes[idx];
        node.node.state = PowerState::On;
        node.wf_parent_use_cnt = 0;
        info!("Power #{} on", node.node.id);
        if node.use_count == 0 {
            return self.start_power_down(hw, idx);
        }
        let waiting: Vec<PowerIdx> = (0..self.nodes.len())
            .filter(|&c| {
                let child = &self.nodes[c];
                child.parent == Some(idx) && child.node.state == PowerState::PwrUpParent
            })
            .collect();
        for child in waiting {
            // The child stays off and is retried by its next request.
            if let Err(err) = self.power_up_self(hw, child) {
                error!("Power #{}: child #{} did not follow: {}", self.nodes[idx].node.id, self.nodes[child].node.id, err);
            }
        }
        Ok(())
    }

    fn start_power_down<P: Platform + ?Sized>(&mut self, hw: &mut P, idx: PowerIdx) -> PmResult<()> {
        let node = &mut self.nodes[idx];
        node.node.state = PowerState::PwrDownSelf;
        match hw.power_down(node.node.id) {
            Ok(PowerAck::Done) => self.complete_power_down(hw, idx),
            Ok(PowerAck::Pending) => {
                debug_ex!("Power #{} power-down pending", node.node.id);
                Ok(())
            }
            Err(err) => {
                error!("Power #{}: power-down failed: {}", node.node.id, err);
                node.node.state = PowerState::On;
                Err(err)
            }
        }
    }

    fn complete_power_down<P: Platform + ?Sized>(&mut self, hw: &mut P, idx: PowerIdx) -> PmResult<()> {
        let node = &mut self.nodes[idx];
        node.node.state = PowerState::PwrDownParent;
        if node.parent_held {
            node.parent_held = false;
            if let Some(parent) = node.parent {
                self.release(hw, parent)?;
            }
        }
        let node = &mut self.nodes[idx];
        node.node.state = PowerState::Off;
        info!("Power #{} off", node.node.id);
        if node.use_count > 0 {
            return self.start_power_up(hw, idx);
        }
        Ok(())
    }

    /// The power controller finished the transition it deferred for `idx`.
    pub fn handle_event<P: Platform + ?Sized>(&mut self, hw: &mut P, idx: PowerIdx) -> PmResult<()> {
        let node = self.nodes.get(idx).ok_or(PmError::InvalidParameter)?;
        let (id, state) = (node.node.id, node.node.state);
        match state {
            PowerState::PwrUpSelf => self.complete_power_up(hw, idx),
            PowerState::PwrDownSelf => self.complete_power_down(hw, idx),
            _ => {
                warn!("Power #{}: unexpected power event in {:?}", id, state);
                Err(PmError::InvalidParameter)
            }
        }
    }

    // endregion

    /// Mark `idx` and everything below it off, with no hardware access and no
    /// reference held. Used when a reset takes the domains down behind our back.
    pub fn force_off(&mut self, idx: PowerIdx) {
        let held_parent = self.nodes[idx].parent_held;
        for i in 0..self.nodes.len() {
            if self.is_within(i, idx) {
                let node = &mut self.nodes[i];
                node.node.state = PowerState::Off;
                node.use_count = 0;
                node.wf_parent_use_cnt = 0;
                node.parent_held = false;
                debug_ex!("Power #{} forced off", node.node.id);
            }
        }
        // The forced subtree no longer holds its reference on the parent above it.
        if let (true, Some(parent)) = (held_parent, self.nodes[idx].parent) {
            let parent = &mut self.nodes[parent];
            parent.use_count = parent.use_count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::{SimEvent, SimPlatform};

    const ROOT: NodeId = NodeId::power(0);
    const MID: NodeId = NodeId::power(1);
    const LEAF: NodeId = NodeId::power(2);

    fn tree() -> PowerTree {
        let mut tree = PowerTree::new();
        let root = tree.add(PowerNode::new(ROOT, 0, None, 10, 10)).unwrap();
        let mid = tree.add(PowerNode::new(MID, 0, Some(root), 10, 10)).unwrap();
        tree.add(PowerNode::new(LEAF, 0, Some(mid), 10, 10)).unwrap();
        tree
    }

    #[test]
    fn request_powers_the_chain_top_down() {
        let mut tree = tree();
        let mut sim = SimPlatform::new();
        tree.request(&mut sim, 2).unwrap();
        assert!((0..3).all(|i| tree.is_on(i)));
        assert_eq!(tree.get(0).unwrap().use_count, 1);
        assert_eq!(tree.get(1).unwrap().use_count, 1);
        let ups: Vec<_> = sim
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::PowerUp(id) => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(ups, [ROOT, MID, LEAF]);
    }

    #[test]
    fn release_powers_down_bottom_up() {
        let mut tree = tree();
        let mut sim = SimPlatform::new();
        tree.request(&mut sim, 2).unwrap();
        sim.clear_events();
        tree.release(&mut sim, 2).unwrap();
        assert!((0..3).all(|i| tree.get(i).unwrap().state() == PowerState::Off));
        assert_eq!(sim.events, [
            SimEvent::PowerDown(LEAF),
            SimEvent::PowerDown(MID),
            SimEvent::PowerDown(ROOT)
        ]);
        assert_eq!(tree.release(&mut sim, 2), Err(PmError::InvalidParameter));
    }

    #[test]
    fn shared_parent_stays_on() {
        let mut tree = tree();
        let mut sim = SimPlatform::new();
        tree.request(&mut sim, 1).unwrap();
        tree.request(&mut sim, 2).unwrap();
        tree.release(&mut sim, 2).unwrap();
        assert!(tree.is_on(1));
        assert_eq!(tree.get(1).unwrap().use_count, 1);
    }

    #[test]
    fn pending_parent_defers_child() {
        let mut tree = tree();
        let mut sim = SimPlatform::new();
        sim.defer_power(MID);
        tree.request(&mut sim, 2).unwrap();
        assert_eq!(tree.get(1).unwrap().state(), PowerState::PwrUpSelf);
        assert_eq!(tree.get(2).unwrap().state(), PowerState::PwrUpParent);
        assert_eq!(tree.get(2).unwrap().wf_parent_use_cnt, 1);
        // Bookkeeping is already in place.
        assert_eq!(tree.get(1).unwrap().use_count, 1);

        tree.handle_event(&mut sim, 1).unwrap();
        assert!(tree.is_on(1));
        assert!(tree.is_on(2));
        assert_eq!(tree.handle_event(&mut sim, 2), Err(PmError::InvalidParameter));
    }

    #[test]
    fn release_during_pending_power_up_settles_off() {
        let mut tree = tree();
        let mut sim = SimPlatform::new();
        sim.defer_power(LEAF);
        tree.request(&mut sim, 2).unwrap();
        tree.release(&mut sim, 2).unwrap();
        assert_eq!(tree.get(2).unwrap().state(), PowerState::PwrUpSelf);
        sim.clear_deferred();
        tree.handle_event(&mut sim, 2).unwrap();
        assert!((0..3).all(|i| tree.get(i).unwrap().state() == PowerState::Off));
        assert_eq!(tree.get(0).unwrap().use_count, 0);
    }

    #[test]
    fn failed_power_up_can_be_retried() {
        let mut tree = tree();
        let mut sim = SimPlatform::new();
        sim.fail_power(ROOT);
        assert_eq!(tree.request(&mut sim, 0), Err(PmError::Failure));
        assert_eq!(tree.get(0).unwrap().state(), PowerState::Off);
        sim.clear_deferred();
        assert_eq!(tree.get(0).unwrap().use_count, 0);
        tree.request(&mut sim, 0).unwrap();
        assert!(tree.is_on(0));
        assert_eq!(tree.get(0).unwrap().use_count, 1);
    }

    #[test]
    fn failed_child_power_up_returns_parent_reference() {
        let mut tree = tree();
        let mut sim = SimPlatform::new();
        sim.fail_power(MID);
        assert_eq!(tree.request(&mut sim, 1), Err(PmError::Failure));
        assert_eq!(tree.get(1).unwrap().use_count, 0);
        assert_eq!(tree.get(0).unwrap().use_count, 0);
        assert_eq!(tree.get(0).unwrap().state(), PowerState::Off);
    }

    #[test]
    fn force_off_clears_subtree() {
        let mut tree = tree();
        let mut sim = SimPlatform::new();
        tree.request(&mut sim, 2).unwrap();
        tree.force_off(1);
        assert_eq!(tree.get(1).unwrap().state(), PowerState::Off);
        assert_eq!(tree.get(2).unwrap().use_count, 0);
        assert!(tree.is_on(0));
        assert_eq!(tree.get(0).unwrap().use_count, 0);
        assert_eq!(tree.depth(2), Some(3));
        assert!(tree.is_within(2, 0));
        assert!(!tree.is_within(0, 2));
    }
}
