//! PLL lock handling.

use crate::{
    error::PmResult,
    hw::{RegisterIo, poll_for},
};

use super::ClockIdx;

/// A PLL driven from a reference clock.
///
/// The control register sits at the node's base address; the PLL runs once its reset
/// bit is cleared and reports lock through a status register.
#[derive(Debug, Clone)]
pub struct PllClock {
    pub parent: ClockIdx,
    pub reset_shift: u32,
    /// Status register offset from the base address.
    pub status_offset: u32,
    pub lock_shift: u32,
    /// Output rate multiplier applied to the parent rate.
    pub mult: u32,
}

impl PllClock {
    /// Take the PLL out of reset and wait for lock. A PLL that never locks is put back
    /// into reset.
    pub(super) fn lock<R: RegisterIo + ?Sized>(&self, io: &mut R, base: u32) -> PmResult<()> {
        io.read_modify_write(base, 1 << self.reset_shift, 0);
        let lock = 1 << self.lock_shift;
        poll_for(io, base.wrapping_add(self.status_offset), lock, lock).inspect_err(|_| {
            self.reset(io, base);
        })
    }

    pub(super) fn reset<R: RegisterIo + ?Sized>(&self, io: &mut R, base: u32) {
        let bit = 1 << self.reset_shift;
        io.read_modify_write(base, bit, bit);
    }

    pub fn is_locked<R: RegisterIo + ?Sized>(&self, io: &mut R, base: u32) -> bool {
        io.read(base.wrapping_add(self.status_offset)) & (1 << self.lock_shift) != 0
    }
}
