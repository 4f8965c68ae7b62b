//! Hardware contracts consumed by the orchestrator.
//!
//! - [RegisterIo]: 32-bit register access. Synchronous and infallible from the
//!   orchestrator's point of view.
//! - [Platform]: register access plus the power controller, whose acknowledgement may
//!   arrive later as a power event.
//! - [poll_for]: the only blocking point, bounded by `MAX_POLL_RETRIES`.
//!
//! [Mmio] backs [RegisterIo] with volatile accesses; [sim::SimPlatform] backs it with a
//! register file for host runs.

pub mod sim;

use config::build_flags::MAX_POLL_RETRIES;
use core::ptr::{read_volatile, write_volatile};

use crate::{
    error::{PmError, PmResult},
    node::NodeId,
};

pub trait RegisterIo {
    fn read(&mut self, address: u32) -> u32;
    fn write(&mut self, address: u32, value: u32);

    /// Replace the bits selected by `mask` with the matching bits of `value`.
    fn read_modify_write(&mut self, address: u32, mask: u32, value: u32) {
        let old = self.read(address);
        self.write(address, (old & !mask) | (value & mask));
    }
}

/// How the power controller answered a power-up or power-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAck {
    /// The transition completed before returning.
    Done,
    /// The transition completes later; a power event will follow.
    Pending,
}

pub trait Platform: RegisterIo {
    fn power_up(&mut self, node: NodeId) -> PmResult<PowerAck> {
        debug_ex!("Power up #{}: no power controller, assuming done", node);
        Ok(PowerAck::Done)
    }

    fn power_down(&mut self, node: NodeId) -> PmResult<PowerAck> {
        debug_ex!("Power down #{}: no power controller, assuming done", node);
        Ok(PowerAck::Done)
    }
}

/// Poll `address` until `value & mask == expected`.
/// Gives up with [PmError::Failure] after `MAX_POLL_RETRIES` reads.
pub fn poll_for<R: RegisterIo + ?Sized>(
    io: &mut R,
    address: u32,
    mask: u32,
    expected: u32,
) -> PmResult<()> {
    for _ in 0..MAX_POLL_RETRIES {
        if io.read(address) & mask == expected {
            return Ok(());
        }
        core::hint::spin_loop();
    }
    log::error!(
        "Timeout polling #{:#x}: mask {:#x} never read {:#x}",
        address,
        mask,
        expected
    );
    Err(PmError::Failure)
}

/// Memory-mapped register window. Register addresses are offsets from `base`.
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    /// Every address the topology names, offset by `base`, must be a mapped, aligned
    /// 32-bit device register for as long as this value lives.
    pub const unsafe fn new(base: usize) -> Mmio {
        Mmio { base }
    }

    #[inline]
    fn ptr(&self, address: u32) -> *mut u32 {
        (self.base + address as usize) as *mut u32
    }
}

impl RegisterIo for Mmio {
    #[inline]
    fn read(&mut self, address: u32) -> u32 {
        // SAFETY: guaranteed by the contract of `Mmio::new`.
        unsafe { read_volatile(self.ptr(address)) }
    }

    #[inline]
    fn write(&mut self, address: u32, value: u32) {
        // SAFETY: guaranteed by the contract of `Mmio::new`.
        unsafe { write_volatile(self.ptr(address), value) }
    }
}

impl Platform for Mmio {}
