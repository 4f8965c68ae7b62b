//! Status codes reported by every orchestrator operation.

use core::fmt::{Display, Formatter};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use utils::table::TableFull;

/// Status code of a successful command.
pub const STATUS_SUCCESS: u32 = 0;

/// Failure kinds. The discriminant is the status code reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum PmError {
    /// A register operation or hardware handshake did not complete, including timeouts.
    Failure = 1,
    /// Bad node id, out-of-range index, or a request the topology cannot satisfy.
    InvalidParameter = 15,
    /// The device is in the middle of a transition.
    Busy = 21,
    /// Permission check failed, or the resource is held exclusively by someone else.
    NoAccess = 2002,
    /// A fixed-size table has no free slot.
    BufferExhausted = 2013,
}

impl PmError {
    pub fn code(self) -> u32 {
        self.into()
    }
}

impl Display for PmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            PmError::Failure => "operation failed",
            PmError::InvalidParameter => "invalid parameter",
            PmError::Busy => "device busy",
            PmError::NoAccess => "no access",
            PmError::BufferExhausted => "table exhausted",
        };
        write!(f, "{} ({})", msg, self.code())
    }
}

impl From<TableFull> for PmError {
    fn from(_: TableFull) -> Self {
        PmError::BufferExhausted
    }
}

pub type PmResult<T> = Result<T, PmError>;
