//! Raw command words and their typed form.
//!
//! A command arrives as an API id plus up to a handful of `u32` argument words.
//! [Command::decode] turns them into a [Command]; the [Orchestrator](crate::Orchestrator)
//! runs it and answers with a [Response]: a status code plus return words.

use heapless::Vec as BoundedVec;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    error::{PmError, PmResult, STATUS_SUCCESS},
    node::NodeId,
    requirement::{Capabilities, UsagePolicy},
    reset::ResetAction,
    subsystem::SubsystemState,
};

/// Most words a response carries.
pub const MAX_RESPONSE_WORDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ApiId {
    GetNodeStatus = 0x03,
    ForcePowerdown = 0x08,
    RequestNode = 0x0D,
    ReleaseNode = 0x0E,
    SetRequirement = 0x0F,
    SetMaxLatency = 0x10,
    ResetAssert = 0x11,
    ResetGetStatus = 0x12,
    ClockEnable = 0x24,
    ClockDisable = 0x25,
    ClockGetState = 0x26,
    ClockSetDivider = 0x27,
    ClockGetDivider = 0x28,
    ClockGetRate = 0x2A,
    ClockSetParent = 0x2B,
    ClockGetParent = 0x2C,
    AddRequirement = 0x40,
    CreateSubsystem = 0x41,
    DestroySubsystem = 0x42,
    SetSubsystemState = 0x43,
    CheckPermission = 0x44,
    PowerEvent = 0x45,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetDeviceStatus { device: NodeId },
    ForcePowerDown { domain: NodeId },
    RequestDevice { device: NodeId, caps: Capabilities, qos: u32 },
    ReleaseDevice { device: NodeId },
    SetRequirement { device: NodeId, caps: Capabilities, qos: u32 },
    SetMaxLatency { device: NodeId, latency: u32 },
    SetResetState { reset: NodeId, action: ResetAction },
    GetResetState { reset: NodeId },
    SetClockGate { clock: NodeId, enable: bool },
    GetClockGate { clock: NodeId },
    SetClockDivider { clock: NodeId, divider: u32 },
    GetClockDivider { clock: NodeId },
    GetClockRate { clock: NodeId },
    SetClockParent { clock: NodeId, parent_index: u32 },
    GetClockParent { clock: NodeId },
    AddRequirement { subsystem: NodeId, device: NodeId, policy: UsagePolicy },
    CreateSubsystem,
    DestroySubsystem { subsystem: NodeId },
    SetSubsystemState { subsystem: NodeId, state: SubsystemState },
    CheckPermission { node: NodeId },
    PowerEvent { domain: NodeId },
}

/// Argument words, consumed front to back. Running out is an invalid parameter.
struct Args<'a>(core::slice::Iter<'a, u32>);

impl Args<'_> {
    fn word(&mut self) -> PmResult<u32> {
        self.0.next().copied().ok_or(PmError::InvalidParameter)
    }

    fn node(&mut self) -> PmResult<NodeId> {
        self.word().map(NodeId::from)
    }

    fn caps(&mut self) -> PmResult<Capabilities> {
        Capabilities::from_bits(self.word()?).ok_or(PmError::InvalidParameter)
    }
}

impl Command {
    pub fn decode(api_id: u32, args: &[u32]) -> PmResult<Command> {
        let api = ApiId::try_from(api_id).map_err(|_| PmError::InvalidParameter)?;
        let mut a = Args(args.iter());
        let cmd = match api {
            ApiId::GetNodeStatus => Command::GetDeviceStatus { device: a.node()? },
            ApiId::ForcePowerdown => Command::ForcePowerDown { domain: a.node()? },
            ApiId::RequestNode => Command::RequestDevice {
                device: a.node()?,
                caps: a.caps()?,
                qos: a.word()?,
            },
            ApiId::ReleaseNode => Command::ReleaseDevice { device: a.node()? },
            ApiId::SetRequirement => Command::SetRequirement {
                device: a.node()?,
                caps: a.caps()?,
                qos: a.word()?,
            },
            ApiId::SetMaxLatency => Command::SetMaxLatency {
                device: a.node()?,
                latency: a.word()?,
            },
            ApiId::ResetAssert => Command::SetResetState {
                reset: a.node()?,
                action: ResetAction::try_from(a.word()?).map_err(|_| PmError::InvalidParameter)?,
            },
            ApiId::ResetGetStatus => Command::GetResetState { reset: a.node()? },
            ApiId::ClockEnable => Command::SetClockGate {
                clock: a.node()?,
                enable: true,
            },
            ApiId::ClockDisable => Command::SetClockGate {
                clock: a.node()?,
                enable: false,
            },
            ApiId::ClockGetState => Command::GetClockGate { clock: a.node()? },
            ApiId::ClockSetDivider => Command::SetClockDivider {
                clock: a.node()?,
                divider: a.word()?,
            },
            ApiId::ClockGetDivider => Command::GetClockDivider { clock: a.node()? },
            ApiId::ClockGetRate => Command::GetClockRate { clock: a.node()? },
            ApiId::ClockSetParent => Command::SetClockParent {
                clock: a.node()?,
                parent_index: a.word()?,
            },
            ApiId::ClockGetParent => Command::GetClockParent { clock: a.node()? },
            ApiId::AddRequirement => Command::AddRequirement {
                subsystem: a.node()?,
                device: a.node()?,
                policy: UsagePolicy::try_from(a.word()?).map_err(|_| PmError::InvalidParameter)?,
            },
            ApiId::CreateSubsystem => Command::CreateSubsystem,
            ApiId::DestroySubsystem => Command::DestroySubsystem { subsystem: a.node()? },
            ApiId::SetSubsystemState => Command::SetSubsystemState {
                subsystem: a.node()?,
                state: SubsystemState::try_from(a.word()?).map_err(|_| PmError::InvalidParameter)?,
            },
            ApiId::CheckPermission => Command::CheckPermission { node: a.node()? },
            ApiId::PowerEvent => Command::PowerEvent { domain: a.node()? },
        };
        Ok(cmd)
    }
}

/// Status code plus return words, as sent back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u32,
    pub values: BoundedVec<u32, MAX_RESPONSE_WORDS>,
}

impl Response {
    pub fn ok(values: &[u32]) -> Response {
        match BoundedVec::from_slice(values) {
            Ok(values) => Response {
                status: STATUS_SUCCESS,
                values,
            },
            Err(_) => Response::error(PmError::BufferExhausted),
        }
    }

    pub fn error(err: PmError) -> Response {
        Response {
            status: err.code(),
            values: BoundedVec::new(),
        }
    }

    pub fn from_result(result: PmResult<Response>) -> Response {
        result.unwrap_or_else(Response::error)
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

/// Split a 64-bit value into low and high words.
pub fn split_u64(value: u64) -> [u32; 2] {
    [value as u32, (value >> 32) as u32]
}
