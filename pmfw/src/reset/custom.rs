//! Resets with side effects beyond their own bit-field.

use log::info;

use super::{IsolationCell, ResetAction, ResetNode, generic};
use crate::{
    hw::RegisterIo,
    power::{PowerIdx, PowerTree},
};

/// Assert (or pulse) the system reset.
///
/// The domains it takes down are marked off first and the isolation cells between
/// them are closed, so no bus transaction crosses a domain while it is in reset.
pub(super) fn system_reset<R: RegisterIo + ?Sized>(
    io: &mut R,
    power: &mut PowerTree,
    rst: &ResetNode,
    domains: &[PowerIdx],
    isolation: &[IsolationCell],
    action: ResetAction,
) {
    if action != ResetAction::Release {
        for &domain in domains {
            power.force_off(domain);
        }
        for cell in isolation {
            io.read_modify_write(cell.address, cell.mask, cell.mask);
        }
        info!("System reset #{}: {} domains down, isolation closed", rst.node.id, domains.len());
    }
    generic(io, rst, action);
}

pub(super) fn low_power_domain<R: RegisterIo + ?Sized>(
    io: &mut R,
    rst: &ResetNode,
    action: ResetAction,
) {
    match action {
        // TODO: sequence the LPD pulse (isolation, SRST, re-init) once the
        // power controller exposes it.
        ResetAction::Pulse => {}
        _ => generic(io, rst, action),
    }
}
